//! Translates [`crate::dag::Secret`] nodes into Envoy SDS `Secret`
//! resources (section 4.C "Secret cache"). Names carry the content-hash
//! prefix baked into the DAG node, so a rotation (same name, new bytes)
//! always produces a new SDS resource name and forces Envoy to reload
//! cleanly rather than silently keep serving the old certificate.

use envoy_types::pb::envoy::config::core::v3::{data_source::Specifier, DataSource};
use envoy_types::pb::envoy::extensions::transport_sockets::tls::v3::{
    secret, CertificateValidationContext, Secret as EnvoySecret, TlsCertificate,
};

use crate::dag;
use crate::xds::resources::{BuiltResource, SECRET_TYPE_URL};

/// Builds one SDS resource per secret in the DAG. Entry names are the
/// content-namespaced `dag::Secret::key` values, exactly as bound into
/// listener/cluster transport sockets.
pub fn build_secrets<'a>(secrets: impl IntoIterator<Item = &'a dag::Secret>) -> Vec<BuiltResource> {
    secrets.into_iter().map(build_secret).collect()
}

fn build_secret(secret: &dag::Secret) -> BuiltResource {
    let secret_type = match &secret.material {
        dag::SecretMaterial::Certificate { chain_pem, private_key_pem } => {
            secret::Type::TlsCertificate(TlsCertificate {
                certificate_chain: Some(inline_string(chain_pem)),
                private_key: Some(inline_string(private_key_pem)),
                ..Default::default()
            })
        }
        dag::SecretMaterial::CaBundle { trusted_ca_pem } => {
            secret::Type::ValidationContext(CertificateValidationContext {
                trusted_ca: Some(inline_string(trusted_ca_pem)),
                ..Default::default()
            })
        }
    };

    let envoy_secret = EnvoySecret { name: secret.key.clone(), r#type: Some(secret_type) };
    BuiltResource::new(secret.key.clone(), SECRET_TYPE_URL, &envoy_secret)
}

fn inline_string(value: &str) -> DataSource {
    DataSource { specifier: Some(Specifier::InlineString(value.to_string())), ..Default::default() }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ObjectKind, ObjectRef};

    fn cert_secret(key: &str) -> dag::Secret {
        dag::Secret {
            key: key.to_string(),
            source: ObjectRef::new(ObjectKind::Secret, "infra", "wildcard"),
            material: dag::SecretMaterial::Certificate {
                chain_pem: "chain".to_string(),
                private_key_pem: "key".to_string(),
            },
            content_hash_prefix: "abc123".to_string(),
        }
    }

    #[test]
    fn secret_name_carries_content_hash() {
        let secrets = vec![cert_secret("infra/wildcard/abc123")];
        let built = build_secrets(&secrets);
        assert_eq!(built.len(), 1);
        assert_eq!(built[0].name, "infra/wildcard/abc123");
        assert_eq!(built[0].type_url(), SECRET_TYPE_URL);
    }

    #[test]
    fn rotation_changes_the_resource_name() {
        let before = build_secrets(&[cert_secret("infra/wildcard/abc123")]);
        let after = build_secrets(&[cert_secret("infra/wildcard/def456")]);
        assert_ne!(before[0].name, after[0].name);
    }

    #[test]
    fn ca_bundle_becomes_validation_context() {
        let secret = dag::Secret {
            key: "infra/ca/abc123".to_string(),
            source: ObjectRef::new(ObjectKind::Secret, "infra", "ca"),
            material: dag::SecretMaterial::CaBundle { trusted_ca_pem: "ca".to_string() },
            content_hash_prefix: "abc123".to_string(),
        };
        let built = build_secrets(&[secret]);
        assert_eq!(built.len(), 1);
    }
}
