//! Translates the DAG's virtual host sets into Envoy `Listener` resources
//! (LDS): one HTTP listener, one HTTPS listener with a per-SNI filter chain
//! per secure virtual host, and a TLS-passthrough listener when any vhost
//! carries a `TcpProxy` target (section 4.C "Listener cache").

use envoy_types::pb::envoy::config::accesslog::v3::{access_log::ConfigType as AccessLogConfigType, AccessLog};
use envoy_types::pb::envoy::config::core::v3::{
    address::Address as AddressKind, config_source::ConfigSourceSpecifier,
    socket_address::PortSpecifier, substitution_format_string::Format as SubstitutionFormat,
    AggregatedConfigSource, Address, ConfigSource, SocketAddress, SubstitutionFormatString,
};
use envoy_types::pb::envoy::config::listener::v3::{
    Filter, FilterChain, FilterChainMatch, Listener,
};
use envoy_types::pb::envoy::extensions::access_loggers::file::v3::{
    file_access_log::AccessLogFormat, FileAccessLog,
};
use envoy_types::pb::envoy::extensions::filters::network::http_connection_manager::v3::{
    http_connection_manager::{CodecType, RouteSpecifier},
    HttpConnectionManager, Rds,
};
use envoy_types::pb::envoy::extensions::filters::network::tcp_proxy::v3::{
    tcp_proxy::ClusterSpecifier as TcpClusterSpecifier, TcpProxy as EnvoyTcpProxy,
};
use envoy_types::pb::envoy::extensions::transport_sockets::tls::v3::{
    CommonTlsContext, DownstreamTlsContext, SdsSecretConfig, TlsParameters,
};
use envoy_types::pb::google::protobuf::Any as EnvoyAny;
use prost::Message;

use crate::config::{AccessLogConfig, AccessLogFormat as ConfiguredAccessLogFormat, AppConfig, TlsProtocolVersion};
use crate::dag::{self, Dag};
use crate::xds::filters::http::{build_http_filters, HttpFilterConfigEntry, HttpFilterKind};

const HCM_TYPE_URL: &str =
    "type.googleapis.com/envoy.extensions.filters.network.http_connection_manager.v3.HttpConnectionManager";
const TCP_PROXY_TYPE_URL: &str =
    "type.googleapis.com/envoy.extensions.filters.network.tcp_proxy.v3.TcpProxy";
const DOWNSTREAM_TLS_TYPE_URL: &str =
    "type.googleapis.com/envoy.extensions.transport_sockets.tls.v3.DownstreamTlsContext";
const FILE_ACCESS_LOG_TYPE_URL: &str =
    "type.googleapis.com/envoy.extensions.access_loggers.file.v3.FileAccessLog";

pub const HTTP_LISTENER_NAME: &str = "contour-http";
pub const HTTPS_LISTENER_NAME: &str = "contour-https";
pub const INSECURE_ROUTE_CONFIG_NAME: &str = "contour-insecure";
pub const SECURE_ROUTE_CONFIG_NAME: &str = "contour-secure";
const TLS_PASSTHROUGH_LISTENER_NAME: &str = "contour-tls-passthrough";

/// Builds every listener this control plane ever emits: the plaintext
/// listener is always present, the HTTPS listener is present whenever at
/// least one secure virtual host exists, and the TLS-passthrough listener
/// is present whenever at least one vhost carries a `TcpProxy` target.
pub fn build_listeners(dag: &Dag, config: &AppConfig) -> Vec<Listener> {
    let mut listeners = Vec::new();
    listeners.push(build_http_listener(config));

    if !dag.secure_virtual_hosts.is_empty() {
        listeners.push(build_https_listener(dag, config));
    }

    let passthrough: Vec<_> =
        dag.secure_virtual_hosts.values().filter(|vh| vh.tcp_proxy.is_some()).collect();
    if !passthrough.is_empty() {
        listeners.push(build_tls_passthrough_listener(&passthrough, config));
    }

    listeners
}

fn build_http_listener(config: &AppConfig) -> Listener {
    let hcm = build_hcm(INSECURE_ROUTE_CONFIG_NAME, config, &[]);
    Listener {
        name: HTTP_LISTENER_NAME.to_string(),
        address: Some(socket_address(
            &config.envoy.http_listener.address,
            config.envoy.http_listener.port,
        )),
        filter_chains: vec![FilterChain {
            filters: vec![network_filter(HCM_TYPE_URL, &hcm)],
            ..Default::default()
        }],
        ..Default::default()
    }
}

fn build_https_listener(dag: &Dag, config: &AppConfig) -> Listener {
    let mut filter_chains = Vec::new();

    for vh in dag.secure_virtual_hosts.values() {
        let Some(secure) = &vh.secure else { continue };
        let hcm = build_hcm(SECURE_ROUTE_CONFIG_NAME, config, &[]);

        filter_chains.push(FilterChain {
            filter_chain_match: Some(FilterChainMatch {
                server_names: vec![vh.fqdn.clone()],
                ..Default::default()
            }),
            filters: vec![network_filter(HCM_TYPE_URL, &hcm)],
            transport_socket: Some(downstream_transport_socket(secure, &dag.secrets)),
            ..Default::default()
        });
    }

    if let Some(fallback) = fallback_filter_chain(dag, config) {
        filter_chains.push(fallback);
    }

    Listener {
        name: HTTPS_LISTENER_NAME.to_string(),
        address: Some(socket_address(
            &config.envoy.https_listener.address,
            config.envoy.https_listener.port,
        )),
        filter_chains,
        ..Default::default()
    }
}

/// The default filter chain bound to the fallback certificate (section 4.B
/// pass 7), matched for SNI-less or unrecognized-SNI connections. Only
/// built when at least one secure vhost opted in via
/// `enableFallbackCertificate` and a fallback certificate is configured.
fn fallback_filter_chain(dag: &Dag, config: &AppConfig) -> Option<FilterChain> {
    let fallback_name = config.tls.fallback_certificate.as_ref()?;
    let fallback_key = format!("{}/{}", fallback_name.namespace, fallback_name.name);

    let opted_in = dag
        .secure_virtual_hosts
        .values()
        .any(|vh| vh.secure.as_ref().is_some_and(|s| s.fallback_certificate));
    if !opted_in {
        return None;
    }

    let secret = dag.secrets.values().find(|s| s.key.starts_with(&fallback_key))?;
    let hcm = build_hcm(SECURE_ROUTE_CONFIG_NAME, config, &[]);

    Some(FilterChain {
        filter_chain_match: Some(FilterChainMatch::default()),
        filters: vec![network_filter(HCM_TYPE_URL, &hcm)],
        transport_socket: Some(transport_socket_for_secret(&secret.key, config)),
        ..Default::default()
    })
}

fn build_tls_passthrough_listener(vhosts: &[&dag::VirtualHost], config: &AppConfig) -> Listener {
    let filter_chains = vhosts
        .iter()
        .filter_map(|vh| {
            let tcp_proxy = vh.tcp_proxy.as_ref()?;
            let cluster = tcp_proxy.clusters.first()?.cluster.clone();
            let proxy = EnvoyTcpProxy {
                stat_prefix: "tls_passthrough".to_string(),
                cluster_specifier: Some(TcpClusterSpecifier::Cluster(cluster)),
                ..Default::default()
            };
            Some(FilterChain {
                filter_chain_match: Some(FilterChainMatch {
                    server_names: vec![vh.fqdn.clone()],
                    ..Default::default()
                }),
                filters: vec![network_filter(TCP_PROXY_TYPE_URL, &proxy)],
                ..Default::default()
            })
        })
        .collect();

    Listener {
        name: TLS_PASSTHROUGH_LISTENER_NAME.to_string(),
        address: Some(socket_address(
            &config.envoy.https_listener.address,
            config.envoy.https_listener.port,
        )),
        filter_chains,
        ..Default::default()
    }
}

fn build_hcm(route_config_name: &str, config: &AppConfig, extra_filters: &[HttpFilterConfigEntry]) -> HttpConnectionManager {
    let mut entries = extra_filters.to_vec();
    entries.push(HttpFilterConfigEntry {
        name: None,
        is_optional: false,
        disabled: false,
        filter: HttpFilterKind::Router,
    });
    let http_filters = build_http_filters(&entries).unwrap_or_default();

    HttpConnectionManager {
        stat_prefix: "ingress_http".to_string(),
        codec_type: CodecType::Auto as i32,
        route_specifier: Some(RouteSpecifier::Rds(Rds {
            route_config_name: route_config_name.to_string(),
            config_source: Some(ConfigSource {
                config_source_specifier: Some(ConfigSourceSpecifier::Ads(AggregatedConfigSource::default())),
                resource_api_version: 0,
                ..Default::default()
            }),
        })),
        http_filters,
        access_log: vec![build_access_log(&config.access_log)],
        request_timeout: config.timeouts.request_timeout_seconds.map(duration),
        stream_idle_timeout: config.timeouts.stream_idle_timeout_seconds.map(duration),
        ..Default::default()
    }
}

fn duration(seconds: u64) -> envoy_types::pb::google::protobuf::Duration {
    envoy_types::pb::google::protobuf::Duration { seconds: seconds as i64, nanos: 0 }
}

fn socket_address(address: &str, port: u16) -> Address {
    Address {
        address: Some(AddressKind::SocketAddress(SocketAddress {
            address: address.to_string(),
            port_specifier: Some(PortSpecifier::PortValue(port as u32)),
            ..Default::default()
        })),
    }
}

fn network_filter<M: Message>(type_url: &str, message: &M) -> Filter {
    Filter {
        name: type_url.rsplit('.').nth(1).unwrap_or("filter").to_string(),
        config_type: Some(envoy_types::pb::envoy::config::listener::v3::filter::ConfigType::TypedConfig(
            EnvoyAny { type_url: type_url.to_string(), value: message.encode_to_vec() },
        )),
    }
}

fn downstream_transport_socket(
    secure: &dag::SecureVirtualHostExtras,
    _secrets: &std::collections::BTreeMap<String, dag::Secret>,
) -> envoy_types::pb::envoy::config::core::v3::TransportSocket {
    transport_socket_for_protocol(
        &secure.secret,
        secure.minimum_protocol_version,
        secure.maximum_protocol_version,
        &secure.cipher_suites,
    )
}

fn transport_socket_for_secret(
    secret_name: &str,
    config: &AppConfig,
) -> envoy_types::pb::envoy::config::core::v3::TransportSocket {
    transport_socket_for_protocol(
        secret_name,
        config.tls.minimum_protocol_version,
        config.tls.maximum_protocol_version,
        &config.tls.cipher_suites,
    )
}

/// Builds the downstream TLS context carrying protocol-version and
/// cipher-suite parameters plus an SDS reference to the named secret cache
/// entry; certificate material itself is delivered out-of-band over ADS
/// (section 4.C "Secret cache"), never inlined here.
fn transport_socket_for_protocol(
    secret_name: &str,
    min_version: TlsProtocolVersion,
    max_version: TlsProtocolVersion,
    cipher_suites: &[String],
) -> envoy_types::pb::envoy::config::core::v3::TransportSocket {
    let tls_params = TlsParameters {
        tls_minimum_protocol_version: protocol_version(min_version) as i32,
        tls_maximum_protocol_version: protocol_version(max_version) as i32,
        cipher_suites: cipher_suites.to_vec(),
        ..Default::default()
    };

    let common = CommonTlsContext {
        tls_params: Some(tls_params),
        tls_certificate_sds_secret_configs: vec![sds_secret_config(secret_name)],
        ..Default::default()
    };

    let downstream = DownstreamTlsContext { common_tls_context: Some(common), ..Default::default() };

    envoy_types::pb::envoy::config::core::v3::TransportSocket {
        name: "envoy.transport_sockets.tls".to_string(),
        config_type: Some(
            envoy_types::pb::envoy::config::core::v3::transport_socket::ConfigType::TypedConfig(EnvoyAny {
                type_url: DOWNSTREAM_TLS_TYPE_URL.to_string(),
                value: downstream.encode_to_vec(),
            }),
        ),
    }
}

fn sds_secret_config(name: &str) -> SdsSecretConfig {
    SdsSecretConfig {
        name: name.to_string(),
        sds_config: Some(ConfigSource {
            config_source_specifier: Some(ConfigSourceSpecifier::Ads(AggregatedConfigSource::default())),
            ..Default::default()
        }),
    }
}

fn protocol_version(
    version: TlsProtocolVersion,
) -> envoy_types::pb::envoy::extensions::transport_sockets::tls::v3::tls_parameters::TlsProtocol {
    use envoy_types::pb::envoy::extensions::transport_sockets::tls::v3::tls_parameters::TlsProtocol;
    match version {
        TlsProtocolVersion::V1_2 => TlsProtocol::TlSv1_2,
        TlsProtocolVersion::V1_3 => TlsProtocol::TlSv1_3,
    }
}

fn build_access_log(config: &AccessLogConfig) -> AccessLog {
    let format = match config.format {
        ConfiguredAccessLogFormat::EnvoyText => {
            let text = config
                .fields
                .iter()
                .map(|field| access_log_operator(field))
                .collect::<Vec<_>>()
                .join(" ");
            SubstitutionFormat::TextFormat(format!("{text}\n"))
        }
        ConfiguredAccessLogFormat::Json => {
            let fields = config
                .fields
                .iter()
                .map(|field| {
                    (
                        field.clone(),
                        envoy_types::pb::google::protobuf::Value {
                            kind: Some(envoy_types::pb::google::protobuf::value::Kind::StringValue(
                                access_log_operator(field).to_string(),
                            )),
                        },
                    )
                })
                .collect();
            SubstitutionFormat::JsonFormat(envoy_types::pb::google::protobuf::Struct { fields })
        }
    };

    let file_log = FileAccessLog {
        path: "/dev/stdout".to_string(),
        access_log_format: Some(AccessLogFormat::LogFormat(SubstitutionFormatString {
            format: Some(format),
            ..Default::default()
        })),
    };

    AccessLog {
        name: "envoy.access_loggers.file".to_string(),
        filter: None,
        config_type: Some(AccessLogConfigType::TypedConfig(EnvoyAny {
            type_url: FILE_ACCESS_LOG_TYPE_URL.to_string(),
            value: file_log.encode_to_vec(),
        })),
    }
}

/// Maps one of the closed set of [`crate::config::settings::ACCESS_LOG_FIELD_NAMES`]
/// onto its Envoy access-log format operator.
fn access_log_operator(field: &str) -> &'static str {
    match field {
        "timestamp" => "%START_TIME%",
        "method" => "%REQ(:METHOD)%",
        "path" => "%REQ(:PATH)%",
        "protocol" => "%PROTOCOL%",
        "response_code" => "%RESPONSE_CODE%",
        "response_flags" => "%RESPONSE_FLAGS%",
        "bytes_received" => "%BYTES_RECEIVED%",
        "bytes_sent" => "%BYTES_SENT%",
        "duration" => "%DURATION%",
        "upstream_host" => "%UPSTREAM_HOST%",
        "upstream_cluster" => "%UPSTREAM_CLUSTER%",
        "authority" => "%REQ(:AUTHORITY)%",
        "user_agent" => "%REQ(USER-AGENT)%",
        "request_id" => "%REQ(X-REQUEST-ID)%",
        _ => "%START_TIME%",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;

    #[test]
    fn http_listener_always_present() {
        let dag = Dag::default();
        let config = AppConfig::default();
        let listeners = build_listeners(&dag, &config);
        assert!(listeners.iter().any(|l| l.name == HTTP_LISTENER_NAME));
        assert!(!listeners.iter().any(|l| l.name == HTTPS_LISTENER_NAME));
    }

    #[test]
    fn access_log_rejects_nothing_from_closed_set() {
        let config = AccessLogConfig {
            format: ConfiguredAccessLogFormat::EnvoyText,
            fields: vec!["timestamp".into(), "response_code".into()],
        };
        let log = build_access_log(&config);
        assert_eq!(log.name, "envoy.access_loggers.file");
    }

    #[test]
    fn secure_vhost_filter_chain_references_secret_via_sds() {
        let mut dag = Dag::default();
        dag.secure_virtual_hosts.insert(
            "secure.example.com".to_string(),
            dag::VirtualHost {
                fqdn: "secure.example.com".to_string(),
                routes: Vec::new(),
                cors_policy: None,
                rate_limit_policy: None,
                header_policy: dag::HeaderPolicy::default(),
                secure: Some(dag::SecureVirtualHostExtras {
                    secret: "infra/wildcard/abc123".to_string(),
                    minimum_protocol_version: TlsProtocolVersion::V1_2,
                    maximum_protocol_version: TlsProtocolVersion::V1_3,
                    cipher_suites: Vec::new(),
                    fallback_certificate: false,
                    invalid: None,
                }),
                tcp_proxy: None,
                sources: Vec::new(),
            },
        );
        let config = AppConfig::default();
        let listeners = build_listeners(&dag, &config);
        let https = listeners
            .iter()
            .find(|l| l.name == HTTPS_LISTENER_NAME)
            .expect("https listener present");
        let chain = &https.filter_chains[0];
        let socket = chain.transport_socket.as_ref().expect("transport socket present");
        let config_type = socket.config_type.as_ref().expect("typed config present");
        let envoy_types::pb::envoy::config::core::v3::transport_socket::ConfigType::TypedConfig(any) =
            config_type;
        let downstream = DownstreamTlsContext::decode(any.value.as_slice()).expect("valid context");
        let common = downstream.common_tls_context.expect("common tls context present");
        assert_eq!(common.tls_certificate_sds_secret_configs.len(), 1);
        assert_eq!(common.tls_certificate_sds_secret_configs[0].name, "infra/wildcard/abc123");
    }
}
