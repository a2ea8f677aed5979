//! Status facts emitted by the DAG builder (section 4.B pass 9, 4.F) and
//! the `Condition` shape the status writer patches onto source objects.

use crate::domain::{Generation, ObjectRef};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConditionStatus {
    True,
    False,
    Unknown,
}

/// One condition entry, e.g. `type: Valid, status: False, reason:
/// ServiceUnresolved`. Mirrors the `metav1.Condition` shape the real
/// controller patches onto `/status`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Condition {
    pub condition_type: String,
    pub status: ConditionStatus,
    pub reason: String,
    pub message: String,
}

impl Condition {
    pub fn valid() -> Self {
        Self {
            condition_type: "Valid".to_string(),
            status: ConditionStatus::True,
            reason: "Valid".to_string(),
            message: String::new(),
        }
    }

    pub fn invalid(reason: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            condition_type: "Valid".to_string(),
            status: ConditionStatus::False,
            reason: reason.into(),
            message: message.into(),
        }
    }

    pub fn orphaned(message: impl Into<String>) -> Self {
        Self {
            condition_type: "Valid".to_string(),
            status: ConditionStatus::False,
            reason: "Orphaned".to_string(),
            message: message.into(),
        }
    }
}

/// A `(object-ref, generation, conditions[])` tuple emitted once per object
/// visited by a build (invariant 6 in section 8).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusFact {
    pub object: ObjectRef,
    pub generation: Generation,
    pub conditions: Vec<Condition>,
}

impl StatusFact {
    pub fn new(object: ObjectRef, generation: Generation, conditions: Vec<Condition>) -> Self {
        Self { object, generation, conditions }
    }
}
