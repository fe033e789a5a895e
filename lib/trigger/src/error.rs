//! Error types for the trigger model.

use std::fmt;

/// Errors raised while interpreting stored trigger data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TriggerError {
    /// A stored condition tag does not name a known condition type.
    InvalidTriggerCondition {
        /// The tag that was found.
        tag: String,
    },
    /// Placeholders could not be filled from the event payload.
    UnresolvedPlaceholders {
        /// Names of the variables or artifact bindings left unresolved.
        variables: Vec<String>,
    },
}

impl fmt::Display for TriggerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidTriggerCondition { tag } => {
                write!(f, "invalid trigger condition type: {tag}")
            }
            Self::UnresolvedPlaceholders { variables } => {
                write!(
                    f,
                    "unresolved placeholders for variables: {}",
                    variables.join(", ")
                )
            }
        }
    }
}

impl std::error::Error for TriggerError {}
