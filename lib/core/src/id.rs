//! Identifiers for triggers, their executions and the entities they refer to.
//!
//! Every id wraps a ULID and displays with a short type prefix, e.g.
//! `trg_01J...`. Parsing accepts the prefixed or the bare form. Entity
//! names are never valid ids; name lookups go through the catalogs.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use ulid::Ulid;

/// Error returned when parsing an ID from a string fails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseIdError {
    /// The type of ID that failed to parse.
    pub id_type: &'static str,
    /// The reason for the parse failure.
    pub reason: String,
}

impl fmt::Display for ParseIdError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "failed to parse {}: {}", self.id_type, self.reason)
    }
}

impl std::error::Error for ParseIdError {}

/// Macro to generate a strongly-typed ID wrapper around ULID.
macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident, $prefix:expr) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Ulid);

        impl $name {
            /// Creates a new ID with a randomly generated ULID.
            #[must_use]
            pub fn new() -> Self {
                Self(Ulid::new())
            }

            /// Creates an ID from a ULID.
            #[must_use]
            pub const fn from_ulid(ulid: Ulid) -> Self {
                Self(ulid)
            }

            /// Returns the underlying ULID.
            #[must_use]
            pub const fn as_ulid(&self) -> Ulid {
                self.0
            }

            /// Returns the prefix used for display formatting.
            #[must_use]
            pub const fn prefix() -> &'static str {
                $prefix
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}_{}", $prefix, self.0)
            }
        }

        impl FromStr for $name {
            type Err = ParseIdError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let raw = s.strip_prefix(concat!($prefix, "_")).unwrap_or(s);
                Ulid::from_str(raw).map(Self).map_err(|e| ParseIdError {
                    id_type: stringify!($name),
                    reason: e.to_string(),
                })
            }
        }

        impl From<Ulid> for $name {
            fn from(ulid: Ulid) -> Self {
                Self(ulid)
            }
        }

        impl From<$name> for Ulid {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

define_id!(
    /// Unique identifier for an application, the owning scope of triggers.
    AppId,
    "app"
);

define_id!(
    /// Unique identifier for an account.
    AccountId,
    "acct"
);

define_id!(
    /// Unique identifier for a trigger.
    TriggerId,
    "trg"
);

define_id!(
    /// Unique identifier for a single recorded firing attempt of a trigger.
    TriggerExecutionId,
    "tex"
);

define_id!(
    /// Unique identifier for a pipeline.
    PipelineId,
    "pl"
);

define_id!(
    /// Unique identifier for a workflow.
    WorkflowId,
    "wf"
);

define_id!(
    /// Unique identifier for an execution accepted by the execution engine.
    ExecutionId,
    "exec"
);

define_id!(
    /// Unique identifier for an artifact server.
    ArtifactServerId,
    "srv"
);

define_id!(
    /// Unique identifier for an artifact stream.
    ArtifactStreamId,
    "as"
);

define_id!(
    /// Unique identifier for a collected artifact.
    ArtifactId,
    "art"
);

define_id!(
    /// Unique identifier for a service.
    ServiceId,
    "svc"
);

define_id!(
    /// Unique identifier for an environment.
    EnvironmentId,
    "env"
);

define_id!(
    /// Unique identifier for an infrastructure definition.
    InfraDefinitionId,
    "infra"
);

define_id!(
    /// Unique identifier for a legacy service infrastructure mapping.
    InfraMappingId,
    "sim"
);

define_id!(
    /// Unique identifier for a source-control connector.
    ConnectorId,
    "conn"
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trigger_id_display_format() {
        let id = TriggerId::new();
        assert!(id.to_string().starts_with("trg_"));
    }

    #[test]
    fn artifact_stream_id_display_format() {
        let id = ArtifactStreamId::new();
        assert!(id.to_string().starts_with("as_"));
    }

    #[test]
    fn parse_with_prefix() {
        let id = PipelineId::new();
        let parsed: PipelineId = id.to_string().parse().expect("should parse");
        assert_eq!(id, parsed);
    }

    #[test]
    fn parse_without_prefix() {
        let ulid = Ulid::new();
        let id: ServiceId = ulid.to_string().parse().expect("should parse");
        assert_eq!(id.as_ulid(), ulid);
    }

    #[test]
    fn parse_rejects_entity_names() {
        let err = "production".parse::<EnvironmentId>().unwrap_err();
        assert_eq!(err.id_type, "EnvironmentId");
    }

    #[test]
    fn prefix_of_another_type_is_rejected() {
        let wf = WorkflowId::new().to_string();
        assert!(wf.parse::<PipelineId>().is_err());
    }

    #[test]
    fn id_hash() {
        use std::collections::HashSet;

        let id1 = ArtifactId::new();
        let id2 = ArtifactId::new();

        let mut set = HashSet::new();
        set.insert(id1);
        set.insert(id2);
        set.insert(id1);

        assert_eq!(set.len(), 2);
    }

    #[test]
    fn ids_order_by_creation_time() {
        let first = TriggerExecutionId::from_ulid(Ulid::from_parts(1, 0));
        let second = TriggerExecutionId::from_ulid(Ulid::from_parts(2, 0));
        assert!(first < second);
    }

    #[test]
    fn id_serde_roundtrip() {
        let id = TriggerId::new();
        let json = serde_json::to_string(&id).expect("serialize");
        let parsed: TriggerId = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(id, parsed);
    }
}
