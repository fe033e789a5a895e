//! Error types for fire-time resolution.
//!
//! - `CatalogError`: a metadata lookup could not be answered (transient)
//! - `ResolveError`: the firing cannot be resolved and is aborted

use std::fmt;
use tripwire_core::{EnvironmentId, ServiceId};

/// Errors from external metadata lookups.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CatalogError {
    /// The backing service could not be reached or answered with an error.
    Unavailable {
        /// Description of the failure.
        message: String,
    },
    /// The backing service answered with data that could not be decoded.
    Decode {
        /// Description of the failure.
        message: String,
    },
}

impl fmt::Display for CatalogError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unavailable { message } => write!(f, "catalog unavailable: {message}"),
            Self::Decode { message } => write!(f, "catalog response undecodable: {message}"),
        }
    }
}

impl std::error::Error for CatalogError {}

/// Errors that abort a single firing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolveError {
    /// No environment has the given id or name.
    EnvironmentNotFound {
        /// The value supplied by the trigger.
        value: String,
    },
    /// No service has the given id or name.
    ServiceNotFound {
        /// The value supplied by the trigger.
        value: String,
    },
    /// No infrastructure definition or mapping has the given id or name.
    InfraNotFound {
        /// The value supplied by the trigger.
        value: String,
        /// Environment the lookup was scoped to.
        env_id: Option<EnvironmentId>,
    },
    /// A templated entity variable has no value and is not runtime input.
    MissingEntityMapping {
        /// Variable name.
        variable: String,
    },
    /// A comma-separated value was supplied for a single-valued variable.
    MultipleValuesNotAllowed {
        /// Variable name.
        variable: String,
    },
    /// Mandatory variables have neither a value nor a default.
    MandatoryVariablesMissing {
        /// Variable names.
        variables: Vec<String>,
    },
    /// No artifact on the stream matches.
    NoMatchingArtifact {
        /// Stream display form.
        artifact_stream: String,
        /// Filter or build number that was looked for.
        filter: Option<String>,
    },
    /// The referenced deployment has no deployed artifacts.
    NoLastDeployedArtifact {
        /// Deployment display form.
        source: String,
    },
    /// The firing event carried no artifact.
    NoTriggeringArtifact {
        /// Artifact variable name.
        variable: String,
    },
    /// The resolved stream is not legal for the variable.
    ArtifactStreamNotAllowed {
        /// Artifact variable name.
        variable: String,
        /// Stream display form.
        artifact_stream: String,
    },
    /// No artifact stream has the given id or name.
    ArtifactStreamNotFound {
        /// Reference display form.
        reference: String,
    },
    /// The resolved stream does not belong to the resolved server.
    ArtifactServerMismatch {
        /// Stream display form.
        artifact_stream: String,
        /// Server reference display form.
        artifact_server: String,
    },
    /// An artifact filter does not compile.
    InvalidFilter {
        /// The filter text.
        pattern: String,
        /// Compiler message.
        reason: String,
    },
    /// Resolved artifacts do not cover exactly the services the deployment
    /// needs.
    ArtifactServiceMismatch {
        /// Services that need an artifact but have none.
        missing: Vec<ServiceId>,
        /// Services that received an artifact they do not need.
        unexpected: Vec<ServiceId>,
    },
    /// A lookup failed.
    Catalog(CatalogError),
}

impl fmt::Display for ResolveError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EnvironmentNotFound { value } => write!(f, "environment not found: {value}"),
            Self::ServiceNotFound { value } => write!(f, "service not found: {value}"),
            Self::InfraNotFound { value, env_id } => match env_id {
                Some(env) => write!(f, "infrastructure not found in {env}: {value}"),
                None => write!(f, "infrastructure not found: {value}"),
            },
            Self::MissingEntityMapping { variable } => {
                write!(f, "trigger does not map templated variable {variable}")
            }
            Self::MultipleValuesNotAllowed { variable } => {
                write!(f, "variable {variable} does not accept multiple values")
            }
            Self::MandatoryVariablesMissing { variables } => {
                write!(
                    f,
                    "mandatory variables have no value: {}",
                    variables.join(", ")
                )
            }
            Self::NoMatchingArtifact {
                artifact_stream,
                filter,
            } => match filter {
                Some(filter) => write!(f, "no artifact on {artifact_stream} matches {filter}"),
                None => write!(f, "no artifact collected on {artifact_stream}"),
            },
            Self::NoLastDeployedArtifact { source } => {
                write!(f, "no last deployed artifact for {source}")
            }
            Self::NoTriggeringArtifact { variable } => {
                write!(f, "no triggering artifact available for {variable}")
            }
            Self::ArtifactStreamNotAllowed {
                variable,
                artifact_stream,
            } => write!(
                f,
                "artifact stream {artifact_stream} is not allowed for variable {variable}"
            ),
            Self::ArtifactStreamNotFound { reference } => {
                write!(f, "artifact stream not found: {reference}")
            }
            Self::ArtifactServerMismatch {
                artifact_stream,
                artifact_server,
            } => write!(
                f,
                "artifact stream {artifact_stream} does not belong to server {artifact_server}"
            ),
            Self::InvalidFilter { pattern, reason } => {
                write!(f, "invalid artifact filter {pattern}: {reason}")
            }
            Self::ArtifactServiceMismatch {
                missing,
                unexpected,
            } => write!(
                f,
                "artifact services mismatch: {} missing, {} unexpected",
                missing.len(),
                unexpected.len()
            ),
            Self::Catalog(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for ResolveError {}

impl From<CatalogError> for ResolveError {
    fn from(e: CatalogError) -> Self {
        Self::Catalog(e)
    }
}
