//! Fire-time resolution of trigger variables for tripwire.
//!
//! This crate turns the literal bindings of a trigger into concrete
//! entities:
//!
//! - [`ArtifactVariableResolver`] picks an artifact for each artifact
//!   variable according to its selection policy.
//! - [`EntityResolver`] resolves environment, service and infrastructure
//!   variables from ids or names.
//!
//! Both consume external metadata through the catalog traits in
//! [`catalog`]. [`memory::InMemoryCatalog`] implements all of them for
//! tests and local runs.

pub mod artifact;
pub mod catalog;
pub mod entity;
pub mod error;
pub mod filter;
pub mod memory;

pub use artifact::{ArtifactVariableResolver, FiringContext};
pub use catalog::{
    Artifact, ArtifactCatalog, ArtifactStream, ArtifactVariableRequirement, DeploymentCatalog,
    DeploymentMetadata, EntityCatalog, EntityKind, Environment, InfraDefinition, InfraMapping,
    Pipeline, Service, Variable, VariableKind, Workflow, WorkflowKind,
};
pub use entity::{EntityResolver, InfraAddressing};
pub use error::{CatalogError, ResolveError};
pub use filter::ArtifactFilter;
