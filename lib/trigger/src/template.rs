//! Literal and placeholder values.
//!
//! Trigger arguments may defer a value to fire time by writing a
//! `${expression}` template instead of a literal. The expression is a
//! payload selector (see [`crate::selector`]) evaluated against the event
//! that fired the trigger. A template may mix text and several expressions,
//! e.g. `release-${pull_request.number}`.

use crate::action::{DeploymentTarget, TriggerArgs};
use crate::artifact::{ArtifactFilterSpec, ArtifactSelection, VariableScope};
use crate::error::TriggerError;
use crate::selector;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;
use tripwire_core::{ArtifactServerId, ArtifactStreamId};

/// Raw template text containing at least one `${...}` expression.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Template(String);

impl Template {
    /// Parses `raw` as a template. Returns `None` when it holds no
    /// expression and is therefore a plain literal.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        if scan(raw).next().is_some() {
            Some(Self(raw.to_string()))
        } else {
            None
        }
    }

    /// Returns the raw template text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the expressions referenced by this template, in order.
    #[must_use]
    pub fn expressions(&self) -> Vec<&str> {
        scan(&self.0).map(|(_, _, expr)| expr).collect()
    }

    /// Renders the template against `source`.
    ///
    /// On failure returns every expression the source could not supply.
    pub fn render(&self, source: &dyn PlaceholderSource) -> Result<String, Vec<String>> {
        let mut rendered = String::with_capacity(self.0.len());
        let mut missing = Vec::new();
        let mut cursor = 0;
        for (start, end, expr) in scan(&self.0) {
            rendered.push_str(&self.0[cursor..start]);
            match source.lookup(expr) {
                Some(value) => rendered.push_str(&value),
                None => missing.push(expr.to_string()),
            }
            cursor = end;
        }
        rendered.push_str(&self.0[cursor..]);
        if missing.is_empty() {
            Ok(rendered)
        } else {
            Err(missing)
        }
    }
}

impl fmt::Display for Template {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Yields `(start, end, expression)` for each `${expression}` in `raw`.
fn scan(raw: &str) -> impl Iterator<Item = (usize, usize, &str)> {
    let mut offset = 0;
    std::iter::from_fn(move || {
        let open = offset + raw[offset..].find("${")?;
        let close = open + 2 + raw[open + 2..].find('}')?;
        offset = close + 1;
        let expr = raw[open + 2..close].trim();
        Some((open, close + 1, expr))
    })
    .filter(|(_, _, expr)| !expr.is_empty())
}

/// A value fixed at configuration time or deferred to fire time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TemplateValue<T> {
    /// A concrete value.
    Literal(T),
    /// A template filled from the event payload when the trigger fires.
    Placeholder(Template),
}

impl<T> TemplateValue<T> {
    /// Returns true if this value is deferred to fire time.
    #[must_use]
    pub fn is_placeholder(&self) -> bool {
        matches!(self, Self::Placeholder(_))
    }

    /// Returns the literal value, if any.
    #[must_use]
    pub fn literal(&self) -> Option<&T> {
        match self {
            Self::Literal(value) => Some(value),
            Self::Placeholder(_) => None,
        }
    }
}

impl<T: FromStr> TemplateValue<T> {
    /// Interprets `raw` as a placeholder when it contains an expression,
    /// otherwise parses it as a literal.
    pub fn from_raw(raw: &str) -> Result<Self, T::Err> {
        match Template::parse(raw) {
            Some(template) => Ok(Self::Placeholder(template)),
            None => raw.parse().map(Self::Literal),
        }
    }
}

impl TemplateValue<String> {
    /// Interprets `raw` as a placeholder when it contains an expression,
    /// otherwise keeps it as literal text.
    #[must_use]
    pub fn text(raw: impl Into<String>) -> Self {
        let raw = raw.into();
        match Template::parse(&raw) {
            Some(template) => Self::Placeholder(template),
            None => Self::Literal(raw),
        }
    }
}

impl<T: fmt::Display> fmt::Display for TemplateValue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Literal(value) => value.fmt(f),
            Self::Placeholder(template) => template.fmt(f),
        }
    }
}

/// Supplies values for template expressions.
pub trait PlaceholderSource {
    /// Returns the value for `expression`, or `None` if it is unavailable.
    fn lookup(&self, expression: &str) -> Option<String>;
}

impl PlaceholderSource for serde_json::Value {
    fn lookup(&self, expression: &str) -> Option<String> {
        selector::select_string(self, expression)
    }
}

impl PlaceholderSource for HashMap<String, String> {
    fn lookup(&self, expression: &str) -> Option<String> {
        self.get(expression).cloned()
    }
}

/// An entity reference that is either a typed id or a name to look up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityRef<T> {
    /// A parsed identifier.
    Id(T),
    /// A display name that still has to be looked up.
    Name(String),
}

impl<T: FromStr> EntityRef<T> {
    /// Parses `raw` as an id, falling back to treating it as a name.
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim();
        raw.parse()
            .map_or_else(|_| Self::Name(raw.to_string()), Self::Id)
    }
}

impl<T: fmt::Display> fmt::Display for EntityRef<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Id(id) => id.fmt(f),
            Self::Name(name) => f.write_str(name),
        }
    }
}

/// A fully literal artifact selection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolvedSelection {
    /// Newest artifact of a stream, optionally filtered.
    LastCollected {
        /// Stream to read.
        artifact_stream: EntityRef<ArtifactStreamId>,
        /// Optional build filter.
        filter: Option<ArtifactFilterSpec>,
    },
    /// Artifacts last deployed by a pipeline or workflow.
    LastDeployed {
        /// Deployment whose history is consulted.
        source: DeploymentTarget,
    },
    /// The artifact that caused the firing.
    FromTriggeringArtifactSource,
    /// Artifacts deployed by the completing upstream pipeline.
    FromUpstreamPipeline,
    /// A specific build named by the webhook payload.
    FromWebhookPayload {
        /// Artifact server reference.
        artifact_server: EntityRef<ArtifactServerId>,
        /// Artifact stream reference.
        artifact_stream: EntityRef<ArtifactStreamId>,
        /// Build number or tag.
        build_number: String,
    },
}

/// A fully literal artifact variable binding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedArtifactVariable {
    /// Deployment-level artifact variable name.
    pub name: String,
    /// Entity the variable is scoped to.
    pub scope: Option<VariableScope>,
    /// The selection with every placeholder filled.
    pub selection: ResolvedSelection,
}

/// A trigger argument bundle with every placeholder filled.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ResolvedArgs {
    /// Variable values keyed by name.
    pub variables: BTreeMap<String, String>,
    /// Artifact variable bindings.
    pub artifact_variables: Vec<ResolvedArtifactVariable>,
    /// Skip hosts that already run the selected artifact.
    pub exclude_hosts_with_same_artifact: bool,
    /// Let the execution engine fall back to variable defaults.
    pub continue_with_default_values: bool,
}

impl TriggerArgs {
    /// Fills every placeholder in one pass over the argument bundle.
    ///
    /// With no `source` (triggers not fired by a payload), placeholder text
    /// in plain variables is passed through verbatim for the execution
    /// engine to evaluate, while placeholders inside artifact selections
    /// are unresolved. All unresolved names are reported together.
    pub fn resolve(
        &self,
        source: Option<&dyn PlaceholderSource>,
    ) -> Result<ResolvedArgs, TriggerError> {
        let mut unresolved = Vec::new();

        let mut variables = BTreeMap::new();
        for variable in &self.variables {
            let value = match (&variable.value, source) {
                (TemplateValue::Literal(value), _) => value.clone(),
                (TemplateValue::Placeholder(template), None) => template.as_str().to_string(),
                (TemplateValue::Placeholder(template), Some(source)) => {
                    match template.render(source) {
                        Ok(value) => value,
                        Err(_) => {
                            unresolved.push(variable.name.clone());
                            continue;
                        }
                    }
                }
            };
            variables.insert(variable.name.clone(), value);
        }

        let mut artifact_variables = Vec::with_capacity(self.artifact_variables.len());
        for binding in &self.artifact_variables {
            let selection = match &binding.selection {
                ArtifactSelection::LastCollected {
                    artifact_stream,
                    filter,
                    ..
                } => fill_ref(artifact_stream, source).map(|artifact_stream| {
                    ResolvedSelection::LastCollected {
                        artifact_stream,
                        filter: filter.clone(),
                    }
                }),
                ArtifactSelection::LastDeployed { source: target, .. } => {
                    Some(ResolvedSelection::LastDeployed { source: *target })
                }
                ArtifactSelection::FromTriggeringArtifactSource => {
                    Some(ResolvedSelection::FromTriggeringArtifactSource)
                }
                ArtifactSelection::FromUpstreamPipeline => {
                    Some(ResolvedSelection::FromUpstreamPipeline)
                }
                ArtifactSelection::FromWebhookPayload {
                    artifact_server,
                    artifact_stream,
                    build_number,
                    ..
                } => {
                    let server = fill_ref(artifact_server, source);
                    let stream = fill_ref(artifact_stream, source);
                    let build = fill_text(build_number, source);
                    match (server, stream, build) {
                        (Some(artifact_server), Some(artifact_stream), Some(build_number)) => {
                            Some(ResolvedSelection::FromWebhookPayload {
                                artifact_server,
                                artifact_stream,
                                build_number,
                            })
                        }
                        _ => None,
                    }
                }
            };
            match selection {
                Some(selection) => artifact_variables.push(ResolvedArtifactVariable {
                    name: binding.name.clone(),
                    scope: binding.scope.clone(),
                    selection,
                }),
                None => unresolved.push(binding.name.clone()),
            }
        }

        if !unresolved.is_empty() {
            return Err(TriggerError::UnresolvedPlaceholders {
                variables: unresolved,
            });
        }

        Ok(ResolvedArgs {
            variables,
            artifact_variables,
            exclude_hosts_with_same_artifact: self.exclude_hosts_with_same_artifact,
            continue_with_default_values: self.continue_with_default_values,
        })
    }
}

fn fill_ref<T: Clone + FromStr>(
    value: &TemplateValue<T>,
    source: Option<&dyn PlaceholderSource>,
) -> Option<EntityRef<T>> {
    match value {
        TemplateValue::Literal(id) => Some(EntityRef::Id(id.clone())),
        TemplateValue::Placeholder(template) => {
            let rendered = template.render(source?).ok()?;
            Some(EntityRef::parse(&rendered))
        }
    }
}

fn fill_text(
    value: &TemplateValue<String>,
    source: Option<&dyn PlaceholderSource>,
) -> Option<String> {
    match value {
        TemplateValue::Literal(text) => Some(text.clone()),
        TemplateValue::Placeholder(template) => template.render(source?).ok(),
    }
}
