//! Environment, service and infrastructure variable resolution.
//!
//! Values supplied by a trigger may be ids or names. Each pass rewrites the
//! value in the shared variable map to the concrete id. Passes run in the
//! order environment, service, infrastructure because infrastructure lookups
//! are scoped to the resolved environment.

use crate::catalog::{EntityCatalog, EntityKind, Variable};
use crate::error::ResolveError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;
use tripwire_core::{AppId, EnvironmentId, InfraDefinitionId, InfraMappingId, ServiceId};
use tripwire_trigger::EntityRef;

/// How infrastructure variables are addressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InfraAddressing {
    /// Infrastructure definitions, falling back to legacy mappings.
    #[default]
    Definition,
    /// Legacy service infrastructure mappings only.
    LegacyMapping,
}

/// Resolves templated entity variables to ids.
#[derive(Clone)]
pub struct EntityResolver {
    entities: Arc<dyn EntityCatalog>,
    addressing: InfraAddressing,
}

impl EntityResolver {
    /// Creates a resolver over `entities`.
    #[must_use]
    pub fn new(entities: Arc<dyn EntityCatalog>, addressing: InfraAddressing) -> Self {
        Self {
            entities,
            addressing,
        }
    }

    /// Resolves every entity variable of `variables` found in `values`.
    ///
    /// Returns the environment the deployment runs in: the resolved
    /// templated environment, or `default_env` when the environment is not
    /// templated.
    pub async fn resolve(
        &self,
        app_id: AppId,
        variables: &[Variable],
        values: &mut BTreeMap<String, String>,
        default_env: Option<EnvironmentId>,
    ) -> Result<Option<EnvironmentId>, ResolveError> {
        let mut env_id = None;
        for variable in of_kind(variables, &[EntityKind::Environment]) {
            let Some(raw) = value_of(variable, values)? else {
                continue;
            };
            let id = self.environment(app_id, &raw).await?;
            values.insert(variable.name.clone(), id.to_string());
            env_id = Some(id);
        }
        let env_id = env_id.or(default_env);

        for variable in of_kind(variables, &[EntityKind::Service]) {
            let Some(raw) = value_of(variable, values)? else {
                continue;
            };
            let id = self.service(app_id, &raw).await?;
            values.insert(variable.name.clone(), id.to_string());
        }

        for variable in of_kind(
            variables,
            &[EntityKind::InfraDefinition, EntityKind::InfraMapping],
        ) {
            let Some(raw) = value_of(variable, values)? else {
                continue;
            };
            let parts: Vec<&str> = raw
                .split(',')
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .collect();
            if parts.len() > 1 && !variable.allow_multiple_values {
                return Err(ResolveError::MultipleValuesNotAllowed {
                    variable: variable.name.clone(),
                });
            }
            let scope = variable.env_id.or(env_id).ok_or_else(|| ResolveError::InfraNotFound {
                value: raw.clone(),
                env_id: None,
            })?;
            let mut resolved = Vec::with_capacity(parts.len());
            for part in parts {
                resolved.push(self.infra(app_id, scope, variable, part).await?);
            }
            values.insert(variable.name.clone(), resolved.join(","));
        }

        debug!(env_id = ?env_id, "resolved entity variables");
        Ok(env_id)
    }

    async fn environment(&self, app_id: AppId, raw: &str) -> Result<EnvironmentId, ResolveError> {
        if let EntityRef::Id(id) = EntityRef::<EnvironmentId>::parse(raw) {
            if let Some(env) = self.entities.environment(app_id, id).await? {
                return Ok(env.id);
            }
        }
        self.entities
            .environment_by_name(app_id, raw)
            .await?
            .map(|env| env.id)
            .ok_or_else(|| ResolveError::EnvironmentNotFound {
                value: raw.to_string(),
            })
    }

    async fn service(&self, app_id: AppId, raw: &str) -> Result<ServiceId, ResolveError> {
        if let EntityRef::Id(id) = EntityRef::<ServiceId>::parse(raw) {
            if let Some(service) = self.entities.service(app_id, id).await? {
                return Ok(service.id);
            }
        }
        self.entities
            .service_by_name(app_id, raw)
            .await?
            .map(|service| service.id)
            .ok_or_else(|| ResolveError::ServiceNotFound {
                value: raw.to_string(),
            })
    }

    async fn infra(
        &self,
        app_id: AppId,
        env_id: EnvironmentId,
        variable: &Variable,
        raw: &str,
    ) -> Result<String, ResolveError> {
        let by_definition = variable.entity_kind() == Some(EntityKind::InfraDefinition)
            && self.addressing == InfraAddressing::Definition;

        if by_definition {
            if let Some(id) = self.definition(app_id, env_id, raw).await? {
                return Ok(id.to_string());
            }
            if let Some(mapping) = self.mapping(app_id, env_id, raw).await? {
                if let Some(definition) = mapping.1 {
                    return Ok(definition.to_string());
                }
            }
        } else if let Some((id, _)) = self.mapping(app_id, env_id, raw).await? {
            return Ok(id.to_string());
        }

        Err(ResolveError::InfraNotFound {
            value: raw.to_string(),
            env_id: Some(env_id),
        })
    }

    async fn definition(
        &self,
        app_id: AppId,
        env_id: EnvironmentId,
        raw: &str,
    ) -> Result<Option<InfraDefinitionId>, ResolveError> {
        if let EntityRef::Id(id) = EntityRef::<InfraDefinitionId>::parse(raw) {
            if let Some(found) = self.entities.infra_definition(app_id, env_id, id).await? {
                return Ok(Some(found.id));
            }
        }
        Ok(self
            .entities
            .infra_definition_by_name(app_id, env_id, raw)
            .await?
            .map(|d| d.id))
    }

    async fn mapping(
        &self,
        app_id: AppId,
        env_id: EnvironmentId,
        raw: &str,
    ) -> Result<Option<(InfraMappingId, Option<InfraDefinitionId>)>, ResolveError> {
        if let EntityRef::Id(id) = EntityRef::<InfraMappingId>::parse(raw) {
            if let Some(found) = self.entities.infra_mapping(app_id, env_id, id).await? {
                return Ok(Some((found.id, found.infra_definition_id)));
            }
        }
        Ok(self
            .entities
            .infra_mapping_by_name(app_id, env_id, raw)
            .await?
            .map(|m| (m.id, m.infra_definition_id)))
    }
}

fn of_kind<'a>(
    variables: &'a [Variable],
    kinds: &'a [EntityKind],
) -> impl Iterator<Item = &'a Variable> {
    variables
        .iter()
        .filter(|v| v.entity_kind().is_some_and(|k| kinds.contains(&k)))
}

/// Returns the trimmed, non-empty value of `variable`, `None` if it may be
/// left for runtime input, or `MissingEntityMapping`.
fn value_of(
    variable: &Variable,
    values: &BTreeMap<String, String>,
) -> Result<Option<String>, ResolveError> {
    match values.get(&variable.name).map(|v| v.trim()) {
        Some(value) if !value.is_empty() => Ok(Some(value.to_string())),
        _ if variable.runtime_input => Ok(None),
        _ => Err(ResolveError::MissingEntityMapping {
            variable: variable.name.clone(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{Environment, InfraDefinition, InfraMapping, Service};
    use crate::memory::InMemoryCatalog;

    struct Fixture {
        catalog: Arc<InMemoryCatalog>,
        app_id: AppId,
        env: Environment,
        service: Service,
    }

    fn fixture() -> Fixture {
        let catalog = Arc::new(InMemoryCatalog::new());
        let app_id = AppId::new();
        let env = Environment {
            id: EnvironmentId::new(),
            app_id,
            name: "qa".to_string(),
        };
        let service = Service {
            id: ServiceId::new(),
            app_id,
            name: "api".to_string(),
        };
        catalog.add_environment(env.clone());
        catalog.add_service(service.clone());
        Fixture {
            catalog,
            app_id,
            env,
            service,
        }
    }

    fn resolver(f: &Fixture, addressing: InfraAddressing) -> EntityResolver {
        EntityResolver::new(f.catalog.clone(), addressing)
    }

    fn values(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    #[tokio::test]
    async fn resolves_names_to_ids() {
        let f = fixture();
        let variables = vec![
            Variable::entity("Service", EntityKind::Service),
            Variable::entity("Environment", EntityKind::Environment),
        ];
        let mut map = values(&[("Environment", "qa"), ("Service", "api")]);

        let env = resolver(&f, InfraAddressing::Definition)
            .resolve(f.app_id, &variables, &mut map, None)
            .await
            .expect("resolves");

        assert_eq!(env, Some(f.env.id));
        assert_eq!(map["Environment"], f.env.id.to_string());
        assert_eq!(map["Service"], f.service.id.to_string());
    }

    #[tokio::test]
    async fn ids_are_accepted() {
        let f = fixture();
        let variables = vec![Variable::entity("Service", EntityKind::Service)];
        let mut map = values(&[("Service", &f.service.id.to_string())]);

        resolver(&f, InfraAddressing::Definition)
            .resolve(f.app_id, &variables, &mut map, None)
            .await
            .expect("resolves");
        assert_eq!(map["Service"], f.service.id.to_string());
    }

    #[tokio::test]
    async fn unknown_environment_fails() {
        let f = fixture();
        let variables = vec![Variable::entity("Environment", EntityKind::Environment)];
        let mut map = values(&[("Environment", "prod")]);

        let err = resolver(&f, InfraAddressing::Definition)
            .resolve(f.app_id, &variables, &mut map, None)
            .await
            .unwrap_err();
        assert_eq!(
            err,
            ResolveError::EnvironmentNotFound {
                value: "prod".to_string()
            }
        );
    }

    #[tokio::test]
    async fn missing_value_fails_unless_runtime_input() {
        let f = fixture();
        let mut variable = Variable::entity("Service", EntityKind::Service);

        let err = resolver(&f, InfraAddressing::Definition)
            .resolve(f.app_id, std::slice::from_ref(&variable), &mut BTreeMap::new(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, ResolveError::MissingEntityMapping { .. }));

        variable.runtime_input = true;
        resolver(&f, InfraAddressing::Definition)
            .resolve(f.app_id, &[variable], &mut BTreeMap::new(), None)
            .await
            .expect("runtime input may be absent");
    }

    #[tokio::test]
    async fn infra_definition_scoped_to_resolved_environment() {
        let f = fixture();
        let definition = InfraDefinition {
            id: InfraDefinitionId::new(),
            env_id: f.env.id,
            name: "k8s-qa".to_string(),
        };
        f.catalog.add_infra_definition(definition.clone());
        let variables = vec![
            Variable::entity("Infra", EntityKind::InfraDefinition),
            Variable::entity("Environment", EntityKind::Environment),
        ];
        let mut map = values(&[("Environment", "qa"), ("Infra", "k8s-qa")]);

        resolver(&f, InfraAddressing::Definition)
            .resolve(f.app_id, &variables, &mut map, None)
            .await
            .expect("resolves");
        assert_eq!(map["Infra"], definition.id.to_string());
    }

    #[tokio::test]
    async fn infra_definition_falls_back_to_mapping() {
        let f = fixture();
        let definition = InfraDefinitionId::new();
        f.catalog.add_infra_mapping(InfraMapping {
            id: InfraMappingId::new(),
            env_id: f.env.id,
            name: "legacy-qa".to_string(),
            infra_definition_id: Some(definition),
        });
        let variables = vec![Variable::entity("Infra", EntityKind::InfraDefinition)];
        let mut map = values(&[("Infra", "legacy-qa")]);

        resolver(&f, InfraAddressing::Definition)
            .resolve(f.app_id, &variables, &mut map, Some(f.env.id))
            .await
            .expect("resolves");
        assert_eq!(map["Infra"], definition.to_string());
    }

    #[tokio::test]
    async fn legacy_addressing_resolves_mappings() {
        let f = fixture();
        let mapping = InfraMapping {
            id: InfraMappingId::new(),
            env_id: f.env.id,
            name: "legacy-qa".to_string(),
            infra_definition_id: None,
        };
        f.catalog.add_infra_mapping(mapping.clone());
        let variables = vec![Variable::entity("Infra", EntityKind::InfraDefinition)];
        let mut map = values(&[("Infra", "legacy-qa")]);

        resolver(&f, InfraAddressing::LegacyMapping)
            .resolve(f.app_id, &variables, &mut map, Some(f.env.id))
            .await
            .expect("resolves");
        assert_eq!(map["Infra"], mapping.id.to_string());
    }

    #[tokio::test]
    async fn multiple_infra_values_need_permission() {
        let f = fixture();
        for name in ["a", "b"] {
            f.catalog.add_infra_definition(InfraDefinition {
                id: InfraDefinitionId::new(),
                env_id: f.env.id,
                name: name.to_string(),
            });
        }
        let mut variable = Variable::entity("Infra", EntityKind::InfraDefinition);

        let err = resolver(&f, InfraAddressing::Definition)
            .resolve(
                f.app_id,
                std::slice::from_ref(&variable),
                &mut values(&[("Infra", "a, b")]),
                Some(f.env.id),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ResolveError::MultipleValuesNotAllowed { .. }));

        variable.allow_multiple_values = true;
        let mut map = values(&[("Infra", "a, b")]);
        resolver(&f, InfraAddressing::Definition)
            .resolve(f.app_id, &[variable], &mut map, Some(f.env.id))
            .await
            .expect("resolves");
        assert_eq!(map["Infra"].split(',').count(), 2);
    }

    #[tokio::test]
    async fn infra_in_other_environment_is_not_found() {
        let f = fixture();
        f.catalog.add_infra_definition(InfraDefinition {
            id: InfraDefinitionId::new(),
            env_id: EnvironmentId::new(),
            name: "k8s-prod".to_string(),
        });
        let variables = vec![Variable::entity("Infra", EntityKind::InfraDefinition)];

        let err = resolver(&f, InfraAddressing::Definition)
            .resolve(
                f.app_id,
                &variables,
                &mut values(&[("Infra", "k8s-prod")]),
                Some(f.env.id),
            )
            .await
            .unwrap_err();
        assert_eq!(
            err,
            ResolveError::InfraNotFound {
                value: "k8s-prod".to_string(),
                env_id: Some(f.env.id),
            }
        );
    }
}
