// Copyright 2025 Cowboy AI, LLC.

//! Build-once registry of entity definitions
//!
//! The registry is assembled at start-up and then shared read-only by the
//! command handlers, the materializer and the repos. Relationships are
//! checked against both ends when the registry is built.

use super::entity::EntityDefinition;
use super::relationship::Relationship;
use crate::errors::{TenancyError, TenancyResult};
use crate::naming::entity_name;
use indexmap::IndexMap;
use std::sync::Arc;
use tracing::debug;

/// Read-only set of entity definitions
#[derive(Debug, Clone, Default)]
pub struct ModelRegistry {
    entities: IndexMap<String, Arc<EntityDefinition>>,
}

impl ModelRegistry {
    /// Start building a registry
    pub fn builder() -> ModelRegistryBuilder {
        ModelRegistryBuilder::default()
    }

    /// Definition by name, in any casing or number
    pub fn get(&self, name: &str) -> TenancyResult<&Arc<EntityDefinition>> {
        self.entities
            .get(&entity_name(name))
            .ok_or_else(|| TenancyError::configuration(format!("No entity named `{name}` is registered")))
    }

    /// Whether an entity is registered
    pub fn contains(&self, name: &str) -> bool {
        self.entities.contains_key(&entity_name(name))
    }

    /// Every definition in registration order
    pub fn entities(&self) -> impl Iterator<Item = &Arc<EntityDefinition>> {
        self.entities.values()
    }

    /// Relationships that embed `target`, with their owners
    pub fn embeds_of<'a>(
        &'a self,
        target: &'a str,
    ) -> impl Iterator<Item = (&'a Arc<EntityDefinition>, &'a Relationship)> + 'a {
        self.entities.values().flat_map(move |owner| {
            owner
                .relationships
                .iter()
                .filter(move |rel| rel.has == target && !rel.with.is_empty())
                .map(move |rel| (owner, rel))
        })
    }
}

/// Builder for a [`ModelRegistry`]
#[derive(Debug, Default)]
pub struct ModelRegistryBuilder {
    entities: IndexMap<String, EntityDefinition>,
    relationships: Vec<Relationship>,
}

impl ModelRegistryBuilder {
    /// Register an entity
    pub fn entity(mut self, definition: EntityDefinition) -> TenancyResult<Self> {
        if self.entities.contains_key(&definition.name) {
            return Err(TenancyError::configuration(format!(
                "A value already exists for `entities.{}`",
                definition.name
            )));
        }
        self.entities.insert(definition.name.clone(), definition);
        Ok(self)
    }

    /// Register a relationship; it is attached to its declaring entity
    pub fn relationship(mut self, relationship: Relationship) -> TenancyResult<Self> {
        self.relationships.push(relationship);
        Ok(self)
    }

    /// Validate every relationship and freeze
    pub fn build(mut self) -> TenancyResult<ModelRegistry> {
        for rel in std::mem::take(&mut self.relationships) {
            if !self.entities.contains_key(&rel.has) {
                return Err(TenancyError::configuration(format!(
                    "`{}` relates to unknown entity `{}`",
                    rel.entity, rel.has
                )));
            }
            let owner = self.entities.get_mut(&rel.entity).ok_or_else(|| {
                TenancyError::configuration(format!("Relationship declared on unknown entity `{}`", rel.entity))
            })?;
            let field = rel.local_field();
            if !owner.props.contains_key(&field) {
                return Err(TenancyError::configuration(format!(
                    "`{}` has no property `{field}` to hold its `{}` relationship",
                    owner.name, rel.has
                )));
            }
            owner.attach(rel)?;
        }

        for owner in self.entities.values() {
            for rel in &owner.relationships {
                check_embed(&self.entities, owner, rel)?;
            }
        }

        debug!(entities = self.entities.len(), "Model registry built");
        Ok(ModelRegistry {
            entities: self
                .entities
                .into_iter()
                .map(|(name, def)| (name, Arc::new(def)))
                .collect(),
        })
    }
}

fn check_embed(
    entities: &IndexMap<String, EntityDefinition>,
    owner: &EntityDefinition,
    rel: &Relationship,
) -> TenancyResult<()> {
    if rel.with.is_empty() {
        return Ok(());
    }
    let target = entities
        .get(&rel.has)
        .ok_or_else(|| TenancyError::configuration(format!("Unknown entity `{}`", rel.has)))?;
    if !target.persisted {
        return Err(TenancyError::configuration(format!(
            "`{}` embeds `{}`, which has no materialized collection",
            owner.name, target.name
        )));
    }
    if let Some(prop) = rel.with.props.iter().find(|p| !target.props.contains_key(*p)) {
        return Err(TenancyError::configuration(format!(
            "`{}.{}` embeds unknown property `{}.{prop}`",
            owner.name,
            rel.local_field(),
            target.name
        )));
    }
    for edge in &rel.with.edges {
        match target.relationship(edge) {
            Some(inner) if !inner.with.is_empty() => {}
            _ => {
                return Err(TenancyError::configuration(format!(
                    "`{}.{}` embeds `{}.{edge}`, which is not an embedding relationship",
                    owner.name,
                    rel.local_field(),
                    target.name
                )))
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{EntityBuilder, Prop, RelationshipBuilder};

    fn org() -> EntityDefinition {
        EntityBuilder::new("organization")
            .unwrap()
            .props([("name", Prop::string().required()), ("slug", Prop::slug())])
            .unwrap()
            .build()
            .unwrap()
    }

    fn workspace() -> EntityDefinition {
        EntityBuilder::new("workspace")
            .unwrap()
            .props([("name", Prop::string().required()), ("org", Prop::id().required())])
            .unwrap()
            .build()
            .unwrap()
    }

    fn org_rel(with: &[&str]) -> Relationship {
        RelationshipBuilder::new()
            .kind(crate::model::Cardinality::One)
            .unwrap()
            .entity("workspace")
            .unwrap()
            .has_one("organization")
            .unwrap()
            .alias("org")
            .unwrap()
            .with(with.to_vec())
            .unwrap()
            .build()
            .unwrap()
    }

    #[test]
    fn test_lookup_in_any_casing() {
        let registry = ModelRegistry::builder().entity(org()).unwrap().build().unwrap();
        for name in ["organization", "Organizations", "ORGANIZATION", "organizations"] {
            assert_eq!(registry.get(name).unwrap().name, "Organization", "{name}");
        }
        assert!(registry.get("user").is_err());
    }

    #[test]
    fn test_relationship_attached_to_owner() {
        let registry = ModelRegistry::builder()
            .entity(org())
            .unwrap()
            .entity(workspace())
            .unwrap()
            .relationship(org_rel(&["name", "slug"]))
            .unwrap()
            .build()
            .unwrap();
        let ws = registry.get("workspace").unwrap();
        assert_eq!(ws.relationship("org").unwrap().has, "Organization");
        let embeds: Vec<_> = registry
            .embeds_of("Organization")
            .map(|(owner, rel)| (owner.name.as_str(), rel.local_field()))
            .collect();
        assert_eq!(embeds, vec![("Workspace", "org".to_string())]);
    }

    #[test]
    fn test_unknown_embedded_prop_fails() {
        let result = ModelRegistry::builder()
            .entity(org())
            .unwrap()
            .entity(workspace())
            .unwrap()
            .relationship(org_rel(&["name", "color"]))
            .unwrap()
            .build();
        assert!(matches!(result, Err(TenancyError::Configuration(_))));
    }

    #[test]
    fn test_duplicate_entity_fails() {
        let result = ModelRegistry::builder().entity(org()).unwrap().entity(org());
        assert!(result.is_err());
    }

    #[test]
    fn test_unknown_target_fails() {
        let result = ModelRegistry::builder()
            .entity(workspace())
            .unwrap()
            .relationship(org_rel(&["name"]))
            .unwrap()
            .build();
        assert!(result.is_err());
    }
}
