// Copyright 2025 Cowboy AI, LLC.

//! Entity definitions
//!
//! An [`EntityBuilder`] collects props, custom verbs, fold extensions and an
//! optional create transform. [`EntityBuilder::build`] compiles one
//! [`VerbSchema`] per verb and freezes everything into an
//! [`EntityDefinition`] that is never mutated afterwards.

use super::relationship::Relationship;
use super::schema::{Prop, VerbSchema};
use crate::errors::{TenancyError, TenancyResult};
use crate::event::{Event, Verb};
use crate::naming::{camelize, dasherize, entity_name, pluralize};
use indexmap::IndexMap;
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;

/// Fold extension for one verb: updates the accumulated values from an event
pub type FoldFn = Arc<dyn Fn(&mut Map<String, Value>, &Event) + Send + Sync>;

/// Adjusts validated CREATE values before they are appended
pub type CreateTransform = Arc<dyn Fn(&mut Map<String, Value>) + Send + Sync>;

/// Immutable definition of one entity type
#[derive(Clone)]
pub struct EntityDefinition {
    /// Singular PascalCase name (`Organization`)
    pub name: String,
    /// Dasherized singular name, used as the event `entityType`
    pub key: String,
    /// Plural name (`Organizations`)
    pub plural: String,
    /// Materialized collection (`organizations`)
    pub collection: String,
    /// Properties in declaration order
    pub props: IndexMap<String, Prop>,
    /// Relationships declared by this entity
    pub relationships: Vec<Relationship>,
    /// Whether a materialized collection is kept
    pub persisted: bool,
    schemas: IndexMap<Verb, VerbSchema>,
    folds: IndexMap<Verb, FoldFn>,
    create_transform: Option<CreateTransform>,
}

impl fmt::Debug for EntityDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityDefinition")
            .field("name", &self.name)
            .field("collection", &self.collection)
            .field("props", &self.props.keys().collect::<Vec<_>>())
            .field("relationships", &self.relationships)
            .field("verbs", &self.schemas.keys().collect::<Vec<_>>())
            .field("persisted", &self.persisted)
            .finish()
    }
}

impl EntityDefinition {
    /// Schema for a verb
    pub fn schema(&self, verb: &Verb) -> TenancyResult<&VerbSchema> {
        self.schemas.get(verb).ok_or_else(|| {
            TenancyError::invalid("command", format!("`{verb}` is not a command of `{}`", self.name))
        })
    }

    /// Every verb this entity accepts
    pub fn verbs(&self) -> impl Iterator<Item = &Verb> {
        self.schemas.keys()
    }

    /// Validate values for a verb, applying the create transform on CREATE
    pub fn validate(&self, verb: &Verb, values: &Map<String, Value>) -> TenancyResult<Map<String, Value>> {
        let mut validated = self.schema(verb)?.validate(values)?;
        if let (Verb::Create, Some(transform)) = (verb, &self.create_transform) {
            transform(&mut validated);
            // derived values obey the same schema as supplied ones
            validated = self.schema(verb)?.validate(&validated)?;
        }
        Ok(validated)
    }

    /// Fold extension registered for a verb
    pub fn fold_for(&self, verb: &Verb) -> Option<&FoldFn> {
        self.folds.get(verb)
    }

    /// Relationship by its local field
    pub fn relationship(&self, local_field: &str) -> Option<&Relationship> {
        self.relationships.iter().find(|r| r.local_field() == local_field)
    }

    pub(crate) fn attach(&mut self, relationship: Relationship) -> TenancyResult<()> {
        let field = relationship.local_field();
        if self.relationship(&field).is_some() {
            return Err(TenancyError::configuration(format!(
                "A value already exists for `{}.relationships.{field}`",
                self.name
            )));
        }
        self.relationships.push(relationship);
        Ok(())
    }
}

/// Builder for an [`EntityDefinition`]
pub struct EntityBuilder {
    name: String,
    props: IndexMap<String, Prop>,
    verbs: IndexMap<Verb, VerbSchema>,
    folds: IndexMap<Verb, FoldFn>,
    create_transform: Option<CreateTransform>,
    persisted: Option<bool>,
}

impl fmt::Debug for EntityBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityBuilder")
            .field("name", &self.name)
            .field("props", &self.props.keys().collect::<Vec<_>>())
            .field("verbs", &self.verbs.keys().collect::<Vec<_>>())
            .finish()
    }
}

fn already_exists(field: impl fmt::Display) -> TenancyError {
    TenancyError::configuration(format!("A value already exists for `{field}`"))
}

fn prop_name(raw: &str) -> TenancyResult<String> {
    if raw.trim_start().starts_with('_') {
        return Err(TenancyError::configuration(format!(
            "Property `{raw}` uses the reserved `_` prefix"
        )));
    }
    let name = camelize(raw);
    if name.is_empty() {
        return Err(TenancyError::configuration("A property name must be a non-empty string."));
    }
    Ok(name)
}

impl EntityBuilder {
    /// Start an entity; any casing of the name is accepted
    pub fn new(name: &str) -> TenancyResult<Self> {
        let name = entity_name(name);
        if name.is_empty() {
            return Err(TenancyError::configuration("An entity name must be a non-empty string."));
        }
        Ok(Self {
            name,
            props: IndexMap::new(),
            verbs: IndexMap::new(),
            folds: IndexMap::new(),
            create_transform: None,
            persisted: None,
        })
    }

    /// Normalized entity name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Declare a property
    pub fn prop(mut self, name: &str, prop: Prop) -> TenancyResult<Self> {
        let name = prop_name(name)?;
        if self.props.contains_key(&name) {
            return Err(already_exists(format_args!("props.{name}")));
        }
        self.props.insert(name, prop);
        Ok(self)
    }

    /// Declare several properties
    pub fn props<'a>(self, props: impl IntoIterator<Item = (&'a str, Prop)>) -> TenancyResult<Self> {
        props.into_iter().try_fold(self, |builder, (name, prop)| builder.prop(name, prop))
    }

    /// Declare a custom verb and the values it accepts
    pub fn verb<'a>(mut self, name: &str, props: impl IntoIterator<Item = (&'a str, Prop)>) -> TenancyResult<Self> {
        let verb = Verb::parse(name);
        if verb.is_standard() {
            return Err(TenancyError::configuration(format!("`{verb}` is a built-in command")));
        }
        if self.verbs.contains_key(&verb) {
            return Err(already_exists(format_args!("verbs.{verb}")));
        }
        let mut schema = VerbSchema::new(verb.clone());
        for (prop, kind) in props {
            schema = schema.prop(prop_name(prop)?, kind);
        }
        self.verbs.insert(verb, schema);
        Ok(self)
    }

    /// Register a fold extension for a verb
    pub fn fold<F>(mut self, verb: &str, fold: F) -> TenancyResult<Self>
    where
        F: Fn(&mut Map<String, Value>, &Event) + Send + Sync + 'static,
    {
        let verb = Verb::parse(verb);
        if self.folds.contains_key(&verb) {
            return Err(already_exists(format_args!("folds.{verb}")));
        }
        self.folds.insert(verb, Arc::new(fold));
        Ok(self)
    }

    /// Adjust CREATE values after validation
    pub fn create_transform<F>(mut self, transform: F) -> TenancyResult<Self>
    where
        F: Fn(&mut Map<String, Value>) + Send + Sync + 'static,
    {
        if self.create_transform.is_some() {
            return Err(already_exists("createTransform"));
        }
        self.create_transform = Some(Arc::new(transform));
        Ok(self)
    }

    /// Keep (or not) a materialized collection; defaults to kept
    pub fn persisted(mut self, persisted: bool) -> TenancyResult<Self> {
        if self.persisted.is_some() {
            return Err(already_exists("persisted"));
        }
        self.persisted = Some(persisted);
        Ok(self)
    }

    /// Compile the per-verb schemas and freeze
    pub fn build(self) -> TenancyResult<EntityDefinition> {
        for verb in self.folds.keys() {
            if !verb.is_standard() && !self.verbs.contains_key(verb) {
                return Err(TenancyError::configuration(format!(
                    "`{}` folds `{verb}` but declares no such command",
                    self.name
                )));
            }
        }

        let mut schemas = IndexMap::new();
        schemas.insert(Verb::Create, VerbSchema::for_create(&self.props));
        schemas.insert(Verb::Update, VerbSchema::for_update(&self.props));
        schemas.insert(Verb::Delete, VerbSchema::for_delete());
        schemas.insert(Verb::Restore, VerbSchema::for_restore(&self.props));
        schemas.extend(self.verbs);

        let plural = pluralize(&self.name);
        Ok(EntityDefinition {
            key: dasherize(&self.name),
            collection: dasherize(&plural),
            plural,
            name: self.name,
            props: self.props,
            relationships: Vec::new(),
            persisted: self.persisted.unwrap_or(true),
            schemas,
            folds: self.folds,
            create_transform: self.create_transform,
        })
    }
}
