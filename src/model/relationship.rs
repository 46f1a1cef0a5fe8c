// Copyright 2025 Cowboy AI, LLC.

//! Relationships between entity types
//!
//! A [`RelationshipBuilder`] is configured in a fixed order
//! (`kind → entity → has_one/has_many → alias/wrap/with`) and every field
//! but the embed spec may be set once. Calling a step before its
//! prerequisite names the missing prerequisite in the error.

use crate::errors::{TenancyError, TenancyResult};
use crate::naming::{camelize, entity_name, pluralize};
use crate::store::ID_FIELD;
use indexmap::IndexSet;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// `one` or `many`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Cardinality {
    /// A single target
    One,
    /// A list of targets
    Many,
}

impl fmt::Display for Cardinality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cardinality::One => f.write_str("one"),
            Cardinality::Many => f.write_str("many"),
        }
    }
}

impl FromStr for Cardinality {
    type Err = TenancyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "one" => Ok(Cardinality::One),
            "many" => Ok(Cardinality::Many),
            other => Err(TenancyError::configuration(format!(
                "The relationship `type` must be `one` or `many`, got `{other}`."
            ))),
        }
    }
}

/// Fields of the target copied into the owner's document
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmbedSpec {
    /// Plain fields of the target
    pub props: IndexSet<String>,
    /// Fields of the target that are themselves embeds
    pub edges: IndexSet<String>,
}

impl EmbedSpec {
    /// Empty spec
    pub fn new() -> Self {
        Self::default()
    }

    /// Add plain fields
    pub fn props<S: AsRef<str>>(mut self, names: impl IntoIterator<Item = S>) -> Self {
        extend_normalized(&mut self.props, names);
        self
    }

    /// Add edge fields
    pub fn edges<S: AsRef<str>>(mut self, names: impl IntoIterator<Item = S>) -> Self {
        extend_normalized(&mut self.edges, names);
        self
    }

    /// Nothing to embed
    pub fn is_empty(&self) -> bool {
        self.props.is_empty() && self.edges.is_empty()
    }

    /// Accumulate another spec; repeating values changes nothing
    pub fn merge(&mut self, other: EmbedSpec) {
        extend_normalized(&mut self.props, other.props);
        extend_normalized(&mut self.edges, other.edges);
    }
}

fn extend_normalized<S: AsRef<str>>(set: &mut IndexSet<String>, names: impl IntoIterator<Item = S>) {
    for name in names {
        let name = camelize(name.as_ref());
        // the id is always embedded implicitly
        if name.is_empty() || name == "id" || name == ID_FIELD {
            continue;
        }
        set.insert(name);
    }
}

impl From<&str> for EmbedSpec {
    fn from(name: &str) -> Self {
        EmbedSpec::new().props([name])
    }
}

impl From<String> for EmbedSpec {
    fn from(name: String) -> Self {
        EmbedSpec::new().props([name])
    }
}

impl From<Vec<&str>> for EmbedSpec {
    fn from(names: Vec<&str>) -> Self {
        EmbedSpec::new().props(names)
    }
}

impl From<Vec<String>> for EmbedSpec {
    fn from(names: Vec<String>) -> Self {
        EmbedSpec::new().props(names)
    }
}

impl<const N: usize> From<[&str; N]> for EmbedSpec {
    fn from(names: [&str; N]) -> Self {
        EmbedSpec::new().props(names)
    }
}

/// A built relationship: `entity` embeds `has`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Relationship {
    /// Cardinality of the relationship itself
    pub kind: Cardinality,
    /// Declaring (owner) entity name
    pub entity: String,
    /// Cardinality of the target side
    pub has_kind: Cardinality,
    /// Target entity name
    pub has: String,
    /// Field name override
    pub alias: Option<String>,
    /// Key under which each embedded snapshot sits inside its element
    pub wrap: Option<String>,
    /// What to embed
    pub with: EmbedSpec,
}

impl Relationship {
    /// Field on the owner holding the embed: the alias, else the target name
    /// camelized (pluralized when the target side is many)
    pub fn local_field(&self) -> String {
        local_field(self.alias.as_deref(), self.has_kind, &self.has)
    }

    /// Whether the owner holds a list
    pub fn is_many(&self) -> bool {
        self.has_kind == Cardinality::Many
    }

    /// Path from an element (or the field itself) to the snapshot
    pub fn snapshot_prefix(&self) -> String {
        match &self.wrap {
            Some(key) => format!("{key}."),
            None => String::new(),
        }
    }
}

fn local_field(alias: Option<&str>, has_kind: Cardinality, has: &str) -> String {
    match (alias, has_kind) {
        (Some(alias), _) => alias.to_string(),
        (None, Cardinality::Many) => camelize(&pluralize(has)),
        (None, Cardinality::One) => camelize(has),
    }
}

/// Construction progress of a relationship
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Stage {
    Empty,
    Typed,
    Entity,
    Has,
}

impl Stage {
    fn missing(self, needed: Stage) -> TenancyResult<()> {
        if self >= needed {
            return Ok(());
        }
        let field = match self {
            Stage::Empty => "type",
            Stage::Typed => "entity",
            Stage::Entity | Stage::Has => "has",
        };
        Err(TenancyError::configuration(format!(
            "The relationship `{field}` value must be set first."
        )))
    }
}

/// Single-assignment builder for a [`Relationship`]
#[derive(Debug, Clone)]
pub struct RelationshipBuilder {
    stage: Stage,
    kind: Option<Cardinality>,
    entity: Option<String>,
    has: Option<(Cardinality, String)>,
    alias: Option<String>,
    wrap: Option<String>,
    with: EmbedSpec,
}

impl Default for RelationshipBuilder {
    fn default() -> Self {
        Self::new()
    }
}

fn already_set(field: &str) -> TenancyError {
    TenancyError::configuration(format!("A value already exists for `{field}`"))
}

fn required(field: &str, value: &str) -> TenancyResult<String> {
    let value = value.trim();
    if value.is_empty() {
        Err(TenancyError::configuration(format!(
            "The relationship `{field}` value must be a non-empty string."
        )))
    } else {
        Ok(value.to_string())
    }
}

impl RelationshipBuilder {
    /// Start a relationship
    pub fn new() -> Self {
        Self {
            stage: Stage::Empty,
            kind: None,
            entity: None,
            has: None,
            alias: None,
            wrap: None,
            with: EmbedSpec::new(),
        }
    }

    /// Cardinality of the relationship
    pub fn kind(mut self, kind: Cardinality) -> TenancyResult<Self> {
        if self.kind.is_some() {
            return Err(already_set("type"));
        }
        self.kind = Some(kind);
        self.stage = Stage::Typed;
        Ok(self)
    }

    /// Declaring entity
    pub fn entity(mut self, name: &str) -> TenancyResult<Self> {
        self.stage.missing(Stage::Typed)?;
        if self.entity.is_some() {
            return Err(already_set("entity"));
        }
        self.entity = Some(entity_name(&required("entity", name)?));
        self.stage = Stage::Entity;
        Ok(self)
    }

    /// Target entity with its cardinality
    pub fn has(mut self, kind: Cardinality, name: &str) -> TenancyResult<Self> {
        self.stage.missing(Stage::Entity)?;
        if self.has.is_some() {
            return Err(already_set("has"));
        }
        self.has = Some((kind, entity_name(&required("has", name)?)));
        self.stage = Stage::Has;
        Ok(self)
    }

    /// A single target
    pub fn has_one(self, name: &str) -> TenancyResult<Self> {
        self.has(Cardinality::One, name)
    }

    /// A list of targets
    pub fn has_many(self, name: &str) -> TenancyResult<Self> {
        self.has(Cardinality::Many, name)
    }

    /// Override the local field name
    pub fn alias(mut self, name: &str) -> TenancyResult<Self> {
        self.stage.missing(Stage::Has)?;
        if self.alias.is_some() {
            return Err(already_set("as"));
        }
        self.alias = Some(camelize(&required("as", name)?));
        Ok(self)
    }

    /// Keep each snapshot under `key` inside its element
    pub fn wrap(mut self, key: &str) -> TenancyResult<Self> {
        self.stage.missing(Stage::Has)?;
        if self.wrap.is_some() {
            return Err(already_set("wrap"));
        }
        self.wrap = Some(camelize(&required("wrap", key)?));
        Ok(self)
    }

    /// Accumulate fields to embed
    pub fn with(mut self, spec: impl Into<EmbedSpec>) -> TenancyResult<Self> {
        self.stage.missing(Stage::Has)?;
        self.with.merge(spec.into());
        Ok(self)
    }

    /// The local field as configured so far
    pub fn local_field(&self) -> TenancyResult<String> {
        self.stage.missing(Stage::Has)?;
        match &self.has {
            Some((kind, has)) => Ok(local_field(self.alias.as_deref(), *kind, has)),
            None => Err(TenancyError::configuration("The relationship `has` value must be set first.")),
        }
    }

    /// Current embed spec
    pub fn embed_spec(&self) -> &EmbedSpec {
        &self.with
    }

    /// Freeze the relationship
    pub fn build(self) -> TenancyResult<Relationship> {
        self.stage.missing(Stage::Has)?;
        match (self.kind, self.entity, self.has) {
            (Some(kind), Some(entity), Some((has_kind, has))) => Ok(Relationship {
                kind,
                entity,
                has_kind,
                has,
                alias: self.alias,
                wrap: self.wrap,
                with: self.with,
            }),
            _ => Err(TenancyError::configuration("The relationship `has` value must be set first.")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    fn base() -> RelationshipBuilder {
        RelationshipBuilder::new()
            .kind(Cardinality::One)
            .unwrap()
            .entity("foo")
            .unwrap()
    }

    fn message(err: TenancyError) -> String {
        match err {
            TenancyError::Configuration(msg) => msg,
            other => panic!("expected a configuration error, got {other:?}"),
        }
    }

    #[test]
    fn test_entity_before_type_fails() {
        let err = RelationshipBuilder::new().entity("foo").unwrap_err();
        assert_eq!(message(err), "The relationship `type` value must be set first.");
    }

    #[test]
    fn test_has_before_entity_fails() {
        let err = RelationshipBuilder::new()
            .kind(Cardinality::One)
            .unwrap()
            .has_one("foo")
            .unwrap_err();
        assert_eq!(message(err), "The relationship `entity` value must be set first.");
    }

    #[test]
    fn test_alias_and_with_before_has_fail() {
        let err = base().alias("foo").unwrap_err();
        assert_eq!(message(err), "The relationship `has` value must be set first.");
        let err = base().with("name").unwrap_err();
        assert_eq!(message(err), "The relationship `has` value must be set first.");
        let err = RelationshipBuilder::new().alias("foo").unwrap_err();
        assert_eq!(message(err), "The relationship `type` value must be set first.");
    }

    #[test]
    fn test_names_are_normalized() {
        let rel = base().has_one("bar").unwrap().build().unwrap();
        assert_eq!(rel.entity, "Foo");
        assert_eq!(rel.has, "Bar");
    }

    #[test]
    fn test_single_assignment() {
        let err = base().entity("baz").unwrap_err();
        assert_eq!(message(err), "A value already exists for `entity`");
        let err = base().has_one("bar").unwrap().alias("a").unwrap().alias("b").unwrap_err();
        assert_eq!(message(err), "A value already exists for `as`");
    }

    #[test]
    fn test_blank_values_fail() {
        assert!(base().has_one("  ").is_err());
        assert!(base().has_many("bar").unwrap().alias("").is_err());
    }

    #[test]
    fn test_local_field_defaults() {
        let many = base().has_many("user-event").unwrap();
        assert_eq!(many.local_field().unwrap(), "userEvents");
        let one = base().has_one("UserEvent").unwrap();
        assert_eq!(one.local_field().unwrap(), "userEvent");
    }

    #[test_case("userEvent" ; "camel")]
    #[test_case("UserEvent" ; "pascal")]
    #[test_case("user-event" ; "dasherized")]
    #[test_case("user event" ; "spaced")]
    #[test_case(" userEvent " ; "padded")]
    fn test_alias_is_camelized(alias: &str) {
        let rel = base().has_one("bar").unwrap().alias(alias).unwrap();
        assert_eq!(rel.local_field().unwrap(), "userEvent");
    }

    #[test]
    fn test_with_accumulates_idempotently() {
        let rel = base()
            .has_many("bar")
            .unwrap()
            .with("name")
            .unwrap()
            .with(vec!["name", "slug", "_id"])
            .unwrap()
            .with(["id", "foo_bar"])
            .unwrap()
            .with(EmbedSpec::new().props(["slug"]).edges(["org", "org"]))
            .unwrap();
        let spec = rel.embed_spec();
        assert_eq!(spec.props.iter().collect::<Vec<_>>(), vec!["name", "slug", "fooBar"]);
        assert_eq!(spec.edges.iter().collect::<Vec<_>>(), vec!["org"]);

        let again = rel.clone().with("name").unwrap();
        assert_eq!(again.embed_spec(), rel.embed_spec());
    }

    #[test]
    fn test_cardinality_parse() {
        assert_eq!("one".parse::<Cardinality>().unwrap(), Cardinality::One);
        assert_eq!("many".parse::<Cardinality>().unwrap(), Cardinality::Many);
        assert!("some".parse::<Cardinality>().is_err());
    }
}
