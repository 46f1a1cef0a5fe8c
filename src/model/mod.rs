// Copyright 2025 Cowboy AI, LLC.

//! Declarative entity and relationship model
//!
//! Entities and relationships are described once with single-assignment
//! builders, validated together in a [`ModelRegistry`], and read-only from
//! then on.

mod entity;
mod registry;
mod relationship;
mod schema;

pub use entity::{CreateTransform, EntityBuilder, EntityDefinition, FoldFn};
pub use registry::{ModelRegistry, ModelRegistryBuilder};
pub use relationship::{Cardinality, EmbedSpec, Relationship, RelationshipBuilder};
pub use schema::{Prop, PropType, ValuesRule, VerbSchema};
