// Copyright 2025 Cowboy AI, LLC.

//! Organizations: the tenants

use super::default_slug;
use crate::errors::TenancyResult;
use crate::model::{EntityBuilder, EntityDefinition, Prop};

/// Organization entity
pub fn definition() -> TenancyResult<EntityDefinition> {
    EntityBuilder::new("organization")?
        .props([
            ("name", Prop::string().required()),
            ("key", Prop::slug()),
            ("slug", Prop::slug()),
        ])?
        .create_transform(default_slug)?
        .build()
}
