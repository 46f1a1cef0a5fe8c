// Copyright 2025 Cowboy AI, LLC.

//! Workspaces: one organization's use of one application
//!
//! A workspace embeds `application: {_id, name, slug}` and
//! `org: {_id, name, slug}`; users embed workspaces together with those two
//! snapshots.

use super::default_slug;
use crate::errors::TenancyResult;
use crate::model::{EntityBuilder, EntityDefinition, Prop};

/// Workspace entity
pub fn definition() -> TenancyResult<EntityDefinition> {
    EntityBuilder::new("workspace")?
        .props([
            ("name", Prop::string().required()),
            ("slug", Prop::slug()),
            ("application", Prop::id().required()),
            ("org", Prop::id().required()),
        ])?
        .create_transform(default_slug)?
        .build()
}
