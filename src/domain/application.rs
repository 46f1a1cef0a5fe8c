// Copyright 2025 Cowboy AI, LLC.

//! Applications: the products workspaces belong to
//!
//! `workspaces` lists workspace ids in the log; once materialized each one
//! is a `{_id, name, slug, org}` snapshot.

use super::{default_slug, with_list};
use crate::command::CommandPayload;
use crate::errors::TenancyResult;
use crate::model::{EntityBuilder, EntityDefinition, Prop, PropType};
use crate::repo::{CommandResult, EntityRepo};
use crate::store::{reference_id, Transaction};
use serde_json::{json, Map, Value};

/// Unique index on the materialized application key
pub const KEY_INDEX: &str = "key_unique";

/// Attaches a workspace
pub const ADD_WORKSPACE: &str = "ADD_WORKSPACE";
/// Detaches a workspace
pub const REMOVE_WORKSPACE: &str = "REMOVE_WORKSPACE";

/// Application entity
pub fn definition() -> TenancyResult<EntityDefinition> {
    EntityBuilder::new("application")?
        .props([
            ("name", Prop::string().required()),
            ("key", Prop::slug().required()),
            ("slug", Prop::slug()),
            ("roles", Prop::array(PropType::String).default(json!(["Administrator", "Member"]))),
            ("workspaces", Prop::array(PropType::Id)),
        ])?
        .create_transform(|values| {
            default_slug(values);
            values.insert("workspaces".into(), json!([]));
        })?
        .verb(ADD_WORKSPACE, [("workspace", Prop::id().required())])?
        .fold(ADD_WORKSPACE, |values, event| {
            if let Some(id) = workspace_of(&event.values) {
                with_list(values, "workspaces", |items| {
                    if !items.iter().any(|w| reference_id(w) == Some(id)) {
                        items.push(Value::String(id.to_string()));
                    }
                });
            }
        })?
        .verb(REMOVE_WORKSPACE, [("workspace", Prop::id().required())])?
        .fold(REMOVE_WORKSPACE, |values, event| {
            if let Some(id) = workspace_of(&event.values) {
                with_list(values, "workspaces", |items| items.retain(|w| reference_id(w) != Some(id)));
            }
        })?
        .build()
}

fn workspace_of(values: &Map<String, Value>) -> Option<&str> {
    values.get("workspace").and_then(Value::as_str)
}

/// Attach a workspace to an application
pub async fn add_workspace(
    repo: &EntityRepo<'_>,
    application_id: &str,
    workspace_id: &str,
    tx: Option<&Transaction>,
) -> TenancyResult<CommandResult> {
    let payload = CommandPayload::new(application_id).value("workspace", workspace_id);
    repo.execute(ADD_WORKSPACE, payload, tx).await
}
