// Copyright 2025 Cowboy AI, LLC.

//! Users
//!
//! `manages` holds `{ org: {_id, name, slug}, role }` elements and
//! `memberships` holds `{ workspace: {_id, name, slug, org, application},
//! role }` elements. The list verbs below edit them by id; the snapshots
//! are filled in at materialization.

use super::{patch_wrapped, remove_wrapped, upsert_wrapped, without, ORG_ROLES};
use crate::command::CommandPayload;
use crate::errors::TenancyResult;
use crate::model::{EntityBuilder, EntityDefinition, Prop, PropType};
use crate::repo::{CommandResult, EntityRepo};
use crate::store::Transaction;
use serde_json::{json, Map, Value};

/// Counts a login and marks the user verified
pub const MAGIC_LOGIN: &str = "MAGIC_LOGIN";
/// Adds (or re-roles) an organization the user manages
pub const MANAGE_ORG: &str = "MANAGE_ORG";
/// Changes the role on a managed organization
pub const CHANGE_ORG_ROLE: &str = "CHANGE_ORG_ROLE";
/// Drops a managed organization
pub const UNMANAGE_ORG: &str = "UNMANAGE_ORG";
/// Adds (or re-roles) a workspace membership
pub const JOIN_WORKSPACE: &str = "JOIN_WORKSPACE";
/// Drops a workspace membership
pub const LEAVE_WORKSPACE: &str = "LEAVE_WORKSPACE";

/// User entity
pub fn definition() -> TenancyResult<EntityDefinition> {
    let org_role = || Prop::one_of(ORG_ROLES).required();

    EntityBuilder::new("user")?
        .props([
            ("email", Prop::email().required()),
            ("givenName", Prop::string().required()),
            ("familyName", Prop::string().required()),
            ("verified", Prop::boolean().default(false)),
            ("domain", Prop::string()),
            ("loginCount", Prop::integer()),
            ("lastLoggedInAt", Prop::date().nullable()),
            ("manages", Prop::array(PropType::Object)),
            ("memberships", Prop::array(PropType::Object)),
        ])?
        .create_transform(on_create)?
        .verb(MAGIC_LOGIN, [("ip", Prop::string().nullable()), ("ua", Prop::string().nullable())])?
        .fold(MAGIC_LOGIN, |values, event| {
            let count = values.get("loginCount").and_then(Value::as_i64).unwrap_or(0);
            values.insert("loginCount".into(), json!(count + 1));
            values.insert("lastLoggedInAt".into(), json!(event.date));
            values.insert("verified".into(), Value::Bool(true));
        })?
        .verb(MANAGE_ORG, [("org", Prop::id().required()), ("role", org_role())])?
        .fold(MANAGE_ORG, |values, event| {
            if let Some(org) = event.values.get("org").and_then(Value::as_str) {
                upsert_wrapped(values, "manages", "org", org, without(&event.values, &["org"]));
            }
        })?
        .verb(CHANGE_ORG_ROLE, [("org", Prop::id().required()), ("role", org_role())])?
        .fold(CHANGE_ORG_ROLE, |values, event| {
            if let Some(org) = event.values.get("org").and_then(Value::as_str) {
                patch_wrapped(values, "manages", "org", org, without(&event.values, &["org"]));
            }
        })?
        .verb(UNMANAGE_ORG, [("org", Prop::id().required())])?
        .fold(UNMANAGE_ORG, |values, event| {
            if let Some(org) = event.values.get("org").and_then(Value::as_str) {
                remove_wrapped(values, "manages", "org", org);
            }
        })?
        .verb(
            JOIN_WORKSPACE,
            [("workspace", Prop::id().required()), ("role", Prop::string().required())],
        )?
        .fold(JOIN_WORKSPACE, |values, event| {
            if let Some(workspace) = event.values.get("workspace").and_then(Value::as_str) {
                let extra = without(&event.values, &["workspace"]);
                upsert_wrapped(values, "memberships", "workspace", workspace, extra);
            }
        })?
        .verb(LEAVE_WORKSPACE, [("workspace", Prop::id().required())])?
        .fold(LEAVE_WORKSPACE, |values, event| {
            if let Some(workspace) = event.values.get("workspace").and_then(Value::as_str) {
                remove_wrapped(values, "memberships", "workspace", workspace);
            }
        })?
        .build()
}

fn on_create(values: &mut Map<String, Value>) {
    let domain = values
        .get("email")
        .and_then(Value::as_str)
        .and_then(|email| email.split_once('@'))
        .map(|(_, domain)| domain.to_string());
    if let Some(domain) = domain {
        values.insert("domain".into(), Value::String(domain));
    }
    values.insert("loginCount".into(), json!(0));
    values.insert("manages".into(), json!([]));
    values.insert("memberships".into(), json!([]));
}

/// Record a magic-link login
pub async fn magic_login(
    repo: &EntityRepo<'_>,
    user_id: &str,
    ip: Option<&str>,
    tx: Option<&Transaction>,
) -> TenancyResult<CommandResult> {
    let mut payload = CommandPayload::new(user_id);
    if let Some(ip) = ip {
        payload = payload.value("ip", ip);
    }
    repo.execute(MAGIC_LOGIN, payload, tx).await
}

/// Make a user manage an organization with a role
pub async fn manage_org(
    repo: &EntityRepo<'_>,
    user_id: &str,
    org_id: &str,
    role: &str,
    tx: Option<&Transaction>,
) -> TenancyResult<CommandResult> {
    let payload = CommandPayload::new(user_id).value("org", org_id).value("role", role);
    repo.execute(MANAGE_ORG, payload, tx).await
}

/// Give a user a role in a workspace
pub async fn join_workspace(
    repo: &EntityRepo<'_>,
    user_id: &str,
    workspace_id: &str,
    role: &str,
    tx: Option<&Transaction>,
) -> TenancyResult<CommandResult> {
    let payload = CommandPayload::new(user_id)
        .value("workspace", workspace_id)
        .value("role", role);
    repo.execute(JOIN_WORKSPACE, payload, tx).await
}
