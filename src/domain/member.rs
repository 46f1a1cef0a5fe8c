// Copyright 2025 Cowboy AI, LLC.

//! Organization members
//!
//! Members have no materialized collection. Every read folds their events
//! and resolves the `user` and `org` snapshots on the spot.

use super::ORG_ROLES;
use crate::command::CommandPayload;
use crate::errors::TenancyResult;
use crate::model::{EntityBuilder, EntityDefinition, Prop};
use crate::repo::{CommandResult, EntityRepo};
use crate::store::Transaction;

/// Changes a member's role
pub const CHANGE_ROLE: &str = "CHANGE_ROLE";

/// Member entity (read path only)
pub fn definition() -> TenancyResult<EntityDefinition> {
    EntityBuilder::new("member")?
        .props([
            ("role", Prop::one_of(ORG_ROLES).required()),
            ("user", Prop::id().required()),
            ("org", Prop::id().required()),
        ])?
        .verb(CHANGE_ROLE, [("role", Prop::one_of(ORG_ROLES).required())])?
        .persisted(false)?
        .build()
}

/// Change the role of one member
pub async fn change_role(
    repo: &EntityRepo<'_>,
    member_id: &str,
    role: &str,
    tx: Option<&Transaction>,
) -> TenancyResult<CommandResult> {
    repo.execute(CHANGE_ROLE, CommandPayload::new(member_id).value("role", role), tx)
        .await
}
