// Copyright 2025 Cowboy AI, LLC.

//! The tenancy model
//!
//! Workspaces belong to one application and one organization, users
//! manage organizations and hold workspace memberships, and members tie a
//! user to an organization with a role. Names and slugs of organizations,
//! applications and workspaces are copied into every document that embeds
//! them and kept in sync by the cascade.

pub mod application;
pub mod member;
pub mod organization;
pub mod user;
pub mod workspace;

use crate::command::CommandPayload;
use crate::errors::{TenancyError, TenancyResult};
use crate::model::{Cardinality, EmbedSpec, ModelRegistry, Relationship, RelationshipBuilder};
use crate::naming::slugify;
use crate::repo::{CommandResult, EntityRepo, Repos};
use crate::store::{reference_id, IndexSpec, Transaction};
use serde_json::{Map, Value};
use tracing::debug;

/// Roles a user can hold in an organization
pub const ORG_ROLES: [&str; 3] = ["Owner", "Administrator", "Member"];

/// The full tenancy registry
pub fn tenancy_registry() -> TenancyResult<ModelRegistry> {
    ModelRegistry::builder()
        .entity(application::definition()?)?
        .entity(organization::definition()?)?
        .entity(workspace::definition()?)?
        .entity(user::definition()?)?
        .entity(member::definition()?)?
        .relationship(
            RelationshipBuilder::new()
                .kind(Cardinality::Many)?
                .entity("application")?
                .has_many("workspace")?
                .with(EmbedSpec::new().props(["name", "slug"]).edges(["org"]))?
                .build()?,
        )?
        .relationship(embed("workspace", "application", None, None, ["name", "slug"])?)?
        .relationship(embed("workspace", "organization", Some("org"), None, ["name", "slug"])?)?
        .relationship(embed_many("user", "organization", "manages", "org", EmbedSpec::new().props(["name", "slug"]))?)?
        .relationship(embed_many(
            "user",
            "workspace",
            "memberships",
            "workspace",
            EmbedSpec::new().props(["name", "slug"]).edges(["org", "application"]),
        )?)?
        .relationship(embed("member", "user", None, None, ["email", "givenName", "familyName"])?)?
        .relationship(embed("member", "organization", Some("org"), None, ["name", "slug"])?)?
        .build()
}

fn embed(
    owner: &str,
    target: &str,
    alias: Option<&str>,
    wrap: Option<&str>,
    with: impl Into<EmbedSpec>,
) -> TenancyResult<Relationship> {
    let mut builder = RelationshipBuilder::new()
        .kind(Cardinality::One)?
        .entity(owner)?
        .has_one(target)?;
    if let Some(alias) = alias {
        builder = builder.alias(alias)?;
    }
    if let Some(wrap) = wrap {
        builder = builder.wrap(wrap)?;
    }
    builder.with(with)?.build()
}

fn embed_many(owner: &str, target: &str, alias: &str, wrap: &str, with: EmbedSpec) -> TenancyResult<Relationship> {
    RelationshipBuilder::new()
        .kind(Cardinality::Many)?
        .entity(owner)?
        .has_many(target)?
        .alias(alias)?
        .wrap(wrap)?
        .with(with)?
        .build()
}

/// Declare the event-log indexes plus the unique application key
pub async fn create_indexes(repos: &Repos) -> TenancyResult<()> {
    repos.create_indexes().await?;
    let applications = repos.registry().get("application")?;
    let collection = repos.config().materialized_collection(&applications.collection);
    repos
        .database()
        .create_index(&collection, IndexSpec::unique(application::KEY_INDEX, &["key"]))
        .await;
    Ok(())
}

/// Rename an organization or application, regenerating its slug.
///
/// Renaming to the current name appends nothing. A name without any letter
/// or digit has no slug and is rejected.
pub async fn update_name(
    repo: &EntityRepo<'_>,
    id: &str,
    name: &str,
    tx: Option<&Transaction>,
) -> TenancyResult<CommandResult> {
    let def = repo.definition();
    if !def.props.contains_key("name") || !def.props.contains_key("slug") {
        return Err(TenancyError::configuration(format!("`{}` has no name and slug to update", def.name)));
    }
    let current = repo.find_by_id_strict(id, tx).await?;
    if current.values.get("name").and_then(Value::as_str) == Some(name.trim()) {
        debug!(entity_type = %def.key, entity_id = %id, "Name unchanged");
        return Ok(CommandResult {
            events: Vec::new(),
            documents: vec![current],
        });
    }
    let slug = slugify(name);
    if slug.is_empty() {
        return Err(TenancyError::invalid("values.name", "must contain a letter or digit"));
    }
    let payload = CommandPayload::new(id).value("name", name).value("slug", slug);
    repo.update(payload, tx).await
}

/// Run `f` on `field` as a list, created empty when missing
pub(crate) fn with_list(values: &mut Map<String, Value>, field: &str, f: impl FnOnce(&mut Vec<Value>)) {
    let mut items = match values.remove(field) {
        Some(Value::Array(items)) => items,
        _ => Vec::new(),
    };
    f(&mut items);
    values.insert(field.to_string(), Value::Array(items));
}

fn wrapped_id<'a>(element: &'a Value, wrap: &str) -> Option<&'a str> {
    element.get(wrap).and_then(reference_id)
}

/// Insert or update the element of `field` whose `wrap` refers to `id`
pub(crate) fn upsert_wrapped(values: &mut Map<String, Value>, field: &str, wrap: &str, id: &str, extra: Map<String, Value>) {
    with_list(values, field, |items| match items.iter_mut().find(|el| wrapped_id(el, wrap) == Some(id)) {
        Some(Value::Object(element)) => element.extend(extra),
        _ => {
            let mut element = Map::new();
            element.insert(wrap.to_string(), Value::String(id.to_string()));
            element.extend(extra);
            items.push(Value::Object(element));
        }
    });
}

/// Update the element of `field` whose `wrap` refers to `id`, if present
pub(crate) fn patch_wrapped(values: &mut Map<String, Value>, field: &str, wrap: &str, id: &str, extra: Map<String, Value>) {
    with_list(values, field, |items| {
        if let Some(Value::Object(element)) = items.iter_mut().find(|el| wrapped_id(el, wrap) == Some(id)) {
            element.extend(extra);
        }
    });
}

/// Drop elements of `field` whose `wrap` refers to `id`
pub(crate) fn remove_wrapped(values: &mut Map<String, Value>, field: &str, wrap: &str, id: &str) {
    with_list(values, field, |items| items.retain(|el| wrapped_id(el, wrap) != Some(id)));
}

/// Event values except the listed keys
pub(crate) fn without(values: &Map<String, Value>, keys: &[&str]) -> Map<String, Value> {
    values
        .iter()
        .filter(|(k, _)| !keys.contains(&k.as_str()))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

/// Slug derived from `name` when the values carry none
pub(crate) fn default_slug(values: &mut Map<String, Value>) {
    if values.contains_key("slug") {
        return;
    }
    if let Some(name) = values.get("name").and_then(Value::as_str) {
        let slug = slugify(name);
        values.insert("slug".to_string(), Value::String(slug));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FixedClock;
    use chrono::{TimeZone, Utc};
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::sync::Arc;
    use tokio_test::{assert_err, assert_ok};

    fn values(v: Value) -> Map<String, Value> {
        v.as_object().cloned().unwrap()
    }

    fn repos() -> Repos {
        let clock = FixedClock::new(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());
        Repos::builder(tenancy_registry().unwrap())
            .clock(Arc::new(clock))
            .build()
            .unwrap()
    }

    /// Organization `o1` "Acme" embedded by workspace `w1`, application `a1` and user `u1`
    async fn seeded() -> Repos {
        let repos = repos();
        create_indexes(&repos).await.unwrap();
        let payloads = [
            ("application", CommandPayload::new("a1").value("name", "Identity X").value("key", "identity-x")),
            ("organization", CommandPayload::new("o1").value("name", "Acme")),
            (
                "workspace",
                CommandPayload::new("w1")
                    .value("name", "Main")
                    .value("application", "a1")
                    .value("org", "o1"),
            ),
            (
                "user",
                CommandPayload::new("u1")
                    .value("email", "jane@acme.io")
                    .value("givenName", "Jane")
                    .value("familyName", "Doe"),
            ),
        ];
        for (entity_type, payload) in payloads {
            repos.repo(entity_type).unwrap().create(payload, None).await.unwrap();
        }
        application::add_workspace(&repos.repo("application").unwrap(), "a1", "w1", None)
            .await
            .unwrap();
        user::manage_org(&repos.repo("user").unwrap(), "u1", "o1", "Owner", None)
            .await
            .unwrap();
        repos
    }

    async fn org_names(repos: &Repos) -> Vec<Value> {
        let read = |entity_type: &'static str, id: &'static str| async move {
            repos.repo(entity_type).unwrap().find_by_id_strict(id, None).await.unwrap()
        };
        vec![
            read("organization", "o1").await.values["name"].clone(),
            read("workspace", "w1").await.values["org"]["name"].clone(),
            read("application", "a1").await.values["workspaces"][0]["org"]["name"].clone(),
            read("user", "u1").await.values["manages"][0]["org"]["name"].clone(),
        ]
    }

    #[test]
    fn test_registry_builds() {
        let registry = tenancy_registry().unwrap();
        let names: Vec<&str> = registry.entities().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["Application", "Organization", "Workspace", "User", "Member"]);
        assert!(!registry.get("member").unwrap().persisted);

        let user = registry.get("user").unwrap();
        let memberships = user.relationship("memberships").unwrap();
        assert_eq!(memberships.wrap.as_deref(), Some("workspace"));
        assert!(memberships.with.edges.contains("org"));
    }

    #[test]
    fn test_wrapped_list_helpers() {
        let mut v = values(json!({}));
        upsert_wrapped(&mut v, "manages", "org", "o1", values(json!({ "role": "Owner" })));
        upsert_wrapped(&mut v, "manages", "org", "o2", values(json!({ "role": "Member" })));
        patch_wrapped(&mut v, "manages", "org", "o1", values(json!({ "role": "Administrator" })));
        patch_wrapped(&mut v, "manages", "org", "o9", values(json!({ "role": "Owner" })));
        assert_eq!(
            Value::Object(v.clone()),
            json!({ "manages": [
                { "org": "o1", "role": "Administrator" },
                { "org": "o2", "role": "Member" }
            ]})
        );

        remove_wrapped(&mut v, "manages", "org", "o1");
        assert_eq!(Value::Object(v), json!({ "manages": [{ "org": "o2", "role": "Member" }] }));
    }

    #[test]
    fn test_wrapped_ids_match_snapshots() {
        let mut v = values(json!({ "manages": [{ "org": { "_id": "o1", "name": "Acme" }, "role": "Owner" }] }));
        remove_wrapped(&mut v, "manages", "org", "o1");
        assert_eq!(Value::Object(v), json!({ "manages": [] }));
    }

    #[test]
    fn test_default_slug() {
        let mut v = values(json!({ "name": "Acme Corp" }));
        default_slug(&mut v);
        assert_eq!(v["slug"], json!("acme-corp"));

        let mut v = values(json!({ "name": "Acme Corp", "slug": "acme" }));
        default_slug(&mut v);
        assert_eq!(v["slug"], json!("acme"));
    }

    #[tokio::test]
    async fn test_rename_and_cascade_fail_together() {
        let repos = seeded().await;
        assert_eq!(org_names(&repos).await, vec![json!("Acme"); 4]);

        repos.database().fail_writes_to("users");
        let orgs = repos.repo("organization").unwrap();
        let err = assert_err!(update_name(&orgs, "o1", "Acme Corp", None).await);
        assert!(matches!(err, TenancyError::Transaction(_)));

        repos.database().clear_fault("users");
        assert_eq!(org_names(&repos).await, vec![json!("Acme"); 4]);
        let events = repos
            .event_store()
            .events_for("organization", &["o1".to_string()], None)
            .await
            .unwrap();
        assert_eq!(events.len(), 1);

        assert_ok!(update_name(&orgs, "o1", "Acme Corp", None).await);
        assert_eq!(org_names(&repos).await, vec![json!("Acme Corp"); 4]);
    }

    #[tokio::test]
    async fn test_non_ascii_names_get_ascii_slugs() {
        let repos = seeded().await;
        let orgs = repos.repo("organization").unwrap();

        let renamed = assert_ok!(update_name(&orgs, "o1", "Zürich AG", None).await);
        let org = renamed.document().unwrap();
        assert_eq!(org.values["name"], json!("Zürich AG"));
        assert_eq!(org.values["slug"], json!("zurich-ag"));

        let created = assert_ok!(
            orgs.create(CommandPayload::new("o2").value("name", "Café Ünïcode"), None)
                .await
        );
        assert_eq!(created.document().unwrap().values["slug"], json!("cafe-unicode"));
    }

    #[tokio::test]
    async fn test_names_without_a_slug_are_rejected() {
        let repos = seeded().await;
        let orgs = repos.repo("organization").unwrap();

        let err = assert_err!(update_name(&orgs, "o1", "!!!", None).await);
        assert_eq!(err.to_string(), "Validation error: `values.name` must contain a letter or digit");

        let err = assert_err!(orgs.create(CommandPayload::new("o3").value("name", "!!!"), None).await);
        assert!(err.is_validation_error());
        assert!(orgs.find_by_id("o3", None).await.unwrap().is_none());
        assert_eq!(org_names(&repos).await[0], json!("Acme"));
    }
}
