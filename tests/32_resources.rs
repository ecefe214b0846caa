mod common;

use anyhow::Result;
use chrono::Duration;
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use common::{TestContext, Ticket};
use crudkit::database::models::ResourceKind;
use crudkit::types::Access;
use crudkit::ServiceError;

#[tokio::test]
async fn create_then_get_resolves() -> Result<()> {
    let ctx = TestContext::new();
    let tickets = ctx.tickets();
    let editor = ctx.principal(Uuid::new_v4(), "editor", Access::Edit).await?;

    let created = tickets.create(Some(&editor), &Ticket::new("ABC123", "Broken login")).await?;
    assert_eq!(created.tenant_id, editor.partition());
    assert_eq!(created.owner_id, editor.principal_id);
    assert_eq!(created.created_at, created.updated_at);
    assert!(created.deleted_at.is_none());

    let fetched = tickets.get(Some(&editor), created.id).await?;
    assert_eq!(fetched, created);
    Ok(())
}

#[tokio::test]
async fn update_round_trips_and_bumps_updated_at() -> Result<()> {
    let ctx = TestContext::new();
    let tickets = ctx.tickets();
    let editor = ctx.principal(Uuid::new_v4(), "editor", Access::Edit).await?;
    let created = tickets.create(Some(&editor), &Ticket::new("ABC123", "Old").status("open")).await?;

    // Same clock reading: updated_at must still move forward
    let first = tickets.update(Some(&editor), created.id, json!({ "title": "New" })).await?;
    assert!(first.updated_at > created.updated_at);

    ctx.clock.advance(Duration::seconds(5));
    let second = tickets.update(Some(&editor), created.id, json!({ "status": null })).await?;
    assert!(second.updated_at > first.updated_at);

    let fetched = tickets.get(Some(&editor), created.id).await?;
    assert_eq!(fetched.payload.title, "New");
    assert_eq!(fetched.payload.code, "ABC123");
    assert_eq!(fetched.payload.status, None);
    assert_eq!(fetched.created_at, created.created_at);
    Ok(())
}

#[tokio::test]
async fn invalid_payloads_are_rejected() -> Result<()> {
    let ctx = TestContext::new();
    let tickets = ctx.tickets();
    let editor = ctx.principal(Uuid::new_v4(), "editor", Access::Edit).await?;
    let created = tickets.create(Some(&editor), &Ticket::new("ABC123", "Title")).await?;

    // Clearing a required field leaves a payload that is no longer a Ticket
    let err = tickets.update(Some(&editor), created.id, json!({ "title": null })).await.unwrap_err();
    assert!(matches!(err, ServiceError::InvalidPayload(_)), "got {:?}", err);

    let err = tickets.update(Some(&editor), created.id, json!({ "owner_id": Uuid::new_v4() })).await.unwrap_err();
    assert!(matches!(err, ServiceError::InvalidPayload(_)));

    let err = tickets.update(Some(&editor), created.id, json!(["not", "an", "object"])).await.unwrap_err();
    assert_eq!(err.status_code(), 400);
    Ok(())
}

#[tokio::test]
async fn second_soft_delete_reports_already_deleted() -> Result<()> {
    let ctx = TestContext::new();
    let tickets = ctx.tickets();
    let editor = ctx.principal(Uuid::new_v4(), "editor", Access::Edit).await?;
    let created = tickets.create(Some(&editor), &Ticket::new("ABC123", "Title")).await?;

    tickets.delete(Some(&editor), created.id).await?;
    let err = tickets.delete(Some(&editor), created.id).await.unwrap_err();
    assert!(matches!(err, ServiceError::AlreadyDeleted), "got {:?}", err);
    Ok(())
}

#[tokio::test]
async fn deleted_resources_are_hidden_and_terminal() -> Result<()> {
    let ctx = TestContext::new();
    let tickets = ctx.tickets();
    let tenant = Uuid::new_v4();
    let editor = ctx.principal(tenant, "editor", Access::Edit).await?;
    let admin = ctx.principal(tenant, "admin", Access::Full).await?;
    let created = tickets.create(Some(&editor), &Ticket::new("ABC123", "Title")).await?;
    tickets.delete(Some(&editor), created.id).await?;

    assert!(matches!(tickets.get(Some(&editor), created.id).await, Err(ServiceError::NotFound)));

    let seen = tickets.get(Some(&admin), created.id).await?;
    assert!(seen.deleted_at.is_some());
    assert!(seen.deleted_at >= Some(seen.updated_at));

    let err = tickets.update(Some(&admin), created.id, json!({ "title": "x" })).await.unwrap_err();
    assert!(matches!(err, ServiceError::NotFound));
    Ok(())
}

#[tokio::test]
async fn cross_tenant_access_is_not_found() -> Result<()> {
    let ctx = TestContext::new();
    let tickets = ctx.tickets();
    let alice = ctx.principal(Uuid::new_v4(), "alice", Access::Edit).await?;
    let root = ctx.principal(Uuid::new_v4(), "root", Access::Root).await?;
    let created = tickets.create(Some(&alice), &Ticket::new("ABC123", "Title")).await?;

    assert!(matches!(tickets.get(Some(&root), created.id).await, Err(ServiceError::NotFound)));
    assert!(matches!(tickets.delete(Some(&root), created.id).await, Err(ServiceError::NotFound)));
    assert!(tickets.get(Some(&alice), created.id).await.is_ok());
    Ok(())
}

#[tokio::test]
async fn natural_keys_are_unique_per_tenant() -> Result<()> {
    let ctx = TestContext::new();
    let tickets = ctx.tickets();
    let alice = ctx.principal(Uuid::new_v4(), "alice", Access::Edit).await?;
    let bob = ctx.principal(Uuid::new_v4(), "bob", Access::Edit).await?;

    tickets.create(Some(&alice), &Ticket::new("ABC123", "First")).await?;
    let err = tickets.create(Some(&alice), &Ticket::new("ABC123", "Again")).await.unwrap_err();
    assert!(matches!(err, ServiceError::UniquenessViolation(ref key) if key == "code"), "got {:?}", err);
    assert!(err.is_retryable());

    assert!(tickets.create(Some(&bob), &Ticket::new("ABC123", "Other tenant")).await.is_ok());
    Ok(())
}

#[tokio::test]
async fn update_into_a_taken_key_conflicts() -> Result<()> {
    let ctx = TestContext::new();
    let tickets = ctx.tickets();
    let editor = ctx.principal(Uuid::new_v4(), "editor", Access::Edit).await?;
    tickets.create(Some(&editor), &Ticket::new("ABC123", "First")).await?;
    let second = tickets.create(Some(&editor), &Ticket::new("XYZ789", "Second")).await?;

    let err = tickets.update(Some(&editor), second.id, json!({ "code": "ABC123" })).await.unwrap_err();
    assert!(matches!(err, ServiceError::Conflict(_)), "got {:?}", err);

    // Keeping its own key is not a clash
    assert!(tickets.update(Some(&editor), second.id, json!({ "code": "XYZ789", "title": "t" })).await.is_ok());
    Ok(())
}

#[tokio::test]
async fn soft_delete_releases_keys_and_restore_reclaims_them() -> Result<()> {
    let ctx = TestContext::new();
    let tickets = ctx.tickets();
    let tenant = Uuid::new_v4();
    let editor = ctx.principal(tenant, "editor", Access::Edit).await?;
    let admin = ctx.principal(tenant, "admin", Access::Full).await?;

    let original = tickets.create(Some(&editor), &Ticket::new("ABC123", "Original")).await?;
    tickets.delete(Some(&editor), original.id).await?;
    let replacement = tickets.create(Some(&editor), &Ticket::new("ABC123", "Replacement")).await?;

    let err = tickets.restore(Some(&admin), original.id).await.unwrap_err();
    assert!(matches!(err, ServiceError::UniquenessViolation(_)), "got {:?}", err);

    tickets.delete(Some(&admin), replacement.id).await?;
    let restored = tickets.restore(Some(&admin), original.id).await?;
    assert!(restored.deleted_at.is_none());
    assert!(tickets.get(Some(&editor), original.id).await.is_ok());
    Ok(())
}

#[tokio::test]
async fn restore_needs_elevated_access_and_a_deleted_resource() -> Result<()> {
    let ctx = TestContext::new();
    let tickets = ctx.tickets();
    let tenant = Uuid::new_v4();
    let editor = ctx.principal(tenant, "editor", Access::Edit).await?;
    let admin = ctx.principal(tenant, "admin", Access::Full).await?;
    let created = tickets.create(Some(&editor), &Ticket::new("ABC123", "Title")).await?;

    let err = tickets.restore(Some(&admin), created.id).await.unwrap_err();
    assert!(matches!(err, ServiceError::Conflict(_)));

    tickets.delete(Some(&editor), created.id).await?;
    let err = tickets.restore(Some(&editor), created.id).await.unwrap_err();
    assert!(matches!(err, ServiceError::Forbidden(_)));
    Ok(())
}

#[tokio::test]
async fn closed_tickets_are_locked_against_delete() -> Result<()> {
    let ctx = TestContext::new();
    let tickets = ctx.tickets();
    let editor = ctx.principal(Uuid::new_v4(), "editor", Access::Edit).await?;
    let created = tickets.create(Some(&editor), &Ticket::new("ABC123", "Title").status("closed")).await?;

    let err = tickets.delete(Some(&editor), created.id).await.unwrap_err();
    assert!(matches!(err, ServiceError::Locked(_)));
    assert_eq!(err.status_code(), 423);
    assert!(tickets.get(Some(&editor), created.id).await.is_ok());
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Note {
    body: String,
}

#[tokio::test]
async fn hard_delete_kinds_remove_the_row() -> Result<()> {
    let ctx = TestContext::new();
    let notes = ctx.resources::<Note>(ResourceKind::new("note").hard_delete());
    let editor = ctx.principal(Uuid::new_v4(), "editor", Access::Edit).await?;
    let created = notes.create(Some(&editor), &Note { body: "hi".into() }).await?;

    notes.delete(Some(&editor), created.id).await?;
    assert!(matches!(notes.delete(Some(&editor), created.id).await, Err(ServiceError::NotFound)));
    Ok(())
}

#[tokio::test]
async fn owner_scoped_kinds_hide_other_owners() -> Result<()> {
    let ctx = TestContext::new();
    let notes = ctx.resources::<Note>(ResourceKind::new("note").owner_scoped());
    let tenant = Uuid::new_v4();
    let alice = ctx.principal(tenant, "alice", Access::Edit).await?;
    let bob = ctx.principal(tenant, "bob", Access::Edit).await?;
    let admin = ctx.principal(tenant, "admin", Access::Full).await?;

    let note = notes.create(Some(&alice), &Note { body: "mine".into() }).await?;

    let err = notes.update(Some(&bob), note.id, json!({ "body": "ours" })).await.unwrap_err();
    assert!(matches!(err, ServiceError::Forbidden(_)));
    assert!(notes.update(Some(&admin), note.id, json!({ "body": "moderated" })).await.is_ok());

    let page = notes.list(Some(&bob), &Default::default()).await?;
    assert!(page.data.is_empty());
    let page = notes.list(Some(&admin), &Default::default()).await?;
    assert_eq!(page.data.len(), 1);
    Ok(())
}

#[tokio::test]
async fn roles_gate_mutations_before_storage() -> Result<()> {
    let ctx = TestContext::new();
    let tickets = ctx.tickets();
    let tenant = Uuid::new_v4();
    let reader = ctx.principal(tenant, "reader", Access::Read).await?;
    let editor = ctx.principal(tenant, "editor", Access::Edit).await?;

    let err = tickets.create(Some(&reader), &Ticket::new("ABC123", "Title")).await.unwrap_err();
    assert!(matches!(err, ServiceError::Forbidden(_)));

    // Role is judged before the id is looked up
    let err = tickets.delete(Some(&reader), Uuid::new_v4()).await.unwrap_err();
    assert!(matches!(err, ServiceError::Forbidden(_)));

    let created = tickets.create(Some(&editor), &Ticket::new("ABC123", "Title")).await?;
    assert!(tickets.get(Some(&reader), created.id).await.is_ok());

    let err = tickets.get(None, created.id).await.unwrap_err();
    assert!(matches!(err, ServiceError::Unauthenticated(_)));
    Ok(())
}
