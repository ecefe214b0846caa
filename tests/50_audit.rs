mod common;

use std::sync::atomic::Ordering;

use anyhow::Result;
use serde_json::json;
use uuid::Uuid;

use common::{TestContext, Ticket};
use crudkit::audit::AuditAction;
use crudkit::database::Storage;
use crudkit::filter::QuerySpec;
use crudkit::types::Access;
use crudkit::ServiceError;

#[tokio::test]
async fn every_mutation_leaves_an_entry() -> Result<()> {
    let ctx = TestContext::new();
    let tickets = ctx.tickets();
    let tenant = Uuid::new_v4();
    let editor = ctx.principal(tenant, "editor", Access::Edit).await?;
    let admin = ctx.principal(tenant, "admin", Access::Full).await?;

    let created = tickets.create(Some(&editor), &Ticket::new("ABC123", "Title")).await?;
    tickets.update(Some(&editor), created.id, json!({ "title": "Renamed" })).await?;
    tickets.delete(Some(&editor), created.id).await?;
    tickets.restore(Some(&admin), created.id).await?;

    let history = tickets.history(Some(&editor), created.id).await?;
    let actions: Vec<_> = history.iter().map(|e| e.action).collect();
    assert_eq!(
        actions,
        vec![AuditAction::Create, AuditAction::Update, AuditAction::Delete, AuditAction::Restore]
    );
    assert_eq!(history[0].actor_id, editor.principal_id);
    assert_eq!(history[3].actor_id, admin.principal_id);
    assert_eq!(history[1].context["fields"], json!(["title"]));
    assert!(history.iter().all(|e| e.target_type == "ticket" && e.target_id == created.id));
    Ok(())
}

#[tokio::test]
async fn failed_audit_append_rolls_the_mutation_back() -> Result<()> {
    let (ctx, fail) = TestContext::with_failing_audit();
    let tickets = ctx.tickets();
    let editor = ctx.principal(Uuid::new_v4(), "editor", Access::Edit).await?;
    let kept = tickets.create(Some(&editor), &Ticket::new("KEEP01", "Kept")).await?;

    fail.store(true, Ordering::SeqCst);

    let err = tickets.create(Some(&editor), &Ticket::new("ABC123", "Lost")).await.unwrap_err();
    assert!(matches!(err, ServiceError::Fatal(_)), "got {:?}", err);
    assert_eq!(err.status_code(), 500);

    let err = tickets.update(Some(&editor), kept.id, json!({ "title": "Changed" })).await.unwrap_err();
    assert!(matches!(err, ServiceError::Fatal(_)));
    let err = tickets.delete(Some(&editor), kept.id).await.unwrap_err();
    assert!(matches!(err, ServiceError::Fatal(_)));

    fail.store(false, Ordering::SeqCst);

    let page = tickets.list(Some(&editor), &QuerySpec::default()).await?;
    assert_eq!(page.pagination.records, 1);
    let current = tickets.get(Some(&editor), kept.id).await?;
    assert_eq!(current.payload.title, "Kept");
    assert_eq!(current.updated_at, kept.updated_at);

    // The key of the lost create was never claimed
    assert!(tickets.create(Some(&editor), &Ticket::new("ABC123", "Retry")).await.is_ok());
    Ok(())
}

#[tokio::test]
async fn failed_audit_blocks_registration() -> Result<()> {
    let (ctx, fail) = TestContext::with_failing_audit();
    let tenant = Uuid::new_v4();
    fail.store(true, Ordering::SeqCst);

    let err = ctx.auth.register(Some(tenant), "alice", "correct-horse", Access::Read).await.unwrap_err();
    assert!(matches!(err, ServiceError::Fatal(_)));
    assert!(ctx.store.principal_by_login(Some(tenant), "alice").await?.is_none());
    Ok(())
}

#[tokio::test]
async fn failed_audit_leaves_the_refresh_token_unspent() -> Result<()> {
    let (ctx, fail) = TestContext::with_failing_audit();
    let session = ctx.session(Uuid::new_v4(), "alice", Access::Read).await?;

    fail.store(true, Ordering::SeqCst);
    let err = ctx.auth.rotate(&session.refresh_token).await.unwrap_err();
    assert!(matches!(err, ServiceError::Fatal(_)), "got {:?}", err);
    let err = ctx.auth.logout(&session.refresh_token).await.unwrap_err();
    assert!(matches!(err, ServiceError::Fatal(_)), "got {:?}", err);

    fail.store(false, Ordering::SeqCst);
    assert!(ctx.auth.rotate(&session.refresh_token).await.is_ok());

    let history = ctx.store.history("principal", session.principal_id).await?;
    let actions: Vec<_> = history.iter().map(|e| e.action).collect();
    assert_eq!(actions, vec![AuditAction::Register, AuditAction::Rotate]);
    Ok(())
}

#[tokio::test]
async fn session_events_are_audited_against_the_principal() -> Result<()> {
    let ctx = TestContext::new();
    let tenant = Uuid::new_v4();
    let session = ctx.session(tenant, "alice", Access::Read).await?;
    ctx.auth.login(Some(tenant), "alice", "correct-horse").await?;
    let rotated = ctx.auth.rotate(&session.refresh_token).await?;
    ctx.auth.logout(&rotated.refresh_token).await?;

    let history = ctx.store.history("principal", session.principal_id).await?;
    let actions: Vec<_> = history.iter().map(|e| e.action).collect();
    assert_eq!(
        actions,
        vec![AuditAction::Register, AuditAction::Login, AuditAction::Rotate, AuditAction::Logout]
    );
    Ok(())
}

#[tokio::test]
async fn history_follows_read_visibility() -> Result<()> {
    let ctx = TestContext::new();
    let tickets = ctx.tickets();
    let editor = ctx.principal(Uuid::new_v4(), "editor", Access::Edit).await?;
    let outsider = ctx.principal(Uuid::new_v4(), "outsider", Access::Full).await?;
    let created = tickets.create(Some(&editor), &Ticket::new("ABC123", "Title")).await?;

    assert!(matches!(tickets.history(Some(&outsider), created.id).await, Err(ServiceError::NotFound)));
    assert!(matches!(tickets.history(None, created.id).await, Err(ServiceError::Unauthenticated(_))));
    Ok(())
}
