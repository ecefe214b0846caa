mod common;

use anyhow::Result;
use serde_json::json;
use uuid::Uuid;

use common::{TestContext, Ticket};
use crudkit::filter::{FilterCondition, QuerySpec, SortDirection};
use crudkit::types::Access;
use crudkit::ServiceError;

async fn seed(ctx: &TestContext, tenant: Uuid, count: i64) -> Result<crudkit::auth::PrincipalClaims> {
    let editor = ctx.principal(tenant, "editor", Access::Edit).await?;
    let tickets = ctx.tickets();
    for i in 0..count {
        let status = if i % 2 == 0 { "open" } else { "done" };
        let ticket = Ticket::new(&format!("T{:03}", i), &format!("Ticket {}", i)).priority(i).status(status);
        tickets.create(Some(&editor), &ticket).await?;
    }
    Ok(editor)
}

#[tokio::test]
async fn pagination_reports_records_and_pages() -> Result<()> {
    let ctx = TestContext::new();
    let editor = seed(&ctx, Uuid::new_v4(), 7).await?;
    let tickets = ctx.tickets();

    let page = tickets.list(Some(&editor), &QuerySpec::default().page(1, 3)).await?;
    assert_eq!(page.data.len(), 3);
    assert_eq!(page.pagination.records, 7);
    assert_eq!(page.pagination.pages, 3);

    let last = tickets.list(Some(&editor), &QuerySpec::default().page(3, 3)).await?;
    assert_eq!(last.data.len(), 1);

    let beyond = tickets.list(Some(&editor), &QuerySpec::default().page(10, 3)).await?;
    assert!(beyond.data.is_empty());
    assert_eq!(beyond.pagination.pages, 3);
    assert_eq!(beyond.pagination.records, 7);
    Ok(())
}

#[tokio::test]
async fn page_bounds_are_clamped() -> Result<()> {
    let ctx = TestContext::new();
    let editor = seed(&ctx, Uuid::new_v4(), 2).await?;
    let tickets = ctx.tickets();

    let page = tickets.list(Some(&editor), &QuerySpec::default().page(0, 1000)).await?;
    assert_eq!(page.pagination.page, 1);
    assert_eq!(page.pagination.limit, ctx.config.query.max_page_size);

    let page = tickets.list(Some(&editor), &QuerySpec::default()).await?;
    assert_eq!(page.pagination.limit, ctx.config.query.default_page_size);
    assert!(page.data.len() <= page.pagination.limit as usize);
    Ok(())
}

#[tokio::test]
async fn unknown_fields_and_operators_are_rejected() -> Result<()> {
    let ctx = TestContext::new();
    let editor = seed(&ctx, Uuid::new_v4(), 1).await?;
    let tickets = ctx.tickets();

    let err = tickets.list(Some(&editor), &QuerySpec::default().filter("secret", "eq", "x")).await.unwrap_err();
    assert!(matches!(err, ServiceError::InvalidField(ref f) if f == "secret"), "got {:?}", err);

    let err = tickets.list(Some(&editor), &QuerySpec::default().filter("status", "approx", "x")).await.unwrap_err();
    assert!(matches!(err, ServiceError::InvalidOperator(_)), "got {:?}", err);

    let err = tickets
        .list(Some(&editor), &QuerySpec::default().filter("priority", "between", json!([1])))
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::InvalidOperator(_)));

    let err = tickets
        .list(Some(&editor), &QuerySpec::default().filter("created_at", "gte", "yesterday"))
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::InvalidOperator(_)));
    Ok(())
}

#[tokio::test]
async fn flat_filters_and_sort() -> Result<()> {
    let ctx = TestContext::new();
    let editor = seed(&ctx, Uuid::new_v4(), 6).await?;
    let tickets = ctx.tickets();

    let spec = QuerySpec::default()
        .filter("status", "eq", "open")
        .sort("priority", SortDirection::Desc);
    let page = tickets.list(Some(&editor), &spec).await?;
    let priorities: Vec<_> = page.data.iter().map(|t| t.payload.priority).collect();
    assert_eq!(priorities, vec![Some(4), Some(2), Some(0)]);

    let spec = QuerySpec::default()
        .filter("priority", "between", json!([2, 4]))
        .sort("code", SortDirection::Asc);
    let page = tickets.list(Some(&editor), &spec).await?;
    let codes: Vec<_> = page.data.iter().map(|t| t.payload.code.as_str()).collect();
    assert_eq!(codes, vec!["T002", "T003", "T004"]);

    let spec = QuerySpec {
        filters: vec![
            FilterCondition::new("priority", "from", 1),
            FilterCondition::new("priority", "to", 2),
        ],
        ..Default::default()
    };
    assert_eq!(tickets.list(Some(&editor), &spec).await?.pagination.records, 2);
    Ok(())
}

#[tokio::test]
async fn where_documents_with_groups() -> Result<()> {
    let ctx = TestContext::new();
    let editor = seed(&ctx, Uuid::new_v4(), 6).await?;
    let tickets = ctx.tickets();

    let spec: QuerySpec = serde_json::from_value(json!({
        "where": {
            "$or": [
                { "priority": { "$lt": 1 } },
                { "code": { "$in": ["T005", "T003"] } }
            ],
            "$not": { "status": "done" }
        },
        "sort": "code asc"
    }))?;
    let page = tickets.list(Some(&editor), &spec).await?;
    let codes: Vec<_> = page.data.iter().map(|t| t.payload.code.as_str()).collect();
    assert_eq!(codes, vec!["T000"]);

    let spec: QuerySpec = serde_json::from_value(json!({ "where": { "title": { "$like": "Ticket _" } } }))?;
    assert_eq!(tickets.list(Some(&editor), &spec).await?.pagination.records, 6);
    Ok(())
}

#[tokio::test]
async fn invalid_sort_falls_back_to_newest_first() -> Result<()> {
    let ctx = TestContext::new();
    let editor = seed(&ctx, Uuid::new_v4(), 3).await?;
    let tickets = ctx.tickets();

    let spec = QuerySpec::default().sort("title", SortDirection::Asc);
    let page = tickets.list(Some(&editor), &spec).await?;
    assert_eq!(page.data.len(), 3);
    assert!(page.data.windows(2).all(|w| w[0].created_at >= w[1].created_at));
    Ok(())
}

#[tokio::test]
async fn deleted_view_is_for_elevated_callers_only() -> Result<()> {
    let ctx = TestContext::new();
    let tenant = Uuid::new_v4();
    let editor = seed(&ctx, tenant, 3).await?;
    let admin = ctx.principal(tenant, "admin", Access::Full).await?;
    let tickets = ctx.tickets();

    let first = tickets.list(Some(&editor), &QuerySpec::default()).await?.data[0].id;
    tickets.delete(Some(&editor), first).await?;

    let with_deleted = QuerySpec::default().with_deleted();
    assert_eq!(tickets.list(Some(&editor), &with_deleted).await?.pagination.records, 2);
    assert_eq!(tickets.list(Some(&admin), &with_deleted).await?.pagination.records, 3);
    assert_eq!(tickets.list(Some(&admin), &QuerySpec::default()).await?.pagination.records, 2);
    Ok(())
}

#[tokio::test]
async fn lists_stay_inside_the_tenant() -> Result<()> {
    let ctx = TestContext::new();
    seed(&ctx, Uuid::new_v4(), 4).await?;
    let outsider = ctx.principal(Uuid::new_v4(), "outsider", Access::Root).await?;

    let page = ctx.tickets().list(Some(&outsider), &QuerySpec::default()).await?;
    assert!(page.data.is_empty());
    assert_eq!(page.pagination.records, 0);
    assert_eq!(page.pagination.pages, 0);
    Ok(())
}
