use clap::Subcommand;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::cli::{output::output_success, OutputFormat};
use crate::config::config;
use crate::database::models::ResourceKind;
use crate::filter::{PlanSql, QueryCompiler, QuerySpec, SqlResult};

#[derive(Subcommand)]
pub enum QueryCommands {
    #[command(about = "Compile a JSON query spec and print the plan with its SQL")]
    Compile {
        #[arg(long, help = "Resource kind name")]
        kind: String,
        #[arg(long, help = "Query spec as JSON, e.g. '{\"where\":{\"status\":\"open\"}}'", default_value = "{}")]
        spec: String,
        #[arg(long, value_delimiter = ',', help = "Payload fields allowed in filters")]
        filter_fields: Vec<String>,
        #[arg(long, value_delimiter = ',', help = "Payload fields allowed in sort")]
        sort_fields: Vec<String>,
        #[arg(long, help = "Restrict the plan to this tenant")]
        tenant: Option<Uuid>,
        #[arg(long, help = "Restrict the plan to this owner")]
        owner: Option<Uuid>,
        #[arg(long, help = "Compile as an elevated caller (keeps the deleted view)")]
        elevated: bool,
    },
}

fn rendered(sql: SqlResult) -> Value {
    json!({
        "query": sql.query,
        "params": sql.params.iter().map(|p| p.to_json()).collect::<Vec<_>>()
    })
}

pub async fn handle(cmd: QueryCommands, output_format: OutputFormat) -> anyhow::Result<()> {
    match cmd {
        QueryCommands::Compile { kind, spec, filter_fields, sort_fields, tenant, owner, elevated } => {
            let spec: QuerySpec = serde_json::from_str(&spec)?;
            let kind = ResourceKind::new(kind).filterable(filter_fields).sortable(sort_fields);

            let compiler = QueryCompiler::new(&config().query);
            let mut plan = compiler.compile(&spec, &kind.filter_fields, &kind.sort_fields)?;
            if let Some(tenant) = tenant {
                plan = plan.restrict(tenant, owner, elevated);
            }

            let data = json!({
                "plan": {
                    "predicate": plan.predicate.as_ref().map(|p| format!("{:?}", p)),
                    "order_by": plan.order_by.iter()
                        .map(|o| format!("{} {}", o.field.name(), o.direction.to_sql()))
                        .collect::<Vec<_>>(),
                    "page": plan.page,
                    "limit": plan.limit,
                    "offset": plan.offset,
                    "include_deleted": plan.include_deleted
                },
                "select": rendered(PlanSql::new(&kind.name, &plan).select()),
                "count": rendered(PlanSql::new(&kind.name, &plan).count())
            });
            output_success(output_format, &format!("Compiled query for {}", kind.name), &data)
        }
    }
}
