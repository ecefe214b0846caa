use clap::Subcommand;
use serde_json::json;

use crate::cli::{output::output_success, OutputFormat};
use crate::config::config;
use crate::database::PgStore;

#[derive(Subcommand)]
pub enum DbCommands {
    #[command(about = "Create tables and indexes if missing")]
    Migrate,

    #[command(about = "Check that the database is reachable")]
    Health,
}

pub async fn handle(cmd: DbCommands, output_format: OutputFormat) -> anyhow::Result<()> {
    let store = PgStore::connect(&config().database).await?;

    match cmd {
        DbCommands::Migrate => {
            store.migrate().await?;
            output_success(output_format, "Schema applied", &json!({}))
        }
        DbCommands::Health => {
            store.health_check().await?;
            output_success(output_format, "Database reachable", &json!({ "status": "ok" }))
        }
    }
}
