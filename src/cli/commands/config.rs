use clap::Subcommand;
use serde_json::json;

use crate::cli::{output::output_success, OutputFormat};
use crate::config::config;

#[derive(Subcommand)]
pub enum ConfigCommands {
    #[command(about = "Print the configuration resolved from APP_ENV and overrides")]
    Show,
}

pub async fn handle(cmd: ConfigCommands, output_format: OutputFormat) -> anyhow::Result<()> {
    match cmd {
        ConfigCommands::Show => {
            let config = config();
            // The secret is skipped by serialization; only report whether it is set
            let mut data = serde_json::to_value(config)?;
            let secret = if config.security.jwt_secret.is_empty() { "<unset>" } else { "<redacted>" };
            data["security"]["jwt_secret"] = json!(secret);
            if config.database.url.is_some() {
                data["database"]["url"] = json!("<redacted>");
            }
            output_success(output_format, &format!("Configuration ({:?})", config.environment), &data)
        }
    }
}
