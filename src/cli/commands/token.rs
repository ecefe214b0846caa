use clap::Subcommand;
use std::sync::Arc;
use uuid::Uuid;

use crate::auth::TokenIssuer;
use crate::cli::{output::output_success, OutputFormat};
use crate::clock::SystemClock;
use crate::config::config;
use crate::database::models::Principal;
use crate::database::MemoryStore;
use crate::types::Access;

#[derive(Subcommand)]
pub enum TokenCommands {
    #[command(about = "Mint a session for an ad-hoc principal")]
    Issue {
        #[arg(help = "Login name carried in the token")]
        login: String,
        #[arg(long, default_value = "read", help = "Access level: deny, read, edit, full or root")]
        access: Access,
        #[arg(long, help = "Tenant id (omit for a tenant-less principal)")]
        tenant: Option<Uuid>,
        #[arg(long, help = "Principal id (random when omitted)")]
        id: Option<Uuid>,
    },

    #[command(about = "Verify an access token and print its claims")]
    Verify {
        #[arg(help = "Access token")]
        token: String,
    },
}

/// Issue and verify never consult revocations, so an empty store will do
fn issuer() -> anyhow::Result<TokenIssuer> {
    let issuer = TokenIssuer::new(
        &config().security,
        Arc::new(SystemClock),
        Arc::new(MemoryStore::new()),
    )?;
    Ok(issuer)
}

pub async fn handle(cmd: TokenCommands, output_format: OutputFormat) -> anyhow::Result<()> {
    match cmd {
        TokenCommands::Issue { login, access, tenant, id } => {
            let now = chrono::Utc::now();
            let principal = Principal {
                id: id.unwrap_or_else(Uuid::new_v4),
                login,
                access,
                tenant_id: tenant,
                fingerprint: String::new(),
                created_at: now,
                updated_at: now,
            };
            let session = issuer()?.issue(&principal)?;
            output_success(output_format, &format!("Issued session for {}", principal.login), &session)
        }
        TokenCommands::Verify { token } => {
            let claims = issuer()?.verify(&token)?;
            output_success(output_format, "Token is valid", &claims)
        }
    }
}
