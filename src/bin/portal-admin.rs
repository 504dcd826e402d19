//! Administrative commands against the portal's user records.
//! Used to bootstrap the first admin, since the API only lets admins
//! promote users. Revoking access or demoting to `pendente` also ends the
//! user's open sessions (needs Redis).
//!
//! Usage:
//!   portal-admin set-role --email ana@icone.com --role admin
//!   portal-admin set-access --email ana@icone.com --active false
//!   portal-admin list-users

use anyhow::Context;
use clap::{Parser, Subcommand};

use portal_api::{
    config::Config,
    models::user::UserRole,
    services::{
        profiles::ProfileService,
        session::{enforce_access, RedisSessionEpochs},
        store::Stores,
    },
};

#[derive(Parser)]
#[command(name = "portal-admin", about = "Manage portal users from the command line")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Change a user's role (user, admin, pendente)
    SetRole {
        #[arg(long)]
        email: String,
        #[arg(long)]
        role: UserRole,
    },
    /// Enable or disable a user's access
    SetAccess {
        #[arg(long)]
        email: String,
        #[arg(long, action = clap::ArgAction::Set)]
        active: bool,
    },
    /// Print every user with role and access flag
    ListUsers,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let args = Args::parse();
    let config = Config::from_env().context("loading configuration")?;
    let stores = Stores::open(&config, reqwest::Client::new());
    let profiles = ProfileService::new(stores.profiles, stores.photos);

    match args.command {
        Command::SetRole { email, role } => {
            profiles.update_role(&email, role).await?;
            tracing::info!("{} is now {}", email, role);
            enforce(&config, &profiles, &email).await?;
        }
        Command::SetAccess { email, active } => {
            profiles.update_access(&email, active).await?;
            tracing::info!("{} isActive={}", email, active);
            enforce(&config, &profiles, &email).await?;
        }
        Command::ListUsers => {
            for user in profiles.list_users().await? {
                println!(
                    "{:<40} {:<30} {:<9} {}",
                    user.email,
                    user.display_name,
                    user.role().to_string(),
                    if user.is_active() { "ativo" } else { "inativo" }
                );
            }
        }
    }

    Ok(())
}

/// End the user's sessions when the change took their access away.
async fn enforce(config: &Config, profiles: &ProfileService, email: &str) -> anyhow::Result<()> {
    let redis = redis::Client::open(config.redis_url.as_str())?
        .get_multiplexed_async_connection()
        .await
        .context("connecting to Redis to end sessions")?;
    let epochs = RedisSessionEpochs::new(redis);
    let status = enforce_access(profiles, &epochs, email).await?;
    if !status.has_access {
        tracing::info!("{} logged out everywhere", email);
    }
    Ok(())
}
