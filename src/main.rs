use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::sync::Arc;
use tokenwarden::api::{create_credentials_router, CredentialsAppState};
use tokenwarden::config::{load_config, WardenConfig};
use tokenwarden::consumer::{build_registry, StaticFallback};
use tokenwarden::credentials::{SqliteCredentialStore, TokenCipher};
use tokenwarden::manager::{CredentialManager, ManagerSettings};
use tokenwarden::oauth::{HttpRefreshClient, OAuthProviderConfig};
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "tokenwarden", about = "Delegated OAuth credential lifecycle manager")]
struct Cli {
    /// Path to a TOML config file
    #[arg(long, short, env = "TOKENWARDEN_CONFIG")]
    config: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the internal credential API until Ctrl-C
    Serve,
    /// Print a principal's credential status (may refresh)
    Status { principal_id: String },
    /// Invalidate a principal's tokens
    Invalidate { principal_id: String },
    /// Delete a principal's credential, installation reference included
    Disconnect { principal_id: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing subscriber
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tokenwarden=info".into()),
        )
        .init();

    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;
    let manager = build_manager(&config)?;

    match cli.command {
        Command::Serve => serve(config, manager).await,
        Command::Status { principal_id } => {
            let status = manager.get_credential_status(&principal_id).await?;
            println!("{}", serde_json::to_string(&status)?);
            Ok(())
        }
        Command::Invalidate { principal_id } => {
            match manager.invalidate(&principal_id).await? {
                Some(transition) => println!("{principal_id}: {transition:?}"),
                None => println!("{principal_id}: no credential"),
            }
            Ok(())
        }
        Command::Disconnect { principal_id } => {
            if manager.disconnect(&principal_id).await? {
                println!("{principal_id}: disconnected");
            } else {
                println!("{principal_id}: no credential");
            }
            Ok(())
        }
    }
}

fn build_manager(config: &WardenConfig) -> Result<CredentialManager> {
    let encryption_key = std::env::var("TOKENWARDEN_ENCRYPTION_KEY")
        .context("TOKENWARDEN_ENCRYPTION_KEY is required (base64-encoded 32-byte key)")?;
    let cipher = TokenCipher::from_base64_key(&encryption_key)
        .context("Invalid TOKENWARDEN_ENCRYPTION_KEY")?;

    let store = Arc::new(
        SqliteCredentialStore::new(&config.storage.db_path)
            .context("Failed to initialize credential store")?,
    );
    info!(db_path = %config.storage.db_path, "Credential store initialized");

    let provider = OAuthProviderConfig::from_env(&config.oauth, &config.refresh).context(
        "TOKENWARDEN_OAUTH_CLIENT_ID and TOKENWARDEN_OAUTH_CLIENT_SECRET are required",
    )?;
    info!(token_url = %provider.token_url, "OAuth provider configured");

    let refresher = Arc::new(
        HttpRefreshClient::new(provider, config.refresh.timeout())
            .context("Failed to build refresh client")?,
    );

    Ok(CredentialManager::new(
        store,
        refresher,
        cipher,
        ManagerSettings::from_config(&config.refresh),
    ))
}

async fn serve(config: WardenConfig, manager: CredentialManager) -> Result<()> {
    info!("Tokenwarden starting...");

    let fallback = StaticFallback::from_config(&config.fallback);
    if fallback.is_some() {
        warn!("Static fallback token enabled; stored credentials are bypassed");
    }

    let admin_token = std::env::var("TOKENWARDEN_ADMIN_TOKEN")
        .ok()
        .filter(|t| !t.is_empty());
    if admin_token.is_none() {
        warn!("TOKENWARDEN_ADMIN_TOKEN not set; credential API is unauthenticated");
    }

    let state = CredentialsAppState {
        registry: build_registry(manager.clone(), fallback),
        manager,
        admin_token,
        token_lifetime: config.refresh.token_lifetime(),
    };
    let router = create_credentials_router(state);

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", config.api.port))
        .await
        .context("Failed to bind credential API port")?;
    info!(port = config.api.port, "Credential API listening");

    let server_handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, router).await {
            tracing::error!(error = %e, "Credential API server error");
        }
    });

    // Wait for shutdown signal
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl_c signal")?;
    info!("Shutdown signal received");

    server_handle.abort();
    info!("Tokenwarden stopped");

    Ok(())
}
