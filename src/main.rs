use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{info, warn};

use totp_manager::comms::local_api::{self, AppState};
use totp_manager::config::Config;
use totp_manager::otp;
use totp_manager::security::TokenVerifier;
use totp_manager::store::{MemoryBackend, SecretBackend, SecretStore, VaultClient};
use totp_manager::utils;

#[derive(Parser)]
#[command(name = "totp-manager", version, about = "Per-user TOTP codes backed by Vault")]
struct AppCli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP API
    Serve {
        #[arg(long, default_value_t = 8000)]
        port: u16,
        /// Keep secrets in process memory instead of Vault
        #[arg(long, default_value_t = false)]
        memory: bool,
    },
    /// Check Vault access and provision the KV mount, then exit
    Check,
    /// Print the current code for a Base32 secret
    Code { secret: String },
}

async fn connect_store(config: &Config, memory: bool) -> Result<SecretStore> {
    let backend: Arc<dyn SecretBackend> = if memory {
        warn!("using in-memory secret backend; secrets are lost on exit");
        Arc::new(MemoryBackend::new())
    } else {
        Arc::new(
            VaultClient::new(
                &config.vault_addr,
                config.vault_token.clone(),
                config.vault_skip_verify,
                config.http_timeout,
            )
            .context("failed to build Vault client")?,
        )
    };

    SecretStore::connect(backend, config.vault_mount.clone())
        .await
        .context("failed to initialize secret store")
}

fn unix_now() -> Result<u64> {
    Ok(SystemTime::now().duration_since(UNIX_EPOCH)?.as_secs())
}

#[tokio::main]
async fn main() -> Result<()> {
    utils::logging::init();

    let args = AppCli::parse();

    match args.command {
        Commands::Serve { port, memory } => {
            let config = if memory {
                Config::from_env_without_vault()
            } else {
                Config::from_env()
            }
            .context("invalid configuration")?;
            info!(version = totp_manager::VERSION, mount = %config.vault_mount, "starting totp-manager");

            let store = connect_store(&config, memory).await?;
            let verifier = TokenVerifier::new(config.verifier_settings())
                .context("failed to build token verifier")?;
            info!(issuer = verifier.issuer(), audience = verifier.audience(), "token verifier ready");

            local_api::serve(AppState::new(store, verifier), port).await?;
        }
        Commands::Check => {
            let config = Config::from_env().context("invalid configuration")?;
            let store = connect_store(&config, false).await?;
            println!("Vault at {} is reachable; mount '{}' is ready", config.vault_addr, store.mount());
        }
        Commands::Code { secret } => {
            let cleaned = otp::clean_secret(&secret);
            if !otp::is_valid_secret(&cleaned) {
                bail!("not a valid Base32 TOTP secret");
            }
            let code = otp::derive(&cleaned, unix_now()?)?;
            println!("{} (valid for {}s)", code.otp, code.time_remaining);
        }
    }

    Ok(())
}
