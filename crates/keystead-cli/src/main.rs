//! CLI entry point for Keystead.
//!
//! This binary provides the `keystead` command with subcommands for creating
//! an account, inspecting the vault, and checking the stored identity.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use clap::{Parser, Subcommand};
use keystead_provision::{Identity, OutboxPublisher, ProvisionConfig, ProvisioningOrchestrator};
use keystead_vault::{DeviceKeyProvider, FileDeviceKey, Password, SecretVault, names};
use tracing::info;
use tracing_subscriber::EnvFilter;

// ---------------------------------------------------------------------------
// CLI definition
// ---------------------------------------------------------------------------

/// Keystead: local identity and credential provisioning.
#[derive(Parser)]
#[command(
    name = "keystead",
    version,
    about = "Keystead: identity keys, wallet seed and encrypted credential vault"
)]
struct Cli {
    /// Path to the TOML config file.
    #[arg(long, global = true, default_value = "keystead.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a new account: keys, credentials, wallet seed.
    CreateAccount {
        /// Account username.
        #[arg(long)]
        username: String,

        /// Also print the private key (PKCS#8, base64).
        #[arg(long)]
        show_private: bool,
    },

    /// List stored credentials without decrypting them.
    Status,

    /// Decrypt the private key and check it against the stored public key.
    Verify,
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    // A missing .env file is fine.
    let _ = dotenvy::dotenv();
    init_tracing("info");

    let cli = Cli::parse();
    let config = load_config(&cli.config)?;

    match cli.command {
        Commands::CreateAccount {
            username,
            show_private,
        } => cmd_create_account(&config, &username, show_private).await,
        Commands::Status => cmd_status(&config),
        Commands::Verify => cmd_verify(&config),
    }
}

fn load_config(path: &Path) -> Result<ProvisionConfig> {
    let mut config = ProvisionConfig::load(Some(path)).context("failed to load config")?;
    config
        .apply_overrides(|key| std::env::var(key).ok())
        .context("invalid environment override")?;
    config.validate().context("invalid configuration")?;
    Ok(config)
}

fn open_vault(config: &ProvisionConfig) -> Result<SecretVault> {
    let path = config.vault_path();
    let vault = SecretVault::open(&path, config.vault_options())
        .with_context(|| format!("failed to open vault at {}", path.display()))?;
    info!(path = %path.display(), "vault opened");
    Ok(vault)
}

// ---------------------------------------------------------------------------
// Subcommand: create-account
// ---------------------------------------------------------------------------

async fn cmd_create_account(
    config: &ProvisionConfig,
    username: &str,
    show_private: bool,
) -> Result<()> {
    let password = read_password()?;
    let vault = open_vault(config)?;
    let device_key = Arc::new(FileDeviceKey::new(config.device_key_path()));

    // No biometric sensor on a terminal host; the orchestrator's defaults
    // report the step as unavailable.
    let mut orchestrator =
        ProvisioningOrchestrator::new(vault, device_key).with_settings(config.orchestrator_settings());
    if config.publish_enabled {
        orchestrator = orchestrator.with_publisher(Arc::new(OutboxPublisher::new(config.outbox_dir())));
    }

    let report = orchestrator.create_account(username, &password).await?;

    println!();
    println!("  Account created for {}", username.trim());
    println!("  Public key:  {}", STANDARD.encode(report.identity.public_key()));
    if show_private {
        println!(
            "  Private key: {}",
            STANDARD.encode(report.identity.private_key().as_bytes())
        );
        println!("  Store the private key somewhere safe; it is not shown again.");
    }
    for warning in report.warnings() {
        println!("  warning: {warning}");
    }
    println!();

    Ok(())
}

/// Password from `KEYSTEAD_PASSWORD`, else prompted on the terminal with
/// echo disabled.
fn read_password() -> Result<Password> {
    resolve_password(std::env::var("KEYSTEAD_PASSWORD").ok(), || {
        rpassword::prompt_password("Password: ")
    })
}

fn resolve_password<F>(from_env: Option<String>, prompt: F) -> Result<Password>
where
    F: FnOnce() -> io::Result<String>,
{
    match from_env {
        Some(value) => Ok(Password::new(value)),
        None => Ok(Password::new(prompt().context("failed to read password")?)),
    }
}

// ---------------------------------------------------------------------------
// Subcommand: status
// ---------------------------------------------------------------------------

fn cmd_status(config: &ProvisionConfig) -> Result<()> {
    let vault = open_vault(config)?;
    let credentials = vault.list()?;

    println!();
    println!("  Keystead Status");
    println!("  ---------------");
    println!("  Vault:      {}", config.vault_path().display());
    println!("  Device key: {}", config.device_key_path().display());
    println!();

    if credentials.is_empty() {
        println!("  No credentials stored.");
    }
    for c in &credentials {
        println!(
            "  {:<18} {} x{:<8} updated {}",
            c.name,
            c.kdf,
            c.iterations,
            c.updated_at.to_rfc3339()
        );
    }

    println!();
    println!(
        "  Biometric unlock: {}",
        if vault.biometric_enabled()? { "enabled" } else { "disabled" }
    );
    println!();
    Ok(())
}

// ---------------------------------------------------------------------------
// Subcommand: verify
// ---------------------------------------------------------------------------

fn cmd_verify(config: &ProvisionConfig) -> Result<()> {
    let vault = open_vault(config)?;
    let device_key = FileDeviceKey::new(config.device_key_path());
    if !device_key.exists()? {
        bail!("no device key at {}", config.device_key_path().display());
    }
    let device = device_key.load_or_create()?;

    let password = read_password()?;
    let private = match vault.retrieve(names::PRIVATE_KEY, password.as_bytes()) {
        Ok(Some(secret)) => secret,
        Ok(None) => bail!("no identity stored"),
        Err(e) if e.is_authentication() => bail!("wrong password"),
        Err(e) => return Err(e.into()),
    };
    let identity = Identity::from_private_key(private)?;

    let stored_public = vault
        .retrieve(names::PUBLIC_KEY, device.as_bytes())?
        .context("public key credential missing")?;

    if stored_public.as_bytes() != identity.public_key() {
        bail!("stored public key does not match the private key");
    }

    println!("  Identity OK: {}", STANDARD.encode(identity.public_key()));
    Ok(())
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Initialize the tracing subscriber with an environment filter.
fn init_tracing(default_level: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .with_writer(io::stderr)
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn environment_password_skips_prompt() {
        let password = resolve_password(Some("correcthorse".into()), || {
            panic!("prompt must not run when the variable is set")
        })
        .unwrap();
        assert_eq!(password.as_bytes(), b"correcthorse");
    }

    #[test]
    fn prompt_used_without_environment() {
        let password = resolve_password(None, || Ok("typed-secret".into())).unwrap();
        assert_eq!(password.as_bytes(), b"typed-secret");
    }

    #[test]
    fn prompt_failure_is_reported() {
        let err = resolve_password(None, || {
            Err(io::Error::new(io::ErrorKind::UnexpectedEof, "no tty"))
        })
        .unwrap_err();
        assert!(err.to_string().contains("failed to read password"));
    }
}
