use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::signal;
use tracing::info;
use tracing_subscriber::EnvFilter;
use warden_core::credential;
use warden_core::custody::KeyringCustody;
use warden_core::engine::LockEngine;
use warden_core::paths::{settings_path, store_path};
use warden_core::records::{AuditEvent, ResourceKind};
use warden_core::settings::{load_settings, WardenSettings};
use warden_core::store::{JsonStore, RecordStore};
use warden_service::guard::{GuardConfig, ProcessGuard};
use warden_service::process::{SignalProcessControl, SystemProcessTable};
use zeroize::Zeroizing;

#[derive(Parser, Debug)]
#[command(author, version, about = "Lockwarden access enforcement service", long_about = None)]
struct Cli {
    /// Override the data directory (records and settings).
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Set up the record store and the master credential
    Init,
    /// Run the background enforcement service
    Run,
    /// Lock an application by name and executable path
    LockApp { name: String, path: PathBuf },
    /// Remove an application lock
    UnlockApp { path: PathBuf },
    /// Lock (encrypt) a file
    LockFile { path: PathBuf },
    /// Unlock (decrypt) a file by its ciphertext path
    UnlockFile { path: PathBuf },
    /// Lock every file in a directory
    LockDir {
        path: PathBuf,
        #[arg(long)]
        recursive: bool,
    },
    /// Rotate the master credential
    ChangePassword,
    /// Show lock counts and recent failed attempts
    Status,
}

struct ServiceContext {
    store: Arc<JsonStore>,
    settings: WardenSettings,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let ctx = open_context(cli.data_dir.clone())?;
    match cli.command {
        Commands::Init => init_command(&ctx),
        Commands::Run => run_command(&ctx).await,
        Commands::LockApp { name, path } => lock_app_command(&ctx, &name, &path),
        Commands::UnlockApp { path } => {
            verify_master(&ctx, ResourceKind::Application, &path.display().to_string())?;
            build_engine(&ctx).unlock_application(&path)?;
            println!("Unlocked application {}", path.display());
            Ok(())
        }
        Commands::LockFile { path } => {
            verify_master(&ctx, ResourceKind::File, &path.display().to_string())?;
            let engine = build_engine(&ctx);
            let record =
                tokio::task::spawn_blocking(move || engine.lock_file(&path)).await??;
            println!("Locked {}", record.ciphertext_path.display());
            Ok(())
        }
        Commands::UnlockFile { path } => {
            verify_master(&ctx, ResourceKind::File, &path.display().to_string())?;
            let engine = build_engine(&ctx);
            let restored =
                tokio::task::spawn_blocking(move || engine.unlock_file(&path)).await??;
            println!("Unlocked {}", restored.display());
            Ok(())
        }
        Commands::LockDir { path, recursive } => {
            verify_master(&ctx, ResourceKind::File, &path.display().to_string())?;
            let engine = build_engine(&ctx);
            let locked =
                tokio::task::spawn_blocking(move || engine.lock_directory(&path, recursive))
                    .await??;
            println!("Locked {locked} files");
            Ok(())
        }
        Commands::ChangePassword => change_password_command(&ctx),
        Commands::Status => status_command(&ctx),
    }
}

fn open_context(data_dir_override: Option<PathBuf>) -> Result<ServiceContext> {
    let (store_file, settings_file) = match data_dir_override {
        Some(dir) => (dir.join("records.json"), dir.join("settings.json")),
        None => (store_path()?, settings_path()?),
    };
    let store = Arc::new(JsonStore::open(store_file)?);
    let settings = load_settings(&settings_file)?;
    Ok(ServiceContext { store, settings })
}

fn build_engine(ctx: &ServiceContext) -> Arc<LockEngine> {
    Arc::new(
        LockEngine::new(ctx.store.clone(), Arc::new(KeyringCustody::new()))
            .with_secure_delete_passes(ctx.settings.crypto.secure_delete_passes),
    )
}

fn init_command(ctx: &ServiceContext) -> Result<()> {
    if ctx.store.credential()?.is_some() {
        bail!("already initialized; use change-password to rotate the credential");
    }
    let password = prompt_password_twice("Create master password: ")?;
    let created = credential::create_credential(&password)?;
    ctx.store.set_credential(created)?;
    println!(
        "Master credential stored (strength {}/100).",
        credential::strength_score(&password)
    );
    Ok(())
}

async fn run_command(ctx: &ServiceContext) -> Result<()> {
    if ctx.store.credential()?.is_none() {
        bail!("not initialized; run `lockwarden init` first");
    }

    let guard = ProcessGuard::new(
        ctx.store.clone(),
        Arc::new(SystemProcessTable::new()),
        Arc::new(SignalProcessControl),
        GuardConfig::from_settings(&ctx.settings),
    );
    guard.start();
    info!("service started");

    wait_for_shutdown().await?;

    info!("service stopping");
    guard.stop().await;
    Ok(())
}

async fn wait_for_shutdown() -> Result<()> {
    #[cfg(unix)]
    {
        let mut term = signal::unix::signal(signal::unix::SignalKind::terminate())?;
        tokio::select! {
            result = signal::ctrl_c() => result?,
            _ = term.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        signal::ctrl_c().await?;
    }
    Ok(())
}

fn lock_app_command(ctx: &ServiceContext, name: &str, path: &Path) -> Result<()> {
    verify_master(ctx, ResourceKind::Application, name)?;
    // Store the canonical executable path when it resolves; the guard's
    // exact match depends on it.
    let canonical = std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
    build_engine(ctx).lock_application(name, &canonical)?;
    println!("Locked application {} ({})", name, canonical.display());
    Ok(())
}

fn change_password_command(ctx: &ServiceContext) -> Result<()> {
    check_lockout(ctx)?;
    let stored = ctx
        .store
        .credential()?
        .context("not initialized; run `lockwarden init` first")?;
    let old = prompt_password_once("Current master password: ")?;
    let new = prompt_password_twice("New master password: ")?;
    let rotated = credential::change_password(&old, &new, &stored)?;
    ctx.store.set_credential(rotated)?;
    println!("Master credential rotated.");
    Ok(())
}

fn status_command(ctx: &ServiceContext) -> Result<()> {
    let locks = ctx.store.active_locks()?;
    let files = ctx.store.active_files()?;
    let failed = ctx
        .store
        .failed_attempts_since(ctx.settings.lockout.window_minutes)?;
    println!("Locked applications: {}", locks.len());
    for lock in &locks {
        println!("  {} ({})", lock.app_name, lock.app_path.display());
    }
    println!("Locked files: {}", files.len());
    for file in &files {
        println!("  {}", file.ciphertext_path.display());
    }
    println!(
        "Failed attempts in the last {} minutes: {}",
        ctx.settings.lockout.window_minutes, failed
    );
    Ok(())
}

fn check_lockout(ctx: &ServiceContext) -> Result<()> {
    let failed = ctx
        .store
        .failed_attempts_since(ctx.settings.lockout.window_minutes)?;
    if failed >= ctx.settings.lockout.max_failed_attempts {
        bail!(
            "too many failed attempts ({failed} in the last {} minutes); try again later",
            ctx.settings.lockout.window_minutes
        );
    }
    Ok(())
}

/// Gate a command on the master credential. Failures are audited so the
/// lockout window sees them.
fn verify_master(ctx: &ServiceContext, kind: ResourceKind, resource: &str) -> Result<()> {
    check_lockout(ctx)?;
    let stored = ctx
        .store
        .credential()?
        .context("not initialized; run `lockwarden init` first")?;
    let password = prompt_password_once("Master password: ")?;
    if !credential::verify_password(&password, &stored.password_hash) {
        ctx.store
            .append_audit(AuditEvent::new(kind, resource, false))?;
        bail!("authentication failure");
    }
    Ok(())
}

fn prompt_password_once(prompt: &str) -> Result<Zeroizing<String>> {
    if let Ok(pw) = std::env::var("LOCKWARDEN_PASSWORD") {
        if !pw.is_empty() {
            return Ok(Zeroizing::new(pw));
        }
    }
    let pw = rpassword::prompt_password(prompt).map_err(|e| anyhow!("password prompt: {e}"))?;
    Ok(Zeroizing::new(pw))
}

fn prompt_password_twice(prompt: &str) -> Result<Zeroizing<String>> {
    let first = prompt_password_once(prompt)?;
    if std::env::var("LOCKWARDEN_PASSWORD").map_or(false, |pw| !pw.is_empty()) {
        return Ok(first);
    }
    let second = rpassword::prompt_password("Confirm password: ")
        .map_err(|e| anyhow!("password prompt: {e}"))?;
    if *first != second {
        bail!("passwords do not match");
    }
    Ok(first)
}
