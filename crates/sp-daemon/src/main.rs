// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
use anyhow::{Context, Result};
use clap::Parser;
use sp_config::ServerConfig;
use sp_core::Language;
use sp_daemon::{AppState, build_app};
use sp_sandbox::{ProcessSandbox, RuntimeCommand};
use sp_store::{MemoryBlobStore, MemoryMetadataStore, MemorySearchIndex};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "sp-daemon", version, about = "Skillport skill protocol server")]
struct Args {
    /// Bind address, overriding API_HOST/API_PORT.
    #[arg(long)]
    bind: Option<String>,

    /// Enable debug logging, overriding LOG_LEVEL.
    #[arg(long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = ServerConfig::from_env().context("load configuration")?;

    let filter = if args.debug {
        EnvFilter::new("skillport=debug,sp_daemon=debug")
    } else {
        EnvFilter::new(config.log_level.as_deref().unwrap_or("skillport=info"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    for warning in config.warnings() {
        warn!(target: "skillport.config", "{warning}");
    }

    let sandbox = build_sandbox(&config);
    let state = AppState::new(
        Arc::new(MemoryMetadataStore::new()),
        Arc::new(MemoryBlobStore::new()),
        Some(Arc::new(MemorySearchIndex::new())),
        Arc::new(sandbox),
        &config,
    );
    spawn_record_retention(&state, Duration::from_secs(config.limits.retention_seconds));
    let app = build_app(state);

    let bind = args.bind.unwrap_or_else(|| config.bind_addr());
    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .with_context(|| format!("bind {bind}"))?;
    info!(
        target: "skillport",
        bind = %bind,
        prefix = %config.api.prefix,
        auth = config.auth.required,
        "sp-daemon listening"
    );

    axum::serve(listener, app).await.context("serve")
}

/// Keep terminal execution records queryable for `RETENTION_SECONDS`, then
/// drop them. Sweeps at a tenth of the retention interval, bounded so short
/// retentions still prune promptly and long ones do not sweep needlessly.
fn spawn_record_retention(state: &Arc<AppState>, retention: Duration) {
    let tracker = state.scheduler.tracker();
    let sweep = Duration::from_secs((retention.as_secs() / 10).clamp(10, 300));
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(sweep);
        loop {
            tick.tick().await;
            let cutoff = chrono::Utc::now() - chrono::Duration::seconds(retention.as_secs() as i64);
            let removed = tracker.prune_terminal_before(cutoff).await;
            if removed > 0 {
                info!(target: "skillport.scheduler", removed, "pruned terminal execution records");
            }
        }
    });
}

fn build_sandbox(config: &ServerConfig) -> ProcessSandbox {
    let mut sandbox = ProcessSandbox::new();
    if let Some(python) = &config.sandbox.python {
        sandbox = sandbox.with_runtime(Language::Python, RuntimeCommand::new(python));
    }
    if let Some(typescript) = &config.sandbox.typescript {
        sandbox = sandbox.with_runtime(
            Language::Typescript,
            RuntimeCommand::with_args(typescript, ["run", "--quiet", "--no-prompt"]),
        );
    }
    if let Some(go) = &config.sandbox.go {
        sandbox = sandbox.with_runtime(Language::Go, RuntimeCommand::with_args(go, ["run"]));
    }

    for language in Language::all() {
        if !sandbox.interpreter_available(*language) {
            warn!(
                target: "skillport.sandbox",
                %language,
                "no interpreter found; invocations for this language will fail"
            );
        }
    }
    sandbox
}
