use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use kubeat_sender::{Sender, SenderConfig};
use kubeat_supervisor::{Discovery, IgnoreRules, LogsMethod, PodSupervisor, WatcherRegistry};

/// Kubeat - ships pod logs from one namespace to Elasticsearch or a TCP endpoint
#[derive(Parser, Debug)]
#[command(name = "kubeat")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Absolute path to a kubeconfig file, used outside the cluster
    #[arg(long = "kube-config")]
    kube_config: Option<PathBuf>,

    /// Absolute path to the JSON sender configuration
    #[arg(long = "sender-config")]
    sender_config: PathBuf,

    /// Disable TLS verification against the API server
    #[arg(long = "kube-skip-tls-verify")]
    kube_skip_tls_verify: bool,

    /// Comma-separated regexes; pods whose name matches any are ignored
    #[arg(long = "ignore-pod", default_value = "")]
    ignore_pod: String,

    /// Reconciliation and telemetry period in seconds
    #[arg(long = "tick-time", default_value_t = 60)]
    tick_time: u64,

    /// Use a live pod watch instead of periodic reconciliation
    #[arg(long = "enable-watcher")]
    enable_watcher: bool,

    /// Follow streams indefinitely or fetch since-time per tick
    #[arg(long = "get-logs-method", value_enum, default_value = "follow")]
    get_logs_method: GetLogsMethod,

    /// Namespace to collect from when not running inside the cluster
    #[arg(long, default_value = "default")]
    namespace: String,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum GetLogsMethod {
    Follow,
    Tail,
}

impl From<GetLogsMethod> for LogsMethod {
    fn from(method: GetLogsMethod) -> Self {
        match method {
            GetLogsMethod::Follow => LogsMethod::Follow,
            GetLogsMethod::Tail => LogsMethod::Tail,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let sender_config = SenderConfig::from_file(&cli.sender_config).with_context(|| {
        format!(
            "failed to load sender config from {}",
            cli.sender_config.display()
        )
    })?;
    let ignore = IgnoreRules::parse(&cli.ignore_pod)?;

    let client = kubeat_k8s::connect(cli.kube_config.as_deref(), cli.kube_skip_tls_verify).await?;
    let namespace = kubeat_k8s::service_account_namespace().unwrap_or_else(|| cli.namespace.clone());
    info!(namespace = %namespace, "collecting pod logs");

    let sender = Arc::new(
        Sender::connect(&sender_config)
            .await
            .context("failed to connect sink")?,
    );
    let registry = Arc::new(WatcherRegistry::new());

    let discovery = if cli.enable_watcher {
        Discovery::Watch
    } else {
        Discovery::Periodic
    };
    let supervisor = Arc::new(PodSupervisor::new(
        client,
        &namespace,
        Arc::clone(&registry),
        Arc::clone(&sender),
        ignore,
        Duration::from_secs(cli.tick_time),
        discovery,
        cli.get_logs_method.into(),
    ));

    let shutdown = CancellationToken::new();
    let supervisor_task = tokio::spawn(Arc::clone(&supervisor).run(shutdown.child_token()));

    let mut ticker = tokio::time::interval(Duration::from_secs(cli.tick_time));
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("shutdown signal received");
                break;
            }
            _ = ticker.tick() => {
                info!(
                    watchers = registry.count(),
                    pending = sender.pending(),
                    "active log watchers"
                );
            }
        }
    }

    shutdown.cancel();
    let _ = tokio::time::timeout(Duration::from_secs(5), supervisor_task).await;
    if let Err(err) = sender.flush().await {
        error!(error = %err, "final flush failed");
    }

    Ok(())
}
