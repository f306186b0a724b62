mod collectors;
mod config;
mod http;
mod metrics;
mod snapshot;
mod snmp;

use axum::serve;
use clap::Parser;
use collectors::FleetCollector;
use config::Config;
use metrics::Metrics;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "carel_exporter")]
#[command(version)]
struct Cli {
    #[arg(long)]
    config: Option<String>,
    #[arg(long)]
    print_default_config: bool,
    /// Address on which to expose metrics
    #[arg(long)]
    listen_address: Option<String>,
    /// Path under which to expose metrics
    #[arg(long)]
    path: Option<String>,
    /// Comma-separated list of devices to scrape
    #[arg(long, value_delimiter = ',')]
    targets: Vec<String>,
    /// SNMP community
    #[arg(long)]
    community: Option<String>,
    /// Per-device timeout, e.g. 2s or 1500ms
    #[arg(long, value_parser = humantime::parse_duration)]
    timeout: Option<Duration>,
    /// Overall deadline for one scrape of all devices
    #[arg(long, value_parser = humantime::parse_duration)]
    scrape_timeout: Option<Duration>,
}

impl Cli {
    fn apply(&self, cfg: &mut Config) {
        if let Some(listen) = &self.listen_address {
            cfg.listen = listen.clone();
        }
        if let Some(path) = &self.path {
            cfg.metrics_path = path.clone();
        }
        let targets: Vec<String> = self
            .targets
            .iter()
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .collect();
        if !targets.is_empty() {
            cfg.targets = targets;
        }
        if let Some(community) = &self.community {
            cfg.snmp.community = community.clone();
        }
        if let Some(timeout) = self.timeout {
            cfg.snmp.timeout_ms = timeout.as_millis() as u64;
        }
        match self.scrape_timeout {
            Some(deadline) => cfg.snmp.scrape_timeout_ms = deadline.as_millis() as u64,
            // A longer per-device timeout alone stretches the deadline to match.
            None if self.timeout.is_some() => {
                cfg.snmp.scrape_timeout_ms = cfg.snmp.scrape_timeout_ms.max(cfg.snmp.timeout_ms);
            }
            None => {}
        }
    }
}

#[tokio::main]
async fn main() {
    init_tracing();

    let cli = Cli::parse();
    if cli.print_default_config {
        println!("{}", Config::example_yaml());
        return;
    }

    let mut cfg = match &cli.config {
        Some(path) => match Config::load_from_file(path) {
            Ok(cfg) => cfg,
            Err(err) => {
                error!(error = %err, "не удалось загрузить конфигурацию");
                std::process::exit(1);
            }
        },
        None => Config::default(),
    };
    cli.apply(&mut cfg);
    if let Err(err) = cfg.validate() {
        error!(error = %err, "некорректная конфигурация");
        std::process::exit(1);
    }
    for dup in cfg.duplicate_targets() {
        warn!(device = %dup, "цель указана несколько раз, каждая копия опрашивается отдельно");
    }

    let fleet = match FleetCollector::new(&cfg) {
        Ok(fleet) => Arc::new(fleet),
        Err(err) => {
            error!(error = %err, "не удалось подготовить список целей");
            std::process::exit(1);
        }
    };
    let metrics = match Metrics::new(&cfg.prefix) {
        Ok(m) => m,
        Err(err) => {
            error!(error = %err, "не удалось инициализировать метрики");
            std::process::exit(1);
        }
    };

    info!(
        version = env!("CARGO_PKG_VERSION"),
        targets = fleet.targets().len(),
        timeout = %humantime::format_duration(cfg.timeout()),
        scrape_timeout = %humantime::format_duration(cfg.scrape_timeout()),
        "запуск carel_exporter"
    );

    let Some(addr) = cfg.listen_addr() else {
        error!(listen = %cfg.listen, "некорректный адрес listen");
        std::process::exit(1);
    };
    let listener = match TcpListener::bind(addr).await {
        Ok(l) => l,
        Err(err) => {
            error!(error = %err, listen = %addr, "не удалось запустить HTTP-сервер");
            std::process::exit(1);
        }
    };
    info!(listen = %addr, path = %cfg.metrics_path, "HTTP-сервер запущен");

    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
    let app = http::build_router(metrics, fleet, &cfg.metrics_path);
    let http_task = tokio::spawn(async move {
        let server = serve(listener, app).with_graceful_shutdown(async move {
            let _ = shutdown_rx.changed().await;
        });
        if let Err(err) = server.await {
            error!(error = %err, "ошибка HTTP-сервера");
        }
    });

    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(error = %err, "не удалось дождаться Ctrl+C");
    }
    info!("получен Ctrl+C, выполняется остановка");

    let _ = shutdown_tx.send(true);
    let _ = http_task.await;
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
