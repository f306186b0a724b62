use crate::snapshot::{Target, TargetParseError};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

const RESERVED_PATHS: [&str; 3] = ["/", "/healthz", "/api/snapshot"];

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    #[serde(default = "default_listen")]
    pub listen: String,
    #[serde(default = "default_metrics_path")]
    pub metrics_path: String,
    #[serde(default = "default_prefix")]
    pub prefix: String,
    #[serde(default)]
    pub targets: Vec<String>,
    #[serde(default)]
    pub snmp: SnmpConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SnmpConfig {
    #[serde(default = "default_community")]
    pub community: String,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_scrape_timeout_ms")]
    pub scrape_timeout_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            metrics_path: default_metrics_path(),
            prefix: default_prefix(),
            targets: Vec::new(),
            snmp: SnmpConfig::default(),
        }
    }
}

impl Default for SnmpConfig {
    fn default() -> Self {
        Self {
            community: default_community(),
            timeout_ms: default_timeout_ms(),
            scrape_timeout_ms: default_scrape_timeout_ms(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("не удалось прочитать файл конфигурации {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("не удалось разобрать YAML в {path}: {source}")]
    Parse {
        path: String,
        source: serde_yaml::Error,
    },
    #[error("ошибка валидации конфигурации: {0}")]
    Validation(String),
    #[error("некорректная цель: {0}")]
    Target(#[from] TargetParseError),
}

impl Config {
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path_ref = path.as_ref();
        let path_display = path_ref.display().to_string();
        let text = fs::read_to_string(path_ref).map_err(|source| ConfigError::Read {
            path: path_display.clone(),
            source,
        })?;

        serde_yaml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path_display,
            source,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.listen_addr().is_none() {
            return Err(ConfigError::Validation(
                "поле listen должно быть адресом host:port или :port".to_string(),
            ));
        }
        if !self.metrics_path.starts_with('/') {
            return Err(ConfigError::Validation(
                "metrics_path должен начинаться с '/'".to_string(),
            ));
        }
        if RESERVED_PATHS.contains(&self.metrics_path.as_str()) {
            return Err(ConfigError::Validation(format!(
                "metrics_path '{}' зарезервирован",
                self.metrics_path
            )));
        }
        if !is_valid_prefix(&self.prefix) {
            return Err(ConfigError::Validation(format!(
                "prefix '{}' не подходит для имени метрики",
                self.prefix
            )));
        }
        if self.targets.is_empty() {
            return Err(ConfigError::Validation(
                "нужна хотя бы одна цель в targets".to_string(),
            ));
        }
        self.parsed_targets()?;

        if self.snmp.timeout_ms == 0 {
            return Err(ConfigError::Validation(
                "snmp.timeout_ms должен быть > 0".to_string(),
            ));
        }
        if self.snmp.scrape_timeout_ms < self.snmp.timeout_ms {
            return Err(ConfigError::Validation(
                "snmp.scrape_timeout_ms должен быть >= snmp.timeout_ms".to_string(),
            ));
        }

        Ok(())
    }

    /// `listen` as a socket address; a bare `:port` binds every IPv4 interface.
    pub fn listen_addr(&self) -> Option<SocketAddr> {
        let listen = self.listen.trim();
        SocketAddr::from_str(listen).ok().or_else(|| {
            let port = listen.strip_prefix(':')?.parse::<u16>().ok()?;
            Some(SocketAddr::from((Ipv4Addr::UNSPECIFIED, port)))
        })
    }

    pub fn parsed_targets(&self) -> Result<Vec<Target>, TargetParseError> {
        self.targets.iter().map(|t| t.parse()).collect()
    }

    /// Addresses listed more than once. Each copy is still polled on its own.
    pub fn duplicate_targets(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        let mut dups = Vec::new();
        for target in &self.targets {
            let target = target.trim();
            if !seen.insert(target) && !dups.iter().any(|d| d == target) {
                dups.push(target.to_string());
            }
        }
        dups
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.snmp.timeout_ms)
    }

    pub fn scrape_timeout(&self) -> Duration {
        Duration::from_millis(self.snmp.scrape_timeout_ms)
    }

    pub fn example_yaml() -> &'static str {
        include_str!("../config.yaml.example")
    }
}

fn is_valid_prefix(prefix: &str) -> bool {
    let mut chars = prefix.chars();
    match chars.next() {
        None => true,
        Some(first) if first.is_ascii_alphabetic() || first == '_' || first == ':' => chars
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == ':'),
        Some(_) => false,
    }
}

fn default_listen() -> String {
    "0.0.0.0:9334".to_string()
}

fn default_metrics_path() -> String {
    "/metrics".to_string()
}

fn default_prefix() -> String {
    "carel_".to_string()
}

fn default_community() -> String {
    "public".to_string()
}

const fn default_timeout_ms() -> u64 {
    2000
}

const fn default_scrape_timeout_ms() -> u64 {
    10_000
}
