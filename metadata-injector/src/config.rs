use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::Parser;

const PORT_ENV: &str = "NEW_RELIC_K8S_METADATA_INJECTION_PORT";
const HEALTH_PORT_ENV: &str = "NEW_RELIC_K8S_METADATA_INJECTION_HEALTH_PORT";
const TLS_CERT_FILE_ENV: &str = "NEW_RELIC_K8S_METADATA_INJECTION_TLS_CERT_FILE";
const TLS_KEY_FILE_ENV: &str = "NEW_RELIC_K8S_METADATA_INJECTION_TLS_KEY_FILE";
const CLUSTER_NAME_ENV: &str = "NEW_RELIC_K8S_METADATA_INJECTION_CLUSTER_NAME";
const TIMEOUT_ENV: &str = "NEW_RELIC_K8S_METADATA_INJECTION_TIMEOUT";
const RELOAD_DEBOUNCE_ENV: &str = "NEW_RELIC_K8S_METADATA_INJECTION_RELOAD_DEBOUNCE";
const LOG_LEVEL_ENV: &str = "NEW_RELIC_K8S_METADATA_INJECTION_LOG_LEVEL";
const LOG_CONFIG_FILE_ENV: &str = "NEW_RELIC_K8S_METADATA_INJECTION_LOG_CONFIG_FILE";
const WEBHOOK_CONFIG_NAME_ENV: &str = "NEW_RELIC_K8S_METADATA_INJECTION_WEBHOOK_CONFIG_NAME";
const WEBHOOK_NAME_ENV: &str = "NEW_RELIC_K8S_METADATA_INJECTION_WEBHOOK_NAME";
const CA_BUNDLE_FILE_ENV: &str = "NEW_RELIC_K8S_METADATA_INJECTION_CA_BUNDLE_FILE";

#[derive(Debug, Parser)]
#[clap(
    name = "k8s-metadata-injector",
    about = "Mutating admission webhook injecting Kubernetes metadata env vars into Pods"
)]
pub struct InjectorConfig {
    /// HTTPS port serving /mutate
    #[clap(long, env = PORT_ENV, default_value_t = 8443)]
    pub port: u16,

    /// Plain HTTP port serving the readiness probe
    #[clap(long, env = HEALTH_PORT_ENV, default_value_t = 8080)]
    pub health_port: u16,

    #[clap(long, env = TLS_CERT_FILE_ENV, default_value = "/etc/tls-key-cert-pair/tls.crt")]
    pub tls_cert_file: PathBuf,

    #[clap(long, env = TLS_KEY_FILE_ENV, default_value = "/etc/tls-key-cert-pair/tls.key")]
    pub tls_key_file: PathBuf,

    #[clap(long, env = CLUSTER_NAME_ENV, default_value = "cluster")]
    pub cluster_name: String,

    /// Server-wide request timeout (e.g. 500ms, 1s, 2m)
    #[clap(long, env = TIMEOUT_ENV, default_value = "1s", value_parser = parse_duration)]
    pub timeout: Duration,

    /// Quiet period before certificate changes are reloaded
    #[clap(long, env = RELOAD_DEBOUNCE_ENV, default_value = "500ms", value_parser = parse_duration)]
    pub reload_debounce: Duration,

    #[clap(long, env = LOG_LEVEL_ENV, default_value = "info")]
    pub log_level: String,

    /// log4rs YAML file, replaces the console logger when given
    #[clap(long, env = LOG_CONFIG_FILE_ENV)]
    pub log_config_file: Option<PathBuf>,

    #[clap(long, env = WEBHOOK_CONFIG_NAME_ENV)]
    pub webhook_config_name: Option<String>,

    #[clap(long, env = WEBHOOK_NAME_ENV)]
    pub webhook_name: Option<String>,

    #[clap(long, env = CA_BUNDLE_FILE_ENV)]
    pub ca_bundle_file: Option<PathBuf>,
}

impl InjectorConfig {
    pub fn webhook_addr(&self) -> SocketAddr {
        SocketAddr::from(([0, 0, 0, 0], self.port))
    }

    pub fn health_addr(&self) -> SocketAddr {
        SocketAddr::from(([0, 0, 0, 0], self.health_port))
    }

    /// Configuration name, webhook name and bundle file, only when all three
    /// were given.
    pub fn ca_bundle_target(&self) -> Option<(&str, &str, &Path)> {
        match (
            &self.webhook_config_name,
            &self.webhook_name,
            &self.ca_bundle_file,
        ) {
            (Some(config_name), Some(name), Some(file)) => {
                Some((config_name.as_str(), name.as_str(), file.as_path()))
            }
            _ => None,
        }
    }
}

fn duration_unit(unit: &str) -> Option<u64> {
    match unit {
        "ns" => Some(1),
        "us" | "µs" => Some(1_000),
        "ms" => Some(1_000_000),
        "s" => Some(1_000_000_000),
        "m" => Some(60 * 1_000_000_000),
        "h" => Some(3600 * 1_000_000_000),
        _ => None,
    }
}

/// Parses durations like `500ms`, `1s`, `1m30s` or `1.5h`. A bare number is
/// a number of seconds.
pub fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    if s.is_empty() {
        return Err("empty duration".to_string());
    }
    if let Ok(secs) = s.parse::<u64>() {
        return Ok(Duration::from_secs(secs));
    }
    let invalid = || format!("invalid duration {:?}", s);
    let mut total = Duration::ZERO;
    let mut rest = s;
    while !rest.is_empty() {
        let number_end = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(rest.len());
        if number_end == 0 {
            return Err(invalid());
        }
        let number = &rest[..number_end];
        rest = &rest[number_end..];
        let unit_end = rest
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(rest.len());
        let unit = &rest[..unit_end];
        rest = &rest[unit_end..];
        let nanos_per_unit = match unit {
            "" => return Err(format!("missing unit in duration {:?}", s)),
            u => duration_unit(u).ok_or_else(|| format!("unknown unit {:?} in duration {:?}", u, s))?,
        };
        let nanos = match number.parse::<u64>() {
            Ok(n) => n.checked_mul(nanos_per_unit).ok_or_else(invalid)?,
            Err(_) => {
                let n = number.parse::<f64>().map_err(|_| invalid())?;
                (n * nanos_per_unit as f64) as u64
            }
        };
        total += Duration::from_nanos(nanos);
    }
    Ok(total)
}
