use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context as _;
use axum_server::tls_rustls::RustlsConfig;
use clap::{Parser, Subcommand};
use thiserror::Error;
use tracing::info;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

pub(crate) mod admission;
pub(crate) mod config;
pub(crate) mod helper;
pub(crate) mod server;

use crate::admission::Injector;
use crate::config::{ConfigError, InjectorConfig, MountDescriptor};

#[derive(Debug, Error)]
pub enum Error {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
    #[error("io error: {0}")]
    IO(#[from] std::io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("anyhow: {0}")]
    Anyhow(#[from] anyhow::Error),
    #[error("failed to initialise logging: {0}")]
    Logging(#[from] tracing_subscriber::util::TryInitError),
}

#[derive(Parser)]
#[command(name = "tz-injector")]
#[command(about = "Mutating admission webhook that mounts a host timezone file into pods")]
struct Opts {
    #[command(subcommand)]
    command: Option<Command>,

    /// Webhook server port
    #[arg(long, env = "PORT", default_value_t = 443)]
    port: u16,

    /// PEM encoded x509 certificate for HTTPS, CA certificates concatenated after the server cert
    #[arg(long, env = "TLS_CERT_FILE", default_value = "/etc/webhook/certs/cert.pem")]
    tls_cert_file: PathBuf,

    /// PEM encoded private key matching --tls-cert-file
    #[arg(long, env = "TLS_PRIVATE_KEY_FILE", default_value = "/etc/webhook/certs/key.pem")]
    tls_private_key_file: PathBuf,

    /// Namespaces whose pods are never mutated
    #[arg(
        long,
        env = "IGNORE_NAMESPACES",
        value_delimiter = ',',
        default_value = "kube-system,kube-public"
    )]
    ignore_namespaces: Vec<String>,

    /// Timezone to mount into every container, relative to --zoneinfo-dir
    #[arg(long, env = "TIMEZONE", default_value = "Asia/Shanghai")]
    tz: String,

    #[arg(long, env = "ZONEINFO_DIR", default_value = "/usr/share/zoneinfo")]
    zoneinfo_dir: PathBuf,
}

#[derive(Subcommand, Default)]
enum Command {
    /// Serve the admission webhook
    #[default]
    Run,
    /// Validate the configuration and print the resolved mount
    Check,
}

impl Opts {
    fn injector_config(&self) -> Result<InjectorConfig, ConfigError> {
        let mount = MountDescriptor::for_timezone(&self.zoneinfo_dir, &self.tz)?;
        mount.verify_host_path()?;
        Ok(InjectorConfig::new(self.ignore_namespaces.iter().cloned(), mount))
    }
}

async fn load_tls(opts: &Opts) -> anyhow::Result<RustlsConfig> {
    RustlsConfig::from_pem_file(&opts.tls_cert_file, &opts.tls_private_key_file)
        .await
        .with_context(|| {
            format!(
                "failed to load key pair {:?} / {:?}",
                opts.tls_cert_file, opts.tls_private_key_file
            )
        })
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    let opts = Opts::parse();
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(EnvFilter::from_default_env())
        .try_init()?;

    let config = opts.injector_config()?;
    info!(
        {
            name = config.mount.name(),
            host_path = config.mount.host_path(),
            mount_path = config.mount.mount_path(),
            ignored_namespaces = ?config.ignored_namespaces,
        },
        "resolved timezone mount"
    );

    match opts.command.as_ref() {
        Some(Command::Check) => {
            let summary = serde_json::json!({
                "name": config.mount.name(),
                "hostPath": config.mount.host_path(),
                "mountPath": config.mount.mount_path(),
                "ignoredNamespaces": config.ignored_namespaces,
            });
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        _ => {
            let tls = load_tls(&opts).await?;
            let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, opts.port));
            server::serve(addr, tls, Arc::new(Injector::new(config))).await?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_upstream_webhook() {
        let opts = Opts::try_parse_from(["tz-injector"]).unwrap();

        assert!(opts.command.is_none());
        assert_eq!(opts.port, 443);
        assert_eq!(opts.tz, "Asia/Shanghai");
        assert_eq!(opts.ignore_namespaces, vec!["kube-system", "kube-public"]);
        assert_eq!(opts.tls_cert_file, PathBuf::from("/etc/webhook/certs/cert.pem"));
    }

    #[test]
    fn parses_comma_separated_namespaces() {
        let opts = Opts::try_parse_from([
            "tz-injector",
            "--ignore-namespaces",
            "kube-system,monitoring",
            "--tz",
            "Europe/Amsterdam",
            "check",
        ])
        .unwrap();

        assert!(matches!(opts.command, Some(Command::Check)));
        assert_eq!(opts.ignore_namespaces, vec!["kube-system", "monitoring"]);
    }

    #[test]
    fn config_requires_timezone_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("UTC"), b"TZif2").unwrap();
        let zoneinfo = dir.path().to_str().unwrap();

        let opts =
            Opts::try_parse_from(["tz-injector", "--tz", "UTC", "--zoneinfo-dir", zoneinfo])
                .unwrap();
        let config = opts.injector_config().unwrap();
        assert_eq!(config.mount.host_path(), dir.path().join("UTC").to_str().unwrap());

        let opts =
            Opts::try_parse_from(["tz-injector", "--tz", "Etc/GMT+3", "--zoneinfo-dir", zoneinfo])
                .unwrap();
        assert!(matches!(
            opts.injector_config(),
            Err(ConfigError::MissingHostPath(_))
        ));
    }
}
