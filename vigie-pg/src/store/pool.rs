//! Pool de connexions PostgreSQL, TLS rustls en option
//!
//! La configuration suit les variables d'environnement `PG*` de libpq ;
//! la ligne de commande peut surcharger chaque champ. Le TLS vérifie le
//! serveur contre les racines webpki, sans certificat client.

use std::time::Duration;

use anyhow::{Context, Result};
use deadpool_postgres::{Config, Pool, PoolConfig, Runtime, Timeouts};
use tokio_postgres::NoTls;
use tokio_postgres_rustls::MakeRustlsConnect;
use tracing::warn;

/// Chiffrement de la liaison PostgreSQL
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SslMode {
    /// Liaison en clair
    #[default]
    Disable,
    /// TLS si le serveur le propose
    Prefer,
    /// TLS obligatoire
    Require,
}

impl std::str::FromStr for SslMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "disable" | "off" | "false" | "no" => Ok(SslMode::Disable),
            "prefer" => Ok(SslMode::Prefer),
            "require" | "on" | "true" | "yes" => Ok(SslMode::Require),
            other => Err(format!(
                "Unknown SSL mode '{}', expected disable, prefer or require",
                other
            )),
        }
    }
}

/// Paramètres de connexion et de dimensionnement du pool
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseConfig {
    pub host: String,
    pub port: u16,
    pub dbname: String,
    pub user: String,
    pub password: Option<String>,
    pub pool_size: usize,
    pub ssl_mode: SslMode,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            host: "localhost".into(),
            port: 5432,
            dbname: "vigie".into(),
            user: "postgres".into(),
            password: None,
            pool_size: 16,
            ssl_mode: SslMode::Disable,
        }
    }
}

impl DatabaseConfig {
    /// Configuration lue dans l'environnement
    ///
    /// Chaque champ absent retombe sur sa valeur par défaut. Un `PGSSLMODE`
    /// inconnu est signalé puis ignoré.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let ssl_mode = match std::env::var("PGSSLMODE") {
            Ok(raw) => raw.parse::<SslMode>().unwrap_or_else(|e| {
                warn!("{}", e);
                SslMode::default()
            }),
            Err(_) => defaults.ssl_mode,
        };
        Self {
            host: std::env::var("PGHOST").unwrap_or(defaults.host),
            port: env_parse("PGPORT").unwrap_or(defaults.port),
            dbname: std::env::var("PGDATABASE").unwrap_or(defaults.dbname),
            user: std::env::var("PGUSER").unwrap_or(defaults.user),
            password: std::env::var("PGPASSWORD").ok(),
            pool_size: env_parse("POOL_SIZE").unwrap_or(defaults.pool_size),
            ssl_mode,
        }
    }
}

/// Variable d'environnement analysée, `None` si absente ou invalide
fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.parse().ok())
}

/// Ouvre le pool deadpool, en TLS rustls si demandé
pub async fn create_pool(config: &DatabaseConfig) -> Result<Pool> {
    let mut cfg = Config::new();
    cfg.application_name = Some("vigie-pg".into());
    cfg.host = Some(config.host.clone());
    cfg.port = Some(config.port);
    cfg.dbname = Some(config.dbname.clone());
    cfg.user = Some(config.user.clone());
    cfg.password = config.password.clone();
    cfg.pool = Some(pool_config(config.pool_size));

    if config.ssl_mode == SslMode::Disable {
        return cfg
            .create_pool(Some(Runtime::Tokio1), NoTls)
            .context("Failed to create database pool");
    }

    let roots =
        rustls::RootCertStore::from_iter(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    let tls = rustls::ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth();
    cfg.create_pool(Some(Runtime::Tokio1), MakeRustlsConnect::new(tls))
        .context("Failed to create database pool with TLS")
}

/// Taille et délais d'attente du pool
fn pool_config(max_size: usize) -> PoolConfig {
    PoolConfig {
        max_size,
        timeouts: Timeouts {
            wait: Some(Duration::from_secs(30)),
            create: Some(Duration::from_secs(10)),
            recycle: Some(Duration::from_secs(30)),
        },
        ..Default::default()
    }
}

/// Vérifie qu'une connexion du pool répond
pub async fn test_connection(pool: &Pool) -> Result<()> {
    let client = pool
        .get()
        .await
        .context("Failed to get connection from pool")?;
    client
        .execute("SELECT 1", &[])
        .await
        .context("Connection test failed")?;
    Ok(())
}
