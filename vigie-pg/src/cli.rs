//! Définition et implémentation des commandes CLI
//!
//! CLI batch:
//! - `schema`: création/mise à jour du schéma PostGIS
//! - `import-detections`: fichier CSV → détections versionnées
//! - `compute-prescription`: recalcul de la prescription par type d'objet
//! - `update-custom-zones`: resynchronisation des liens de zones

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{bail, Context, Result};
use clap::{Args, Subcommand};
use deadpool_postgres::Pool;
use tracing::info;
use uuid::Uuid;

use vigie::models::ZoneKind;
use vigie::prescription::{compute_prescription, PrescriptionPlan};

use crate::import::{self, ImportOptions};
use crate::report::ImportStatus;
use crate::store::pool::{create_pool, test_connection, DatabaseConfig, SslMode};
use crate::store::{load, schema, write};

/// Connexion PostgreSQL, en surcharge des variables d'environnement
#[derive(Debug, Clone, Args)]
pub struct DbArgs {
    /// PostgreSQL host (défaut : env PGHOST / localhost)
    #[arg(long)]
    pub host: Option<String>,

    /// PostgreSQL database name (défaut : env PGDATABASE / vigie)
    #[arg(long)]
    pub database: Option<String>,

    /// PostgreSQL user (défaut : env PGUSER / postgres)
    #[arg(long)]
    pub user: Option<String>,

    /// PostgreSQL password (défaut : env PGPASSWORD)
    #[arg(long)]
    pub password: Option<String>,

    /// PostgreSQL port (défaut : env PGPORT / 5432)
    #[arg(long)]
    pub port: Option<u16>,

    /// SSL mode: disable, prefer, require (défaut : env PGSSLMODE / disable)
    #[arg(long)]
    pub ssl: Option<SslMode>,
}

impl DbArgs {
    /// Configuration finale : variables d'environnement puis surcharges CLI
    pub fn database_config(&self) -> DatabaseConfig {
        let mut config = DatabaseConfig::from_env();
        self.apply_overrides(&mut config);
        config
    }

    fn apply_overrides(&self, config: &mut DatabaseConfig) {
        if let Some(host) = &self.host {
            config.host = host.clone();
        }
        if let Some(database) = &self.database {
            config.dbname = database.clone();
        }
        if let Some(user) = &self.user {
            config.user = user.clone();
        }
        if let Some(password) = &self.password {
            config.password = Some(password.clone());
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(ssl) = self.ssl {
            config.ssl_mode = ssl;
        }
    }
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create or update the PostGIS schema (idempotent)
    Schema {
        #[command(flatten)]
        db: DbArgs,
    },

    /// Import a CSV file of detections into a tile set
    ImportDetections {
        /// UUID of the target tile set
        #[arg(long)]
        tile_set_uuid: Uuid,

        /// Path to the CSV file (';' delimited, header required)
        #[arg(short, long)]
        file: PathBuf,

        /// Batch identifier stamped on created objects
        #[arg(long)]
        batch_id: Option<String>,

        /// Rows per write batch
        #[arg(long, default_value_t = 1000)]
        batch_size: usize,

        /// Save the JSON report to this file
        #[arg(long)]
        report: Option<PathBuf>,

        #[command(flatten)]
        db: DbArgs,
    },

    /// Recompute prescription for every object of the given types
    ComputePrescription {
        /// UUID of an object type (repeatable)
        #[arg(long = "object-type-uuid", required = true)]
        object_type_uuids: Vec<Uuid>,

        /// Objects per computation page
        #[arg(long, default_value_t = 10_000)]
        page_size: i64,

        #[command(flatten)]
        db: DbArgs,
    },

    /// Resynchronize links between detected objects and custom zones
    UpdateCustomZones {
        /// UUID of a custom zone (repeatable, default: all custom zones)
        #[arg(long = "zone-uuid")]
        zone_uuids: Vec<Uuid>,

        #[command(flatten)]
        db: DbArgs,
    },
}

/// Exécute la commande schema
pub async fn cmd_schema(db: &DbArgs) -> Result<()> {
    println!("=== Schéma vigie ===");
    let pool = connect(db).await?;

    let started = Instant::now();
    schema::create_schema(&pool).await?;
    schema::create_indexes(&pool).await?;

    println!("\n=== Summary ===");
    println!("Tables: {}", schema::TABLES.len());
    println!("Elapsed: {:.2?}", started.elapsed());
    Ok(())
}

/// Exécute la commande import-detections
pub async fn cmd_import_detections(
    file: &Path,
    tile_set_uuid: Uuid,
    batch_id: Option<&str>,
    batch_size: usize,
    report_path: Option<&Path>,
    db: &DbArgs,
) -> Result<()> {
    validate_batch_size(batch_size)?;
    if !file.exists() {
        bail!("File not found: {}", file.display());
    }

    println!("=== Import détections ===");
    println!("File: {}", file.display());
    println!("Tile set: {}", tile_set_uuid);
    if let Some(batch) = batch_id {
        println!("Batch: {}", batch);
    }
    println!("Batch size: {}", batch_size);
    let pool = connect(db).await?;

    let options = ImportOptions {
        tile_set_id: tile_set_uuid,
        batch_id: batch_id.map(str::to_string),
        batch_size,
    };
    let report = import::import_detections_file(&pool, file, &options).await?;
    report.display();

    if let Some(path) = report_path {
        report.save_to_file(path)?;
        println!("Report saved to {}", path.display());
    }

    if report.status == ImportStatus::Failed {
        bail!("Import failed: {}", report.summary());
    }
    Ok(())
}

/// Exécute la commande compute-prescription
pub async fn cmd_compute_prescription(
    object_type_uuids: &[Uuid],
    page_size: i64,
    db: &DbArgs,
) -> Result<()> {
    validate_page_size(page_size)?;

    println!("=== Recalcul de la prescription ===");
    println!("Object types: {}", object_type_uuids.len());
    println!("Page size: {}", page_size);
    let pool = connect(db).await?;

    // référentiel commun à toutes les pages
    let mut ctx = load::load_core_context(&pool).await?;

    // un type inconnu arrête la commande avant tout calcul
    for id in object_type_uuids {
        ctx.object_type(*id)?;
    }

    let started = Instant::now();
    let mut objects_processed = 0usize;
    let mut flags_written = 0u64;
    let mut statuses_written = 0u64;

    for type_id in object_type_uuids {
        let type_name = ctx.object_type(*type_id)?.name.clone();
        info!(object_type = %type_name, "Recomputing prescription");

        let mut after: Option<Uuid> = None;
        loop {
            let page = load::load_object_page(&pool, *type_id, after, page_size).await?;
            if page.is_empty() {
                break;
            }
            after = page.last().copied();

            // chaque page repart d'un contexte sans détections
            ctx.detections.clear();
            ctx.detection_objects.clear();
            load::load_detections_for_objects(&pool, &mut ctx, &page).await?;

            let mut merged = PrescriptionPlan::default();
            for object_id in &page {
                let plan = compute_prescription(&ctx, *object_id)?;
                merged.flag_updates.extend(plan.flag_updates);
                merged.status_updates.extend(plan.status_updates);
            }
            let (flags, statuses) = write::apply_prescription_plan(&pool, &merged).await?;

            objects_processed += page.len();
            flags_written += flags;
            statuses_written += statuses;
            info!(
                object_type = %type_name,
                processed = objects_processed,
                "Prescription progress"
            );
        }
    }

    println!("\n=== Summary ===");
    println!("Objects processed: {}", objects_processed);
    println!("Flags written: {}", flags_written);
    println!("Statuses written: {}", statuses_written);
    println!("Elapsed: {:.2?}", started.elapsed());
    Ok(())
}

/// Exécute la commande update-custom-zones
pub async fn cmd_update_custom_zones(zone_uuids: &[Uuid], db: &DbArgs) -> Result<()> {
    println!("=== Resynchronisation des zones personnalisées ===");
    if zone_uuids.is_empty() {
        println!("Zones: all custom zones");
    } else {
        println!("Zones: {}", zone_uuids.len());
    }
    let pool = connect(db).await?;

    // chaque zone demandée doit exister et être personnalisée
    if !zone_uuids.is_empty() {
        let client = pool.get().await?;
        let rows = client
            .query("SELECT id, kind FROM geo_zone WHERE id = ANY($1)", &[&zone_uuids])
            .await
            .context("Failed to check zones")?;
        let found: HashMap<Uuid, String> = rows
            .iter()
            .map(|row| (row.get("id"), row.get("kind")))
            .collect();
        for id in zone_uuids {
            match found.get(id) {
                None => bail!("Zone {} not found", id),
                Some(kind) if kind.as_str() != ZoneKind::Custom.as_str() => {
                    bail!("Zone {} is not a custom zone (kind: {})", id, kind)
                }
                Some(_) => {}
            }
        }
    }

    let started = Instant::now();
    let filter = if zone_uuids.is_empty() {
        None
    } else {
        Some(zone_uuids)
    };
    let (added, removed) = write::sync_custom_zone_links(&pool, filter).await?;

    println!("\n=== Summary ===");
    println!("Links added: {}", added);
    println!("Links removed: {}", removed);
    println!("Elapsed: {:.2?}", started.elapsed());
    Ok(())
}

/// Connecte le pool et vérifie la liaison
async fn connect(db: &DbArgs) -> Result<Pool> {
    let config = db.database_config();
    println!(
        "Database: {}@{}:{}/{} (SSL: {:?})",
        config.user, config.host, config.port, config.dbname, config.ssl_mode
    );

    let pool = create_pool(&config).await?;
    test_connection(&pool).await?;
    println!("Connected to PostgreSQL");
    Ok(pool)
}

fn validate_batch_size(batch_size: usize) -> Result<()> {
    if batch_size == 0 {
        bail!("Batch size must be at least 1");
    }
    if batch_size > 10_000 {
        bail!("Batch size {} too large (max 10000)", batch_size);
    }
    Ok(())
}

fn validate_page_size(page_size: i64) -> Result<()> {
    if page_size < 1 {
        bail!("Page size must be at least 1");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_batch_size() {
        assert!(validate_batch_size(1).is_ok());
        assert!(validate_batch_size(1000).is_ok());
        assert!(validate_batch_size(10_000).is_ok());
        assert!(validate_batch_size(0).is_err());
        assert!(validate_batch_size(20_000).is_err());
    }

    #[test]
    fn test_validate_page_size() {
        assert!(validate_page_size(1).is_ok());
        assert!(validate_page_size(10_000).is_ok());
        assert!(validate_page_size(0).is_err());
        assert!(validate_page_size(-5).is_err());
    }

    #[test]
    fn test_db_args_overrides() {
        let args = DbArgs {
            host: Some("db.example.org".to_string()),
            database: None,
            user: Some("vigie".to_string()),
            password: None,
            port: Some(5433),
            ssl: Some(SslMode::Require),
        };
        let mut config = DatabaseConfig::default();
        args.apply_overrides(&mut config);

        assert_eq!(config.host, "db.example.org");
        assert_eq!(config.dbname, "vigie");
        assert_eq!(config.user, "vigie");
        assert_eq!(config.port, 5433);
        assert_eq!(config.ssl_mode, SslMode::Require);
    }

    #[test]
    fn test_db_args_empty_keeps_defaults() {
        let args = DbArgs {
            host: None,
            database: None,
            user: None,
            password: None,
            port: None,
            ssl: None,
        };
        let mut config = DatabaseConfig::default();
        args.apply_overrides(&mut config);

        assert_eq!(config, DatabaseConfig::default());
    }
}
