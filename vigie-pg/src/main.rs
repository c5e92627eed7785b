//! Point d'entrée CLI pour vigie-pg

use anyhow::Result;
use clap::Parser;
use tracing::{info, Level};
use tracing_subscriber::{fmt, EnvFilter};

// Charger .env au démarrage
fn load_env() {
    // Chercher .env dans le répertoire courant ou parent
    if dotenvy::dotenv().is_err() {
        // Essayer depuis le répertoire du binaire
        if let Ok(exe) = std::env::current_exe() {
            if let Some(dir) = exe.parent() {
                let _ = dotenvy::from_path(dir.join(".env"));
            }
        }
    }
}

mod cli;
mod import;
mod report;
mod store;

use cli::Commands;

/// Administrer la base PostGIS du suivi du territoire
#[derive(Parser)]
#[command(name = "vigie-pg")]
#[command(author, version)]
#[command(about = "Administrer la base PostGIS du suivi du territoire (schéma, imports, prescription)")]
#[command(
    long_about = "Commandes batch du suivi du territoire : création du schéma PostGIS, import de détections depuis un fichier CSV, recalcul de la prescription et resynchronisation des zones personnalisées."
)]
struct Cli {
    /// Augmenter la verbosité (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Mode silencieux
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Sous-commande
    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Charger .env avant tout
    load_env();

    let cli = Cli::parse();

    // Configurer le logging
    init_logging(cli.verbose, cli.quiet);

    match cli.command {
        Commands::Schema { db } => {
            info!("Mise à jour du schéma");
            cli::cmd_schema(&db).await?;
        }
        Commands::ImportDetections {
            tile_set_uuid,
            file,
            batch_id,
            batch_size,
            report,
            db,
        } => {
            info!(
                file = %file.display(),
                tile_set = %tile_set_uuid,
                "Import de détections"
            );
            cli::cmd_import_detections(
                &file,
                tile_set_uuid,
                batch_id.as_deref(),
                batch_size,
                report.as_deref(),
                &db,
            )
            .await?;
        }
        Commands::ComputePrescription {
            object_type_uuids,
            page_size,
            db,
        } => {
            info!(types = object_type_uuids.len(), "Recalcul de la prescription");
            cli::cmd_compute_prescription(&object_type_uuids, page_size, &db).await?;
        }
        Commands::UpdateCustomZones { zone_uuids, db } => {
            info!(
                zones = zone_uuids.len(),
                "Resynchronisation des zones personnalisées"
            );
            cli::cmd_update_custom_zones(&zone_uuids, &db).await?;
        }
    }

    Ok(())
}

fn init_logging(verbose: u8, quiet: bool) {
    let level = match (quiet, verbose) {
        (true, _) => Level::WARN,
        (_, 0) => Level::INFO,
        (_, 1) => Level::DEBUG,
        (_, _) => Level::TRACE,
    };

    let filter = EnvFilter::from_default_env().add_directive(level.into());

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_file(false)
        .with_line_number(false)
        .init();
}
