//! # vigie-pg
//!
//! Store PostGIS et commandes batch pour le moteur de suivi du territoire.
//!
//! ## Features
//!
//! - Schéma PostGIS idempotent (zones, fonds d'imagerie, détections, historique)
//! - Hydratation du [`vigie::ResolverContext`] depuis la base
//! - Écritures en masse avec historique dans la même transaction
//! - Import de détections depuis un fichier CSV avec rapport détaillé
//!
//! ## Usage CLI
//!
//! ```bash
//! # Créer ou mettre à jour le schéma
//! vigie-pg schema
//!
//! # Importer un fichier de détections dans un fond d'imagerie
//! vigie-pg import-detections --tile-set-uuid <uuid> --file ./detections.csv
//!
//! # Recalculer la prescription d'un type d'objet
//! vigie-pg compute-prescription --object-type-uuid <uuid>
//! ```

pub mod import;
pub mod report;
pub mod store;

pub use report::{ImportReport, ImportStatus};
pub use store::pool::{create_pool, DatabaseConfig};
