//! Rapport d'import avec graceful degradation
//!
//! Ce module fournit des structures pour collecter et afficher
//! les résultats d'un import de détections avec erreurs et warnings
//! détaillés.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use anyhow::Result;
use serde::Serialize;

/// Statut global de l'import
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ImportStatus {
    /// Import réussi sans erreur
    Success,
    /// Import réussi avec des lignes écartées
    PartialSuccess,
    /// Import échoué ou interrompu
    Failed,
}

/// Niveau de sévérité des erreurs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ErrorLevel {
    /// Erreur fatale: import abandonné
    Fatal,
    /// Erreur: ligne écartée
    Error,
}

/// Erreur d'import avec contexte
#[derive(Debug, Clone, Serialize)]
pub struct ImportError {
    /// Niveau de sévérité
    pub level: ErrorLevel,
    /// Numéro de ligne dans le fichier source (optionnel)
    pub line: Option<usize>,
    /// Identifiant d'import porté par la ligne (optionnel)
    pub import_id: Option<i64>,
    /// Message d'erreur
    pub message: String,
}

/// Warning d'import: la ligne est importée avec dégradation
#[derive(Debug, Clone, Serialize)]
pub struct ImportWarning {
    /// Numéro de ligne dans le fichier source
    pub line: usize,
    /// Identifiant d'import porté par la ligne
    pub import_id: Option<i64>,
    /// Message de warning
    pub message: String,
}

/// Statistiques par type d'objet
#[derive(Debug, Clone, Default, Serialize)]
pub struct TypeStats {
    /// Détections créées avec un nouvel objet
    pub created: usize,
    /// Détections rattachées à un objet existant
    pub linked: usize,
    /// Lignes écartées
    pub errors: usize,
}

impl TypeStats {
    pub fn total(&self) -> usize {
        self.created + self.linked
    }
}

/// Rapport complet d'un import de détections
#[derive(Debug, Clone, Serialize)]
pub struct ImportReport {
    /// Fichier source
    pub file: String,
    /// Fond d'imagerie cible
    pub tile_set: String,
    /// Durée de l'import
    pub duration_secs: f64,
    /// Statut global
    pub status: ImportStatus,

    // Compteurs globaux
    /// Lignes de données lues
    pub rows_read: usize,
    /// Détections créées avec un nouvel objet
    pub detections_created: usize,
    /// Détections rattachées à un objet existant
    pub detections_linked: usize,
    /// Adresses renseignées sur des objets existants
    pub addresses_filled: usize,
    /// Marquages de prescription automatique écrits
    pub prescription_flags: usize,
    /// Statuts de prescription écrits
    pub prescription_statuses: usize,
    /// Lignes écartées
    pub rows_skipped: usize,

    /// Statistiques par type d'objet
    pub by_type: HashMap<String, TypeStats>,

    /// Liste des erreurs
    pub errors: Vec<ImportError>,
    /// Liste des warnings
    pub warnings: Vec<ImportWarning>,
}

impl Default for ImportReport {
    fn default() -> Self {
        Self {
            file: String::new(),
            tile_set: String::new(),
            duration_secs: 0.0,
            status: ImportStatus::Success,
            rows_read: 0,
            detections_created: 0,
            detections_linked: 0,
            addresses_filled: 0,
            prescription_flags: 0,
            prescription_statuses: 0,
            rows_skipped: 0,
            by_type: HashMap::new(),
            errors: Vec::new(),
            warnings: Vec::new(),
        }
    }
}

impl ImportReport {
    /// Crée un nouveau rapport pour un fichier et un fond d'imagerie
    pub fn new(file: &str, tile_set: &str) -> Self {
        Self {
            file: file.to_string(),
            tile_set: tile_set.to_string(),
            ..Default::default()
        }
    }

    /// Enregistre une ligne de données lue
    pub fn record_row(&mut self) {
        self.rows_read += 1;
    }

    /// Enregistre une détection créée avec un nouvel objet
    pub fn record_created(&mut self, object_type: &str) {
        self.detections_created += 1;
        self.by_type
            .entry(object_type.to_string())
            .or_default()
            .created += 1;
    }

    /// Enregistre une détection rattachée à un objet existant
    pub fn record_linked(&mut self, object_type: &str) {
        self.detections_linked += 1;
        self.by_type
            .entry(object_type.to_string())
            .or_default()
            .linked += 1;
    }

    /// Enregistre une adresse renseignée sur un objet existant
    pub fn record_address_filled(&mut self) {
        self.addresses_filled += 1;
    }

    /// Enregistre les écritures d'un plan de prescription
    pub fn record_prescriptions(&mut self, flags: usize, statuses: usize) {
        self.prescription_flags += flags;
        self.prescription_statuses += statuses;
    }

    /// Enregistre une ligne écartée
    pub fn record_skip(&mut self, line: usize, import_id: Option<i64>, message: &str) {
        self.rows_skipped += 1;
        self.errors.push(ImportError {
            level: ErrorLevel::Error,
            line: Some(line),
            import_id,
            message: message.to_string(),
        });
    }

    /// Enregistre une ligne écartée, avec son type d'objet
    pub fn record_skip_for_type(
        &mut self,
        line: usize,
        import_id: Option<i64>,
        object_type: &str,
        message: &str,
    ) {
        self.by_type
            .entry(object_type.to_string())
            .or_default()
            .errors += 1;
        self.record_skip(line, import_id, message);
    }

    /// Enregistre une erreur fatale: l'import s'arrête sur cette ligne
    pub fn record_fatal(&mut self, line: usize, import_id: Option<i64>, message: &str) {
        self.errors.push(ImportError {
            level: ErrorLevel::Fatal,
            line: Some(line),
            import_id,
            message: message.to_string(),
        });
    }

    /// Enregistre un warning
    pub fn record_warning(&mut self, line: usize, import_id: Option<i64>, message: &str) {
        self.warnings.push(ImportWarning {
            line,
            import_id,
            message: message.to_string(),
        });
    }

    /// Définit la durée de l'import
    pub fn set_duration(&mut self, duration: Duration) {
        self.duration_secs = duration.as_secs_f64();
    }

    /// Détermine le statut final basé sur les erreurs
    pub fn finalize(&mut self) {
        let has_fatal = self.errors.iter().any(|e| e.level == ErrorLevel::Fatal);
        let has_errors = !self.errors.is_empty();
        let has_success = self.detections_created > 0 || self.detections_linked > 0;

        self.status = if has_fatal {
            ImportStatus::Failed
        } else if has_errors && has_success {
            ImportStatus::PartialSuccess
        } else if has_errors {
            ImportStatus::Failed
        } else {
            ImportStatus::Success
        };
    }

    /// Nombre total de détections écrites
    pub fn total_detections(&self) -> usize {
        self.detections_created + self.detections_linked
    }

    /// Affiche le rapport sur la console
    pub fn display(&self) {
        println!("\n{}", "=".repeat(60));
        println!("IMPORT REPORT - {} -> {}", self.file, self.tile_set);
        println!("{}", "=".repeat(60));

        println!("\nStatus: {:?}", self.status);
        println!("Duration: {:.2}s", self.duration_secs);

        println!("\n--- SUMMARY ---");
        println!(
            "Rows: {} read, {} skipped",
            self.rows_read, self.rows_skipped
        );
        println!(
            "Detections: {} created, {} linked",
            self.detections_created, self.detections_linked
        );
        println!("Addresses filled: {}", self.addresses_filled);
        println!(
            "Prescription: {} flags, {} statuses written",
            self.prescription_flags, self.prescription_statuses
        );

        if !self.by_type.is_empty() {
            println!("\n--- BY TYPE ---");
            let mut types: Vec<_> = self.by_type.iter().collect();
            types.sort_by_key(|(k, _)| k.as_str());
            for (type_name, stats) in types {
                println!(
                    "  {}: {} created, {} linked, {} errors",
                    type_name, stats.created, stats.linked, stats.errors
                );
            }
        }

        if !self.warnings.is_empty() {
            println!("\n--- WARNINGS ({}) ---", self.warnings.len());
            for w in self.warnings.iter().take(10) {
                println!("  [line {}] {}", w.line, w.message);
            }
            if self.warnings.len() > 10 {
                println!("  ... and {} more", self.warnings.len() - 10);
            }
        }

        if !self.errors.is_empty() {
            println!("\n--- ERRORS ({}) ---", self.errors.len());
            for e in self.errors.iter().take(20) {
                let location = match (e.line, e.import_id) {
                    (Some(line), Some(id)) => format!("[line {}, id {}]", line, id),
                    (Some(line), None) => format!("[line {}]", line),
                    (None, Some(id)) => format!("[id {}]", id),
                    _ => String::new(),
                };
                println!("  {:?} {} {}", e.level, location, e.message);
            }
            if self.errors.len() > 20 {
                println!("  ... and {} more", self.errors.len() - 20);
            }
        }

        println!("\n{}", "=".repeat(60));
    }

    /// Sauvegarde le rapport en JSON
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Affichage compact pour le résumé
    pub fn summary(&self) -> String {
        format!(
            "{}: {} created, {} linked, {} skipped, {} errors",
            self.tile_set,
            self.detections_created,
            self.detections_linked,
            self.rows_skipped,
            self.errors.len()
        )
    }
}
