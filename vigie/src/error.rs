//! Types d'erreurs pour le crate vigie

use thiserror::Error;
use uuid::Uuid;

use crate::models::GroupRight;

/// Erreurs pouvant survenir lors de la résolution d'accès ou de prescription
#[derive(Debug, Error)]
pub enum VigieError {
    /// L'utilisateur ne détient pas le droit requis à l'endroit demandé
    #[error("Missing {right} right for user {user_id}")]
    Authorization { user_id: Uuid, right: GroupRight },

    /// Entité référencée introuvable
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// Incohérence de configuration (durée de prescription manquante, etc.)
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Géométrie inutilisable pour l'opération demandée
    #[error("Invalid geometry for {entity_id}: {reason}")]
    InvalidGeometry { entity_id: String, reason: String },

    /// Valeur texte inconnue pour un champ à choix fermé
    #[error("Invalid {field} value: {value}")]
    InvalidValue { field: &'static str, value: String },
}

impl VigieError {
    /// Crée une erreur d'entité introuvable
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    /// Crée une erreur de configuration
    pub fn configuration(reason: impl Into<String>) -> Self {
        Self::Configuration(reason.into())
    }

    /// Crée une erreur de géométrie invalide
    pub fn invalid_geometry(entity_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidGeometry {
            entity_id: entity_id.into(),
            reason: reason.into(),
        }
    }

    /// Crée une erreur de valeur inconnue
    pub fn invalid_value(field: &'static str, value: impl Into<String>) -> Self {
        Self::InvalidValue {
            field,
            value: value.into(),
        }
    }
}
