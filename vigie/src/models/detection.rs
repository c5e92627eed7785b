//! Détections, objets détectés et leur état d'annotation

use std::str::FromStr;

use geo::Polygon;
use uuid::Uuid;

use crate::error::VigieError;

/// Origine d'une détection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DetectionSource {
    /// Dessinée à la main dans l'interface
    InterfaceDrawn,
    /// Produite par l'analyse automatique d'imagerie
    Analysis,
}

impl DetectionSource {
    /// Représentation texte stockée en base
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InterfaceDrawn => "INTERFACE_DRAWN",
            Self::Analysis => "ANALYSIS",
        }
    }
}

impl FromStr for DetectionSource {
    type Err = VigieError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "INTERFACE_DRAWN" => Ok(Self::InterfaceDrawn),
            "ANALYSIS" => Ok(Self::Analysis),
            _ => Err(VigieError::invalid_value("detection source", value)),
        }
    }
}

/// Avancement du contrôle terrain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DetectionControlStatus {
    NotControlled,
    SignaledInternally,
    SignaledCollectivity,
    Verbalized,
    Rehabilitated,
}

impl DetectionControlStatus {
    /// Représentation texte stockée en base
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotControlled => "NOT_CONTROLLED",
            Self::SignaledInternally => "SIGNALED_INTERNALLY",
            Self::SignaledCollectivity => "SIGNALED_COLLECTIVITY",
            Self::Verbalized => "VERBALIZED",
            Self::Rehabilitated => "REHABILITATED",
        }
    }
}

impl FromStr for DetectionControlStatus {
    type Err = VigieError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "NOT_CONTROLLED" => Ok(Self::NotControlled),
            "SIGNALED_INTERNALLY" => Ok(Self::SignaledInternally),
            "SIGNALED_COLLECTIVITY" => Ok(Self::SignaledCollectivity),
            "VERBALIZED" => Ok(Self::Verbalized),
            "REHABILITATED" => Ok(Self::Rehabilitated),
            _ => Err(VigieError::invalid_value("control status", value)),
        }
    }
}

/// Avancement de la vérification humaine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DetectionValidationStatus {
    DetectedNotVerified,
    Suspect,
    Legitimate,
    Invalidated,
    Controlled,
}

impl DetectionValidationStatus {
    /// Représentation texte stockée en base
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DetectedNotVerified => "DETECTED_NOT_VERIFIED",
            Self::Suspect => "SUSPECT",
            Self::Legitimate => "LEGITIMATE",
            Self::Invalidated => "INVALIDATED",
            Self::Controlled => "CONTROLLED",
        }
    }
}

impl FromStr for DetectionValidationStatus {
    type Err = VigieError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "DETECTED_NOT_VERIFIED" => Ok(Self::DetectedNotVerified),
            "SUSPECT" => Ok(Self::Suspect),
            "LEGITIMATE" => Ok(Self::Legitimate),
            "INVALIDATED" => Ok(Self::Invalidated),
            "CONTROLLED" => Ok(Self::Controlled),
            _ => Err(VigieError::invalid_value("validation status", value)),
        }
    }
}

/// État de prescription d'une détection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DetectionPrescriptionStatus {
    Prescribed,
    NotPrescribed,
}

impl DetectionPrescriptionStatus {
    /// Représentation texte stockée en base
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Prescribed => "PRESCRIBED",
            Self::NotPrescribed => "NOT_PRESCRIBED",
        }
    }
}

impl FromStr for DetectionPrescriptionStatus {
    type Err = VigieError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "PRESCRIBED" => Ok(Self::Prescribed),
            "NOT_PRESCRIBED" => Ok(Self::NotPrescribed),
            _ => Err(VigieError::invalid_value("prescription status", value)),
        }
    }
}

/// Un objet physique réel, racine d'agrégation de ses détections
///
/// Toutes les détections du même objet à travers le temps (une par fond
/// d'imagerie au plus) sont rattachées à cet objet.
#[derive(Debug, Clone)]
pub struct DetectionObject {
    /// Identifiant unique de l'objet
    pub id: Uuid,

    /// Type de l'objet détecté
    pub object_type_id: Uuid,

    /// Adresse si connue
    pub address: Option<String>,

    /// Commentaire libre
    pub comment: Option<String>,

    /// Parcelle cadastrale contenant le centroïde de l'objet
    pub parcel_id: Option<Uuid>,

    /// Zones personnalisées intersectant la géométrie de l'objet
    pub custom_zone_ids: Vec<Uuid>,

    /// Lot d'import d'origine
    pub batch_id: Option<String>,

    /// Identifiant dans le fichier d'import d'origine
    pub import_id: Option<i64>,
}

/// État d'annotation d'une détection, mutable par les agents
#[derive(Debug, Clone, PartialEq)]
pub struct DetectionData {
    /// Avancement du contrôle terrain
    pub control_status: DetectionControlStatus,

    /// Avancement de la vérification humaine
    pub validation_status: DetectionValidationStatus,

    /// État de prescription, `None` tant que non évalué
    pub prescription_status: Option<DetectionPrescriptionStatus>,

    /// Dernier agent ayant modifié cet état
    pub last_updated_by: Option<Uuid>,
}

impl Default for DetectionData {
    fn default() -> Self {
        Self {
            control_status: DetectionControlStatus::NotControlled,
            validation_status: DetectionValidationStatus::DetectedNotVerified,
            prescription_status: None,
            last_updated_by: None,
        }
    }
}

/// Une observation d'un objet dans un fond d'imagerie donné
#[derive(Debug, Clone)]
pub struct Detection {
    /// Identifiant unique de la détection
    pub id: Uuid,

    /// Objet physique observé
    pub object_id: Uuid,

    /// Fond d'imagerie de l'observation
    pub tile_set_id: Uuid,

    /// Contour détecté
    pub geometry: Polygon<f64>,

    /// Score de confiance de la détection, entre 0 et 1
    pub score: f64,

    /// Origine de la détection
    pub source: DetectionSource,

    /// Vrai si la prescription a été posée par le moteur (jamais à la main)
    pub auto_prescribed: bool,

    /// État d'annotation
    pub data: DetectionData,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detection_data_defaults() {
        let data = DetectionData::default();
        assert_eq!(data.control_status, DetectionControlStatus::NotControlled);
        assert_eq!(
            data.validation_status,
            DetectionValidationStatus::DetectedNotVerified
        );
        assert!(data.prescription_status.is_none());
        assert!(data.last_updated_by.is_none());
    }

    #[test]
    fn test_status_round_trips() {
        for status in [
            DetectionControlStatus::NotControlled,
            DetectionControlStatus::SignaledInternally,
            DetectionControlStatus::SignaledCollectivity,
            DetectionControlStatus::Verbalized,
            DetectionControlStatus::Rehabilitated,
        ] {
            assert_eq!(
                status.as_str().parse::<DetectionControlStatus>().unwrap(),
                status
            );
        }

        for status in [
            DetectionPrescriptionStatus::Prescribed,
            DetectionPrescriptionStatus::NotPrescribed,
        ] {
            assert_eq!(
                status.as_str().parse::<DetectionPrescriptionStatus>().unwrap(),
                status
            );
        }
    }
}
