//! Zones géographiques (communes, départements, régions, zones personnalisées)

use std::fmt;
use std::str::FromStr;

use geo::MultiPolygon;
use uuid::Uuid;

use crate::error::VigieError;

/// Nature d'une zone géographique
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ZoneKind {
    Commune,
    Department,
    Region,
    Custom,
}

impl ZoneKind {
    /// Représentation texte stockée en base
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Commune => "COMMUNE",
            Self::Department => "DEPARTMENT",
            Self::Region => "REGION",
            Self::Custom => "CUSTOM",
        }
    }
}

impl FromStr for ZoneKind {
    type Err = VigieError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "COMMUNE" => Ok(Self::Commune),
            "DEPARTMENT" => Ok(Self::Department),
            "REGION" => Ok(Self::Region),
            "CUSTOM" => Ok(Self::Custom),
            _ => Err(VigieError::invalid_value("zone kind", value)),
        }
    }
}

impl fmt::Display for ZoneKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Statut d'une zone personnalisée
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CustomZoneStatus {
    Active,
    Inactive,
}

impl CustomZoneStatus {
    /// Représentation texte stockée en base
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "ACTIVE",
            Self::Inactive => "INACTIVE",
        }
    }

    /// Rang de tri : les zones actives en premier
    pub fn sort_rank(&self) -> u8 {
        match self {
            Self::Active => 0,
            Self::Inactive => 1,
        }
    }
}

impl FromStr for CustomZoneStatus {
    type Err = VigieError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "ACTIVE" => Ok(Self::Active),
            "INACTIVE" => Ok(Self::Inactive),
            _ => Err(VigieError::invalid_value("custom zone status", value)),
        }
    }
}

/// Sous-type d'une zone personnalisée
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CustomZoneKind {
    Common,
    CollectivityManaged,
}

impl CustomZoneKind {
    /// Représentation texte stockée en base
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Common => "COMMON",
            Self::CollectivityManaged => "COLLECTIVITY_MANAGED",
        }
    }
}

impl FromStr for CustomZoneKind {
    type Err = VigieError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "COMMON" => Ok(Self::Common),
            "COLLECTIVITY_MANAGED" => Ok(Self::CollectivityManaged),
            _ => Err(VigieError::invalid_value("custom zone kind", value)),
        }
    }
}

/// Une zone géographique et son emprise
///
/// Les quatre natures de zones partagent la même représentation aplatie :
/// seules les zones personnalisées portent un statut et un sous-type.
#[derive(Debug, Clone)]
pub struct GeoZone {
    /// Identifiant unique de la zone
    pub id: Uuid,

    /// Nom affichable (nom de commune, libellé de zone dessinée, etc.)
    pub name: String,

    /// Nature de la zone
    pub kind: ZoneKind,

    /// Zone parente (commune → département → région)
    pub parent_id: Option<Uuid>,

    /// Emprise de la zone
    pub geometry: MultiPolygon<f64>,

    /// Statut, zones personnalisées uniquement
    pub custom_status: Option<CustomZoneStatus>,

    /// Sous-type, zones personnalisées uniquement
    pub custom_kind: Option<CustomZoneKind>,
}

impl GeoZone {
    /// Vrai pour une zone personnalisée
    pub fn is_custom(&self) -> bool {
        self.kind == ZoneKind::Custom
    }
}
