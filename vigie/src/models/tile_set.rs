//! Fonds d'imagerie datés (tile sets) et leur emprise

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use uuid::Uuid;

use crate::error::VigieError;

/// Statut de publication d'un fond d'imagerie
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TileSetStatus {
    Visible,
    Hidden,
    Deactivated,
}

impl TileSetStatus {
    /// Représentation texte stockée en base
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Visible => "VISIBLE",
            Self::Hidden => "HIDDEN",
            Self::Deactivated => "DEACTIVATED",
        }
    }
}

impl FromStr for TileSetStatus {
    type Err = VigieError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "VISIBLE" => Ok(Self::Visible),
            "HIDDEN" => Ok(Self::Hidden),
            "DEACTIVATED" => Ok(Self::Deactivated),
            _ => Err(VigieError::invalid_value("tile set status", value)),
        }
    }
}

/// Rôle d'un fond d'imagerie dans l'interface
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TileSetKind {
    Indicative,
    Partial,
    Background,
}

impl TileSetKind {
    /// Représentation texte stockée en base
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Indicative => "INDICATIVE",
            Self::Partial => "PARTIAL",
            Self::Background => "BACKGROUND",
        }
    }

    /// Priorité d'affichage : indicatif avant partiel avant fond de plan
    pub fn priority(&self) -> u8 {
        match self {
            Self::Indicative => 0,
            Self::Partial => 1,
            Self::Background => 2,
        }
    }
}

impl FromStr for TileSetKind {
    type Err = VigieError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "INDICATIVE" => Ok(Self::Indicative),
            "PARTIAL" => Ok(Self::Partial),
            "BACKGROUND" => Ok(Self::Background),
            _ => Err(VigieError::invalid_value("tile set kind", value)),
        }
    }
}

impl fmt::Display for TileSetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Un fond d'imagerie capturé à une date donnée
///
/// L'emprise n'est pas stockée : elle se déduit de l'union des zones
/// associées. Une liste de zones vide signifie une couverture globale.
#[derive(Debug, Clone)]
pub struct TileSet {
    /// Identifiant unique du fond
    pub id: Uuid,

    /// Nom unique du fond (ex: "ORTHO 2021")
    pub name: String,

    /// Statut de publication
    pub status: TileSetStatus,

    /// Rôle dans l'interface
    pub kind: TileSetKind,

    /// Date de capture (unique par fond)
    pub date: NaiveDate,

    /// Zoom minimal d'affichage
    pub min_zoom: Option<i32>,

    /// Zoom maximal d'affichage
    pub max_zoom: Option<i32>,

    /// Zones définissant l'emprise (vide = couverture globale)
    pub zone_ids: Vec<Uuid>,

    /// Début du dernier import de détections
    pub last_import_started_at: Option<DateTime<Utc>>,

    /// Fin du dernier import de détections
    pub last_import_ended_at: Option<DateTime<Utc>>,
}
