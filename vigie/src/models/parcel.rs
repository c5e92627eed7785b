//! Parcelles cadastrales

use geo::MultiPolygon;
use uuid::Uuid;

/// Une parcelle cadastrale et son emprise
#[derive(Debug, Clone)]
pub struct Parcel {
    /// Identifiant unique de la parcelle
    pub id: Uuid,

    /// Identifiant parcellaire national (préfixe + section + numéro)
    pub reference: String,

    /// Commune de rattachement
    pub commune_id: Option<Uuid>,

    /// Emprise de la parcelle
    pub geometry: MultiPolygon<f64>,
}
