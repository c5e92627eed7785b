//! Types d'objets détectables et leurs catégories de visibilité

use std::str::FromStr;

use uuid::Uuid;

use crate::error::VigieError;

/// Un type d'objet détectable (piscine, abri de jardin, etc.)
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectType {
    /// Identifiant unique du type
    pub id: Uuid,

    /// Nom unique du type
    pub name: String,

    /// Couleur d'affichage (unique)
    pub color: String,

    /// Durée de prescription en années, `None` si la prescription
    /// ne s'applique pas à ce type
    pub prescription_duration_years: Option<u32>,
}

impl ObjectType {
    /// Vrai si une durée de prescription non nulle est configurée
    pub fn prescription_applies(&self) -> bool {
        matches!(self.prescription_duration_years, Some(years) if years > 0)
    }
}

/// Visibilité d'un type d'objet au sein d'une catégorie
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VisibilityStatus {
    Visible,
    Hidden,
}

impl VisibilityStatus {
    /// Représentation texte stockée en base
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Visible => "VISIBLE",
            Self::Hidden => "HIDDEN",
        }
    }
}

impl FromStr for VisibilityStatus {
    type Err = VigieError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "VISIBLE" => Ok(Self::Visible),
            "HIDDEN" => Ok(Self::Hidden),
            _ => Err(VigieError::invalid_value("visibility status", value)),
        }
    }
}

/// Une catégorie regroupant des types d'objets avec leur visibilité
///
/// Les groupes d'utilisateurs référencent des catégories ; c'est par elles
/// qu'un utilisateur voit ou non chaque type d'objet.
#[derive(Debug, Clone)]
pub struct ObjectTypeCategory {
    /// Identifiant unique de la catégorie
    pub id: Uuid,

    /// Nom unique de la catégorie
    pub name: String,

    /// Paires (type d'objet, visibilité) déclarées par la catégorie
    pub object_type_statuses: Vec<(Uuid, VisibilityStatus)>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prescription_applies() {
        let mut object_type = ObjectType {
            id: Uuid::new_v4(),
            name: "Piscine".to_string(),
            color: "#0000ff".to_string(),
            prescription_duration_years: Some(6),
        };
        assert!(object_type.prescription_applies());

        object_type.prescription_duration_years = Some(0);
        assert!(!object_type.prescription_applies());

        object_type.prescription_duration_years = None;
        assert!(!object_type.prescription_applies());
    }
}
