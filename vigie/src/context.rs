//! Contexte de résolution : le jeu de données de travail d'une requête
//!
//! Toutes les résolutions (visibilité, droits, liaison, prescription)
//! opèrent sur un [`ResolverContext`] construit une fois par requête ou par
//! lot, puis passé explicitement. Aucun cache global : chaque appelant
//! hydrate le contexte dont il a besoin.

use std::collections::HashMap;

use geo::{MultiPolygon, Point};
use uuid::Uuid;

use crate::error::VigieError;
use crate::geometry;
use crate::models::{
    Detection, DetectionObject, GeoZone, GroupMembership, ObjectType, ObjectTypeCategory, Parcel,
    TileSet, UserGroup,
};

/// Jeu de données de travail d'une résolution
///
/// Les champs sont publics : le contexte est un simple conteneur indexé,
/// rempli par la couche de persistance ou directement par les tests.
#[derive(Debug, Default)]
pub struct ResolverContext {
    /// Zones géographiques par identifiant
    pub zones: HashMap<Uuid, GeoZone>,

    /// Fonds d'imagerie, dans l'ordre d'hydratation
    pub tile_sets: Vec<TileSet>,

    /// Types d'objets par identifiant
    pub object_types: HashMap<Uuid, ObjectType>,

    /// Catégories de types d'objets par identifiant
    pub categories: HashMap<Uuid, ObjectTypeCategory>,

    /// Groupes d'utilisateurs par identifiant
    pub groups: HashMap<Uuid, UserGroup>,

    /// Appartenances utilisateur → groupe
    pub memberships: Vec<GroupMembership>,

    /// Parcelles cadastrales chargées pour la requête
    pub parcels: Vec<Parcel>,

    /// Objets détectés par identifiant
    pub detection_objects: HashMap<Uuid, DetectionObject>,

    /// Détections chargées pour la requête (candidates à la liaison,
    /// détections des objets à recalculer, etc.)
    pub detections: Vec<Detection>,
}

impl ResolverContext {
    /// Crée un contexte vide
    pub fn new() -> Self {
        Self::default()
    }

    /// Zone par identifiant
    pub fn zone(&self, id: Uuid) -> Result<&GeoZone, VigieError> {
        self.zones
            .get(&id)
            .ok_or_else(|| VigieError::not_found("zone", id))
    }

    /// Fond d'imagerie par identifiant
    pub fn tile_set(&self, id: Uuid) -> Result<&TileSet, VigieError> {
        self.tile_sets
            .iter()
            .find(|tile_set| tile_set.id == id)
            .ok_or_else(|| VigieError::not_found("tile set", id))
    }

    /// Type d'objet par identifiant
    pub fn object_type(&self, id: Uuid) -> Result<&ObjectType, VigieError> {
        self.object_types
            .get(&id)
            .ok_or_else(|| VigieError::not_found("object type", id))
    }

    /// Catégorie par identifiant
    pub fn category(&self, id: Uuid) -> Result<&ObjectTypeCategory, VigieError> {
        self.categories
            .get(&id)
            .ok_or_else(|| VigieError::not_found("object type category", id))
    }

    /// Groupe par identifiant
    pub fn group(&self, id: Uuid) -> Result<&UserGroup, VigieError> {
        self.groups
            .get(&id)
            .ok_or_else(|| VigieError::not_found("user group", id))
    }

    /// Objet détecté par identifiant
    pub fn detection_object(&self, id: Uuid) -> Result<&DetectionObject, VigieError> {
        self.detection_objects
            .get(&id)
            .ok_or_else(|| VigieError::not_found("detection object", id))
    }

    /// Détection par identifiant
    pub fn detection(&self, id: Uuid) -> Result<&Detection, VigieError> {
        self.detections
            .iter()
            .find(|detection| detection.id == id)
            .ok_or_else(|| VigieError::not_found("detection", id))
    }

    /// Appartenances d'un utilisateur
    pub fn memberships_of(&self, user_id: Uuid) -> impl Iterator<Item = &GroupMembership> {
        self.memberships
            .iter()
            .filter(move |membership| membership.user_id == user_id)
    }

    /// Détections d'un objet, dans l'ordre d'hydratation
    pub fn detections_of_object(&self, object_id: Uuid) -> Vec<&Detection> {
        self.detections
            .iter()
            .filter(|detection| detection.object_id == object_id)
            .collect()
    }

    /// Union des emprises des zones demandées
    ///
    /// `None` pour une liste vide. Une zone absente du contexte est une
    /// erreur d'hydratation, pas une couverture réduite.
    pub fn zone_union(&self, zone_ids: &[Uuid]) -> Result<Option<MultiPolygon<f64>>, VigieError> {
        if zone_ids.is_empty() {
            return Ok(None);
        }

        let mut geometries = Vec::with_capacity(zone_ids.len());
        for id in zone_ids {
            geometries.push(&self.zone(*id)?.geometry);
        }
        Ok(geometry::union_all(geometries))
    }

    /// Juridiction d'une appartenance : union des zones de son groupe
    pub fn jurisdiction_union(
        &self,
        membership: &GroupMembership,
    ) -> Result<Option<MultiPolygon<f64>>, VigieError> {
        let group = self.group(membership.group_id)?;
        self.zone_union(&group.zone_ids)
    }

    /// Première parcelle contenant le point
    pub fn parcel_containing(&self, point: &Point<f64>) -> Option<&Parcel> {
        self.parcels
            .iter()
            .find(|parcel| geometry::contains_point(&parcel.geometry, point))
    }

    /// Zones personnalisées intersectant la géométrie, triées par nom
    pub fn custom_zones_intersecting(&self, target: &MultiPolygon<f64>) -> Vec<&GeoZone> {
        let mut matches: Vec<&GeoZone> = self
            .zones
            .values()
            .filter(|zone| zone.is_custom() && geometry::intersects(&zone.geometry, target))
            .collect();
        matches.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        matches
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CustomZoneStatus, ZoneKind};
    use geo::{LineString, Polygon};

    fn square(x0: f64, y0: f64, size: f64) -> MultiPolygon<f64> {
        MultiPolygon::new(vec![Polygon::new(
            LineString::from(vec![
                (x0, y0),
                (x0 + size, y0),
                (x0 + size, y0 + size),
                (x0, y0 + size),
                (x0, y0),
            ]),
            vec![],
        )])
    }

    fn zone(name: &str, kind: ZoneKind, geometry: MultiPolygon<f64>) -> GeoZone {
        GeoZone {
            id: Uuid::new_v4(),
            name: name.to_string(),
            kind,
            parent_id: None,
            geometry,
            custom_status: if kind == ZoneKind::Custom {
                Some(CustomZoneStatus::Active)
            } else {
                None
            },
            custom_kind: None,
        }
    }

    #[test]
    fn test_zone_union_empty_is_none() {
        let ctx = ResolverContext::new();
        assert!(ctx.zone_union(&[]).unwrap().is_none());
    }

    #[test]
    fn test_zone_union_unknown_zone_fails() {
        let ctx = ResolverContext::new();
        let missing = Uuid::new_v4();

        let error = ctx.zone_union(&[missing]).unwrap_err();
        assert!(matches!(error, VigieError::NotFound { entity: "zone", .. }));
    }

    #[test]
    fn test_zone_union_merges_geometries() {
        let mut ctx = ResolverContext::new();
        let a = zone("Ouest", ZoneKind::Commune, square(0.0, 0.0, 1.0));
        let b = zone("Est", ZoneKind::Commune, square(2.0, 0.0, 1.0));
        let ids = [a.id, b.id];
        ctx.zones.insert(a.id, a);
        ctx.zones.insert(b.id, b);

        let union = ctx.zone_union(&ids).unwrap().unwrap();
        assert!((geometry::area(&union) - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_custom_zones_intersecting_sorted_by_name() {
        let mut ctx = ResolverContext::new();
        let b = zone("Littoral", ZoneKind::Custom, square(0.0, 0.0, 2.0));
        let a = zone("Camargue", ZoneKind::Custom, square(1.0, 1.0, 2.0));
        let far = zone("Causse", ZoneKind::Custom, square(10.0, 10.0, 1.0));
        let admin = zone("Arles", ZoneKind::Commune, square(0.0, 0.0, 5.0));
        for z in [a, b, far, admin] {
            ctx.zones.insert(z.id, z);
        }

        let names: Vec<&str> = ctx
            .custom_zones_intersecting(&square(0.5, 0.5, 1.0))
            .iter()
            .map(|z| z.name.as_str())
            .collect();
        assert_eq!(names, vec!["Camargue", "Littoral"]);
    }

    #[test]
    fn test_parcel_containing() {
        let mut ctx = ResolverContext::new();
        ctx.parcels.push(Parcel {
            id: Uuid::new_v4(),
            reference: "130040000A0012".to_string(),
            commune_id: None,
            geometry: square(0.0, 0.0, 1.0),
        });

        assert!(ctx.parcel_containing(&Point::new(0.5, 0.5)).is_some());
        assert!(ctx.parcel_containing(&Point::new(3.0, 3.0)).is_none());
    }
}
