//! Rattachement d'une détection candidate aux objets déjà connus
//!
//! Deux détections prises sur des fonds différents représentent le même
//! objet physique quand leurs emprises se recouvrent nettement. Le seuil
//! est symétrique : il suffit que l'intersection couvre la moitié de
//! l'une OU de l'autre, ce qui tolère les écarts de re-numérisation.

use geo::Polygon;
use uuid::Uuid;

use crate::context::ResolverContext;
use crate::geometry;
use crate::models::Detection;

/// Seuil de recouvrement : moitié de l'une des deux emprises
const LINKAGE_AREA_RATIO: f64 = 0.5;

/// Une détection existante jugée correspondre à la candidate
#[derive(Debug, Clone)]
pub struct LinkedDetection<'a> {
    /// La détection existante
    pub detection: &'a Detection,

    /// Surface de l'intersection avec la géométrie candidate
    pub intersection_area: f64,
}

/// Détections existantes correspondant à une géométrie candidate
///
/// Parcourt les détections du même type d'objet, hors fonds exclus (en
/// pratique le fond en cours d'import, pour ne pas se rattacher à
/// soi-même), et retient celles dont le recouvrement dépasse le seuil.
/// Restitution triée par surface d'intersection décroissante ; l'élément
/// d'indice 0 est le rattachement de référence.
pub fn find_linked_detections<'a>(
    ctx: &'a ResolverContext,
    candidate: &Polygon<f64>,
    object_type_id: Uuid,
    exclude_tile_set_ids: &[Uuid],
) -> Vec<LinkedDetection<'a>> {
    let candidate_area = geometry::polygon_area(candidate);
    let mut linked = Vec::new();

    for detection in &ctx.detections {
        if exclude_tile_set_ids.contains(&detection.tile_set_id) {
            continue;
        }
        let Some(object) = ctx.detection_objects.get(&detection.object_id) else {
            continue;
        };
        if object.object_type_id != object_type_id {
            continue;
        }

        let intersection_area = geometry::intersection_area(&detection.geometry, candidate);
        if intersection_area <= 0.0 {
            continue;
        }

        let existing_area = geometry::polygon_area(&detection.geometry);
        if intersection_area >= LINKAGE_AREA_RATIO * candidate_area
            || intersection_area >= LINKAGE_AREA_RATIO * existing_area
        {
            linked.push(LinkedDetection {
                detection,
                intersection_area,
            });
        }
    }

    // f64 sans NaN ici, total_cmp donne un ordre reproductible
    linked.sort_by(|a, b| {
        b.intersection_area
            .total_cmp(&a.intersection_area)
            .then(a.detection.id.cmp(&b.detection.id))
    });
    linked
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DetectionData, DetectionObject, DetectionSource};
    use geo::LineString;

    fn square_polygon(x0: f64, y0: f64, size: f64) -> Polygon<f64> {
        Polygon::new(
            LineString::from(vec![
                (x0, y0),
                (x0 + size, y0),
                (x0 + size, y0 + size),
                (x0, y0 + size),
                (x0, y0),
            ]),
            vec![],
        )
    }

    fn add_object(ctx: &mut ResolverContext, object_type_id: Uuid) -> Uuid {
        let id = Uuid::new_v4();
        ctx.detection_objects.insert(
            id,
            DetectionObject {
                id,
                object_type_id,
                address: None,
                comment: None,
                parcel_id: None,
                custom_zone_ids: vec![],
                batch_id: None,
                import_id: None,
            },
        );
        id
    }

    fn add_detection(
        ctx: &mut ResolverContext,
        object_id: Uuid,
        tile_set_id: Uuid,
        geometry: Polygon<f64>,
    ) -> Uuid {
        let id = Uuid::new_v4();
        ctx.detections.push(Detection {
            id,
            object_id,
            tile_set_id,
            geometry,
            score: 0.8,
            source: DetectionSource::Analysis,
            auto_prescribed: false,
            data: DetectionData::default(),
        });
        id
    }

    #[test]
    fn test_small_candidate_inside_large_existing_is_linked() {
        let mut ctx = ResolverContext::new();
        let object_type_id = Uuid::new_v4();
        let object_id = add_object(&mut ctx, object_type_id);
        // grande emprise 10x10, candidate 1x1 entièrement dedans (1% de la grande)
        add_detection(&mut ctx, object_id, Uuid::new_v4(), square_polygon(0.0, 0.0, 10.0));

        let candidate = square_polygon(4.0, 4.0, 1.0);
        let linked = find_linked_detections(&ctx, &candidate, object_type_id, &[]);

        assert_eq!(linked.len(), 1);
        assert!((linked[0].intersection_area - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_large_candidate_over_small_existing_is_linked() {
        let mut ctx = ResolverContext::new();
        let object_type_id = Uuid::new_v4();
        let object_id = add_object(&mut ctx, object_type_id);
        add_detection(&mut ctx, object_id, Uuid::new_v4(), square_polygon(4.0, 4.0, 1.0));

        let candidate = square_polygon(0.0, 0.0, 10.0);
        let linked = find_linked_detections(&ctx, &candidate, object_type_id, &[]);

        assert_eq!(linked.len(), 1);
    }

    #[test]
    fn test_below_threshold_overlap_is_not_linked() {
        let mut ctx = ResolverContext::new();
        let object_type_id = Uuid::new_v4();
        let object_id = add_object(&mut ctx, object_type_id);
        // recouvrement 0.4x1 = 0.4, sous la moitié des deux emprises unitaires
        add_detection(&mut ctx, object_id, Uuid::new_v4(), square_polygon(0.0, 0.0, 1.0));

        let candidate = square_polygon(0.6, 0.0, 1.0);
        let linked = find_linked_detections(&ctx, &candidate, object_type_id, &[]);
        assert!(linked.is_empty());
    }

    #[test]
    fn test_disjoint_geometry_is_not_linked() {
        let mut ctx = ResolverContext::new();
        let object_type_id = Uuid::new_v4();
        let object_id = add_object(&mut ctx, object_type_id);
        add_detection(&mut ctx, object_id, Uuid::new_v4(), square_polygon(0.0, 0.0, 1.0));

        let candidate = square_polygon(5.0, 5.0, 1.0);
        assert!(find_linked_detections(&ctx, &candidate, object_type_id, &[]).is_empty());
    }

    #[test]
    fn test_other_object_type_is_ignored() {
        let mut ctx = ResolverContext::new();
        let pool_type = Uuid::new_v4();
        let shed_type = Uuid::new_v4();
        let object_id = add_object(&mut ctx, shed_type);
        add_detection(&mut ctx, object_id, Uuid::new_v4(), square_polygon(0.0, 0.0, 1.0));

        let candidate = square_polygon(0.0, 0.0, 1.0);
        assert!(find_linked_detections(&ctx, &candidate, pool_type, &[]).is_empty());
    }

    #[test]
    fn test_excluded_tile_set_is_ignored() {
        let mut ctx = ResolverContext::new();
        let object_type_id = Uuid::new_v4();
        let object_id = add_object(&mut ctx, object_type_id);
        let importing = Uuid::new_v4();
        add_detection(&mut ctx, object_id, importing, square_polygon(0.0, 0.0, 1.0));

        let candidate = square_polygon(0.0, 0.0, 1.0);
        assert_eq!(find_linked_detections(&ctx, &candidate, object_type_id, &[]).len(), 1);
        assert!(find_linked_detections(&ctx, &candidate, object_type_id, &[importing]).is_empty());
    }

    #[test]
    fn test_ordering_by_descending_intersection_area() {
        let mut ctx = ResolverContext::new();
        let object_type_id = Uuid::new_v4();
        let object_id = add_object(&mut ctx, object_type_id);
        // recouvrements respectifs avec la candidate [0,2]x[0,2] : 4.0, 2.0, 1.0
        let full = add_detection(&mut ctx, object_id, Uuid::new_v4(), square_polygon(0.0, 0.0, 2.0));
        let half = add_detection(&mut ctx, object_id, Uuid::new_v4(), square_polygon(1.0, 0.0, 2.0));
        let quarter =
            add_detection(&mut ctx, object_id, Uuid::new_v4(), square_polygon(1.0, 1.0, 2.0));

        let candidate = square_polygon(0.0, 0.0, 2.0);
        let linked = find_linked_detections(&ctx, &candidate, object_type_id, &[]);

        let ids: Vec<Uuid> = linked.iter().map(|l| l.detection.id).collect();
        assert_eq!(ids, vec![full, half, quarter]);
    }

    #[test]
    fn test_ordering_is_stable_across_insertion_orders() {
        let object_type_id = Uuid::new_v4();
        let candidate = square_polygon(0.0, 0.0, 2.0);

        // même surface d'intersection pour les deux détections
        let geometry_a = square_polygon(1.0, 0.0, 2.0);
        let geometry_b = square_polygon(0.0, 1.0, 2.0);
        let id_a = Uuid::new_v4();
        let id_b = Uuid::new_v4();

        let mut orders = Vec::new();
        for pair in [[(id_a, &geometry_a), (id_b, &geometry_b)],
                     [(id_b, &geometry_b), (id_a, &geometry_a)]]
        {
            let mut ctx = ResolverContext::new();
            let object_id = add_object(&mut ctx, object_type_id);
            for (id, geometry) in pair {
                ctx.detections.push(Detection {
                    id,
                    object_id,
                    tile_set_id: Uuid::new_v4(),
                    geometry: geometry.clone(),
                    score: 0.8,
                    source: DetectionSource::Analysis,
                    auto_prescribed: false,
                    data: DetectionData::default(),
                });
            }
            let linked = find_linked_detections(&ctx, &candidate, object_type_id, &[]);
            orders.push(linked.iter().map(|l| l.detection.id).collect::<Vec<_>>());
        }

        assert_eq!(orders[0], orders[1]);
    }
}
