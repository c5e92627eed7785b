//! Moteur de prescription : délai légal au-delà duquel une infraction
//! constatée n'est plus poursuivable
//!
//! L'horloge part de la plus ancienne détection de l'objet. Chaque
//! détection dont le fond date d'au moins `prescription_duration_years`
//! années après ce point de départ est marquée prescrite. Le calcul est
//! idempotent : une détection déjà dans l'état cible n'est pas réécrite.

use chrono::{Datelike, Months, NaiveDate};
use geo::Polygon;
use uuid::Uuid;

use crate::context::ResolverContext;
use crate::error::VigieError;
use crate::models::{
    Detection, DetectionControlStatus, DetectionPrescriptionStatus, DetectionSource,
    DetectionValidationStatus, TileSet, TileSetKind,
};

/// Années entières écoulées entre deux dates
///
/// Différence d'années calendaires, moins une si le jour anniversaire
/// n'est pas encore atteint. Suppose `from <= to`.
pub fn whole_years_between(from: NaiveDate, to: NaiveDate) -> u32 {
    let mut years = to.year() - from.year();
    if (to.month(), to.day()) < (from.month(), from.day()) {
        years -= 1;
    }
    years.max(0) as u32
}

/// Date située `years` années avant `date`
///
/// Le 29 février est ramené au 28 lorsque l'année d'arrivée n'est pas
/// bissextile.
pub fn years_before(date: NaiveDate, years: u32) -> NaiveDate {
    date.checked_sub_months(Months::new(years * 12))
        .unwrap_or(NaiveDate::MIN)
}

/// Écritures à appliquer à l'issue d'un calcul de prescription
///
/// Deux listes distinctes car les deux champs vivent dans deux tables,
/// chacune historisée séparément. Seules les lignes dont l'état change
/// y figurent.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PrescriptionPlan {
    /// Nouvelles valeurs de `auto_prescribed`, par détection
    pub flag_updates: Vec<(Uuid, bool)>,

    /// Nouvelles valeurs de statut de prescription, par détection
    pub status_updates: Vec<(Uuid, Option<DetectionPrescriptionStatus>)>,
}

impl PrescriptionPlan {
    /// Vrai si le calcul n'a produit aucune écriture
    pub fn is_empty(&self) -> bool {
        self.flag_updates.is_empty() && self.status_updates.is_empty()
    }

    /// Applique le plan aux détections du contexte en mémoire
    ///
    /// Le pipeline d'import s'en sert pour garder son contexte aligné
    /// avec ce qui vient d'être écrit en base.
    pub fn apply(&self, ctx: &mut ResolverContext) {
        for (detection_id, flag) in &self.flag_updates {
            if let Some(detection) = ctx
                .detections
                .iter_mut()
                .find(|detection| detection.id == *detection_id)
            {
                detection.auto_prescribed = *flag;
            }
        }
        for (detection_id, status) in &self.status_updates {
            if let Some(detection) = ctx
                .detections
                .iter_mut()
                .find(|detection| detection.id == *detection_id)
            {
                detection.data.prescription_status = *status;
            }
        }
    }
}

/// Recalcule l'état de prescription d'un objet
///
/// Si le type d'objet n'est pas soumis à prescription, toute trace d'un
/// calcul antérieur est effacée. Sinon chaque détection est comparée à la
/// plus ancienne de l'objet : hors fenêtre elle est marquée prescrite,
/// dans la fenêtre un marquage automatique antérieur est annulé (cas d'un
/// fond re-daté après coup).
pub fn compute_prescription(
    ctx: &ResolverContext,
    object_id: Uuid,
) -> Result<PrescriptionPlan, VigieError> {
    let object = ctx.detection_object(object_id)?;
    let object_type = ctx.object_type(object.object_type_id)?;
    let detections = ctx.detections_of_object(object_id);

    let mut plan = PrescriptionPlan::default();
    if detections.is_empty() {
        return Ok(plan);
    }

    let Some(duration_years) = object_type
        .prescription_duration_years
        .filter(|years| *years > 0)
    else {
        // la prescription ne s'applique pas : purge des marquages résiduels
        for detection in detections {
            if detection.auto_prescribed || detection.data.prescription_status.is_some() {
                plan.flag_updates.push((detection.id, false));
                plan.status_updates.push((detection.id, None));
            }
        }
        return Ok(plan);
    };

    let mut dated: Vec<(&Detection, NaiveDate)> = Vec::with_capacity(detections.len());
    for detection in detections {
        let tile_set = ctx.tile_set(detection.tile_set_id)?;
        dated.push((detection, tile_set.date));
    }
    dated.sort_by(|a, b| a.1.cmp(&b.1).then(a.0.id.cmp(&b.0.id)));

    let oldest_date = dated[0].1;
    for (detection, date) in dated {
        let elapsed_years = whole_years_between(oldest_date, date);
        if elapsed_years >= duration_years {
            if !detection.auto_prescribed {
                plan.flag_updates.push((detection.id, true));
                plan.status_updates
                    .push((detection.id, Some(DetectionPrescriptionStatus::Prescribed)));
            }
        } else if detection.auto_prescribed {
            plan.flag_updates.push((detection.id, false));
            plan.status_updates
                .push((detection.id, Some(DetectionPrescriptionStatus::NotPrescribed)));
        }
    }

    Ok(plan)
}

/// Détection sœur à créer lors d'une prescription manuelle
///
/// Porte tout ce qu'il faut pour matérialiser la ligne, hors identifiants
/// et auteur que la couche appelante fournit.
#[derive(Debug, Clone)]
pub struct BackfillSibling {
    /// Fond d'imagerie sur lequel créer la sœur
    pub tile_set_id: Uuid,

    /// Géométrie reprise de la détection éditée
    pub geometry: Polygon<f64>,

    /// Score attribué à la sœur
    pub score: f64,

    /// Source reprise de la détection éditée
    pub source: DetectionSource,

    /// Statut de contrôle repris de la détection éditée
    pub control_status: DetectionControlStatus,

    /// Statut de validation repris de la détection éditée
    pub validation_status: DetectionValidationStatus,
}

/// Fonds appelant une détection sœur après prescription manuelle
///
/// Marquer une détection prescrite à la main vaut pour toute la fenêtre
/// de prescription : chaque fond non indicatif daté dans
/// `[date - duration, date)` et sans détection pour cet objet en reçoit
/// une, copie de la détection éditée. Restitution triée par date
/// croissante.
///
/// Échoue en erreur de configuration si le type d'objet n'a pas de durée
/// de prescription : l'appelant n'aurait pas dû déclencher le rattrapage.
pub fn plan_prescription_backfill(
    ctx: &ResolverContext,
    object_id: Uuid,
    edited_detection_id: Uuid,
) -> Result<Vec<BackfillSibling>, VigieError> {
    let object = ctx.detection_object(object_id)?;
    let object_type = ctx.object_type(object.object_type_id)?;

    let Some(duration_years) = object_type
        .prescription_duration_years
        .filter(|years| *years > 0)
    else {
        return Err(VigieError::configuration(format!(
            "object type {} has no prescription duration, cannot backfill",
            object_type.name
        )));
    };

    let detections = ctx.detections_of_object(object_id);
    let Some(edited) = detections
        .iter()
        .find(|detection| detection.id == edited_detection_id)
    else {
        return Err(VigieError::not_found("detection", edited_detection_id));
    };

    let date_max = ctx.tile_set(edited.tile_set_id)?.date;
    let window_start = years_before(date_max, duration_years);
    let covered: Vec<Uuid> = detections
        .iter()
        .map(|detection| detection.tile_set_id)
        .collect();

    let mut candidates: Vec<&TileSet> = ctx
        .tile_sets
        .iter()
        .filter(|tile_set| {
            tile_set.kind != TileSetKind::Indicative
                && !covered.contains(&tile_set.id)
                && tile_set.date >= window_start
                && tile_set.date < date_max
        })
        .collect();
    candidates.sort_by(|a, b| a.date.cmp(&b.date).then(a.id.cmp(&b.id)));

    Ok(candidates
        .into_iter()
        .map(|tile_set| BackfillSibling {
            tile_set_id: tile_set.id,
            geometry: edited.geometry.clone(),
            score: 1.0,
            source: edited.source,
            control_status: edited.data.control_status,
            validation_status: edited.data.validation_status,
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DetectionData, DetectionObject, ObjectType, TileSetStatus};
    use geo::LineString;

    fn date(year: i32, month: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(year, month, day).unwrap()
    }

    fn small_square() -> Polygon<f64> {
        Polygon::new(
            LineString::from(vec![(0.0, 0.0), (1.0, 0.0), (1.0, 1.0), (0.0, 1.0), (0.0, 0.0)]),
            vec![],
        )
    }

    struct Fixture {
        ctx: ResolverContext,
        object_id: Uuid,
    }

    impl Fixture {
        fn new(prescription_duration_years: Option<u32>) -> Self {
            let mut ctx = ResolverContext::new();
            let object_type_id = Uuid::new_v4();
            ctx.object_types.insert(
                object_type_id,
                ObjectType {
                    id: object_type_id,
                    name: "Piscine".to_string(),
                    color: "#0088ff".to_string(),
                    prescription_duration_years,
                },
            );
            let object_id = Uuid::new_v4();
            ctx.detection_objects.insert(
                object_id,
                DetectionObject {
                    id: object_id,
                    object_type_id,
                    address: None,
                    comment: None,
                    parcel_id: None,
                    custom_zone_ids: vec![],
                    batch_id: None,
                    import_id: None,
                },
            );
            Self { ctx, object_id }
        }

        fn add_tile_set(&mut self, kind: TileSetKind, tile_set_date: NaiveDate) -> Uuid {
            let id = Uuid::new_v4();
            self.ctx.tile_sets.push(TileSet {
                id,
                name: format!("Fond {tile_set_date}"),
                status: TileSetStatus::Visible,
                kind,
                date: tile_set_date,
                min_zoom: None,
                max_zoom: None,
                zone_ids: vec![],
                last_import_started_at: None,
                last_import_ended_at: None,
            });
            id
        }

        /// Détection telle que le flux de création la produit pour un
        /// type soumis à prescription : statut normalisé NOT_PRESCRIBED.
        fn add_detection(&mut self, tile_set_id: Uuid) -> Uuid {
            self.add_detection_with(
                tile_set_id,
                false,
                Some(DetectionPrescriptionStatus::NotPrescribed),
            )
        }

        fn add_detection_with(
            &mut self,
            tile_set_id: Uuid,
            auto_prescribed: bool,
            prescription_status: Option<DetectionPrescriptionStatus>,
        ) -> Uuid {
            let id = Uuid::new_v4();
            self.ctx.detections.push(Detection {
                id,
                object_id: self.object_id,
                tile_set_id,
                geometry: small_square(),
                score: 0.9,
                source: DetectionSource::Analysis,
                auto_prescribed,
                data: DetectionData {
                    prescription_status,
                    ..DetectionData::default()
                },
            });
            id
        }

        fn detection(&self, id: Uuid) -> &Detection {
            self.ctx
                .detections
                .iter()
                .find(|detection| detection.id == id)
                .unwrap()
        }
    }

    #[test]
    fn test_whole_years_between() {
        assert_eq!(whole_years_between(date(2018, 1, 1), date(2018, 1, 1)), 0);
        assert_eq!(whole_years_between(date(2018, 1, 1), date(2020, 6, 1)), 2);
        assert_eq!(whole_years_between(date(2018, 1, 1), date(2021, 7, 1)), 3);
        assert_eq!(whole_years_between(date(2018, 1, 1), date(2022, 1, 1)), 4);
        // le jour anniversaire n'est pas atteint
        assert_eq!(whole_years_between(date(2018, 6, 15), date(2019, 6, 14)), 0);
        assert_eq!(whole_years_between(date(2018, 6, 15), date(2019, 6, 15)), 1);
        // 29 février
        assert_eq!(whole_years_between(date(2020, 2, 29), date(2021, 2, 28)), 0);
        assert_eq!(whole_years_between(date(2020, 2, 29), date(2021, 3, 1)), 1);
    }

    #[test]
    fn test_years_before() {
        assert_eq!(years_before(date(2022, 3, 15), 3), date(2019, 3, 15));
        assert_eq!(years_before(date(2020, 2, 29), 1), date(2019, 2, 28));
        assert_eq!(years_before(date(2022, 1, 1), 0), date(2022, 1, 1));
    }

    #[test]
    fn test_window_arithmetic_six_years() {
        let mut fixture = Fixture::new(Some(6));
        let base = date(2014, 1, 1);
        let mut ids = Vec::new();
        for offset in [0, 3, 6, 7] {
            let tile_set =
                fixture.add_tile_set(TileSetKind::Partial, date(2014 + offset, 1, 1));
            ids.push(fixture.add_detection(tile_set));
        }
        assert_eq!(whole_years_between(base, date(2020, 1, 1)), 6);

        let plan = compute_prescription(&fixture.ctx, fixture.object_id).unwrap();

        // seules les détections à 6 et 7 ans sortent de la fenêtre
        assert_eq!(plan.flag_updates, vec![(ids[2], true), (ids[3], true)]);
        assert_eq!(
            plan.status_updates,
            vec![
                (ids[2], Some(DetectionPrescriptionStatus::Prescribed)),
                (ids[3], Some(DetectionPrescriptionStatus::Prescribed)),
            ]
        );
    }

    #[test]
    fn test_pool_three_year_scenario() {
        let mut fixture = Fixture::new(Some(3));
        let dates = [
            date(2018, 1, 1),
            date(2020, 6, 1),
            date(2021, 7, 1),
            date(2022, 1, 1),
        ];
        let mut ids = Vec::new();
        for tile_set_date in dates {
            let tile_set = fixture.add_tile_set(TileSetKind::Partial, tile_set_date);
            ids.push(fixture.add_detection(tile_set));
        }

        let plan = compute_prescription(&fixture.ctx, fixture.object_id).unwrap();
        plan.apply(&mut fixture.ctx);

        assert!(!fixture.detection(ids[0]).auto_prescribed);
        assert!(!fixture.detection(ids[1]).auto_prescribed);
        assert!(fixture.detection(ids[2]).auto_prescribed);
        assert!(fixture.detection(ids[3]).auto_prescribed);
        assert_eq!(
            fixture.detection(ids[1]).data.prescription_status,
            Some(DetectionPrescriptionStatus::NotPrescribed)
        );
        assert_eq!(
            fixture.detection(ids[2]).data.prescription_status,
            Some(DetectionPrescriptionStatus::Prescribed)
        );
    }

    #[test]
    fn test_recompute_is_idempotent() {
        let mut fixture = Fixture::new(Some(3));
        for tile_set_date in [date(2018, 1, 1), date(2022, 1, 1)] {
            let tile_set = fixture.add_tile_set(TileSetKind::Partial, tile_set_date);
            fixture.add_detection(tile_set);
        }

        let first = compute_prescription(&fixture.ctx, fixture.object_id).unwrap();
        assert!(!first.is_empty());
        first.apply(&mut fixture.ctx);

        let second = compute_prescription(&fixture.ctx, fixture.object_id).unwrap();
        assert!(second.is_empty());
    }

    #[test]
    fn test_redated_tile_set_unflags_detection() {
        let mut fixture = Fixture::new(Some(6));
        let old = fixture.add_tile_set(TileSetKind::Partial, date(2018, 1, 1));
        let recent = fixture.add_tile_set(TileSetKind::Partial, date(2020, 1, 1));
        fixture.add_detection(old);
        // marquée prescrite par un calcul antérieur, désormais dans la fenêtre
        let flagged = fixture.add_detection_with(
            recent,
            true,
            Some(DetectionPrescriptionStatus::Prescribed),
        );

        let plan = compute_prescription(&fixture.ctx, fixture.object_id).unwrap();
        assert_eq!(plan.flag_updates, vec![(flagged, false)]);
        assert_eq!(
            plan.status_updates,
            vec![(flagged, Some(DetectionPrescriptionStatus::NotPrescribed))]
        );
    }

    #[test]
    fn test_no_duration_resets_residual_flags() {
        let mut fixture = Fixture::new(None);
        let tile_set = fixture.add_tile_set(TileSetKind::Partial, date(2020, 1, 1));
        let flagged = fixture.add_detection_with(
            tile_set,
            true,
            Some(DetectionPrescriptionStatus::Prescribed),
        );
        let with_status = fixture.add_detection_with(
            tile_set,
            false,
            Some(DetectionPrescriptionStatus::NotPrescribed),
        );
        let clean = fixture.add_detection_with(tile_set, false, None);

        let plan = compute_prescription(&fixture.ctx, fixture.object_id).unwrap();

        let flagged_ids: Vec<Uuid> = plan.flag_updates.iter().map(|(id, _)| *id).collect();
        assert!(flagged_ids.contains(&flagged));
        assert!(flagged_ids.contains(&with_status));
        assert!(!flagged_ids.contains(&clean));
        assert!(plan
            .status_updates
            .iter()
            .all(|(_, status)| status.is_none()));
    }

    #[test]
    fn test_zero_duration_behaves_like_no_duration() {
        let mut fixture = Fixture::new(Some(0));
        let tile_set = fixture.add_tile_set(TileSetKind::Partial, date(2014, 1, 1));
        fixture.add_detection_with(tile_set, true, Some(DetectionPrescriptionStatus::Prescribed));

        let plan = compute_prescription(&fixture.ctx, fixture.object_id).unwrap();
        assert_eq!(plan.flag_updates.len(), 1);
        assert!(!plan.flag_updates[0].1);
    }

    #[test]
    fn test_object_without_detections_yields_empty_plan() {
        let fixture = Fixture::new(Some(3));
        let plan = compute_prescription(&fixture.ctx, fixture.object_id).unwrap();
        assert!(plan.is_empty());
    }

    #[test]
    fn test_backfill_requires_duration() {
        let mut fixture = Fixture::new(None);
        let tile_set = fixture.add_tile_set(TileSetKind::Partial, date(2020, 1, 1));
        let detection = fixture.add_detection(tile_set);

        let error =
            plan_prescription_backfill(&fixture.ctx, fixture.object_id, detection).unwrap_err();
        assert!(matches!(error, VigieError::Configuration(_)));
    }

    #[test]
    fn test_backfill_window_and_filters() {
        let mut fixture = Fixture::new(Some(3));
        // fond édité daté 2022-01-01, fenêtre [2019-01-01, 2022-01-01)
        let edited_tile_set = fixture.add_tile_set(TileSetKind::Partial, date(2022, 1, 1));
        let in_window_a = fixture.add_tile_set(TileSetKind::Partial, date(2019, 6, 1));
        let in_window_b = fixture.add_tile_set(TileSetKind::Background, date(2021, 1, 1));
        // écartés : trop ancien, indicatif, déjà couvert, à la borne haute
        fixture.add_tile_set(TileSetKind::Partial, date(2018, 12, 31));
        fixture.add_tile_set(TileSetKind::Indicative, date(2020, 1, 1));
        let covered = fixture.add_tile_set(TileSetKind::Partial, date(2020, 6, 1));
        fixture.add_tile_set(TileSetKind::Partial, date(2022, 1, 1));

        let edited = fixture.add_detection(edited_tile_set);
        fixture.add_detection(covered);

        let siblings =
            plan_prescription_backfill(&fixture.ctx, fixture.object_id, edited).unwrap();

        let tile_sets: Vec<Uuid> = siblings.iter().map(|s| s.tile_set_id).collect();
        assert_eq!(tile_sets, vec![in_window_a, in_window_b]);
        assert!(siblings.iter().all(|s| s.score == 1.0));
        assert!(siblings
            .iter()
            .all(|s| s.source == DetectionSource::Analysis));
    }

    #[test]
    fn test_backfill_copies_edited_statuses() {
        let mut fixture = Fixture::new(Some(3));
        let edited_tile_set = fixture.add_tile_set(TileSetKind::Partial, date(2022, 1, 1));
        fixture.add_tile_set(TileSetKind::Partial, date(2020, 1, 1));

        let edited = fixture.add_detection(edited_tile_set);
        if let Some(detection) = fixture
            .ctx
            .detections
            .iter_mut()
            .find(|detection| detection.id == edited)
        {
            detection.data.control_status = DetectionControlStatus::Verbalized;
            detection.data.validation_status = DetectionValidationStatus::Legitimate;
        }

        let siblings =
            plan_prescription_backfill(&fixture.ctx, fixture.object_id, edited).unwrap();
        assert_eq!(siblings.len(), 1);
        assert_eq!(siblings[0].control_status, DetectionControlStatus::Verbalized);
        assert_eq!(
            siblings[0].validation_status,
            DetectionValidationStatus::Legitimate
        );
    }
}
