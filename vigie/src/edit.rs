//! Création et mise à jour interactives des détections
//!
//! Les fonctions de ce module ne modifient rien : elles vérifient les
//! droits, appliquent les règles métier et rendent un plan d'écriture
//! que la couche de persistance matérialise. Après matérialisation,
//! l'appelant relance le calcul de prescription sur l'objet touché.

use geo::Polygon;
use uuid::Uuid;

use crate::access;
use crate::context::ResolverContext;
use crate::error::VigieError;
use crate::geometry;
use crate::linkage;
use crate::models::{
    Detection, DetectionControlStatus, DetectionData, DetectionObject,
    DetectionPrescriptionStatus, DetectionSource, DetectionValidationStatus, GroupRight, User,
};
use crate::prescription::{self, BackfillSibling};

/// Champs modifiables d'une fiche de détection
///
/// `None` laisse le champ inchangé. Pour le statut de prescription,
/// `Some(None)` le remet explicitement à nul.
#[derive(Debug, Clone, Default)]
pub struct DetectionDataPatch {
    /// Nouveau statut de contrôle
    pub control_status: Option<DetectionControlStatus>,

    /// Nouveau statut de validation
    pub validation_status: Option<DetectionValidationStatus>,

    /// Nouveau statut de prescription
    pub prescription_status: Option<Option<DetectionPrescriptionStatus>>,
}

/// Résultat d'une mise à jour de fiche : la nouvelle fiche et les
/// détections sœurs à créer si la prescription vient d'être posée à la main
#[derive(Debug, Clone)]
pub struct DetectionDataUpdate {
    /// Détection concernée
    pub detection_id: Uuid,

    /// Objet propriétaire, sur lequel relancer la prescription
    pub object_id: Uuid,

    /// Fiche après application des règles
    pub new_data: DetectionData,

    /// Détections sœurs à matérialiser, triées par date de fond croissante
    pub backfill: Vec<BackfillSibling>,
}

/// Mise à jour de la fiche d'une détection par un utilisateur
///
/// Exige le droit d'écriture au centroïde de la détection. Un statut de
/// validation restant à DETECTED_NOT_VERIFIED après application du patch
/// passe à SUSPECT : une édition vaut relecture humaine. Si le patch pose
/// PRESCRIBED sur une détection qui ne l'était pas, les sœurs de la
/// fenêtre de prescription sont planifiées (voir
/// [`prescription::plan_prescription_backfill`]).
pub fn plan_detection_data_update(
    ctx: &ResolverContext,
    user: &User,
    detection_id: Uuid,
    patch: &DetectionDataPatch,
) -> Result<DetectionDataUpdate, VigieError> {
    let detection = ctx.detection(detection_id)?;

    let centroid = geometry::polygon_centroid(&detection.geometry).ok_or_else(|| {
        VigieError::invalid_geometry(detection_id.to_string(), "polygon has no centroid")
    })?;
    access::require_right(ctx, user, &centroid, GroupRight::Write)?;

    let newly_prescribed = patch.prescription_status
        == Some(Some(DetectionPrescriptionStatus::Prescribed))
        && detection.data.prescription_status != Some(DetectionPrescriptionStatus::Prescribed);
    let backfill = if newly_prescribed {
        prescription::plan_prescription_backfill(ctx, detection.object_id, detection_id)?
    } else {
        Vec::new()
    };

    let mut new_data = detection.data.clone();
    if let Some(control_status) = patch.control_status {
        new_data.control_status = control_status;
    }
    if let Some(validation_status) = patch.validation_status {
        new_data.validation_status = validation_status;
    }
    if let Some(prescription_status) = patch.prescription_status {
        new_data.prescription_status = prescription_status;
    }
    if new_data.validation_status == DetectionValidationStatus::DetectedNotVerified {
        new_data.validation_status = DetectionValidationStatus::Suspect;
    }
    new_data.last_updated_by = Some(user.id);

    Ok(DetectionDataUpdate {
        detection_id,
        object_id: detection.object_id,
        new_data,
        backfill,
    })
}

/// Objet à rattacher : existant (rattachement ou recouvrement) ou à créer
#[derive(Debug, Clone)]
pub enum PlannedObject {
    /// Rattachement à un objet déjà en base
    Existing(Uuid),

    /// Objet entièrement construit, à insérer
    New(DetectionObject),
}

/// Détection prête à insérer, avec son objet
#[derive(Debug, Clone)]
pub struct DetectionCreationPlan {
    /// La détection à insérer
    pub detection: Detection,

    /// L'objet porteur
    pub object: PlannedObject,
}

impl DetectionCreationPlan {
    /// Identifiant de l'objet porteur, créé ou rattaché
    pub fn object_id(&self) -> Uuid {
        match &self.object {
            PlannedObject::Existing(id) => *id,
            PlannedObject::New(object) => object.id,
        }
    }
}

/// Description d'un objet à créer si aucun rattachement n'aboutit
#[derive(Debug, Clone)]
pub struct NewObjectInput {
    /// Type d'objet de la détection
    pub object_type_id: Uuid,

    /// Adresse saisie
    pub address: Option<String>,

    /// Commentaire libre
    pub comment: Option<String>,
}

/// Statuts initiaux fournis à la création
#[derive(Debug, Clone, Default)]
pub struct DetectionDataInput {
    /// Statut de contrôle initial
    pub control_status: Option<DetectionControlStatus>,

    /// Statut de validation initial
    pub validation_status: Option<DetectionValidationStatus>,

    /// Statut de prescription initial
    pub prescription_status: Option<DetectionPrescriptionStatus>,
}

/// Saisie d'une nouvelle détection
#[derive(Debug, Clone)]
pub struct DetectionInput {
    /// Emprise dessinée
    pub geometry: Polygon<f64>,

    /// Fond d'imagerie sur lequel la détection est faite
    pub tile_set_id: Uuid,

    /// Rattachement explicite à un objet existant
    pub attach_to_object: Option<Uuid>,

    /// Objet à créer sinon ; le rattachement par recouvrement est tenté
    /// d'abord
    pub new_object: Option<NewObjectInput>,

    /// Statuts initiaux ; à défaut NOT_CONTROLLED / SUSPECT
    pub data: Option<DetectionDataInput>,
}

/// Création d'une détection dessinée dans l'interface
///
/// Exige le droit d'écriture au centroïde. L'objet porteur est, dans
/// l'ordre : celui désigné explicitement, celui de la détection la plus
/// recouvrante du même type sur un autre fond, ou un objet neuf portant
/// la parcelle du centroïde et les zones personnalisées intersectées.
/// Le statut de prescription est normalisé selon le type de l'objet
/// porteur : nul il devient NOT_PRESCRIBED si le type a une durée,
/// renseigné il est effacé si le type n'en a pas.
pub fn plan_detection_creation(
    ctx: &ResolverContext,
    user: &User,
    input: DetectionInput,
) -> Result<DetectionCreationPlan, VigieError> {
    let DetectionInput {
        geometry,
        tile_set_id,
        attach_to_object,
        new_object,
        data,
    } = input;

    let centroid = geometry::polygon_centroid(&geometry).ok_or_else(|| {
        VigieError::invalid_geometry("new detection", "polygon has no centroid")
    })?;
    access::require_right(ctx, user, &centroid, GroupRight::Write)?;

    let tile_set = ctx.tile_set(tile_set_id)?;

    let (object, object_type_id) = match (attach_to_object, new_object) {
        (Some(existing_id), _) => {
            let existing = ctx.detection_object(existing_id)?;
            (PlannedObject::Existing(existing_id), existing.object_type_id)
        }
        (None, Some(new_object)) => {
            let object_type = ctx.object_type(new_object.object_type_id)?;
            let linked =
                linkage::find_linked_detections(ctx, &geometry, object_type.id, &[tile_set.id]);
            match linked.first() {
                Some(best) => (
                    PlannedObject::Existing(best.detection.object_id),
                    object_type.id,
                ),
                None => {
                    let object = DetectionObject {
                        id: Uuid::new_v4(),
                        object_type_id: object_type.id,
                        address: new_object.address,
                        comment: new_object.comment,
                        parcel_id: ctx.parcel_containing(&centroid).map(|parcel| parcel.id),
                        custom_zone_ids: ctx
                            .custom_zones_intersecting(&geometry::to_multi(&geometry))
                            .iter()
                            .map(|zone| zone.id)
                            .collect(),
                        batch_id: None,
                        import_id: None,
                    };
                    (PlannedObject::New(object), object_type.id)
                }
            }
        }
        (None, None) => {
            return Err(VigieError::invalid_value("detection_object", "missing"));
        }
    };

    let mut detection_data = match data {
        Some(data) => DetectionData {
            control_status: data
                .control_status
                .unwrap_or(DetectionControlStatus::NotControlled),
            validation_status: data
                .validation_status
                .unwrap_or(DetectionValidationStatus::DetectedNotVerified),
            prescription_status: data.prescription_status,
            last_updated_by: None,
        },
        None => DetectionData {
            control_status: DetectionControlStatus::NotControlled,
            validation_status: DetectionValidationStatus::Suspect,
            prescription_status: None,
            last_updated_by: None,
        },
    };

    let prescription_applies = ctx.object_type(object_type_id)?.prescription_applies();
    if detection_data.prescription_status.is_none() && prescription_applies {
        detection_data.prescription_status = Some(DetectionPrescriptionStatus::NotPrescribed);
    }
    if detection_data.prescription_status.is_some() && !prescription_applies {
        detection_data.prescription_status = None;
    }
    detection_data.last_updated_by = Some(user.id);

    let detection = Detection {
        id: Uuid::new_v4(),
        object_id: match &object {
            PlannedObject::Existing(id) => *id,
            PlannedObject::New(new) => new.id,
        },
        tile_set_id: tile_set.id,
        geometry,
        score: 1.0,
        source: DetectionSource::InterfaceDrawn,
        auto_prescribed: false,
        data: detection_data,
    };

    Ok(DetectionCreationPlan { detection, object })
}
