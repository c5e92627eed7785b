//! Import de détections depuis un fichier CSV
//!
//! Fichier délimité par `;` avec ligne d'en-tête. Colonnes attendues :
//! `id`, `score`, `address`, `object_type`, `detection_control_status`,
//! `detection_validation_status`, `detection_prescription_status`,
//! `detection_source`, `geometry` (GeoJSON, EPSG:4326). L'ordre des
//! colonnes est libre, la correspondance se fait par nom.
//!
//! Chaque ligne est rattachée à un objet existant si sa géométrie recouvre
//! suffisamment une détection d'un autre fond d'imagerie, sinon un nouvel
//! objet est créé avec sa parcelle et ses zones personnalisées. Les
//! écritures partent par lots, historique compris, puis la prescription des
//! objets touchés est recalculée après chaque lot.
//!
//! Les détections d'un même fichier ne se rattachent jamais entre elles :
//! le rattachement exclut le fond en cours d'import. Un import interrompu
//! laisse les lots déjà écrits en base et `last_import_ended_at` nul sur le
//! fond. Un seul import à la fois par fond.

use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::time::Instant;

use anyhow::{bail, Context, Result};
use deadpool_postgres::Pool;
use geo::Polygon;
use geojson::GeoJson;
use tracing::{debug, info};
use uuid::Uuid;

use vigie::edit::PlannedObject;
use vigie::linkage;
use vigie::models::{
    Detection, DetectionControlStatus, DetectionData, DetectionObject,
    DetectionPrescriptionStatus, DetectionSource, DetectionValidationStatus, ObjectType, TileSet,
};
use vigie::prescription::{compute_prescription, PrescriptionPlan};
use vigie::{geometry, normalize_name, ResolverContext};

use crate::report::ImportReport;
use crate::store::{load, write};

/// Colonnes sans lesquelles aucune ligne n'est exploitable
const REQUIRED_COLUMNS: &[&str] = &["id", "score", "object_type", "geometry"];
/// Période de log de progression, en lignes
const PROGRESS_EVERY: usize = 10_000;

/// Paramètres d'un import de détections
#[derive(Debug, Clone)]
pub struct ImportOptions {
    /// Fond d'imagerie cible
    pub tile_set_id: Uuid,
    /// Identifiant de lot apposé sur les objets créés
    pub batch_id: Option<String>,
    /// Nombre de lignes par lot d'écriture
    pub batch_size: usize,
}

/// Importe un fichier CSV de détections dans un fond d'imagerie
pub async fn import_detections_file(
    pool: &Pool,
    path: &Path,
    options: &ImportOptions,
) -> Result<ImportReport> {
    let started = Instant::now();

    // Référentiel complet, puis parcelles couvrant l'emprise du fond
    let mut ctx = load::load_core_context(pool).await?;
    let tile_set = ctx.tile_set(options.tile_set_id)?.clone();
    let zone_filter: Option<Vec<Uuid>> = if tile_set.zone_ids.is_empty() {
        None
    } else {
        Some(tile_set.zone_ids.clone())
    };
    let parcels = load::load_parcels_for_zones(pool, &mut ctx, zone_filter.as_deref()).await?;
    info!(
        tile_set = %tile_set.name,
        parcels,
        "Import context loaded"
    );

    let file =
        File::open(path).with_context(|| format!("Cannot open {}", path.display()))?;
    let mut reader = BufReader::new(file);

    let mut header_line = String::new();
    let header_bytes = reader
        .read_line(&mut header_line)
        .context("Failed to read header")?;
    if header_bytes == 0 {
        bail!("Empty file: {}", path.display());
    }
    let header_fields = split_csv_line(header_line.trim_end_matches(['\r', '\n']))
        .context("Unreadable header")?;
    let columns = ColumnMap::from_header(&header_fields)?;

    let mut report = ImportReport::new(&path.display().to_string(), &tile_set.name);
    let mut batch = write::DetectionBatch::default();
    // objets touchés par le lot en cours, pour le recalcul de prescription
    let mut pending_objects: HashSet<Uuid> = HashSet::new();
    // types dont les candidats au rattachement sont déjà en contexte
    let mut loaded_types: HashSet<Uuid> = HashSet::new();
    let mut aborted = false;

    write::mark_import_started(pool, tile_set.id).await?;

    // l'en-tête est la ligne 1
    let mut line_number = 1usize;
    for line in reader.lines() {
        line_number += 1;
        let line = line.with_context(|| format!("Failed to read line {}", line_number))?;
        if line.trim().is_empty() {
            continue;
        }
        report.record_row();
        if report.rows_read % PROGRESS_EVERY == 0 {
            info!(rows = report.rows_read, "Import progress");
        }

        let fields = match split_csv_line(&line) {
            Ok(fields) => fields,
            Err(e) => {
                report.record_skip(line_number, None, &format!("unreadable line: {}", e));
                continue;
            }
        };
        let import_id: Option<i64> = columns.get(&fields, "id").and_then(|s| s.parse().ok());

        // géométrie ou type d'objet manquant, type inconnu : l'import
        // s'arrête, le fichier ne correspond pas au référentiel
        let Some(geometry_raw) = columns.get(&fields, "geometry") else {
            report.record_fatal(line_number, import_id, "missing geometry");
            aborted = true;
            break;
        };
        let Some(type_raw) = columns.get(&fields, "object_type") else {
            report.record_fatal(line_number, import_id, "missing object type");
            aborted = true;
            break;
        };
        let Some(object_type) = match_object_type(&ctx, type_raw) else {
            report.record_fatal(
                line_number,
                import_id,
                &format!("unknown object type '{}'", type_raw),
            );
            aborted = true;
            break;
        };
        let object_type = object_type.clone();

        if loaded_types.insert(object_type.id) {
            let loaded =
                load::load_detections_for_object_types(pool, &mut ctx, &[object_type.id]).await?;
            debug!(
                object_type = %object_type.name,
                detections = loaded,
                "Loaded linkage candidates"
            );
        }

        let row = match parse_row(&columns, &fields, line_number, geometry_raw) {
            Ok(row) => row,
            Err(e) => {
                report.record_skip_for_type(
                    line_number,
                    import_id,
                    &object_type.name,
                    &format!("{:#}", e),
                );
                continue;
            }
        };
        if row.prescription_status.is_some() && !object_type.prescription_applies() {
            report.record_warning(
                line_number,
                Some(row.import_id),
                "prescription status ignored: object type has no prescription duration",
            );
        }

        let planned = match plan_row(&ctx, &tile_set, &object_type, &row, options.batch_id.as_deref())
        {
            Ok(planned) => planned,
            Err(e) => {
                report.record_skip_for_type(
                    line_number,
                    Some(row.import_id),
                    &object_type.name,
                    &format!("{:#}", e),
                );
                continue;
            }
        };

        // la ligne devient visible au contexte avant la suite du fichier
        match planned.object {
            PlannedObject::New(object) => {
                pending_objects.insert(object.id);
                ctx.detection_objects.insert(object.id, object.clone());
                batch.objects.push(object);
                report.record_created(&object_type.name);
            }
            PlannedObject::Existing(object_id) => {
                pending_objects.insert(object_id);
                report.record_linked(&object_type.name);
            }
        }
        if let Some((object_id, address)) = planned.fill_address {
            if let Some(object) = ctx.detection_objects.get_mut(&object_id) {
                object.address = Some(address.clone());
            }
            batch.address_updates.push((object_id, address));
            report.record_address_filled();
        }
        ctx.detections.push(planned.detection.clone());
        batch.detections.push(planned.detection);

        if batch.len() >= options.batch_size {
            flush_batch(pool, &mut ctx, &mut batch, &mut pending_objects, &mut report).await?;
        }
    }

    // dernier lot, y compris les lignes en attente d'un import interrompu
    flush_batch(pool, &mut ctx, &mut batch, &mut pending_objects, &mut report).await?;
    if !aborted {
        write::mark_import_ended(pool, tile_set.id).await?;
    }

    report.set_duration(started.elapsed());
    report.finalize();
    info!(
        rows = report.rows_read,
        created = report.detections_created,
        linked = report.detections_linked,
        skipped = report.rows_skipped,
        "Import finished"
    );
    Ok(report)
}

/// Écrit le lot courant puis recalcule la prescription des objets touchés
async fn flush_batch(
    pool: &Pool,
    ctx: &mut ResolverContext,
    batch: &mut write::DetectionBatch,
    pending_objects: &mut HashSet<Uuid>,
    report: &mut ImportReport,
) -> Result<()> {
    if batch.is_empty() && pending_objects.is_empty() {
        return Ok(());
    }

    let taken = std::mem::take(batch);
    let counts = write::insert_detection_batch(pool, &taken).await?;
    debug!(
        objects = counts.objects,
        detections = counts.detections,
        "Batch flushed"
    );

    let mut merged = PrescriptionPlan::default();
    for object_id in pending_objects.drain() {
        let plan = compute_prescription(ctx, object_id)?;
        merged.flag_updates.extend(plan.flag_updates);
        merged.status_updates.extend(plan.status_updates);
    }
    if !merged.is_empty() {
        let (flags, statuses) = write::apply_prescription_plan(pool, &merged).await?;
        report.record_prescriptions(flags as usize, statuses as usize);
        // le contexte suit ce qui vient d'être écrit
        merged.apply(ctx);
    }
    Ok(())
}

/// Ligne d'import décodée
#[derive(Debug)]
struct CsvRow {
    line: usize,
    import_id: i64,
    score: f64,
    address: Option<String>,
    control_status: Option<DetectionControlStatus>,
    validation_status: Option<DetectionValidationStatus>,
    prescription_status: Option<DetectionPrescriptionStatus>,
    source: DetectionSource,
    geometry: Polygon<f64>,
}

/// Décision de rattachement pour une ligne valide
#[derive(Debug)]
struct PlannedRow {
    object: PlannedObject,
    detection: Detection,
    /// Adresse à renseigner sur un objet existant qui n'en a pas
    fill_address: Option<(Uuid, String)>,
}

/// Décide du sort d'une ligne : rattachement à un objet existant ou
/// création d'un nouvel objet
///
/// Au rattachement, les statuts de contrôle et de validation absents de la
/// ligne sont hérités de la détection recouvrante de référence. Le statut
/// de prescription est normalisé contre le type d'objet dans tous les cas.
fn plan_row(
    ctx: &ResolverContext,
    tile_set: &TileSet,
    object_type: &ObjectType,
    row: &CsvRow,
    batch_id: Option<&str>,
) -> Result<PlannedRow> {
    let centroid = geometry::polygon_centroid(&row.geometry)
        .with_context(|| format!("detection at line {} has no centroid", row.line))?;

    let linked =
        linkage::find_linked_detections(ctx, &row.geometry, object_type.id, &[tile_set.id]);

    let (object, object_id, control, validation, fill_address) =
        if let Some(best) = linked.first() {
            let object_id = best.detection.object_id;
            let control = row
                .control_status
                .unwrap_or(best.detection.data.control_status);
            let validation = row
                .validation_status
                .unwrap_or(best.detection.data.validation_status);
            let existing_address = ctx.detection_object(object_id)?.address.as_deref();
            let fill_address = match (&row.address, existing_address) {
                (Some(address), None) => Some((object_id, address.clone())),
                (Some(address), Some("")) => Some((object_id, address.clone())),
                _ => None,
            };
            (
                PlannedObject::Existing(object_id),
                object_id,
                control,
                validation,
                fill_address,
            )
        } else {
            let footprint = geometry::to_multi(&row.geometry);
            let object = DetectionObject {
                id: Uuid::new_v4(),
                object_type_id: object_type.id,
                address: row.address.clone(),
                comment: None,
                parcel_id: ctx.parcel_containing(&centroid).map(|p| p.id),
                custom_zone_ids: ctx
                    .custom_zones_intersecting(&footprint)
                    .iter()
                    .map(|z| z.id)
                    .collect(),
                batch_id: batch_id.map(str::to_string),
                import_id: Some(row.import_id),
            };
            let object_id = object.id;
            (
                PlannedObject::New(object),
                object_id,
                row.control_status
                    .unwrap_or(DetectionControlStatus::NotControlled),
                row.validation_status
                    .unwrap_or(DetectionValidationStatus::DetectedNotVerified),
                None,
            )
        };

    let prescription_status = if object_type.prescription_applies() {
        Some(
            row.prescription_status
                .unwrap_or(DetectionPrescriptionStatus::NotPrescribed),
        )
    } else {
        None
    };

    let detection = Detection {
        id: Uuid::new_v4(),
        object_id,
        tile_set_id: tile_set.id,
        geometry: row.geometry.clone(),
        score: row.score,
        source: row.source,
        auto_prescribed: false,
        data: DetectionData {
            control_status: control,
            validation_status: validation,
            prescription_status,
            last_updated_by: None,
        },
    };

    Ok(PlannedRow {
        object,
        detection,
        fill_address,
    })
}

/// Retrouve un type d'objet par nom normalisé, casse et accents ignorés
fn match_object_type<'a>(ctx: &'a ResolverContext, raw: &str) -> Option<&'a ObjectType> {
    let wanted = normalize_name(raw);
    ctx.object_types
        .values()
        .find(|t| normalize_name(&t.name) == wanted)
}

fn parse_row(
    columns: &ColumnMap,
    fields: &[String],
    line: usize,
    geometry_raw: &str,
) -> Result<CsvRow> {
    let import_id: i64 = columns
        .get(fields, "id")
        .context("missing id")?
        .parse()
        .context("invalid id")?;
    let score: f64 = columns
        .get(fields, "score")
        .context("missing score")?
        .parse()
        .context("invalid score")?;
    if !(0.0..=1.0).contains(&score) {
        bail!("score {} out of range 0..=1", score);
    }
    let geometry = polygon_from_geojson(geometry_raw)?;
    let control_status: Option<DetectionControlStatus> = columns
        .get(fields, "detection_control_status")
        .map(str::parse)
        .transpose()?;
    let validation_status: Option<DetectionValidationStatus> = columns
        .get(fields, "detection_validation_status")
        .map(str::parse)
        .transpose()?;
    let prescription_status: Option<DetectionPrescriptionStatus> = columns
        .get(fields, "detection_prescription_status")
        .map(str::parse)
        .transpose()?;
    let source: DetectionSource = columns
        .get(fields, "detection_source")
        .map(str::parse)
        .transpose()?
        .unwrap_or(DetectionSource::Analysis);
    let address = columns.get(fields, "address").map(str::to_string);

    Ok(CsvRow {
        line,
        import_id,
        score,
        address,
        control_status,
        validation_status,
        prescription_status,
        source,
        geometry,
    })
}

/// Décode une géométrie GeoJSON en polygone
///
/// Un MultiPolygon à une seule partie est accepté.
fn polygon_from_geojson(raw: &str) -> Result<Polygon<f64>> {
    let geojson: GeoJson = raw.parse().context("invalid GeoJSON geometry")?;
    let geometry = match geojson {
        GeoJson::Geometry(geometry) => geo::Geometry::<f64>::try_from(geometry)
            .map_err(|e| anyhow::anyhow!("unsupported GeoJSON geometry: {}", e))?,
        _ => bail!("expected a bare GeoJSON geometry"),
    };
    match geometry {
        geo::Geometry::Polygon(polygon) => Ok(polygon),
        geo::Geometry::MultiPolygon(multi) => {
            let mut polygons = multi.0;
            if polygons.len() == 1 {
                Ok(polygons.remove(0))
            } else {
                bail!(
                    "expected a single polygon, got a {}-part multipolygon",
                    polygons.len()
                )
            }
        }
        _ => bail!("expected a polygon geometry"),
    }
}

/// Correspondance nom de colonne vers indice, d'après la ligne d'en-tête
struct ColumnMap {
    indexes: HashMap<String, usize>,
}

impl ColumnMap {
    fn from_header(fields: &[String]) -> Result<Self> {
        let mut indexes = HashMap::new();
        for (i, name) in fields.iter().enumerate() {
            indexes.insert(name.trim().to_string(), i);
        }
        for required in REQUIRED_COLUMNS {
            if !indexes.contains_key(*required) {
                bail!("Missing required column '{}' in header", required);
            }
        }
        Ok(Self { indexes })
    }

    /// Valeur d'une colonne, `None` si absente ou vide
    fn get<'a>(&self, fields: &'a [String], name: &str) -> Option<&'a str> {
        self.indexes
            .get(name)
            .and_then(|&i| fields.get(i))
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
    }
}

/// Découpe une ligne CSV : délimiteur `;`, guillemets `"`, échappement `""`
fn split_csv_line(line: &str) -> Result<Vec<String>> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut chars = line.chars().peekable();
    let mut in_quotes = false;

    while let Some(c) = chars.next() {
        if in_quotes {
            if c == '"' {
                if chars.peek() == Some(&'"') {
                    chars.next();
                    current.push('"');
                } else {
                    in_quotes = false;
                }
            } else {
                current.push(c);
            }
        } else {
            match c {
                '"' => in_quotes = true,
                ';' => fields.push(std::mem::take(&mut current)),
                _ => current.push(c),
            }
        }
    }
    if in_quotes {
        bail!("unterminated quote");
    }
    fields.push(current);
    Ok(fields)
}
