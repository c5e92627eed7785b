//! Écritures en masse vers PostGIS
//!
//! Toutes les écritures mutantes insèrent leurs lignes d'historique dans la
//! même transaction que la mutation : une mutation visible sans historique
//! n'existe pas.
//!
//! Les géométries partent en EWKB (WKB + SRID 4326) via `ST_GeomFromEWKB`,
//! le paramètre transite donc en BYTEA.

use anyhow::{bail, Context, Result};
use deadpool_postgres::{Pool, Transaction};
use serde_json::json;
use tokio_postgres::types::ToSql;
use tracing::{debug, info};
use uuid::Uuid;
use wkb::geom_to_wkb;

use vigie::models::{Detection, DetectionObject};
use vigie::prescription::PrescriptionPlan;

const SRID_WGS84: u32 = 4326;
/// Flag EWKB signalant la présence d'un SRID dans l'en-tête
const EWKB_SRID_FLAG: u32 = 0x2000_0000;
/// Lignes par INSERT multi-valeurs, pour rester loin de la limite de
/// paramètres du protocole
const INSERT_CHUNK_ROWS: usize = 500;

/// Lot d'écritures préparé par le pipeline d'import
#[derive(Debug, Default)]
pub struct DetectionBatch {
    /// Nouveaux objets à insérer, liens de zones personnalisées compris
    pub objects: Vec<DetectionObject>,
    /// Détections à insérer, sur objet nouveau ou existant
    pub detections: Vec<Detection>,
    /// Adresses à renseigner sur des objets existants qui n'en ont pas
    pub address_updates: Vec<(Uuid, String)>,
}

impl DetectionBatch {
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty() && self.detections.is_empty() && self.address_updates.is_empty()
    }

    pub fn len(&self) -> usize {
        self.detections.len()
    }
}

/// Compteurs d'un lot écrit
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchCounts {
    pub objects: usize,
    pub detections: usize,
    pub addresses: usize,
}

/// Insère un lot complet en une seule transaction
///
/// Ordre d'insertion : objets, liens de zones personnalisées, données de
/// détection, détections, historique de création, adresses.
pub async fn insert_detection_batch(pool: &Pool, batch: &DetectionBatch) -> Result<BatchCounts> {
    if batch.is_empty() {
        return Ok(BatchCounts::default());
    }

    let mut client = pool.get().await?;
    let tx = client
        .transaction()
        .await
        .context("Failed to begin transaction")?;

    insert_objects(&tx, &batch.objects).await?;
    insert_detections(&tx, &batch.detections).await?;
    update_object_addresses(&tx, &batch.address_updates).await?;

    tx.commit()
        .await
        .context("Failed to commit detection batch")?;

    debug!(
        objects = batch.objects.len(),
        detections = batch.detections.len(),
        addresses = batch.address_updates.len(),
        "Detection batch committed"
    );
    Ok(BatchCounts {
        objects: batch.objects.len(),
        detections: batch.detections.len(),
        addresses: batch.address_updates.len(),
    })
}

async fn insert_objects(tx: &Transaction<'_>, objects: &[DetectionObject]) -> Result<()> {
    for chunk in objects.chunks(INSERT_CHUNK_ROWS) {
        let sql = format!(
            "INSERT INTO detection_object \
             (id, object_type_id, address, comment, parcel_id, batch_id, import_id) \
             VALUES {}",
            placeholder_rows(chunk.len(), 7, None)
        );

        let mut values: Vec<Box<dyn ToSql + Sync>> = Vec::with_capacity(chunk.len() * 7);
        for object in chunk {
            values.push(Box::new(object.id));
            values.push(Box::new(object.object_type_id));
            values.push(Box::new(object.address.clone()));
            values.push(Box::new(object.comment.clone()));
            values.push(Box::new(object.parcel_id));
            values.push(Box::new(object.batch_id.clone()));
            values.push(Box::new(object.import_id));
        }
        execute_boxed(tx, &sql, &values)
            .await
            .context("Failed to insert detection objects")?;
    }

    let links: Vec<(Uuid, Uuid)> = objects
        .iter()
        .flat_map(|o| o.custom_zone_ids.iter().map(|z| (o.id, *z)))
        .collect();
    if !links.is_empty() {
        let object_ids: Vec<Uuid> = links.iter().map(|(o, _)| *o).collect();
        let zone_ids: Vec<Uuid> = links.iter().map(|(_, z)| *z).collect();
        tx.execute(
            "INSERT INTO detection_object_custom_zone (detection_object_id, zone_id) \
             SELECT * FROM UNNEST($1::uuid[], $2::uuid[]) \
             ON CONFLICT DO NOTHING",
            &[&object_ids, &zone_ids],
        )
        .await
        .context("Failed to insert custom zone links")?;
    }
    Ok(())
}

async fn insert_detections(tx: &Transaction<'_>, detections: &[Detection]) -> Result<()> {
    if detections.is_empty() {
        return Ok(());
    }

    // une ligne detection_data par détection, identifiants générés ici
    let data_ids: Vec<Uuid> = detections.iter().map(|_| Uuid::new_v4()).collect();

    for (chunk, id_chunk) in detections
        .chunks(INSERT_CHUNK_ROWS)
        .zip(data_ids.chunks(INSERT_CHUNK_ROWS))
    {
        let sql = format!(
            "INSERT INTO detection_data \
             (id, control_status, validation_status, prescription_status) \
             VALUES {}",
            placeholder_rows(chunk.len(), 4, None)
        );
        let mut values: Vec<Box<dyn ToSql + Sync>> = Vec::with_capacity(chunk.len() * 4);
        for (detection, data_id) in chunk.iter().zip(id_chunk) {
            values.push(Box::new(*data_id));
            values.push(Box::new(detection.data.control_status.as_str()));
            values.push(Box::new(detection.data.validation_status.as_str()));
            values.push(Box::new(
                detection.data.prescription_status.map(|s| s.as_str()),
            ));
        }
        execute_boxed(tx, &sql, &values)
            .await
            .context("Failed to insert detection data")?;

        let sql = format!(
            "INSERT INTO detection \
             (id, object_id, tile_set_id, detection_data_id, geometry, score, source, auto_prescribed) \
             VALUES {}",
            placeholder_rows(chunk.len(), 8, Some(4))
        );
        let mut values: Vec<Box<dyn ToSql + Sync>> = Vec::with_capacity(chunk.len() * 8);
        for (detection, data_id) in chunk.iter().zip(id_chunk) {
            let ewkb = polygon_to_ewkb(&detection.geometry)
                .with_context(|| format!("Invalid geometry for detection {}", detection.id))?;
            values.push(Box::new(detection.id));
            values.push(Box::new(detection.object_id));
            values.push(Box::new(detection.tile_set_id));
            values.push(Box::new(*data_id));
            values.push(Box::new(ewkb));
            values.push(Box::new(detection.score));
            values.push(Box::new(detection.source.as_str()));
            values.push(Box::new(detection.auto_prescribed));
        }
        execute_boxed(tx, &sql, &values)
            .await
            .context("Failed to insert detections")?;
    }

    insert_creation_history(tx, detections, &data_ids).await
}

/// Historique de création : une ligne par détection et par donnée de
/// détection
async fn insert_creation_history(
    tx: &Transaction<'_>,
    detections: &[Detection],
    data_ids: &[Uuid],
) -> Result<()> {
    let detection_ids: Vec<Uuid> = detections.iter().map(|d| d.id).collect();
    let detection_changes: Vec<serde_json::Value> = detections
        .iter()
        .map(|d| {
            json!({
                "created": true,
                "object_id": d.object_id,
                "tile_set_id": d.tile_set_id,
                "score": d.score,
                "source": d.source.as_str(),
            })
        })
        .collect();
    tx.execute(
        "INSERT INTO detection_history (detection_id, changes) \
         SELECT * FROM UNNEST($1::uuid[], $2::jsonb[])",
        &[&detection_ids, &detection_changes],
    )
    .await
    .context("Failed to record detection creation history")?;

    let data_changes: Vec<serde_json::Value> = detections
        .iter()
        .map(|d| {
            json!({
                "created": true,
                "control_status": d.data.control_status.as_str(),
                "validation_status": d.data.validation_status.as_str(),
                "prescription_status": d.data.prescription_status.map(|s| s.as_str()),
            })
        })
        .collect();
    tx.execute(
        "INSERT INTO detection_data_history (detection_data_id, changes) \
         SELECT * FROM UNNEST($1::uuid[], $2::jsonb[])",
        &[&data_ids, &data_changes],
    )
    .await
    .context("Failed to record detection data creation history")?;
    Ok(())
}

async fn update_object_addresses(
    tx: &Transaction<'_>,
    updates: &[(Uuid, String)],
) -> Result<()> {
    if updates.is_empty() {
        return Ok(());
    }
    let ids: Vec<Uuid> = updates.iter().map(|(id, _)| *id).collect();
    let addresses: Vec<String> = updates.iter().map(|(_, a)| a.clone()).collect();
    // seuls les objets encore sans adresse sont touchés
    tx.execute(
        "UPDATE detection_object o \
         SET address = v.address, updated_at = NOW() \
         FROM UNNEST($1::uuid[], $2::text[]) AS v(id, address) \
         WHERE o.id = v.id AND (o.address IS NULL OR o.address = '')",
        &[&ids, &addresses],
    )
    .await
    .context("Failed to fill object addresses")?;
    Ok(())
}

/// Applique un plan de prescription : marquages `auto_prescribed` sur les
/// détections, statuts sur les données de détection, historique compris
///
/// Retourne (marquages écrits, statuts écrits).
pub async fn apply_prescription_plan(
    pool: &Pool,
    plan: &PrescriptionPlan,
) -> Result<(u64, u64)> {
    if plan.is_empty() {
        return Ok((0, 0));
    }

    let mut client = pool.get().await?;
    let tx = client
        .transaction()
        .await
        .context("Failed to begin transaction")?;

    let mut flags_updated = 0u64;
    if !plan.flag_updates.is_empty() {
        let ids: Vec<Uuid> = plan.flag_updates.iter().map(|(id, _)| *id).collect();
        let flags: Vec<bool> = plan.flag_updates.iter().map(|(_, flag)| *flag).collect();
        let rows = tx
            .query(
                "UPDATE detection d \
                 SET auto_prescribed = v.flag, updated_at = NOW() \
                 FROM UNNEST($1::uuid[], $2::bool[]) AS v(id, flag) \
                 WHERE d.id = v.id \
                 RETURNING d.id, d.auto_prescribed",
                &[&ids, &flags],
            )
            .await
            .context("Failed to update auto_prescribed flags")?;
        flags_updated = rows.len() as u64;

        let history_ids: Vec<Uuid> = rows.iter().map(|r| r.get(0)).collect();
        let history_changes: Vec<serde_json::Value> = rows
            .iter()
            .map(|r| json!({ "auto_prescribed": r.get::<_, bool>(1) }))
            .collect();
        tx.execute(
            "INSERT INTO detection_history (detection_id, changes) \
             SELECT * FROM UNNEST($1::uuid[], $2::jsonb[])",
            &[&history_ids, &history_changes],
        )
        .await
        .context("Failed to record prescription flag history")?;
    }

    let mut statuses_updated = 0u64;
    if !plan.status_updates.is_empty() {
        let ids: Vec<Uuid> = plan.status_updates.iter().map(|(id, _)| *id).collect();
        let statuses: Vec<Option<&str>> = plan
            .status_updates
            .iter()
            .map(|(_, status)| status.map(|s| s.as_str()))
            .collect();
        // le plan est indexé par détection, la table par donnée de détection
        let rows = tx
            .query(
                "UPDATE detection_data dd \
                 SET prescription_status = v.status, updated_at = NOW() \
                 FROM UNNEST($1::uuid[], $2::text[]) AS v(id, status) \
                 JOIN detection d ON d.id = v.id \
                 WHERE dd.id = d.detection_data_id \
                 RETURNING dd.id, dd.prescription_status",
                &[&ids, &statuses],
            )
            .await
            .context("Failed to update prescription statuses")?;
        statuses_updated = rows.len() as u64;

        let history_ids: Vec<Uuid> = rows.iter().map(|r| r.get(0)).collect();
        let history_changes: Vec<serde_json::Value> = rows
            .iter()
            .map(|r| json!({ "prescription_status": r.get::<_, Option<String>>(1) }))
            .collect();
        tx.execute(
            "INSERT INTO detection_data_history (detection_data_id, changes) \
             SELECT * FROM UNNEST($1::uuid[], $2::jsonb[])",
            &[&history_ids, &history_changes],
        )
        .await
        .context("Failed to record prescription status history")?;
    }

    tx.commit()
        .await
        .context("Failed to commit prescription plan")?;

    info!(
        flags = flags_updated,
        statuses = statuses_updated,
        "Prescription plan applied"
    );
    Ok((flags_updated, statuses_updated))
}

/// Resynchronise les liens objets détectés / zones personnalisées
///
/// Un lien existe quand au moins une détection de l'objet intersecte la
/// zone. `zone_ids` à `None` couvre toutes les zones personnalisées.
/// Retourne (liens ajoutés, liens supprimés).
pub async fn sync_custom_zone_links(
    pool: &Pool,
    zone_ids: Option<&[Uuid]>,
) -> Result<(u64, u64)> {
    let mut client = pool.get().await?;
    let tx = client
        .transaction()
        .await
        .context("Failed to begin transaction")?;

    let removed = tx
        .execute(
            "DELETE FROM detection_object_custom_zone l \
             USING geo_zone z \
             WHERE z.id = l.zone_id \
               AND ($1::uuid[] IS NULL OR l.zone_id = ANY($1)) \
               AND NOT EXISTS ( \
                   SELECT 1 FROM detection d \
                   WHERE d.object_id = l.detection_object_id \
                     AND ST_Intersects(d.geometry, z.geometry) \
               )",
            &[&zone_ids],
        )
        .await
        .context("Failed to remove stale custom zone links")?;

    let added = tx
        .execute(
            "INSERT INTO detection_object_custom_zone (detection_object_id, zone_id) \
             SELECT DISTINCT d.object_id, z.id \
             FROM geo_zone z \
             JOIN detection d ON ST_Intersects(d.geometry, z.geometry) \
             WHERE z.kind = 'CUSTOM' \
               AND ($1::uuid[] IS NULL OR z.id = ANY($1)) \
             ON CONFLICT DO NOTHING",
            &[&zone_ids],
        )
        .await
        .context("Failed to add custom zone links")?;

    tx.commit()
        .await
        .context("Failed to commit custom zone sync")?;

    info!(added, removed, "Custom zone links synchronized");
    Ok((added, removed))
}

/// Marque le début d'un import sur un fond d'imagerie
pub async fn mark_import_started(pool: &Pool, tile_set_id: Uuid) -> Result<()> {
    let client = pool.get().await?;
    let updated = client
        .execute(
            "UPDATE tile_set SET last_import_started_at = NOW(), updated_at = NOW() \
             WHERE id = $1",
            &[&tile_set_id],
        )
        .await
        .context("Failed to mark import start")?;
    if updated == 0 {
        bail!("Tile set {} not found", tile_set_id);
    }
    Ok(())
}

/// Marque la fin d'un import ; n'est pas appelé si l'import échoue, un
/// `last_import_ended_at` nul signale alors un import interrompu
pub async fn mark_import_ended(pool: &Pool, tile_set_id: Uuid) -> Result<()> {
    let client = pool.get().await?;
    let updated = client
        .execute(
            "UPDATE tile_set SET last_import_ended_at = NOW(), updated_at = NOW() \
             WHERE id = $1",
            &[&tile_set_id],
        )
        .await
        .context("Failed to mark import end")?;
    if updated == 0 {
        bail!("Tile set {} not found", tile_set_id);
    }
    Ok(())
}

async fn execute_boxed(
    tx: &Transaction<'_>,
    sql: &str,
    values: &[Box<dyn ToSql + Sync>],
) -> Result<u64> {
    let params: Vec<&(dyn ToSql + Sync)> = values.iter().map(|v| v.as_ref()).collect();
    Ok(tx.execute(sql, &params).await?)
}

/// Construit les groupes de placeholders d'un INSERT multi-lignes
///
/// `geometry_column` donne l'indice de la colonne à passer par
/// `ST_GeomFromEWKB`.
fn placeholder_rows(rows: usize, columns: usize, geometry_column: Option<usize>) -> String {
    let mut sql = String::new();
    for row in 0..rows {
        if row > 0 {
            sql.push_str(", ");
        }
        sql.push('(');
        for column in 0..columns {
            if column > 0 {
                sql.push_str(", ");
            }
            let index = row * columns + column + 1;
            if geometry_column == Some(column) {
                sql.push_str(&format!("ST_GeomFromEWKB(${})", index));
            } else {
                sql.push_str(&format!("${}", index));
            }
        }
        sql.push(')');
    }
    sql
}

fn polygon_to_ewkb(polygon: &geo::Polygon<f64>) -> Result<Vec<u8>> {
    geometry_to_ewkb(&geo::Geometry::Polygon(polygon.clone()))
}

/// Convertit une géométrie en EWKB avec SRID 4326
fn geometry_to_ewkb(geometry: &geo::Geometry<f64>) -> Result<Vec<u8>> {
    let wkb = geom_to_wkb(geometry)
        .map_err(|e| anyhow::anyhow!("Failed to convert geometry to WKB: {:?}", e))?;
    if wkb.len() < 5 {
        bail!("WKB header too short ({} bytes)", wkb.len());
    }

    // en-tête WKB : 1 octet d'ordre, 4 octets de type ; l'EWKB ajoute le
    // SRID après le type quand le flag est posé
    let mut ewkb = Vec::with_capacity(wkb.len() + 4);
    ewkb.push(wkb[0]);

    let type_bytes = [wkb[1], wkb[2], wkb[3], wkb[4]];
    if wkb[0] == 1 {
        let geom_type = u32::from_le_bytes(type_bytes) | EWKB_SRID_FLAG;
        ewkb.extend_from_slice(&geom_type.to_le_bytes());
        ewkb.extend_from_slice(&SRID_WGS84.to_le_bytes());
    } else {
        let geom_type = u32::from_be_bytes(type_bytes) | EWKB_SRID_FLAG;
        ewkb.extend_from_slice(&geom_type.to_be_bytes());
        ewkb.extend_from_slice(&SRID_WGS84.to_be_bytes());
    }
    ewkb.extend_from_slice(&wkb[5..]);

    Ok(ewkb)
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::{LineString, Polygon};

    fn square(size: f64) -> Polygon<f64> {
        Polygon::new(
            LineString::from(vec![
                (0.0, 0.0),
                (size, 0.0),
                (size, size),
                (0.0, size),
                (0.0, 0.0),
            ]),
            vec![],
        )
    }

    #[test]
    fn test_placeholder_rows_layout() {
        assert_eq!(
            placeholder_rows(2, 3, None),
            "($1, $2, $3), ($4, $5, $6)"
        );
    }

    #[test]
    fn test_placeholder_rows_wraps_geometry_column() {
        let sql = placeholder_rows(2, 4, Some(2));
        assert_eq!(
            sql,
            "($1, $2, ST_GeomFromEWKB($3), $4), ($5, $6, ST_GeomFromEWKB($7), $8)"
        );
    }

    #[test]
    fn test_ewkb_header_carries_srid() {
        let ewkb = polygon_to_ewkb(&square(1.0)).unwrap();

        // ordre little-endian
        assert_eq!(ewkb[0], 1);
        let geom_type = u32::from_le_bytes([ewkb[1], ewkb[2], ewkb[3], ewkb[4]]);
        assert_ne!(geom_type & EWKB_SRID_FLAG, 0);
        let srid = u32::from_le_bytes([ewkb[5], ewkb[6], ewkb[7], ewkb[8]]);
        assert_eq!(srid, 4326);
    }

    #[test]
    fn test_ewkb_is_four_bytes_longer_than_wkb() {
        let polygon = square(2.0);
        let wkb = geom_to_wkb(&geo::Geometry::Polygon(polygon.clone())).unwrap();
        let ewkb = polygon_to_ewkb(&polygon).unwrap();
        assert_eq!(ewkb.len(), wkb.len() + 4);
    }

    #[test]
    fn test_empty_batch() {
        let batch = DetectionBatch::default();
        assert!(batch.is_empty());
        assert_eq!(batch.len(), 0);
    }
}
