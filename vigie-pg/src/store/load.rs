//! Hydratation du contexte de résolution depuis PostGIS
//!
//! Les géométries sont lues en WKB (`ST_AsBinary`) puis décodées avec
//! geozero. Le référentiel (zones, fonds, types, groupes) se charge en une
//! passe ; les détections se chargent ensuite par type d'objet ou par liste
//! d'objets selon le besoin de l'appelant.

use std::collections::{BTreeSet, HashMap};

use anyhow::{bail, Context, Result};
use deadpool_postgres::Pool;
use geo::{Geometry, MultiPolygon, Polygon};
use geozero::wkb::Wkb;
use geozero::ToGeo;
use tokio_postgres::Row;
use uuid::Uuid;

use vigie::models::{
    CustomZoneKind, CustomZoneStatus, Detection, DetectionData, DetectionObject, GeoZone,
    GroupMembership, GroupRight, ObjectType, ObjectTypeCategory, Parcel, TileSet, TileSetKind,
    TileSetStatus, UserGroup, VisibilityStatus, ZoneKind,
};
use vigie::ResolverContext;

const DETECTION_SELECT: &str = "\
    SELECT d.id, d.object_id, d.tile_set_id, ST_AsBinary(d.geometry) AS geometry, \
           d.score, d.source, d.auto_prescribed, \
           dd.control_status, dd.validation_status, dd.prescription_status, dd.last_updated_by \
    FROM detection d \
    JOIN detection_data dd ON dd.id = d.detection_data_id";

/// Charge le référentiel complet : zones, fonds d'imagerie, types d'objets,
/// catégories, groupes et appartenances
///
/// Les détections et parcelles ne sont pas chargées ici : voir
/// [`load_detections_for_object_types`], [`load_detections_for_objects`] et
/// [`load_parcels_for_zones`].
pub async fn load_core_context(pool: &Pool) -> Result<ResolverContext> {
    let (zones, tile_sets, object_types, categories, groups, memberships) = futures::try_join!(
        load_zones(pool),
        load_tile_sets(pool),
        load_object_types(pool),
        load_categories(pool),
        load_groups(pool),
        load_memberships(pool),
    )?;

    let mut ctx = ResolverContext::new();
    ctx.zones = zones;
    ctx.tile_sets = tile_sets;
    ctx.object_types = object_types;
    ctx.categories = categories;
    ctx.groups = groups;
    ctx.memberships = memberships;
    Ok(ctx)
}

async fn load_zones(pool: &Pool) -> Result<HashMap<Uuid, GeoZone>> {
    let client = pool.get().await?;
    let rows = client
        .query(
            "SELECT id, name, kind, parent_id, ST_AsBinary(geometry) AS geometry, \
             custom_status, custom_kind FROM geo_zone",
            &[],
        )
        .await
        .context("Failed to load zones")?;

    let mut zones = HashMap::with_capacity(rows.len());
    for row in &rows {
        let zone = zone_from_row(row)?;
        zones.insert(zone.id, zone);
    }
    Ok(zones)
}

fn zone_from_row(row: &Row) -> Result<GeoZone> {
    let id: Uuid = row.get("id");
    let kind: String = row.get("kind");
    let wkb: Vec<u8> = row.get("geometry");
    let custom_status: Option<String> = row.get("custom_status");
    let custom_kind: Option<String> = row.get("custom_kind");

    Ok(GeoZone {
        id,
        name: row.get("name"),
        kind: kind.parse::<ZoneKind>()?,
        parent_id: row.get("parent_id"),
        geometry: multipolygon_from_wkb(&wkb, &format!("zone {}", id))?,
        custom_status: custom_status
            .map(|s| s.parse::<CustomZoneStatus>())
            .transpose()?,
        custom_kind: custom_kind.map(|s| s.parse::<CustomZoneKind>()).transpose()?,
    })
}

async fn load_tile_sets(pool: &Pool) -> Result<Vec<TileSet>> {
    let client = pool.get().await?;
    let rows = client
        .query(
            "SELECT id, name, status, kind, date, min_zoom, max_zoom, \
             last_import_started_at, last_import_ended_at FROM tile_set ORDER BY date",
            &[],
        )
        .await
        .context("Failed to load tile sets")?;
    let link_rows = client
        .query("SELECT tile_set_id, zone_id FROM tile_set_zone", &[])
        .await
        .context("Failed to load tile set zones")?;

    let mut zone_ids: HashMap<Uuid, Vec<Uuid>> = HashMap::new();
    for row in &link_rows {
        zone_ids
            .entry(row.get("tile_set_id"))
            .or_default()
            .push(row.get("zone_id"));
    }

    rows.iter()
        .map(|row| {
            let id: Uuid = row.get("id");
            let status: String = row.get("status");
            let kind: String = row.get("kind");
            Ok(TileSet {
                id,
                name: row.get("name"),
                status: status.parse::<TileSetStatus>()?,
                kind: kind.parse::<TileSetKind>()?,
                date: row.get("date"),
                min_zoom: row.get("min_zoom"),
                max_zoom: row.get("max_zoom"),
                zone_ids: zone_ids.remove(&id).unwrap_or_default(),
                last_import_started_at: row.get("last_import_started_at"),
                last_import_ended_at: row.get("last_import_ended_at"),
            })
        })
        .collect()
}

async fn load_object_types(pool: &Pool) -> Result<HashMap<Uuid, ObjectType>> {
    let client = pool.get().await?;
    let rows = client
        .query(
            "SELECT id, name, color, prescription_duration_years FROM object_type",
            &[],
        )
        .await
        .context("Failed to load object types")?;

    let mut object_types = HashMap::with_capacity(rows.len());
    for row in &rows {
        let id: Uuid = row.get("id");
        let years: Option<i32> = row.get("prescription_duration_years");
        object_types.insert(
            id,
            ObjectType {
                id,
                name: row.get("name"),
                color: row.get("color"),
                // une durée négative n'a pas de sens : traitée comme absente
                prescription_duration_years: years.and_then(|y| u32::try_from(y).ok()),
            },
        );
    }
    Ok(object_types)
}

async fn load_categories(pool: &Pool) -> Result<HashMap<Uuid, ObjectTypeCategory>> {
    let client = pool.get().await?;
    let rows = client
        .query("SELECT id, name FROM object_type_category", &[])
        .await
        .context("Failed to load object type categories")?;
    let pair_rows = client
        .query(
            "SELECT category_id, object_type_id, visibility FROM object_type_category_object_type",
            &[],
        )
        .await
        .context("Failed to load category object types")?;

    let mut pairs: HashMap<Uuid, Vec<(Uuid, VisibilityStatus)>> = HashMap::new();
    for row in &pair_rows {
        let visibility: String = row.get("visibility");
        pairs
            .entry(row.get("category_id"))
            .or_default()
            .push((row.get("object_type_id"), visibility.parse()?));
    }

    let mut categories = HashMap::with_capacity(rows.len());
    for row in &rows {
        let id: Uuid = row.get("id");
        categories.insert(
            id,
            ObjectTypeCategory {
                id,
                name: row.get("name"),
                object_type_statuses: pairs.remove(&id).unwrap_or_default(),
            },
        );
    }
    Ok(categories)
}

async fn load_groups(pool: &Pool) -> Result<HashMap<Uuid, UserGroup>> {
    let client = pool.get().await?;
    let rows = client
        .query("SELECT id, name FROM user_group", &[])
        .await
        .context("Failed to load user groups")?;
    // la nature de la zone décide du rattachement : juridiction ou zone
    // personnalisée
    let zone_rows = client
        .query(
            "SELECT g.group_id, g.zone_id, z.kind FROM user_group_zone g \
             JOIN geo_zone z ON z.id = g.zone_id",
            &[],
        )
        .await
        .context("Failed to load user group zones")?;
    let category_rows = client
        .query("SELECT group_id, category_id FROM user_group_category", &[])
        .await
        .context("Failed to load user group categories")?;

    let mut zone_ids: HashMap<Uuid, Vec<Uuid>> = HashMap::new();
    let mut custom_zone_ids: HashMap<Uuid, Vec<Uuid>> = HashMap::new();
    for row in &zone_rows {
        let kind: String = row.get("kind");
        let target = if kind.parse::<ZoneKind>()? == ZoneKind::Custom {
            &mut custom_zone_ids
        } else {
            &mut zone_ids
        };
        target
            .entry(row.get("group_id"))
            .or_default()
            .push(row.get("zone_id"));
    }

    let mut category_ids: HashMap<Uuid, Vec<Uuid>> = HashMap::new();
    for row in &category_rows {
        category_ids
            .entry(row.get("group_id"))
            .or_default()
            .push(row.get("category_id"));
    }

    let mut groups = HashMap::with_capacity(rows.len());
    for row in &rows {
        let id: Uuid = row.get("id");
        groups.insert(
            id,
            UserGroup {
                id,
                name: row.get("name"),
                zone_ids: zone_ids.remove(&id).unwrap_or_default(),
                custom_zone_ids: custom_zone_ids.remove(&id).unwrap_or_default(),
                category_ids: category_ids.remove(&id).unwrap_or_default(),
            },
        );
    }
    Ok(groups)
}

async fn load_memberships(pool: &Pool) -> Result<Vec<GroupMembership>> {
    let client = pool.get().await?;
    let rows = client
        .query("SELECT user_id, group_id, rights FROM user_user_group", &[])
        .await
        .context("Failed to load group memberships")?;

    rows.iter()
        .map(|row| {
            let rights: Vec<String> = row.get("rights");
            let rights = rights
                .iter()
                .map(|r| r.parse::<GroupRight>())
                .collect::<Result<BTreeSet<_>, _>>()?;
            Ok(GroupMembership {
                user_id: row.get("user_id"),
                group_id: row.get("group_id"),
                rights,
            })
        })
        .collect()
}

/// Charge les parcelles couvrant l'emprise des zones données
///
/// `None` signifie une couverture globale : toutes les parcelles.
pub async fn load_parcels_for_zones(
    pool: &Pool,
    ctx: &mut ResolverContext,
    zone_ids: Option<&[Uuid]>,
) -> Result<usize> {
    let client = pool.get().await?;
    let rows = client
        .query(
            "SELECT p.id, p.reference, p.commune_id, ST_AsBinary(p.geometry) AS geometry \
             FROM parcel p \
             WHERE $1::uuid[] IS NULL OR EXISTS ( \
                 SELECT 1 FROM geo_zone z \
                 WHERE z.id = ANY($1) AND ST_Intersects(p.geometry, z.geometry) \
             )",
            &[&zone_ids],
        )
        .await
        .context("Failed to load parcels")?;

    for row in &rows {
        let id: Uuid = row.get("id");
        let wkb: Vec<u8> = row.get("geometry");
        ctx.parcels.push(Parcel {
            id,
            reference: row.get("reference"),
            commune_id: row.get("commune_id"),
            geometry: multipolygon_from_wkb(&wkb, &format!("parcel {}", id))?,
        });
    }
    Ok(rows.len())
}

/// Charge dans le contexte les détections (et leurs objets) des types donnés
///
/// Sert de réservoir de candidats au rattachement : toutes les détections de
/// tous les objets de ces types, quel que soit le fond d'imagerie.
pub async fn load_detections_for_object_types(
    pool: &Pool,
    ctx: &mut ResolverContext,
    object_type_ids: &[Uuid],
) -> Result<usize> {
    let client = pool.get().await?;
    let rows = client
        .query(
            "SELECT id FROM detection_object WHERE object_type_id = ANY($1)",
            &[&object_type_ids],
        )
        .await
        .context("Failed to list detection objects")?;
    let object_ids: Vec<Uuid> = rows.iter().map(|row| row.get("id")).collect();
    fetch_objects_and_detections(&client, ctx, &object_ids).await
}

/// Charge dans le contexte les détections (et leurs objets) d'une liste
/// d'objets
pub async fn load_detections_for_objects(
    pool: &Pool,
    ctx: &mut ResolverContext,
    object_ids: &[Uuid],
) -> Result<usize> {
    let client = pool.get().await?;
    fetch_objects_and_detections(&client, ctx, object_ids).await
}

/// Identifiants des objets d'un type, paginés par identifiant croissant
///
/// `after` reprend la pagination après le dernier identifiant de la page
/// précédente.
pub async fn load_object_page(
    pool: &Pool,
    object_type_id: Uuid,
    after: Option<Uuid>,
    limit: i64,
) -> Result<Vec<Uuid>> {
    let client = pool.get().await?;
    let rows = client
        .query(
            "SELECT id FROM detection_object \
             WHERE object_type_id = $1 AND ($2::uuid IS NULL OR id > $2) \
             ORDER BY id LIMIT $3",
            &[&object_type_id, &after, &limit],
        )
        .await
        .context("Failed to page detection objects")?;
    Ok(rows.iter().map(|row| row.get("id")).collect())
}

async fn fetch_objects_and_detections(
    client: &deadpool_postgres::Object,
    ctx: &mut ResolverContext,
    object_ids: &[Uuid],
) -> Result<usize> {
    if object_ids.is_empty() {
        return Ok(0);
    }

    let object_rows = client
        .query(
            "SELECT id, object_type_id, address, comment, parcel_id, batch_id, import_id \
             FROM detection_object WHERE id = ANY($1)",
            &[&object_ids],
        )
        .await
        .context("Failed to load detection objects")?;
    let zone_rows = client
        .query(
            "SELECT detection_object_id, zone_id FROM detection_object_custom_zone \
             WHERE detection_object_id = ANY($1)",
            &[&object_ids],
        )
        .await
        .context("Failed to load detection object custom zones")?;

    let mut links: HashMap<Uuid, Vec<Uuid>> = HashMap::new();
    for row in &zone_rows {
        links
            .entry(row.get("detection_object_id"))
            .or_default()
            .push(row.get("zone_id"));
    }

    for row in &object_rows {
        let id: Uuid = row.get("id");
        ctx.detection_objects.insert(
            id,
            DetectionObject {
                id,
                object_type_id: row.get("object_type_id"),
                address: row.get("address"),
                comment: row.get("comment"),
                parcel_id: row.get("parcel_id"),
                custom_zone_ids: links.remove(&id).unwrap_or_default(),
                batch_id: row.get("batch_id"),
                import_id: row.get("import_id"),
            },
        );
    }

    let detection_rows = client
        .query(
            &format!("{} WHERE d.object_id = ANY($1)", DETECTION_SELECT),
            &[&object_ids],
        )
        .await
        .context("Failed to load detections")?;
    for row in &detection_rows {
        ctx.detections.push(detection_from_row(row)?);
    }
    Ok(detection_rows.len())
}

fn detection_from_row(row: &Row) -> Result<Detection> {
    let id: Uuid = row.get("id");
    let wkb: Vec<u8> = row.get("geometry");
    let source: String = row.get("source");
    let control: String = row.get("control_status");
    let validation: String = row.get("validation_status");
    let prescription: Option<String> = row.get("prescription_status");

    Ok(Detection {
        id,
        object_id: row.get("object_id"),
        tile_set_id: row.get("tile_set_id"),
        geometry: polygon_from_wkb(&wkb, &format!("detection {}", id))?,
        score: row.get("score"),
        source: source.parse()?,
        auto_prescribed: row.get("auto_prescribed"),
        data: DetectionData {
            control_status: control.parse()?,
            validation_status: validation.parse()?,
            prescription_status: prescription.map(|s| s.parse()).transpose()?,
            last_updated_by: row.get("last_updated_by"),
        },
    })
}

/// Décode un WKB en MultiPolygon, un Polygon simple est promu
fn multipolygon_from_wkb(bytes: &[u8], entity: &str) -> Result<MultiPolygon<f64>> {
    let geometry = Wkb(bytes)
        .to_geo()
        .with_context(|| format!("Invalid WKB geometry for {}", entity))?;
    match geometry {
        Geometry::MultiPolygon(multi) => Ok(multi),
        Geometry::Polygon(polygon) => Ok(MultiPolygon::new(vec![polygon])),
        _ => bail!("Unexpected geometry type for {} (polygon expected)", entity),
    }
}

/// Décode un WKB en Polygon, un MultiPolygon à une seule partie est accepté
fn polygon_from_wkb(bytes: &[u8], entity: &str) -> Result<Polygon<f64>> {
    let geometry = Wkb(bytes)
        .to_geo()
        .with_context(|| format!("Invalid WKB geometry for {}", entity))?;
    match geometry {
        Geometry::Polygon(polygon) => Ok(polygon),
        Geometry::MultiPolygon(multi) => {
            let mut polygons = multi.0;
            if polygons.len() == 1 {
                Ok(polygons.remove(0))
            } else {
                bail!(
                    "Geometry for {} has {} parts, a single polygon is expected",
                    entity,
                    polygons.len()
                )
            }
        }
        _ => bail!("Unexpected geometry type for {} (polygon expected)", entity),
    }
}
