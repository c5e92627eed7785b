//! Résolution d'accès géographique : fonds visibles, droits, types d'objets
//!
//! La visibilité n'est pas portée par les lignes mais par la géométrie : un
//! utilisateur voit un fond d'imagerie si l'union des zones de ses groupes
//! recouvre une surface non nulle de l'emprise du fond.

use std::collections::{BTreeSet, HashMap};

use geo::{MultiPolygon, Point};
use tracing::debug;
use uuid::Uuid;

use crate::context::ResolverContext;
use crate::error::VigieError;
use crate::geometry;
use crate::models::{
    GeoZone, GroupRight, ObjectType, TileSet, TileSetKind, TileSetStatus, User, VisibilityStatus,
};

/// Ordre de restitution des fonds d'imagerie
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TileSetOrder {
    /// Priorité de type (indicatif, partiel, fond de plan) puis date décroissante
    #[default]
    KindThenDateDesc,
    /// Date croissante (vue chronologique)
    DateAsc,
    /// Date décroissante
    DateDesc,
}

/// Filtres optionnels de la résolution de visibilité
///
/// Un champ à `None` signifie "pas de restriction", sauf `status_in` dont
/// l'absence vaut statuts consultables (visibles et masqués, jamais
/// désactivés).
#[derive(Debug, Clone, Default)]
pub struct TileSetFilters {
    /// Statuts admis
    pub status_in: Option<Vec<TileSetStatus>>,

    /// Types de fonds admis
    pub kind_in: Option<Vec<TileSetKind>>,

    /// Ne garder que les fonds dont la géométrie effective contient ce point
    pub contains_point: Option<Point<f64>>,

    /// Ne garder que les fonds dont la géométrie effective intersecte
    /// cette emprise ; sert aussi de pré-découpe de la juridiction
    pub intersects_geometry: Option<MultiPolygon<f64>>,

    /// Restreindre à ces fonds
    pub id_in: Option<Vec<Uuid>>,

    /// Ordre de restitution
    pub order: TileSetOrder,
}

/// Un fond visible, annoté de sa géométrie effectivement consultable
#[derive(Debug, Clone)]
pub struct VisibleTileSet<'a> {
    /// Le fond d'imagerie
    pub tile_set: &'a TileSet,

    /// Partie de l'emprise du fond que l'utilisateur peut consulter.
    /// `None` pour un fond à couverture globale ou pour le super-rôle
    /// sur un fond sans zone.
    pub geometry: Option<MultiPolygon<f64>>,
}

/// Fonds d'imagerie visibles par un utilisateur
///
/// Retourne la liste ordonnée des fonds consultables, chacun annoté de sa
/// géométrie effective, et l'union des juridictions de l'utilisateur
/// (`None` pour le super-rôle, qui n'est pas restreint).
///
/// # Arguments
/// * `ctx` - contexte hydraté (zones, fonds, groupes, appartenances)
/// * `user` - utilisateur demandeur
/// * `filters` - restrictions optionnelles et ordre de restitution
///
/// # Règles
/// * un fond sans zone associée couvre tout le territoire et passe
///   toujours les filtres géométriques
/// * une intersection réduite à un point ou une ligne (zones qui se
///   touchent sans se recouvrir) ne donne pas accès au fond
pub fn resolve_visible_tile_sets<'a>(
    ctx: &'a ResolverContext,
    user: &User,
    filters: &TileSetFilters,
) -> Result<(Vec<VisibleTileSet<'a>>, Option<MultiPolygon<f64>>), VigieError> {
    let default_statuses = [TileSetStatus::Visible, TileSetStatus::Hidden];
    let statuses: &[TileSetStatus] = filters.status_in.as_deref().unwrap_or(&default_statuses);

    let global_union = if user.is_super() {
        None
    } else {
        user_jurisdiction_union(ctx, user, filters.intersects_geometry.as_ref())?
    };

    let mut visible = Vec::new();

    for tile_set in &ctx.tile_sets {
        if !statuses.contains(&tile_set.status) {
            continue;
        }
        if let Some(kinds) = &filters.kind_in {
            if !kinds.contains(&tile_set.kind) {
                continue;
            }
        }
        if let Some(ids) = &filters.id_in {
            if !ids.contains(&tile_set.id) {
                continue;
            }
        }

        let zone_union = ctx.zone_union(&tile_set.zone_ids)?;

        let effective = if user.is_super() {
            zone_union
        } else {
            match (zone_union, &global_union) {
                // aucune zone : couverture globale, toujours visible
                (None, _) => None,
                // l'utilisateur n'a aucune juridiction : seuls les fonds
                // à couverture globale restent visibles
                (Some(_), None) => continue,
                (Some(zone_union), Some(global_union)) => {
                    let intersection = geometry::intersection(&zone_union, global_union);
                    if geometry::is_empty(&intersection) {
                        if geometry::boundary_only_overlap(&zone_union, global_union, &intersection)
                        {
                            debug!(
                                tile_set = %tile_set.name,
                                "contact limité à la frontière, fond écarté"
                            );
                        }
                        continue;
                    }
                    Some(intersection)
                }
            }
        };

        if let Some(point) = &filters.contains_point {
            if let Some(geometry) = &effective {
                if !geometry::contains_point(geometry, point) {
                    continue;
                }
            }
        }
        if let Some(target) = &filters.intersects_geometry {
            if let Some(geometry) = &effective {
                if !geometry::intersects(geometry, target) {
                    continue;
                }
            }
        }

        visible.push(VisibleTileSet {
            tile_set,
            geometry: effective,
        });
    }

    sort_tile_sets(&mut visible, filters.order);

    Ok((visible, global_union))
}

/// Union des juridictions d'un utilisateur
///
/// Chaque appartenance apporte l'union des zones de son groupe,
/// éventuellement pré-découpée par `clip` pour borner le coût des
/// intersections suivantes.
fn user_jurisdiction_union(
    ctx: &ResolverContext,
    user: &User,
    clip: Option<&MultiPolygon<f64>>,
) -> Result<Option<MultiPolygon<f64>>, VigieError> {
    let mut total: Option<MultiPolygon<f64>> = None;

    for membership in ctx.memberships_of(user.id) {
        let Some(mut group_union) = ctx.jurisdiction_union(membership)? else {
            continue;
        };

        if let Some(clip) = clip {
            group_union = geometry::intersection(&group_union, clip);
            if geometry::is_empty(&group_union) {
                continue;
            }
        }

        total = Some(match total {
            Some(accumulated) => geometry::union_all([&accumulated, &group_union])
                .unwrap_or(accumulated),
            None => group_union,
        });
    }

    Ok(total)
}

fn sort_tile_sets(visible: &mut [VisibleTileSet<'_>], order: TileSetOrder) {
    match order {
        TileSetOrder::KindThenDateDesc => visible.sort_by(|a, b| {
            a.tile_set
                .kind
                .priority()
                .cmp(&b.tile_set.kind.priority())
                .then(b.tile_set.date.cmp(&a.tile_set.date))
        }),
        TileSetOrder::DateAsc => visible.sort_by(|a, b| a.tile_set.date.cmp(&b.tile_set.date)),
        TileSetOrder::DateDesc => visible.sort_by(|a, b| b.tile_set.date.cmp(&a.tile_set.date)),
    }
}

/// Droits d'un utilisateur en un point donné
///
/// Union des droits de toutes les appartenances dont la juridiction
/// contient le point. Le super-rôle obtient les trois droits sans calcul.
pub fn resolve_user_rights(
    ctx: &ResolverContext,
    user: &User,
    point: &Point<f64>,
) -> Result<BTreeSet<GroupRight>, VigieError> {
    if user.is_super() {
        return Ok(GroupRight::all());
    }

    let mut rights = BTreeSet::new();
    for membership in ctx.memberships_of(user.id) {
        let Some(jurisdiction) = ctx.jurisdiction_union(membership)? else {
            continue;
        };
        if geometry::contains_point(&jurisdiction, point) {
            rights.extend(membership.rights.iter().copied());
        }
    }
    Ok(rights)
}

/// Droits en un point, avec exigence d'un droit précis
///
/// Échoue avec une erreur d'autorisation si `required` n'est pas détenu.
pub fn require_right(
    ctx: &ResolverContext,
    user: &User,
    point: &Point<f64>,
    required: GroupRight,
) -> Result<BTreeSet<GroupRight>, VigieError> {
    let rights = resolve_user_rights(ctx, user, point)?;
    if !rights.contains(&required) {
        return Err(VigieError::Authorization {
            user_id: user.id,
            right: required,
        });
    }
    Ok(rights)
}

/// Types d'objets visibles par un utilisateur, avec leur visibilité
///
/// Parcourt les catégories atteignables par les appartenances de
/// l'utilisateur. Un type déjà vu VISIBLE ne peut pas être rétrogradé par
/// une catégorie ultérieure le déclarant HIDDEN. Le super-rôle voit tous
/// les types VISIBLE. Restitution triée par nom de type.
pub fn resolve_visible_object_types<'a>(
    ctx: &'a ResolverContext,
    user: &User,
) -> Result<Vec<(&'a ObjectType, VisibilityStatus)>, VigieError> {
    let mut result: Vec<(&ObjectType, VisibilityStatus)>;

    if user.is_super() {
        result = ctx
            .object_types
            .values()
            .map(|object_type| (object_type, VisibilityStatus::Visible))
            .collect();
    } else {
        let mut resolved: HashMap<Uuid, VisibilityStatus> = HashMap::new();

        for membership in ctx.memberships_of(user.id) {
            let group = ctx.group(membership.group_id)?;
            for category_id in &group.category_ids {
                let category = ctx.category(*category_id)?;
                for (object_type_id, status) in &category.object_type_statuses {
                    match resolved.get(object_type_id) {
                        // VISIBLE l'emporte une fois acquis
                        Some(VisibilityStatus::Visible) => {}
                        _ => {
                            resolved.insert(*object_type_id, *status);
                        }
                    }
                }
            }
        }

        result = Vec::with_capacity(resolved.len());
        for (object_type_id, status) in resolved {
            result.push((ctx.object_type(object_type_id)?, status));
        }
    }

    result.sort_by(|a, b| a.0.name.cmp(&b.0.name).then(a.0.id.cmp(&b.0.id)));
    Ok(result)
}

/// Zones personnalisées consultables par un utilisateur
///
/// Union des zones personnalisées de ses groupes ; le super-rôle les voit
/// toutes. Restitution triée statut actif d'abord, puis nom.
pub fn resolve_visible_custom_zones<'a>(
    ctx: &'a ResolverContext,
    user: &User,
) -> Result<Vec<&'a GeoZone>, VigieError> {
    let mut zones: Vec<&GeoZone>;

    if user.is_super() {
        zones = ctx.zones.values().filter(|zone| zone.is_custom()).collect();
    } else {
        let mut seen = BTreeSet::new();
        for membership in ctx.memberships_of(user.id) {
            let group = ctx.group(membership.group_id)?;
            for zone_id in &group.custom_zone_ids {
                seen.insert(*zone_id);
            }
        }
        zones = Vec::with_capacity(seen.len());
        for zone_id in seen {
            zones.push(ctx.zone(zone_id)?);
        }
    }

    zones.sort_by(|a, b| {
        let rank_a = a.custom_status.map_or(u8::MAX, |s| s.sort_rank());
        let rank_b = b.custom_status.map_or(u8::MAX, |s| s.sort_rank());
        rank_a
            .cmp(&rank_b)
            .then_with(|| a.name.cmp(&b.name))
            .then(a.id.cmp(&b.id))
    });
    Ok(zones)
}
