//! Projection de l'historique d'observation d'un objet
//!
//! Pour chaque fond visible, l'objet a soit une détection, soit un trou
//! dans la chronologie : l'absence est une information (l'objet n'était
//! pas là, ou pas décelable, à cette date).

use chrono::NaiveDate;
use uuid::Uuid;

use crate::context::ResolverContext;
use crate::error::VigieError;
use crate::models::{Detection, TileSet};
use crate::prescription::years_before;

/// Recul de l'aperçu avant/après, en années
const PREVIEW_LOOKBACK_YEARS: u32 = 6;

/// Un point de la chronologie : le fond, et la détection s'il y en a une
#[derive(Debug, Clone)]
pub struct HistoryEntry<'a> {
    /// Fond d'imagerie daté
    pub tile_set: &'a TileSet,

    /// Détection de l'objet sur ce fond, absente si l'objet n'y a pas
    /// été relevé
    pub detection: Option<&'a Detection>,
}

/// Chronologie complète d'un objet sur les fonds visibles
///
/// Une entrée par fond, triée par date croissante quelle que soit
/// l'ordre d'entrée (la résolution de visibilité trie par priorité de
/// type, pas par date).
pub fn project_detection_history<'a>(
    ctx: &'a ResolverContext,
    object_id: Uuid,
    visible_tile_sets: &[&'a TileSet],
) -> Result<Vec<HistoryEntry<'a>>, VigieError> {
    ctx.detection_object(object_id)?;
    let detections = ctx.detections_of_object(object_id);

    let mut tile_sets = visible_tile_sets.to_vec();
    tile_sets.sort_by(|a, b| a.date.cmp(&b.date).then(a.id.cmp(&b.id)));

    Ok(tile_sets
        .into_iter()
        .map(|tile_set| HistoryEntry {
            tile_set,
            detection: detections
                .iter()
                .find(|detection| detection.tile_set_id == tile_set.id)
                .copied(),
        })
        .collect())
}

/// Sous-ensemble représentatif pour un aperçu avant/après
///
/// Retient le fond le plus récent, le fond le plus proche d'il y a six
/// ans (à défaut le plus ancien disponible), et un premier fond
/// supplémentaire non encore retenu. Restitution par date croissante.
pub fn preview_tile_sets<'a>(tile_sets: &[&'a TileSet], today: NaiveDate) -> Vec<&'a TileSet> {
    let mut by_date_desc = tile_sets.to_vec();
    by_date_desc.sort_by(|a, b| b.date.cmp(&a.date).then(a.id.cmp(&b.id)));

    let mut selected: Vec<&TileSet> = Vec::with_capacity(3);

    // le plus récent
    if let Some(&most_recent) = by_date_desc.first() {
        selected.push(most_recent);
    }

    // le plus proche d'il y a six ans, sinon le plus ancien
    let cutoff = years_before(today, PREVIEW_LOOKBACK_YEARS);
    let lookback = by_date_desc
        .iter()
        .find(|tile_set| tile_set.date <= cutoff)
        .copied()
        .or_else(|| by_date_desc.last().copied());
    if let Some(lookback) = lookback {
        if !selected.iter().any(|chosen| chosen.id == lookback.id) {
            selected.push(lookback);
        }
    }

    // un fond de plus pour étoffer la comparaison
    let extra = by_date_desc
        .iter()
        .find(|tile_set| !selected.iter().any(|chosen| chosen.id == tile_set.id))
        .copied();
    if let Some(extra) = extra {
        selected.push(extra);
    }

    selected.sort_by(|a, b| a.date.cmp(&b.date).then(a.id.cmp(&b.id)));
    selected
}
