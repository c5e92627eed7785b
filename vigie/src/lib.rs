//! # vigie
//!
//! Moteur d'accès géographique et de prescription pour le suivi de
//! l'occupation des sols détectée sur imagerie aérienne.
//!
//! ## Features
//!
//! - Visibilité des fonds d'imagerie par juridiction (union des zones
//!   des groupes de l'utilisateur)
//! - Droits ponctuels (lecture, annotation, écriture) résolus par
//!   inclusion géométrique
//! - Rattachement des détections représentant le même objet physique
//!   par recouvrement d'emprises
//! - Prescription : fenêtre légale calculée depuis la plus ancienne
//!   détection, marquage idempotent, rattrapage des fonds antérieurs
//! - Chronologie d'observation par fond, trous compris, avec aperçu
//!   avant/après
//!
//! ## Usage
//!
//! ```rust,ignore
//! use vigie::access::{resolve_visible_tile_sets, TileSetFilters};
//! use vigie::ResolverContext;
//!
//! let ctx: ResolverContext = load_context()?; // hydraté depuis PostGIS
//! let (visible, jurisdiction) =
//!     resolve_visible_tile_sets(&ctx, &user, &TileSetFilters::default())?;
//!
//! for entry in &visible {
//!     println!("{} ({})", entry.tile_set.name, entry.tile_set.date);
//! }
//! ```

pub mod access;
pub mod context;
pub mod edit;
pub mod error;
pub mod geometry;
pub mod history;
pub mod linkage;
pub mod models;
pub mod prescription;

pub use context::ResolverContext;
pub use error::VigieError;

/// Normalise un nom pour comparaison insensible à la casse et aux accents
/// Sert à apparier les libellés saisis ou importés avec le référentiel des
/// types d'objets : espaces repliés, minuscules, accents français retirés
pub fn normalize_name(name: &str) -> String {
    let mut normalized = String::with_capacity(name.len());
    let mut previous_space = false;

    for c in name.trim().chars() {
        if c.is_whitespace() {
            if !previous_space {
                normalized.push(' ');
                previous_space = true;
            }
            continue;
        }
        previous_space = false;
        for lower in c.to_lowercase() {
            match lower {
                'à' | 'â' | 'ä' => normalized.push('a'),
                'é' | 'è' | 'ê' | 'ë' => normalized.push('e'),
                'î' | 'ï' => normalized.push('i'),
                'ô' | 'ö' => normalized.push('o'),
                'ù' | 'û' | 'ü' => normalized.push('u'),
                'ç' => normalized.push('c'),
                'œ' => normalized.push_str("oe"),
                'æ' => normalized.push_str("ae"),
                other => normalized.push(other),
            }
        }
    }

    normalized
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_name() {
        assert_eq!(normalize_name("Piscine"), "piscine");
        assert_eq!(normalize_name(" Bâtiment  léger "), "batiment leger");
        assert_eq!(normalize_name("Panneau\tSOLAIRE"), "panneau solaire");
        assert_eq!(normalize_name("Aire de stationnement"), "aire de stationnement");
        assert_eq!(normalize_name("Œuvre d'art"), "oeuvre d'art");
        assert_eq!(normalize_name(""), "");
    }
}
