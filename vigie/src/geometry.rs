//! Primitives géométriques du moteur (union, intersection surfacique, prédicats)
//!
//! Toutes les géométries sont exprimées en longitude/latitude (EPSG:4326) et
//! ramenées à des `MultiPolygon<f64>`. Les opérations booléennes supposent des
//! polygones valides (anneaux fermés, non auto-intersectants).

use geo::{Area, BooleanOps, Centroid, Contains, Intersects, MultiPolygon, Point, Polygon};

/// Enveloppe un polygone dans un multipolygone à un seul élément
pub fn to_multi(polygon: &Polygon<f64>) -> MultiPolygon<f64> {
    MultiPolygon::new(vec![polygon.clone()])
}

/// Union de toutes les géométries fournies
///
/// Retourne `None` pour une liste vide (aucune zone = aucune emprise).
pub fn union_all<'a, I>(geometries: I) -> Option<MultiPolygon<f64>>
where
    I: IntoIterator<Item = &'a MultiPolygon<f64>>,
{
    let mut iter = geometries.into_iter();
    let first = iter.next()?.clone();
    Some(iter.fold(first, |acc, geometry| acc.union(geometry)))
}

/// Intersection surfacique de deux multipolygones
///
/// Le résultat ne contient que la partie commune d'aire non nulle : deux
/// géométries qui ne se touchent que par un point ou une ligne produisent un
/// multipolygone vide, comme deux géométries disjointes.
pub fn intersection(a: &MultiPolygon<f64>, b: &MultiPolygon<f64>) -> MultiPolygon<f64> {
    a.intersection(b)
}

/// Aire de l'intersection de deux polygones
pub fn intersection_area(a: &Polygon<f64>, b: &Polygon<f64>) -> f64 {
    a.intersection(b).unsigned_area()
}

/// Vrai si le multipolygone ne contient aucun polygone
pub fn is_empty(geometry: &MultiPolygon<f64>) -> bool {
    geometry.0.is_empty()
}

/// Aire non signée d'un multipolygone
pub fn area(geometry: &MultiPolygon<f64>) -> f64 {
    geometry.unsigned_area()
}

/// Aire non signée d'un polygone simple
pub fn polygon_area(polygon: &Polygon<f64>) -> f64 {
    polygon.unsigned_area()
}

/// Vrai si le point est à l'intérieur strict du multipolygone
///
/// Un point posé sur la frontière n'est pas contenu, comme avec
/// `ST_Contains` côté PostGIS.
pub fn contains_point(geometry: &MultiPolygon<f64>, point: &Point<f64>) -> bool {
    geometry.contains(point)
}

/// Vrai si les deux multipolygones se touchent ou se recouvrent
pub fn intersects(a: &MultiPolygon<f64>, b: &MultiPolygon<f64>) -> bool {
    a.intersects(b)
}

/// Vrai si deux géométries se touchent sans partager de surface
///
/// `intersection` est le résultat déjà calculé de [`intersection`] sur `a` et
/// `b` : un contact limité à un point ou une ligne laisse ce résultat vide
/// alors que les géométries s'intersectent au sens topologique.
pub fn boundary_only_overlap(
    a: &MultiPolygon<f64>,
    b: &MultiPolygon<f64>,
    intersection: &MultiPolygon<f64>,
) -> bool {
    is_empty(intersection) && a.intersects(b)
}

/// Centroïde d'un polygone, `None` pour un polygone vide
pub fn polygon_centroid(polygon: &Polygon<f64>) -> Option<Point<f64>> {
    polygon.centroid()
}
