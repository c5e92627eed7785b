//! Benchmarks du moteur : union de zones, visibilité, rattachement

use chrono::NaiveDate;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use geo::{LineString, MultiPolygon, Polygon};
use uuid::Uuid;

use vigie::access::{resolve_visible_tile_sets, TileSetFilters};
use vigie::geometry::union_all;
use vigie::linkage::find_linked_detections;
use vigie::models::{
    Detection, DetectionData, DetectionObject, DetectionSource, GeoZone, GroupMembership,
    GroupRight, TileSet, TileSetKind, TileSetStatus, User, UserGroup, UserRole, ZoneKind,
};
use vigie::ResolverContext;

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

/// Grille n x n de carrés qui se chevauchent légèrement
fn grid(n: usize) -> Vec<MultiPolygon<f64>> {
    let mut cells = Vec::with_capacity(n * n);
    for row in 0..n {
        for col in 0..n {
            cells.push(MultiPolygon::new(vec![square_polygon(
                col as f64,
                row as f64,
                1.2,
            )]));
        }
    }
    cells
}

fn bench_union_all(c: &mut Criterion) {
    let mut group = c.benchmark_group("union_all");

    for n in [4usize, 8, 12] {
        let cells = grid(n);
        group.throughput(Throughput::Elements((n * n) as u64));
        group.bench_with_input(BenchmarkId::from_parameter(n * n), &cells, |b, cells| {
            b.iter(|| black_box(union_all(black_box(cells))))
        });
    }

    group.finish();
}

fn visibility_context(zone_count: usize) -> (ResolverContext, User) {
    let mut ctx = ResolverContext::new();

    let mut zone_ids = Vec::with_capacity(zone_count);
    for i in 0..zone_count {
        let id = Uuid::new_v4();
        ctx.zones.insert(
            id,
            GeoZone {
                id,
                name: format!("Commune {i}"),
                kind: ZoneKind::Commune,
                parent_id: None,
                geometry: MultiPolygon::new(vec![square_polygon(i as f64, 0.0, 1.5)]),
                custom_status: None,
                custom_kind: None,
            },
        );
        zone_ids.push(id);
    }

    for (i, zone_id) in zone_ids.iter().enumerate() {
        ctx.tile_sets.push(TileSet {
            id: Uuid::new_v4(),
            name: format!("Fond {i}"),
            status: TileSetStatus::Visible,
            kind: TileSetKind::Partial,
            date: NaiveDate::from_ymd_opt(2015 + (i % 8) as i32, 1, 1).unwrap(),
            min_zoom: None,
            max_zoom: None,
            zone_ids: vec![*zone_id],
            last_import_started_at: None,
            last_import_ended_at: None,
        });
    }

    let user = User {
        id: Uuid::new_v4(),
        email: "bench@vigie.fr".to_string(),
        role: UserRole::Regular,
    };
    let group_id = Uuid::new_v4();
    ctx.groups.insert(
        group_id,
        UserGroup {
            id: group_id,
            name: "Bench".to_string(),
            // une zone sur deux : chaque fond demande une vraie intersection
            zone_ids: zone_ids.iter().step_by(2).copied().collect(),
            custom_zone_ids: vec![],
            category_ids: vec![],
        },
    );
    ctx.memberships.push(GroupMembership {
        user_id: user.id,
        group_id,
        rights: [GroupRight::Read].into_iter().collect(),
    });

    (ctx, user)
}

fn bench_visibility(c: &mut Criterion) {
    let mut group = c.benchmark_group("resolve_visible_tile_sets");
    group.sample_size(20);

    for zone_count in [10usize, 50] {
        let (ctx, user) = visibility_context(zone_count);
        group.throughput(Throughput::Elements(zone_count as u64));
        group.bench_with_input(BenchmarkId::from_parameter(zone_count), &ctx, |b, ctx| {
            b.iter(|| {
                let resolved =
                    resolve_visible_tile_sets(ctx, &user, &TileSetFilters::default()).unwrap();
                black_box(resolved)
            })
        });
    }

    group.finish();
}

fn linkage_context(detection_count: usize) -> (ResolverContext, Uuid) {
    let mut ctx = ResolverContext::new();
    let object_type_id = Uuid::new_v4();

    for i in 0..detection_count {
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
        ctx.detections.push(Detection {
            id: Uuid::new_v4(),
            object_id,
            tile_set_id: Uuid::new_v4(),
            geometry: square_polygon(i as f64 * 2.0, 0.0, 1.0),
            score: 0.8,
            source: DetectionSource::Analysis,
            auto_prescribed: false,
            data: DetectionData::default(),
        });
    }

    (ctx, object_type_id)
}

fn bench_linkage(c: &mut Criterion) {
    let mut group = c.benchmark_group("find_linked_detections");

    for detection_count in [100usize, 1000] {
        let (ctx, object_type_id) = linkage_context(detection_count);
        // chevauche la détection du milieu de la ligne
        let candidate = square_polygon(detection_count as f64, 0.0, 1.1);
        group.throughput(Throughput::Elements(detection_count as u64));
        group.bench_with_input(
            BenchmarkId::from_parameter(detection_count),
            &candidate,
            |b, candidate| {
                b.iter(|| {
                    black_box(find_linked_detections(
                        &ctx,
                        black_box(candidate),
                        object_type_id,
                        &[],
                    ))
                })
            },
        );
    }

    group.finish();
}

criterion_group!(benches, bench_union_all, bench_visibility, bench_linkage);
criterion_main!(benches);
