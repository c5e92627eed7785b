//! Schéma PostGIS du suivi du territoire
//!
//! Toutes les instructions sont idempotentes (`IF NOT EXISTS`) : la commande
//! `schema` peut être rejouée sur une base existante sans la modifier.

use anyhow::{Context, Result};
use deadpool_postgres::Pool;
use tracing::{info, warn};

/// Tables du schéma, dans l'ordre de création (les clés étrangères
/// imposent cet ordre ; la suppression se fait dans l'ordre inverse)
pub const TABLES: &[&str] = &[
    "geo_zone",
    "tile_set",
    "tile_set_zone",
    "parcel",
    "object_type",
    "object_type_category",
    "object_type_category_object_type",
    "user_account",
    "user_group",
    "user_group_zone",
    "user_group_category",
    "user_user_group",
    "detection_object",
    "detection_object_custom_zone",
    "detection_data",
    "detection",
    "detection_history",
    "detection_data_history",
];

const TABLE_DDL: &[(&str, &str)] = &[
    (
        "geo_zone",
        r#"
        CREATE TABLE IF NOT EXISTS geo_zone (
            id UUID PRIMARY KEY,
            name TEXT NOT NULL,
            kind TEXT NOT NULL,
            parent_id UUID REFERENCES geo_zone(id),
            geometry geometry(MultiPolygon, 4326) NOT NULL,
            custom_status TEXT,
            custom_kind TEXT,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )
        "#,
    ),
    (
        "tile_set",
        r#"
        CREATE TABLE IF NOT EXISTS tile_set (
            id UUID PRIMARY KEY,
            name TEXT NOT NULL UNIQUE,
            status TEXT NOT NULL DEFAULT 'HIDDEN',
            kind TEXT NOT NULL,
            date DATE NOT NULL UNIQUE,
            min_zoom INTEGER,
            max_zoom INTEGER,
            last_import_started_at TIMESTAMPTZ,
            last_import_ended_at TIMESTAMPTZ,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )
        "#,
    ),
    (
        "tile_set_zone",
        r#"
        CREATE TABLE IF NOT EXISTS tile_set_zone (
            tile_set_id UUID NOT NULL REFERENCES tile_set(id) ON DELETE CASCADE,
            zone_id UUID NOT NULL REFERENCES geo_zone(id) ON DELETE CASCADE,
            PRIMARY KEY (tile_set_id, zone_id)
        )
        "#,
    ),
    (
        "parcel",
        r#"
        CREATE TABLE IF NOT EXISTS parcel (
            id UUID PRIMARY KEY,
            reference TEXT NOT NULL UNIQUE,
            commune_id UUID REFERENCES geo_zone(id),
            geometry geometry(MultiPolygon, 4326) NOT NULL
        )
        "#,
    ),
    (
        "object_type",
        r#"
        CREATE TABLE IF NOT EXISTS object_type (
            id UUID PRIMARY KEY,
            name TEXT NOT NULL UNIQUE,
            color TEXT NOT NULL UNIQUE,
            prescription_duration_years INTEGER
        )
        "#,
    ),
    (
        "object_type_category",
        r#"
        CREATE TABLE IF NOT EXISTS object_type_category (
            id UUID PRIMARY KEY,
            name TEXT NOT NULL UNIQUE
        )
        "#,
    ),
    (
        "object_type_category_object_type",
        r#"
        CREATE TABLE IF NOT EXISTS object_type_category_object_type (
            category_id UUID NOT NULL REFERENCES object_type_category(id) ON DELETE CASCADE,
            object_type_id UUID NOT NULL REFERENCES object_type(id) ON DELETE CASCADE,
            visibility TEXT NOT NULL DEFAULT 'VISIBLE',
            PRIMARY KEY (category_id, object_type_id)
        )
        "#,
    ),
    (
        "user_account",
        r#"
        CREATE TABLE IF NOT EXISTS user_account (
            id UUID PRIMARY KEY,
            email TEXT NOT NULL UNIQUE,
            role TEXT NOT NULL DEFAULT 'REGULAR'
        )
        "#,
    ),
    (
        "user_group",
        r#"
        CREATE TABLE IF NOT EXISTS user_group (
            id UUID PRIMARY KEY,
            name TEXT NOT NULL UNIQUE
        )
        "#,
    ),
    (
        "user_group_zone",
        r#"
        CREATE TABLE IF NOT EXISTS user_group_zone (
            group_id UUID NOT NULL REFERENCES user_group(id) ON DELETE CASCADE,
            zone_id UUID NOT NULL REFERENCES geo_zone(id) ON DELETE CASCADE,
            PRIMARY KEY (group_id, zone_id)
        )
        "#,
    ),
    (
        "user_group_category",
        r#"
        CREATE TABLE IF NOT EXISTS user_group_category (
            group_id UUID NOT NULL REFERENCES user_group(id) ON DELETE CASCADE,
            category_id UUID NOT NULL REFERENCES object_type_category(id) ON DELETE CASCADE,
            PRIMARY KEY (group_id, category_id)
        )
        "#,
    ),
    (
        "user_user_group",
        r#"
        CREATE TABLE IF NOT EXISTS user_user_group (
            user_id UUID NOT NULL REFERENCES user_account(id) ON DELETE CASCADE,
            group_id UUID NOT NULL REFERENCES user_group(id) ON DELETE CASCADE,
            rights TEXT[] NOT NULL DEFAULT '{}',
            PRIMARY KEY (user_id, group_id)
        )
        "#,
    ),
    (
        "detection_object",
        r#"
        CREATE TABLE IF NOT EXISTS detection_object (
            id UUID PRIMARY KEY,
            object_type_id UUID NOT NULL REFERENCES object_type(id),
            address TEXT,
            comment TEXT,
            parcel_id UUID REFERENCES parcel(id),
            batch_id TEXT,
            import_id BIGINT,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )
        "#,
    ),
    (
        "detection_object_custom_zone",
        r#"
        CREATE TABLE IF NOT EXISTS detection_object_custom_zone (
            detection_object_id UUID NOT NULL REFERENCES detection_object(id) ON DELETE CASCADE,
            zone_id UUID NOT NULL REFERENCES geo_zone(id) ON DELETE CASCADE,
            PRIMARY KEY (detection_object_id, zone_id)
        )
        "#,
    ),
    (
        "detection_data",
        r#"
        CREATE TABLE IF NOT EXISTS detection_data (
            id UUID PRIMARY KEY,
            control_status TEXT NOT NULL DEFAULT 'NOT_CONTROLLED',
            validation_status TEXT NOT NULL DEFAULT 'DETECTED_NOT_VERIFIED',
            prescription_status TEXT,
            last_updated_by UUID REFERENCES user_account(id),
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )
        "#,
    ),
    (
        "detection",
        r#"
        CREATE TABLE IF NOT EXISTS detection (
            id UUID PRIMARY KEY,
            object_id UUID NOT NULL REFERENCES detection_object(id) ON DELETE CASCADE,
            tile_set_id UUID NOT NULL REFERENCES tile_set(id),
            detection_data_id UUID NOT NULL REFERENCES detection_data(id),
            geometry geometry(Polygon, 4326) NOT NULL,
            score DOUBLE PRECISION NOT NULL DEFAULT 1.0,
            source TEXT NOT NULL DEFAULT 'INTERFACE_DRAWN',
            auto_prescribed BOOLEAN NOT NULL DEFAULT FALSE,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            CONSTRAINT detection_score_range CHECK (score >= 0 AND score <= 1)
        )
        "#,
    ),
    (
        "detection_history",
        r#"
        CREATE TABLE IF NOT EXISTS detection_history (
            id BIGSERIAL PRIMARY KEY,
            detection_id UUID NOT NULL,
            changes JSONB NOT NULL,
            recorded_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )
        "#,
    ),
    (
        "detection_data_history",
        r#"
        CREATE TABLE IF NOT EXISTS detection_data_history (
            id BIGSERIAL PRIMARY KEY,
            detection_data_id UUID NOT NULL,
            changes JSONB NOT NULL,
            recorded_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )
        "#,
    ),
];

const INDEX_DDL: &[&str] = &[
    "CREATE INDEX IF NOT EXISTS idx_geo_zone_geom ON geo_zone USING GIST (geometry)",
    "CREATE INDEX IF NOT EXISTS idx_geo_zone_kind ON geo_zone (kind)",
    "CREATE INDEX IF NOT EXISTS idx_parcel_geom ON parcel USING GIST (geometry)",
    "CREATE INDEX IF NOT EXISTS idx_parcel_commune ON parcel (commune_id)",
    "CREATE INDEX IF NOT EXISTS idx_tile_set_date ON tile_set (date)",
    "CREATE INDEX IF NOT EXISTS idx_detection_geom ON detection USING GIST (geometry)",
    "CREATE INDEX IF NOT EXISTS idx_detection_object ON detection (object_id, tile_set_id)",
    "CREATE INDEX IF NOT EXISTS idx_detection_tile_set ON detection (tile_set_id)",
    "CREATE INDEX IF NOT EXISTS idx_detection_data_ref ON detection (detection_data_id)",
    "CREATE INDEX IF NOT EXISTS idx_detection_object_type ON detection_object (object_type_id)",
    "CREATE INDEX IF NOT EXISTS idx_detection_object_parcel ON detection_object (parcel_id)",
    "CREATE INDEX IF NOT EXISTS idx_detection_object_batch ON detection_object (batch_id)",
    "CREATE INDEX IF NOT EXISTS idx_user_user_group_user ON user_user_group (user_id)",
    "CREATE INDEX IF NOT EXISTS idx_detection_history_entity ON detection_history (detection_id)",
    "CREATE INDEX IF NOT EXISTS idx_detection_data_history_entity ON detection_data_history (detection_data_id)",
];

/// Crée le schéma complet (extension PostGIS comprise)
pub async fn create_schema(pool: &Pool) -> Result<()> {
    let client = pool.get().await?;

    // Activer PostGIS si nécessaire (peut nécessiter des droits superuser).
    // Si l'extension existe déjà mais que l'utilisateur ne peut pas la
    // (re)créer, on dégrade gracieusement.
    match client
        .execute("CREATE EXTENSION IF NOT EXISTS postgis", &[])
        .await
    {
        Ok(_) => {}
        Err(e) => {
            warn!("CREATE EXTENSION postgis failed (will check if already installed): {e}");
            let exists = client
                .query_opt("SELECT 1 FROM pg_extension WHERE extname = 'postgis'", &[])
                .await
                .context("Failed to check pg_extension")?
                .is_some();
            if !exists {
                return Err(anyhow::anyhow!(
                    "PostGIS extension is not installed and could not be created: {e}"
                ));
            }
        }
    }

    for (name, ddl) in TABLE_DDL {
        client
            .execute(*ddl, &[])
            .await
            .with_context(|| format!("Failed to create table {}", name))?;
    }

    info!("Created {} tables", TABLE_DDL.len());
    Ok(())
}

/// Crée les index (hors contraintes), après les tables
pub async fn create_indexes(pool: &Pool) -> Result<()> {
    let client = pool.get().await?;

    for ddl in INDEX_DDL {
        client
            .execute(*ddl, &[])
            .await
            .with_context(|| format!("Failed to create index: {}", ddl))?;
    }

    info!("Created {} indexes", INDEX_DDL.len());
    Ok(())
}

/// Supprime toutes les tables du schéma (tests d'intégration)
pub async fn drop_tables(pool: &Pool) -> Result<()> {
    let client = pool.get().await?;

    for name in TABLES.iter().rev() {
        client
            .execute(&format!("DROP TABLE IF EXISTS {} CASCADE", name), &[])
            .await
            .with_context(|| format!("Failed to drop table {}", name))?;
    }

    Ok(())
}
