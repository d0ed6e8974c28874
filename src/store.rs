//! Postgres data access: snapshot loading and result persistence.
//!
//! Load failures surface as `DataUnavailable`; save failures as
//! `Persistence` so the caller can decide whether a write is best-effort.
//! Nothing in here is reached by the core pipeline itself.

use crate::error::{RecError, Result};
use crate::types::{
    ActionInteraction, BookmarkSignal, Brand, ExclusionSet, InterestSignal, Recommendation,
    SignalKind, Snapshot, StatisticsRow, User, UserId,
};
use sqlx::{PgPool, Row};
use std::collections::HashMap;

const MARKER_CLICK_WEIGHT: f32 = 0.5;
const FILTER_USED_WEIGHT: f32 = 0.3;

/// Load everything one batch run reads. Signals for excluded pairs are
/// filtered here so no downstream stage ever sees them.
pub async fn load_snapshot(pool: &PgPool) -> Result<Snapshot> {
    load_snapshot_scoped(pool, None).await
}

/// Scoped variant for on-demand requests: one user's signals plus the
/// full catalog.
pub async fn load_snapshot_for_user(pool: &PgPool, user_id: UserId) -> Result<Snapshot> {
    load_snapshot_scoped(pool, Some(user_id)).await
}

async fn load_snapshot_scoped(pool: &PgPool, user_id: Option<UserId>) -> Result<Snapshot> {
    let users = load_users(pool, user_id).await?;
    let brands = load_brands(pool).await?;
    let exclusions = load_exclusions(pool, user_id).await?;
    let signals = load_signals(pool, user_id)
        .await?
        .into_iter()
        .filter(|s| !exclusions.contains(s.user_id, s.brand_id))
        .collect();
    let actions = load_actions(pool, user_id).await?;
    let bookmarks = load_bookmarks(pool, user_id).await?;

    Ok(Snapshot {
        users,
        brands,
        signals,
        actions,
        bookmarks,
        exclusions,
    })
}

async fn load_users(pool: &PgPool, user_id: Option<UserId>) -> Result<Vec<User>> {
    let query = match user_id {
        Some(id) => sqlx::query("SELECT id, gender, age_range FROM users WHERE id = $1").bind(id),
        None => sqlx::query("SELECT id, gender, age_range FROM users"),
    };
    let rows = query.fetch_all(pool).await.map_err(RecError::unavailable)?;

    let mut users = Vec::with_capacity(rows.len());
    for row in rows {
        users.push(User {
            id: row.try_get("id").map_err(RecError::unavailable)?,
            gender: row.try_get("gender").map_err(RecError::unavailable)?,
            age_range: row.try_get("age_range").map_err(RecError::unavailable)?,
        });
    }
    Ok(users)
}

async fn load_brands(pool: &PgPool) -> Result<Vec<Brand>> {
    let rows = sqlx::query(
        r#"
        SELECT b.id, b.brand_name, b.category_id, c.name AS category_name, b.store_type
        FROM brands b
        LEFT JOIN categories c ON b.category_id = c.id
        "#,
    )
    .fetch_all(pool)
    .await
    .map_err(RecError::unavailable)?;

    let mut brands = Vec::with_capacity(rows.len());
    for row in rows {
        brands.push(Brand {
            id: row.try_get("id").map_err(RecError::unavailable)?,
            name: row.try_get("brand_name").map_err(RecError::unavailable)?,
            category_id: row.try_get("category_id").map_err(RecError::unavailable)?,
            category_name: row.try_get("category_name").map_err(RecError::unavailable)?,
            store_type: row.try_get("store_type").map_err(RecError::unavailable)?,
        });
    }
    Ok(brands)
}

/// Declared interests from the onboarding table unioned with distinct
/// visited brands from history.
async fn load_signals(pool: &PgPool, user_id: Option<UserId>) -> Result<Vec<InterestSignal>> {
    let sql = r#"
        SELECT user_id, brand_id, data_type FROM (
            SELECT user_id, brand_id, 'INTEREST' AS data_type
            FROM recommendation_base_data
            WHERE data_type = 'INTEREST'
            UNION
            SELECT DISTINCT user_id, brand_id, 'RECENT' AS data_type
            FROM history
            WHERE visited_at IS NOT NULL
        ) AS combined
        WHERE ($1::bigint IS NULL OR user_id = $1)
    "#;
    let rows = sqlx::query(sql)
        .bind(user_id)
        .fetch_all(pool)
        .await
        .map_err(RecError::unavailable)?;

    let mut signals = Vec::with_capacity(rows.len());
    for row in rows {
        let data_type: String = row.try_get("data_type").map_err(RecError::unavailable)?;
        let kind = match data_type.as_str() {
            "RECENT" => SignalKind::Recent,
            _ => SignalKind::Interest,
        };
        signals.push(InterestSignal {
            user_id: row.try_get("user_id").map_err(RecError::unavailable)?,
            brand_id: row.try_get("brand_id").map_err(RecError::unavailable)?,
            kind,
        });
    }
    Ok(signals)
}

/// Raw map-interaction events aggregated into per-(user, brand) weights
/// with the fixed per-action coefficients.
async fn load_actions(pool: &PgPool, user_id: Option<UserId>) -> Result<Vec<ActionInteraction>> {
    let sql = r#"
        SELECT al.user_id, b.id AS brand_id, al.action_type
        FROM action_logs al
        JOIN store s ON al.store_id = s.id
        JOIN brands b ON s.brand_id = b.id
        WHERE al.action_type IN ('MARKER_CLICK', 'FILTER_USED')
          AND ($1::bigint IS NULL OR al.user_id = $1)
    "#;
    let rows = sqlx::query(sql)
        .bind(user_id)
        .fetch_all(pool)
        .await
        .map_err(RecError::unavailable)?;

    let mut aggregated: HashMap<(UserId, i64), f32> = HashMap::new();
    for row in rows {
        let user_id: UserId = row.try_get("user_id").map_err(RecError::unavailable)?;
        let brand_id: i64 = row.try_get("brand_id").map_err(RecError::unavailable)?;
        let action_type: String = row.try_get("action_type").map_err(RecError::unavailable)?;
        let weight = match action_type.as_str() {
            "MARKER_CLICK" => MARKER_CLICK_WEIGHT,
            "FILTER_USED" => FILTER_USED_WEIGHT,
            _ => continue,
        };
        *aggregated.entry((user_id, brand_id)).or_insert(0.0) += weight;
    }

    let mut actions: Vec<ActionInteraction> = aggregated
        .into_iter()
        .map(|((user_id, brand_id), weight)| ActionInteraction {
            user_id,
            brand_id,
            weight,
        })
        .collect();
    actions.sort_by_key(|a| (a.user_id, a.brand_id));
    Ok(actions)
}

async fn load_bookmarks(pool: &PgPool, user_id: Option<UserId>) -> Result<Vec<BookmarkSignal>> {
    let sql = r#"
        SELECT bl.user_id, s.brand_id
        FROM bookmark b
        JOIN bookmark_list bl ON b.bookmark_list_id = bl.id
        JOIN store s ON b.store_id = s.id
        WHERE ($1::bigint IS NULL OR bl.user_id = $1)
    "#;
    let rows = sqlx::query(sql)
        .bind(user_id)
        .fetch_all(pool)
        .await
        .map_err(RecError::unavailable)?;

    let mut bookmarks = Vec::with_capacity(rows.len());
    for row in rows {
        bookmarks.push(BookmarkSignal {
            user_id: row.try_get("user_id").map_err(RecError::unavailable)?,
            brand_id: row.try_get("brand_id").map_err(RecError::unavailable)?,
        });
    }
    Ok(bookmarks)
}

async fn load_exclusions(pool: &PgPool, user_id: Option<UserId>) -> Result<ExclusionSet> {
    let sql = r#"
        SELECT user_id, brand_id
        FROM recommendation_base_data
        WHERE data_type = 'EXCLUDE'
          AND ($1::bigint IS NULL OR user_id = $1)
    "#;
    let rows = sqlx::query(sql)
        .bind(user_id)
        .fetch_all(pool)
        .await
        .map_err(RecError::unavailable)?;

    let mut exclusions = ExclusionSet::new();
    for row in rows {
        let user_id: UserId = row.try_get("user_id").map_err(RecError::unavailable)?;
        let brand_id: i64 = row.try_get("brand_id").map_err(RecError::unavailable)?;
        exclusions.insert(user_id, brand_id);
    }
    Ok(exclusions)
}

pub async fn save_recommendations(pool: &PgPool, rows: &[Recommendation]) -> Result<()> {
    let persistence = |source| RecError::Persistence {
        what: "recommendations",
        source,
    };
    let mut tx = pool.begin().await.map_err(persistence)?;
    for rec in rows {
        sqlx::query(
            r#"
            INSERT INTO recommendation (user_id, brand_id, score, rank, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(rec.user_id)
        .bind(rec.brand_id)
        .bind(rec.score)
        .bind(rec.rank as i32)
        .bind(rec.created_at)
        .bind(rec.updated_at)
        .execute(&mut *tx)
        .await
        .map_err(persistence)?;
    }
    tx.commit().await.map_err(persistence)
}

pub async fn save_statistics(pool: &PgPool, rows: &[StatisticsRow]) -> Result<()> {
    let persistence = |source| RecError::Persistence {
        what: "statistics",
        source,
    };
    let mut tx = pool.begin().await.map_err(persistence)?;
    for row in rows {
        sqlx::query(
            r#"
            INSERT INTO statistics
                (user_id, brand_id, brand_name, category_id, category_name,
                 statistics_type, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(row.user_id)
        .bind(row.brand_id)
        .bind(&row.brand_name)
        .bind(row.category_id)
        .bind(&row.category_name)
        .bind(&row.statistics_type)
        .bind(row.created_at)
        .bind(row.updated_at)
        .execute(&mut *tx)
        .await
        .map_err(persistence)?;
    }
    tx.commit().await.map_err(persistence)
}
