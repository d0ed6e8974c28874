//! Brandrec service - on-demand and batch brand recommendations.
//!
//! Default mode exposes a health check and a per-user recommendation
//! endpoint that loads a scoped snapshot, trains, ranks, and persists
//! best-effort. `brandrec-service batch` instead runs the full pipeline
//! once over every user and exits.

use actix_web::{web, App, HttpResponse, HttpServer};
use anyhow::Context;
use brandrec::{pipeline, store, PipelineConfig, RecError};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::{info, warn};

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .json()
        .init();

    let database_url = std::env::var("DATABASE_URL").context("DATABASE_URL is not set")?;
    let port: u16 = std::env::var("BRANDREC_PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(8084);

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await
        .context("failed to connect to Postgres")?;

    if std::env::args().nth(1).as_deref() == Some("batch") {
        return run_batch(&pool).await;
    }

    info!("Starting brandrec service on port {}", port);

    HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(pool.clone()))
            .route("/health", web::get().to(health_check))
            .route(
                "/recommendations/{user_id}",
                web::get().to(recommend_on_demand),
            )
    })
    .bind(("0.0.0.0", port))?
    .run()
    .await?;

    Ok(())
}

/// Full-snapshot run: recommendations for every user, statistics
/// alongside. Recommendation persistence is mandatory; the statistics
/// save is best-effort and only logged on failure.
async fn run_batch(pool: &PgPool) -> anyhow::Result<()> {
    let snapshot = store::load_snapshot(pool).await?;
    info!(
        users = snapshot.users.len(),
        brands = snapshot.brands.len(),
        "snapshot loaded"
    );

    let config = PipelineConfig::default();
    let output = pipeline::run(&snapshot, &config)?;

    store::save_recommendations(pool, &output.recommendations).await?;
    if let Err(err) = store::save_statistics(pool, &output.statistics).await {
        warn!(error = %err, "failed to persist statistics");
    }

    info!(
        recommendations = output.recommendations.len(),
        statistics = output.statistics.len(),
        "batch run complete"
    );
    Ok(())
}

async fn health_check() -> HttpResponse {
    HttpResponse::Ok().json(serde_json::json!({
        "status": "healthy",
        "service": "brandrec",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

async fn recommend_on_demand(
    pool: web::Data<PgPool>,
    path: web::Path<i64>,
) -> HttpResponse {
    let user_id = path.into_inner();

    let snapshot = match store::load_snapshot_for_user(&pool, user_id).await {
        Ok(snapshot) => snapshot,
        Err(err) => return error_response(err),
    };

    // Training blocks; keep it off the executor.
    let config = PipelineConfig::default();
    let result =
        web::block(move || pipeline::run_for_user(&snapshot, &config, user_id)).await;

    let recommendations = match result {
        Ok(Ok(recommendations)) => recommendations,
        Ok(Err(err)) => return error_response(err),
        Err(err) => {
            return HttpResponse::InternalServerError()
                .json(serde_json::json!({ "error": err.to_string() }))
        }
    };

    if recommendations.is_empty() {
        return HttpResponse::NotFound().json(serde_json::json!({
            "user_id": user_id,
            "message": "nothing to recommend"
        }));
    }

    // Saves are best-effort: a persistence failure never invalidates the
    // computed result.
    if let Err(err) = store::save_recommendations(&pool, &recommendations).await {
        warn!(user_id, error = %err, "failed to persist recommendations");
    }

    let payload: Vec<serde_json::Value> = recommendations
        .iter()
        .map(|rec| {
            serde_json::json!({
                "brand_id": rec.brand_id,
                "score": rec.score,
                "rank": rec.rank
            })
        })
        .collect();

    HttpResponse::Ok().json(serde_json::json!({
        "user_id": user_id,
        "recommendations": payload
    }))
}

fn error_response(err: RecError) -> HttpResponse {
    match err {
        RecError::DataUnavailable { .. } => HttpResponse::ServiceUnavailable()
            .json(serde_json::json!({ "error": err.to_string() })),
        _ => HttpResponse::InternalServerError()
            .json(serde_json::json!({ "error": err.to_string() })),
    }
}
