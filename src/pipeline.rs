//! End-to-end pipeline orchestration.
//!
//! Stages run sequentially over an immutable snapshot: feature building,
//! dataset registration, interaction synthesis, training, ranking, and
//! statistics derivation. Each run builds its own dataset and model; there
//! is no cross-request shared state.

use crate::dataset::{DatasetRegistry, FeatureMatrix};
use crate::error::Result;
use crate::features::{build_item_features, build_user_features};
use crate::interactions::build_interactions;
use crate::recommender::{recommend, recommend_all};
use crate::trainer::{prepare_dataset, train, Model, TrainConfig};
use crate::types::{Brand, BrandId, Recommendation, Snapshot, StatisticsRow, UserId};
use chrono::Utc;
use std::collections::HashMap;
use tracing::info;

const STATISTICS_TYPE: &str = "RECOMMENDATION";

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub top_k: usize,
    pub train: TrainConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            top_k: 5,
            train: TrainConfig::default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PipelineOutput {
    pub recommendations: Vec<Recommendation>,
    pub statistics: Vec<StatisticsRow>,
}

/// Run the full pipeline for every user in the snapshot.
pub fn run(snapshot: &Snapshot, config: &PipelineConfig) -> Result<PipelineOutput> {
    let (model, registry, user_features, item_features) = build_model(snapshot, config)?;

    info!(top_k = config.top_k, "ranking candidates per user");
    let recommendations = recommend_all(
        &model,
        &registry,
        &user_features,
        &item_features,
        config.top_k,
        &snapshot.exclusions,
    );
    let statistics = derive_statistics(&recommendations, &snapshot.brands);
    info!(
        recommendations = recommendations.len(),
        statistics = statistics.len(),
        "pipeline finished"
    );

    Ok(PipelineOutput {
        recommendations,
        statistics,
    })
}

/// Run the pipeline and rank for a single user. The snapshot is expected
/// to be scoped to that user's signals plus the full catalog. An unknown
/// user yields an empty list.
pub fn run_for_user(
    snapshot: &Snapshot,
    config: &PipelineConfig,
    user_id: UserId,
) -> Result<Vec<Recommendation>> {
    let (model, registry, user_features, item_features) = build_model(snapshot, config)?;
    Ok(recommend(
        user_id,
        &model,
        &registry,
        &user_features,
        &item_features,
        config.top_k,
        &snapshot.exclusions,
    ))
}

fn build_model(
    snapshot: &Snapshot,
    config: &PipelineConfig,
) -> Result<(Model, DatasetRegistry, FeatureMatrix, FeatureMatrix)> {
    info!(
        users = snapshot.users.len(),
        brands = snapshot.brands.len(),
        signals = snapshot.signals.len(),
        actions = snapshot.actions.len(),
        "building features"
    );
    let user_feature_map = build_user_features(
        &snapshot.signals,
        &snapshot.bookmarks,
        &snapshot.brands,
        &snapshot.exclusions,
    );
    let item_feature_map = build_item_features(&snapshot.brands);

    // Users sorted by id so index assignment is reproducible regardless of
    // snapshot row order.
    let mut users = snapshot.users.clone();
    users.sort_by_key(|u| u.id);
    let mut brands = snapshot.brands.clone();
    brands.sort_by_key(|b| b.id);

    let (registry, user_features, item_features) =
        prepare_dataset(&users, &brands, &user_feature_map, &item_feature_map)?;

    info!("building interaction matrix");
    let (interactions, weights) = build_interactions(
        &registry,
        &snapshot.actions,
        &snapshot.signals,
        &snapshot.exclusions,
    )?;

    info!(
        entries = weights.len(),
        epochs = config.train.epochs,
        "training model"
    );
    let model = train(
        &interactions,
        &weights,
        &user_features,
        &item_features,
        &config.train,
    )?;

    Ok((model, registry, user_features, item_features))
}

/// Join recommendations with catalog metadata into statistics rows. Rows
/// missing name or category metadata are dropped, never emitted with
/// nulls.
pub fn derive_statistics(
    recommendations: &[Recommendation],
    brands: &[Brand],
) -> Vec<StatisticsRow> {
    let catalog: HashMap<BrandId, &Brand> = brands.iter().map(|b| (b.id, b)).collect();
    let now = Utc::now();

    recommendations
        .iter()
        .filter_map(|rec| {
            let brand = catalog.get(&rec.brand_id)?;
            let category_id = brand.category_id?;
            let category_name = brand.category_name.clone()?;
            if brand.name.trim().is_empty() {
                return None;
            }
            Some(StatisticsRow {
                user_id: rec.user_id,
                brand_id: rec.brand_id,
                brand_name: brand.name.clone(),
                category_id,
                category_name,
                statistics_type: STATISTICS_TYPE.to_string(),
                created_at: now,
                updated_at: now,
            })
        })
        .collect()
}
