//! Score-based top-K ranking with exclusion filtering.
//!
//! Pure result construction: no I/O happens here. An unknown user or an
//! empty candidate pool yields an empty list, not an error.

use crate::dataset::{DatasetRegistry, FeatureMatrix};
use crate::trainer::Model;
use crate::types::{ExclusionSet, Recommendation, UserId};
use chrono::Utc;
use std::cmp::Ordering;

/// Raw model scores are scaled for display.
const SCORE_DISPLAY_SCALE: f32 = 100.0;

/// Rank the top `top_k` candidate items for one user. Ties are broken by
/// ascending item index so the ordering never depends on container
/// iteration order.
pub fn recommend(
    user_id: UserId,
    model: &Model,
    registry: &DatasetRegistry,
    user_features: &FeatureMatrix,
    item_features: &FeatureMatrix,
    top_k: usize,
    exclusions: &ExclusionSet,
) -> Vec<Recommendation> {
    let Some(user_idx) = registry.user_index(user_id) else {
        return Vec::new();
    };
    let user_row = user_features.row(user_idx);
    let excluded = exclusions.for_user(user_id);

    let mut scored: Vec<(usize, f32)> = (0..registry.num_items())
        .filter(|&item_idx| {
            registry
                .item_id(item_idx)
                .map(|brand_id| !excluded.is_some_and(|set| set.contains(&brand_id)))
                .unwrap_or(false)
        })
        .map(|item_idx| {
            let score = model.score(user_row, item_features.row(item_idx));
            (item_idx, score)
        })
        .collect();

    scored.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.0.cmp(&b.0))
    });
    scored.truncate(top_k);

    let now = Utc::now();
    scored
        .into_iter()
        .enumerate()
        .filter_map(|(position, (item_idx, score))| {
            registry.item_id(item_idx).map(|brand_id| Recommendation {
                user_id,
                brand_id,
                score: score * SCORE_DISPLAY_SCALE,
                rank: position as u32 + 1,
                created_at: now,
                updated_at: now,
            })
        })
        .collect()
}

/// Batch variant: every user in the registry, in index order.
pub fn recommend_all(
    model: &Model,
    registry: &DatasetRegistry,
    user_features: &FeatureMatrix,
    item_features: &FeatureMatrix,
    top_k: usize,
    exclusions: &ExclusionSet,
) -> Vec<Recommendation> {
    let mut results = Vec::new();
    for user_idx in 0..registry.num_users() {
        if let Some(user_id) = registry.user_id(user_idx) {
            results.extend(recommend(
                user_id,
                model,
                registry,
                user_features,
                item_features,
                top_k,
                exclusions,
            ));
        }
    }
    results
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interactions::InteractionMatrix;
    use crate::trainer::{train, TrainConfig};
    use std::collections::BTreeMap;

    /// Zero latent dim and zero epochs leave every score at 0.0, which
    /// isolates the ranking logic from the model.
    fn flat_setup(
        num_users: usize,
        num_items: usize,
    ) -> (Model, DatasetRegistry, FeatureMatrix, FeatureMatrix) {
        let mut registry = DatasetRegistry::new();
        registry
            .fit(
                (0..num_users as i64).map(|u| u + 1),
                (0..num_items as i64).map(|i| (i + 1) * 10),
                Vec::new(),
                Vec::new(),
            )
            .unwrap();
        let user_features = registry.build_user_features(&BTreeMap::new());
        let item_features = registry.build_item_features(&BTreeMap::new());

        let mut weights = InteractionMatrix::new(num_users, num_items);
        for u in 0..num_users {
            weights.add(u, 0, 1.0);
        }
        let config = TrainConfig {
            latent_dim: 0,
            epochs: 0,
            ..TrainConfig::default()
        };
        let model = train(
            &weights.presence(),
            &weights,
            &user_features,
            &item_features,
            &config,
        )
        .unwrap();
        (model, registry, user_features, item_features)
    }

    #[test]
    fn test_unknown_user_yields_empty_result() {
        let (model, registry, user_features, item_features) = flat_setup(1, 3);
        let result = recommend(
            999,
            &model,
            &registry,
            &user_features,
            &item_features,
            5,
            &ExclusionSet::new(),
        );
        assert!(result.is_empty());
    }

    #[test]
    fn test_ties_broken_by_ascending_item_index() {
        let (model, registry, user_features, item_features) = flat_setup(1, 4);
        let result = recommend(
            1,
            &model,
            &registry,
            &user_features,
            &item_features,
            4,
            &ExclusionSet::new(),
        );

        let brands: Vec<i64> = result.iter().map(|r| r.brand_id).collect();
        assert_eq!(brands, vec![10, 20, 30, 40]);
    }

    #[test]
    fn test_ranks_contiguous_and_scores_non_increasing() {
        let (model, registry, user_features, item_features) = flat_setup(2, 5);
        let result = recommend(
            2,
            &model,
            &registry,
            &user_features,
            &item_features,
            3,
            &ExclusionSet::new(),
        );

        assert_eq!(result.len(), 3);
        for (position, rec) in result.iter().enumerate() {
            assert_eq!(rec.rank, position as u32 + 1);
        }
        for pair in result.windows(2) {
            assert!(pair[0].score >= pair[1].score);
        }
    }

    #[test]
    fn test_top_k_larger_than_pool() {
        let (model, registry, user_features, item_features) = flat_setup(1, 2);
        let result = recommend(
            1,
            &model,
            &registry,
            &user_features,
            &item_features,
            10,
            &ExclusionSet::new(),
        );
        assert_eq!(result.len(), 2);
    }

    #[test]
    fn test_excluded_items_never_recommended() {
        let (model, registry, user_features, item_features) = flat_setup(1, 3);
        let mut exclusions = ExclusionSet::new();
        exclusions.insert(1, 20);

        let result = recommend(
            1,
            &model,
            &registry,
            &user_features,
            &item_features,
            5,
            &exclusions,
        );
        assert_eq!(result.len(), 2);
        assert!(result.iter().all(|r| r.brand_id != 20));
    }

    #[test]
    fn test_fully_excluded_pool_yields_empty_result() {
        let (model, registry, user_features, item_features) = flat_setup(1, 2);
        let mut exclusions = ExclusionSet::new();
        exclusions.insert(1, 10);
        exclusions.insert(1, 20);

        let result = recommend(
            1,
            &model,
            &registry,
            &user_features,
            &item_features,
            5,
            &exclusions,
        );
        assert!(result.is_empty());
    }

    #[test]
    fn test_timestamps_identical_within_one_event() {
        let (model, registry, user_features, item_features) = flat_setup(1, 3);
        let result = recommend(
            1,
            &model,
            &registry,
            &user_features,
            &item_features,
            3,
            &ExclusionSet::new(),
        );
        for rec in &result {
            assert_eq!(rec.created_at, rec.updated_at);
        }
        assert!(result.windows(2).all(|p| p[0].created_at == p[1].created_at));
    }
}
