//! Ranking behavior with a real trained model.

use crate::features::{build_item_features, build_user_features};
use crate::interactions::build_interactions;
use crate::recommender::recommend;
use crate::trainer::{prepare_dataset, train, TrainConfig};
use crate::types::{Brand, ExclusionSet, InterestSignal, SignalKind, User};

fn snapshot_inputs() -> (Vec<User>, Vec<Brand>, Vec<InterestSignal>) {
    let users = (1..=3)
        .map(|id| User {
            id,
            gender: None,
            age_range: None,
        })
        .collect();
    let brands = (1..=6)
        .map(|i| Brand {
            id: i * 10,
            name: format!("Brand {i}"),
            category_id: Some(i % 2),
            category_name: None,
            store_type: None,
        })
        .collect();
    let signals = vec![
        InterestSignal {
            user_id: 1,
            brand_id: 10,
            kind: SignalKind::Interest,
        },
        InterestSignal {
            user_id: 1,
            brand_id: 20,
            kind: SignalKind::Recent,
        },
        InterestSignal {
            user_id: 2,
            brand_id: 30,
            kind: SignalKind::Interest,
        },
    ];
    (users, brands, signals)
}

fn rank_for(user_id: i64, exclusions: &ExclusionSet, top_k: usize) -> Vec<(i64, f32)> {
    let (users, brands, signals) = snapshot_inputs();
    let user_map = build_user_features(&signals, &[], &brands, exclusions);
    let item_map = build_item_features(&brands);
    let (registry, user_features, item_features) =
        prepare_dataset(&users, &brands, &user_map, &item_map).unwrap();
    let (interactions, weights) =
        build_interactions(&registry, &[], &signals, exclusions).unwrap();
    let config = TrainConfig {
        epochs: 5,
        latent_dim: 8,
        ..TrainConfig::default()
    };
    let model = train(&interactions, &weights, &user_features, &item_features, &config).unwrap();

    recommend(
        user_id,
        &model,
        &registry,
        &user_features,
        &item_features,
        top_k,
        exclusions,
    )
    .into_iter()
    .map(|r| (r.brand_id, r.score))
    .collect()
}

#[test]
fn test_repeated_runs_produce_identical_rankings() {
    let first = rank_for(1, &ExclusionSet::new(), 6);
    let second = rank_for(1, &ExclusionSet::new(), 6);
    assert_eq!(first, second);
}

#[test]
fn test_result_size_is_min_of_top_k_and_pool() {
    let all = rank_for(2, &ExclusionSet::new(), 10);
    assert_eq!(all.len(), 6);
    let top = rank_for(2, &ExclusionSet::new(), 3);
    assert_eq!(top.len(), 3);
}

#[test]
fn test_exclusion_shrinks_candidate_pool() {
    let mut exclusions = ExclusionSet::new();
    exclusions.insert(1, 30);
    exclusions.insert(1, 40);

    let result = rank_for(1, &exclusions, 10);
    assert_eq!(result.len(), 4);
    assert!(result.iter().all(|(brand_id, _)| *brand_id != 30 && *brand_id != 40));
}
