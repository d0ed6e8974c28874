//! Offline evaluation of recommendation output against declared-interest
//! ground truth: precision/recall/hit-rate at K plus a category-overlap
//! diagnostic. Pure functions, usable as test oracles.

use crate::types::{Brand, BrandId, InterestSignal, Recommendation, SignalKind, UserId};
use std::collections::{BTreeMap, HashMap, HashSet};

/// Per-user metrics at a cutoff K.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Metrics {
    pub precision: f32,
    pub recall: f32,
    pub hit: f32,
}

/// Macro-averaged metrics over all evaluated users.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EvaluationReport {
    pub precision: f32,
    pub recall: f32,
    pub hit_rate: f32,
    pub category_match_rate: f32,
    pub users_evaluated: usize,
}

/// precision@k = hits / k, recall@k = hits / |ground truth|,
/// hit@k = 1 if any overlap.
pub fn evaluate_at_k(recommended: &[BrandId], ground_truth: &HashSet<BrandId>, k: usize) -> Metrics {
    let top = &recommended[..recommended.len().min(k)];
    let hits = top.iter().filter(|b| ground_truth.contains(b)).count();
    Metrics {
        precision: if k > 0 { hits as f32 / k as f32 } else { 0.0 },
        recall: if ground_truth.is_empty() {
            0.0
        } else {
            hits as f32 / ground_truth.len() as f32
        },
        hit: if hits > 0 { 1.0 } else { 0.0 },
    }
}

/// Jaccard overlap between the category sets touched by the recommended
/// and ground-truth brands. Brands without a category are ignored.
pub fn category_overlap(
    recommended: &[BrandId],
    ground_truth: &HashSet<BrandId>,
    brand_categories: &HashMap<BrandId, i64>,
) -> f32 {
    let recommended_cats: HashSet<i64> = recommended
        .iter()
        .filter_map(|b| brand_categories.get(b).copied())
        .collect();
    let truth_cats: HashSet<i64> = ground_truth
        .iter()
        .filter_map(|b| brand_categories.get(b).copied())
        .collect();

    let union = recommended_cats.union(&truth_cats).count();
    if union == 0 {
        return 0.0;
    }
    recommended_cats.intersection(&truth_cats).count() as f32 / union as f32
}

/// Evaluate a batch of recommendations against INTEREST signals.
pub fn evaluate(
    recommendations: &[Recommendation],
    signals: &[InterestSignal],
    brands: &[Brand],
    k: usize,
) -> EvaluationReport {
    let brand_categories: HashMap<BrandId, i64> = brands
        .iter()
        .filter_map(|b| b.category_id.map(|c| (b.id, c)))
        .collect();

    let mut ground_truth: HashMap<UserId, HashSet<BrandId>> = HashMap::new();
    for signal in signals {
        if signal.kind == SignalKind::Interest {
            ground_truth
                .entry(signal.user_id)
                .or_default()
                .insert(signal.brand_id);
        }
    }

    // Recommendations arrive rank-ordered per user; a BTreeMap keeps user
    // iteration stable.
    let mut recommended: BTreeMap<UserId, Vec<BrandId>> = BTreeMap::new();
    for rec in recommendations {
        recommended.entry(rec.user_id).or_default().push(rec.brand_id);
    }

    let empty = HashSet::new();
    let mut precision_sum = 0.0;
    let mut recall_sum = 0.0;
    let mut hit_sum = 0.0;
    let mut overlap_sum = 0.0;
    let users_evaluated = recommended.len();

    for (user_id, brands_for_user) in &recommended {
        let truth = ground_truth.get(user_id).unwrap_or(&empty);
        let metrics = evaluate_at_k(brands_for_user, truth, k);
        precision_sum += metrics.precision;
        recall_sum += metrics.recall;
        hit_sum += metrics.hit;
        overlap_sum += category_overlap(brands_for_user, truth, &brand_categories);
    }

    if users_evaluated == 0 {
        return EvaluationReport {
            precision: 0.0,
            recall: 0.0,
            hit_rate: 0.0,
            category_match_rate: 0.0,
            users_evaluated: 0,
        };
    }
    let n = users_evaluated as f32;
    EvaluationReport {
        precision: precision_sum / n,
        recall: recall_sum / n,
        hit_rate: hit_sum / n,
        category_match_rate: overlap_sum / n,
        users_evaluated,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_precision_recall_hit() {
        let ground_truth: HashSet<BrandId> = [10, 20].into_iter().collect();
        let metrics = evaluate_at_k(&[10, 30, 40, 50, 60], &ground_truth, 5);

        assert!((metrics.precision - 0.2).abs() < 1e-6);
        assert!((metrics.recall - 0.5).abs() < 1e-6);
        assert_eq!(metrics.hit, 1.0);
    }

    #[test]
    fn test_no_ground_truth_zero_recall() {
        let metrics = evaluate_at_k(&[10, 20], &HashSet::new(), 5);
        assert_eq!(metrics.recall, 0.0);
        assert_eq!(metrics.hit, 0.0);
    }

    #[test]
    fn test_category_overlap_jaccard() {
        let categories: HashMap<BrandId, i64> =
            [(10, 1), (20, 1), (30, 2), (40, 3)].into_iter().collect();
        let ground_truth: HashSet<BrandId> = [20, 30].into_iter().collect();

        // Recommended categories {1, 3}, ground-truth {1, 2}: 1 of 3.
        let overlap = category_overlap(&[10, 40], &ground_truth, &categories);
        assert!((overlap - 1.0 / 3.0).abs() < 1e-6);
    }

    #[test]
    fn test_category_overlap_empty_sets() {
        let overlap = category_overlap(&[], &HashSet::new(), &HashMap::new());
        assert_eq!(overlap, 0.0);
    }

    #[test]
    fn test_evaluate_batch_averages() {
        use chrono::Utc;
        let now = Utc::now();
        let rec = |user_id, brand_id, rank| Recommendation {
            user_id,
            brand_id,
            score: 1.0,
            rank,
            created_at: now,
            updated_at: now,
        };
        let recommendations = vec![rec(1, 10, 1), rec(1, 20, 2), rec(2, 30, 1)];
        let signals = vec![
            InterestSignal {
                user_id: 1,
                brand_id: 10,
                kind: SignalKind::Interest,
            },
            InterestSignal {
                user_id: 2,
                brand_id: 40,
                kind: SignalKind::Interest,
            },
        ];
        let report = evaluate(&recommendations, &signals, &[], 2);

        assert_eq!(report.users_evaluated, 2);
        // User 1 hit, user 2 missed.
        assert!((report.hit_rate - 0.5).abs() < 1e-6);
        assert!((report.precision - 0.25).abs() < 1e-6);
    }
}
