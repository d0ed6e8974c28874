//! Latent-factor training over identity and token feature embeddings.
//!
//! A user (or item) is represented as the weighted sum of its feature
//! embeddings; affinity is the dot product of the two blended vectors plus
//! the blended biases. Training minimizes a pairwise ranking loss (WARP by
//! default) with SGD. Each epoch partitions the user rows across workers
//! that compute gradient deltas against an epoch-start snapshot of the
//! parameters; the deltas are summed and applied at a barrier, so a fixed
//! seed and worker count reproduce the same model bit for bit.

use crate::dataset::{DatasetRegistry, FeatureMatrix};
use crate::error::{RecError, Result};
use crate::interactions::InteractionMatrix;
use crate::types::{Brand, BrandId, User, UserId};
use ndarray::{Array1, Array2};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::{BTreeMap, HashSet};
use std::ops::Range;

/// Pairwise ranking loss choice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Loss {
    /// Weighted Approximate-Rank Pairwise: samples negatives until a rank
    /// violation is found and scales the update by the estimated rank.
    Warp,
    /// Bayesian Personalized Ranking: one sampled negative per positive.
    Bpr,
}

/// Training configuration knobs.
#[derive(Debug, Clone)]
pub struct TrainConfig {
    pub loss: Loss,
    /// Latent dimension of every embedding.
    pub latent_dim: usize,
    pub epochs: usize,
    pub learning_rate: f32,
    /// Cap on negatives sampled per positive under WARP.
    pub max_sampled: usize,
    /// Worker threads for the per-epoch partition.
    pub num_threads: usize,
    /// Fixed by default; never seeded from the wall clock.
    pub seed: u64,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            loss: Loss::Warp,
            latent_dim: 32,
            epochs: 10,
            learning_rate: 0.05,
            max_sampled: 10,
            num_threads: 2,
            seed: 42,
        }
    }
}

#[derive(Debug, Clone)]
struct ModelParams {
    user_embeddings: Array2<f32>,
    user_biases: Array1<f32>,
    item_embeddings: Array2<f32>,
    item_biases: Array1<f32>,
}

impl ModelParams {
    fn zeros(num_user_features: usize, num_item_features: usize, latent_dim: usize) -> Self {
        Self {
            user_embeddings: Array2::zeros((num_user_features, latent_dim)),
            user_biases: Array1::zeros(num_user_features),
            item_embeddings: Array2::zeros((num_item_features, latent_dim)),
            item_biases: Array1::zeros(num_item_features),
        }
    }

    fn add_assign(&mut self, other: &ModelParams) {
        self.user_embeddings += &other.user_embeddings;
        self.user_biases += &other.user_biases;
        self.item_embeddings += &other.item_embeddings;
        self.item_biases += &other.item_biases;
    }
}

/// Trained latent-factor model. Opaque beyond `score`.
#[derive(Debug, Clone)]
pub struct Model {
    latent_dim: usize,
    params: ModelParams,
}

impl Model {
    pub fn latent_dim(&self) -> usize {
        self.latent_dim
    }

    pub fn num_user_features(&self) -> usize {
        self.params.user_biases.len()
    }

    pub fn num_item_features(&self) -> usize {
        self.params.item_biases.len()
    }

    /// Blended-vector dot product plus blended biases.
    pub fn score(&self, user_row: &[(usize, f32)], item_row: &[(usize, f32)]) -> f32 {
        let (user_vec, user_bias) = blend(
            &self.params.user_embeddings,
            &self.params.user_biases,
            user_row,
            self.latent_dim,
        );
        let (item_vec, item_bias) = blend(
            &self.params.item_embeddings,
            &self.params.item_biases,
            item_row,
            self.latent_dim,
        );
        dot(&user_vec, &item_vec) + user_bias + item_bias
    }
}

/// Build the dataset registry and both encoded feature matrices for a run.
/// Mirrors the `fit` + `build_*_features` sequence the pipeline always
/// performs together.
pub fn prepare_dataset(
    users: &[User],
    brands: &[Brand],
    user_feature_map: &BTreeMap<UserId, Vec<String>>,
    item_feature_map: &BTreeMap<BrandId, Vec<String>>,
) -> Result<(DatasetRegistry, FeatureMatrix, FeatureMatrix)> {
    let mut registry = DatasetRegistry::new();
    registry.fit(
        users.iter().map(|u| u.id),
        brands.iter().map(|b| b.id),
        user_feature_map.values().flatten().cloned(),
        item_feature_map.values().flatten().cloned(),
    )?;
    let user_features = registry.build_user_features(user_feature_map);
    let item_features = registry.build_item_features(item_feature_map);
    Ok((registry, user_features, item_features))
}

/// Fit the model. A single blocking call; fails on an empty interaction
/// matrix or any dimension mismatch rather than truncating silently.
pub fn train(
    interactions: &InteractionMatrix,
    weights: &InteractionMatrix,
    user_features: &FeatureMatrix,
    item_features: &FeatureMatrix,
    config: &TrainConfig,
) -> Result<Model> {
    if interactions.is_empty() {
        return Err(RecError::invariant("empty interaction matrix"));
    }
    if weights.len() != interactions.len()
        || weights.num_users() != interactions.num_users()
        || weights.num_items() != interactions.num_items()
    {
        return Err(RecError::invariant(
            "weight matrix does not match the interaction matrix",
        ));
    }
    if user_features.num_rows() != interactions.num_users() {
        return Err(RecError::invariant(format!(
            "user feature matrix has {} rows but the interaction matrix has {} users",
            user_features.num_rows(),
            interactions.num_users()
        )));
    }
    if item_features.num_rows() != interactions.num_items() {
        return Err(RecError::invariant(format!(
            "item feature matrix has {} rows but the interaction matrix has {} items",
            item_features.num_rows(),
            interactions.num_items()
        )));
    }
    let positives = weights.user_rows();
    if positives.iter().any(|row| row.is_empty()) {
        return Err(RecError::invariant("interaction matrix has an empty user row"));
    }

    let num_users = interactions.num_users();
    let positive_sets: Vec<HashSet<usize>> = positives
        .iter()
        .map(|row| row.iter().map(|&(item_idx, _)| item_idx).collect())
        .collect();

    let mut params = init_params(
        user_features.num_features(),
        item_features.num_features(),
        config,
    );

    let num_threads = config.num_threads.max(1);
    for epoch in 0..config.epochs {
        let snapshot = params.clone();
        let partitions = partition(num_users, num_threads);

        let results: Vec<(ModelParams, usize)> = std::thread::scope(|scope| {
            let handles: Vec<_> = partitions
                .into_iter()
                .enumerate()
                .map(|(part, range)| {
                    let snapshot = &snapshot;
                    let positives = &positives;
                    let positive_sets = &positive_sets;
                    scope.spawn(move || {
                        train_partition(
                            snapshot,
                            range,
                            positives,
                            positive_sets,
                            user_features,
                            item_features,
                            config,
                            epoch,
                            part,
                        )
                    })
                })
                .collect();
            handles
                .into_iter()
                .map(|handle| match handle.join() {
                    Ok(result) => result,
                    Err(panic) => std::panic::resume_unwind(panic),
                })
                .collect()
        });

        let mut updates = 0;
        for (delta, count) in &results {
            params.add_assign(delta);
            updates += count;
        }
        tracing::debug!(epoch, updates, "training epoch finished");
    }

    Ok(Model {
        latent_dim: config.latent_dim,
        params,
    })
}

fn init_params(
    num_user_features: usize,
    num_item_features: usize,
    config: &TrainConfig,
) -> ModelParams {
    let mut params = ModelParams::zeros(num_user_features, num_item_features, config.latent_dim);
    let mut rng = StdRng::seed_from_u64(config.seed);
    let scale = 1.0 / (config.latent_dim.max(1) as f32);
    for i in 0..num_user_features {
        for d in 0..config.latent_dim {
            params.user_embeddings[[i, d]] = rng.gen_range(-scale..scale);
        }
    }
    for i in 0..num_item_features {
        for d in 0..config.latent_dim {
            params.item_embeddings[[i, d]] = rng.gen_range(-scale..scale);
        }
    }
    params
}

fn partition(num_users: usize, num_threads: usize) -> Vec<Range<usize>> {
    let chunk = num_users.div_ceil(num_threads);
    (0..num_threads)
        .map(|t| (t * chunk).min(num_users)..((t + 1) * chunk).min(num_users))
        .filter(|range| !range.is_empty())
        .collect()
}

/// Gradient pass over one disjoint user range. Reads come from the
/// epoch-start snapshot, writes go into a delta applied at the barrier.
#[allow(clippy::too_many_arguments)]
fn train_partition(
    snapshot: &ModelParams,
    users: Range<usize>,
    positives: &[Vec<(usize, f32)>],
    positive_sets: &[HashSet<usize>],
    user_features: &FeatureMatrix,
    item_features: &FeatureMatrix,
    config: &TrainConfig,
    epoch: usize,
    part: usize,
) -> (ModelParams, usize) {
    let mut delta = ModelParams::zeros(
        snapshot.user_biases.len(),
        snapshot.item_biases.len(),
        config.latent_dim,
    );
    let mut rng = StdRng::seed_from_u64(
        config
            .seed
            .wrapping_add((epoch as u64) << 32)
            .wrapping_add(part as u64),
    );
    let num_items = item_features.num_rows();
    let mut updates = 0;

    for user_idx in users {
        let user_row = user_features.row(user_idx);
        let (user_vec, user_bias) = blend(
            &snapshot.user_embeddings,
            &snapshot.user_biases,
            user_row,
            config.latent_dim,
        );

        for &(pos_idx, sample_weight) in &positives[user_idx] {
            let pos_row = item_features.row(pos_idx);
            let (pos_vec, pos_bias) = blend(
                &snapshot.item_embeddings,
                &snapshot.item_biases,
                pos_row,
                config.latent_dim,
            );
            let pos_score = dot(&user_vec, &pos_vec) + user_bias + pos_bias;

            let step = match config.loss {
                Loss::Warp => warp_step(
                    snapshot,
                    item_features,
                    &user_vec,
                    user_bias,
                    pos_score,
                    &positive_sets[user_idx],
                    num_items,
                    config,
                    &mut rng,
                ),
                Loss::Bpr => bpr_step(
                    snapshot,
                    item_features,
                    &user_vec,
                    user_bias,
                    pos_score,
                    &positive_sets[user_idx],
                    num_items,
                    &mut rng,
                ),
            };

            if let Some((neg_idx, loss_scale)) = step {
                let neg_row = item_features.row(neg_idx);
                let (neg_vec, _) = blend(
                    &snapshot.item_embeddings,
                    &snapshot.item_biases,
                    neg_row,
                    config.latent_dim,
                );
                let g = config.learning_rate * sample_weight * loss_scale;
                apply_pair(
                    &mut delta, user_row, pos_row, neg_row, &user_vec, &pos_vec, &neg_vec, g,
                );
                updates += 1;
            }
        }
    }

    (delta, updates)
}

/// Sample negatives until one out-scores the positive minus the margin;
/// the update is scaled by the log of the estimated rank.
#[allow(clippy::too_many_arguments)]
fn warp_step(
    snapshot: &ModelParams,
    item_features: &FeatureMatrix,
    user_vec: &[f32],
    user_bias: f32,
    pos_score: f32,
    user_positives: &HashSet<usize>,
    num_items: usize,
    config: &TrainConfig,
    rng: &mut StdRng,
) -> Option<(usize, f32)> {
    if user_positives.len() >= num_items {
        return None;
    }
    let latent_dim = config.latent_dim;
    for attempt in 1..=config.max_sampled {
        let candidate = rng.gen_range(0..num_items);
        if user_positives.contains(&candidate) {
            continue;
        }
        let (neg_vec, neg_bias) = blend(
            &snapshot.item_embeddings,
            &snapshot.item_biases,
            item_features.row(candidate),
            latent_dim,
        );
        let neg_score = dot(user_vec, &neg_vec) + user_bias + neg_bias;
        if neg_score > pos_score - 1.0 {
            let estimated_rank = (num_items - 1) / attempt;
            if estimated_rank < 1 {
                return None;
            }
            return Some((candidate, (estimated_rank as f32).ln().max(0.0)));
        }
    }
    None
}

/// One uniformly sampled negative; the update is scaled by the sigmoid of
/// the score difference.
#[allow(clippy::too_many_arguments)]
fn bpr_step(
    snapshot: &ModelParams,
    item_features: &FeatureMatrix,
    user_vec: &[f32],
    user_bias: f32,
    pos_score: f32,
    user_positives: &HashSet<usize>,
    num_items: usize,
    rng: &mut StdRng,
) -> Option<(usize, f32)> {
    if user_positives.len() >= num_items {
        return None;
    }
    let candidate = (0..32)
        .map(|_| rng.gen_range(0..num_items))
        .find(|c| !user_positives.contains(c))?;
    let (neg_vec, neg_bias) = blend(
        &snapshot.item_embeddings,
        &snapshot.item_biases,
        item_features.row(candidate),
        user_vec.len(),
    );
    let neg_score = dot(user_vec, &neg_vec) + user_bias + neg_bias;
    let loss_scale = sigmoid(neg_score - pos_score);
    Some((candidate, loss_scale))
}

/// Push the positive item above the negative for this user: the user's
/// feature embeddings move toward (pos - neg), the item embeddings move
/// along the user vector, biases move with the items.
#[allow(clippy::too_many_arguments)]
fn apply_pair(
    delta: &mut ModelParams,
    user_row: &[(usize, f32)],
    pos_row: &[(usize, f32)],
    neg_row: &[(usize, f32)],
    user_vec: &[f32],
    pos_vec: &[f32],
    neg_vec: &[f32],
    g: f32,
) {
    let latent_dim = user_vec.len();
    for &(feature_idx, feature_weight) in user_row {
        for d in 0..latent_dim {
            delta.user_embeddings[[feature_idx, d]] +=
                g * feature_weight * (pos_vec[d] - neg_vec[d]);
        }
    }
    for &(feature_idx, feature_weight) in pos_row {
        for d in 0..latent_dim {
            delta.item_embeddings[[feature_idx, d]] += g * feature_weight * user_vec[d];
        }
        delta.item_biases[feature_idx] += g * feature_weight;
    }
    for &(feature_idx, feature_weight) in neg_row {
        for d in 0..latent_dim {
            delta.item_embeddings[[feature_idx, d]] -= g * feature_weight * user_vec[d];
        }
        delta.item_biases[feature_idx] -= g * feature_weight;
    }
}

fn blend(
    embeddings: &Array2<f32>,
    biases: &Array1<f32>,
    row: &[(usize, f32)],
    latent_dim: usize,
) -> (Vec<f32>, f32) {
    let mut vec = vec![0.0; latent_dim];
    let mut bias = 0.0;
    for &(feature_idx, feature_weight) in row {
        for (d, value) in vec.iter_mut().enumerate() {
            *value += feature_weight * embeddings[[feature_idx, d]];
        }
        bias += feature_weight * biases[feature_idx];
    }
    (vec, bias)
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}
