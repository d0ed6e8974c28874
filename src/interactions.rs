//! Sparse weighted interaction matrix construction.
//!
//! Users with observed action interactions keep their aggregated rows
//! verbatim. Users without any usable rows get synthesized interactions
//! from their declared signals (interest 2.0, recent 3.0), and users with
//! no signals at all get exactly one weight-1.0 interaction against an
//! item chosen by a pure function of the user id, so no user row is ever
//! empty.

use crate::dataset::DatasetRegistry;
use crate::error::{RecError, Result};
use crate::types::{ActionInteraction, ExclusionSet, InterestSignal, SignalKind};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::{BTreeMap, HashSet};

const INTEREST_WEIGHT: f32 = 2.0;
const RECENT_WEIGHT: f32 = 3.0;
const FALLBACK_WEIGHT: f32 = 1.0;

/// Sparse (user index, item index) → weight matrix. Entries are kept in a
/// `BTreeMap` so iteration order is deterministic.
#[derive(Debug, Clone)]
pub struct InteractionMatrix {
    entries: BTreeMap<(usize, usize), f32>,
    num_users: usize,
    num_items: usize,
}

impl InteractionMatrix {
    pub fn new(num_users: usize, num_items: usize) -> Self {
        Self {
            entries: BTreeMap::new(),
            num_users,
            num_items,
        }
    }

    /// Accumulate a weighted entry. Duplicate (user, item) pairs sum.
    pub fn add(&mut self, user_idx: usize, item_idx: usize, weight: f32) {
        *self.entries.entry((user_idx, item_idx)).or_insert(0.0) += weight;
    }

    pub fn get(&self, user_idx: usize, item_idx: usize) -> f32 {
        self.entries
            .get(&(user_idx, item_idx))
            .copied()
            .unwrap_or(0.0)
    }

    pub fn num_users(&self) -> usize {
        self.num_users
    }

    pub fn num_items(&self) -> usize {
        self.num_items
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = ((usize, usize), f32)> + '_ {
        self.entries.iter().map(|(&key, &weight)| (key, weight))
    }

    /// Entries grouped per user row, in ascending item-index order.
    pub fn user_rows(&self) -> Vec<Vec<(usize, f32)>> {
        let mut rows = vec![Vec::new(); self.num_users];
        for (&(user_idx, item_idx), &weight) in &self.entries {
            rows[user_idx].push((item_idx, weight));
        }
        rows
    }

    /// Same sparsity pattern with every entry set to 1.0.
    pub fn presence(&self) -> InteractionMatrix {
        InteractionMatrix {
            entries: self.entries.keys().map(|&key| (key, 1.0)).collect(),
            num_users: self.num_users,
            num_items: self.num_items,
        }
    }
}

/// Merge observed and synthesized interactions into (interaction matrix,
/// parallel weight matrix), keyed through the registry. Excluded pairs and
/// ids unknown to the registry never appear.
pub fn build_interactions(
    registry: &DatasetRegistry,
    actions: &[ActionInteraction],
    signals: &[InterestSignal],
    exclusions: &ExclusionSet,
) -> Result<(InteractionMatrix, InteractionMatrix)> {
    let mut weights = InteractionMatrix::new(registry.num_users(), registry.num_items());

    for action in actions {
        if exclusions.contains(action.user_id, action.brand_id) {
            continue;
        }
        let (Some(user_idx), Some(item_idx)) = (
            registry.user_index(action.user_id),
            registry.item_index(action.brand_id),
        ) else {
            continue;
        };
        weights.add(user_idx, item_idx, action.weight);
    }

    let users_with_rows: HashSet<usize> =
        weights.iter().map(|((user_idx, _), _)| user_idx).collect();

    // Signals grouped per user, exclusion-filtered, for the synthesis pass.
    let mut signal_map: BTreeMap<usize, Vec<(usize, f32)>> = BTreeMap::new();
    for signal in signals {
        if exclusions.contains(signal.user_id, signal.brand_id) {
            continue;
        }
        let (Some(user_idx), Some(item_idx)) = (
            registry.user_index(signal.user_id),
            registry.item_index(signal.brand_id),
        ) else {
            continue;
        };
        let weight = match signal.kind {
            SignalKind::Interest => INTEREST_WEIGHT,
            SignalKind::Recent => RECENT_WEIGHT,
        };
        signal_map.entry(user_idx).or_default().push((item_idx, weight));
    }

    for user_idx in 0..registry.num_users() {
        if users_with_rows.contains(&user_idx) {
            continue;
        }
        if let Some(entries) = signal_map.get(&user_idx) {
            for &(item_idx, weight) in entries {
                weights.add(user_idx, item_idx, weight);
            }
            continue;
        }
        // No logs, no signals: one deterministic fallback interaction.
        let user_id = registry
            .user_id(user_idx)
            .ok_or_else(|| RecError::invariant("user index out of range"))?;
        let item_idx = fallback_item(registry, user_id, exclusions).ok_or_else(|| {
            RecError::invariant(format!("no candidate item left for user {user_id}"))
        })?;
        weights.add(user_idx, item_idx, FALLBACK_WEIGHT);
    }

    Ok((weights.presence(), weights))
}

/// Pseudo-random but pure in the user id: the same user always maps to the
/// same item across runs, and no shared RNG state is touched.
fn fallback_item(
    registry: &DatasetRegistry,
    user_id: i64,
    exclusions: &ExclusionSet,
) -> Option<usize> {
    let allowed: Vec<usize> = (0..registry.num_items())
        .filter(|&item_idx| {
            registry
                .item_id(item_idx)
                .map(|brand_id| !exclusions.contains(user_id, brand_id))
                .unwrap_or(false)
        })
        .collect();
    if allowed.is_empty() {
        return None;
    }
    let mut rng = StdRng::seed_from_u64(user_id as u64);
    Some(allowed[rng.gen_range(0..allowed.len())])
}
