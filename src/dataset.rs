//! Dataset registry: the single source of id↔index mapping.
//!
//! `fit` assigns contiguous zero-based indices to users, items and feature
//! tokens (user and item token namespaces are separate) and is called
//! exactly once per run. Exclusions are resolved later by filtering the
//! candidate index set in the recommender; the registry is never mutated
//! after `fit`.

use crate::error::{RecError, Result};
use crate::types::{BrandId, UserId};
use std::collections::{BTreeMap, BTreeSet, HashMap};

#[derive(Debug, Default)]
pub struct DatasetRegistry {
    user_ids: Vec<UserId>,
    user_index: HashMap<UserId, usize>,
    item_ids: Vec<BrandId>,
    item_index: HashMap<BrandId, usize>,
    user_tokens: Vec<String>,
    user_token_index: HashMap<String, usize>,
    item_tokens: Vec<String>,
    item_token_index: HashMap<String, usize>,
    fitted: bool,
}

/// Row-normalized sparse feature matrix. Each row holds (feature index,
/// weight) pairs sorted by index; the first `num_rows` feature indices are
/// the identity features, token features follow.
#[derive(Debug, Clone)]
pub struct FeatureMatrix {
    num_features: usize,
    rows: Vec<Vec<(usize, f32)>>,
}

impl FeatureMatrix {
    pub fn num_rows(&self) -> usize {
        self.rows.len()
    }

    pub fn num_features(&self) -> usize {
        self.num_features
    }

    pub fn row(&self, index: usize) -> &[(usize, f32)] {
        &self.rows[index]
    }
}

impl DatasetRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Assign indices to every distinct user id, item id and feature token.
    /// Token vocabularies are sorted before assignment so indices do not
    /// depend on map iteration order. Fails fast on a second call.
    pub fn fit<U, I>(
        &mut self,
        user_ids: impl IntoIterator<Item = UserId>,
        item_ids: impl IntoIterator<Item = BrandId>,
        user_feature_vocab: U,
        item_feature_vocab: I,
    ) -> Result<()>
    where
        U: IntoIterator<Item = String>,
        I: IntoIterator<Item = String>,
    {
        if self.fitted {
            return Err(RecError::RegistryRefit);
        }

        for user_id in user_ids {
            if !self.user_index.contains_key(&user_id) {
                self.user_index.insert(user_id, self.user_ids.len());
                self.user_ids.push(user_id);
            }
        }
        for item_id in item_ids {
            if !self.item_index.contains_key(&item_id) {
                self.item_index.insert(item_id, self.item_ids.len());
                self.item_ids.push(item_id);
            }
        }

        let user_vocab: BTreeSet<String> = user_feature_vocab.into_iter().collect();
        for token in user_vocab {
            self.user_token_index
                .insert(token.clone(), self.user_tokens.len());
            self.user_tokens.push(token);
        }
        let item_vocab: BTreeSet<String> = item_feature_vocab.into_iter().collect();
        for token in item_vocab {
            self.item_token_index
                .insert(token.clone(), self.item_tokens.len());
            self.item_tokens.push(token);
        }

        self.fitted = true;
        Ok(())
    }

    pub fn num_users(&self) -> usize {
        self.user_ids.len()
    }

    pub fn num_items(&self) -> usize {
        self.item_ids.len()
    }

    /// Total user feature count: one identity feature per user plus the
    /// token vocabulary.
    pub fn num_user_features(&self) -> usize {
        self.user_ids.len() + self.user_tokens.len()
    }

    pub fn num_item_features(&self) -> usize {
        self.item_ids.len() + self.item_tokens.len()
    }

    pub fn user_index(&self, user_id: UserId) -> Option<usize> {
        self.user_index.get(&user_id).copied()
    }

    pub fn item_index(&self, item_id: BrandId) -> Option<usize> {
        self.item_index.get(&item_id).copied()
    }

    pub fn user_id(&self, index: usize) -> Option<UserId> {
        self.user_ids.get(index).copied()
    }

    pub fn item_id(&self, index: usize) -> Option<BrandId> {
        self.item_ids.get(index).copied()
    }

    /// Encode per-user token lists into a row-normalized feature matrix.
    /// Token multiplicity becomes the pre-normalization weight of one
    /// entry per distinct token.
    pub fn build_user_features(
        &self,
        feature_map: &BTreeMap<UserId, Vec<String>>,
    ) -> FeatureMatrix {
        let row_tokens: Vec<&[String]> = self
            .user_ids
            .iter()
            .map(|id| {
                feature_map
                    .get(id)
                    .map(|tokens| tokens.as_slice())
                    .unwrap_or(&[])
            })
            .collect();
        Self::build_features(&row_tokens, self.user_tokens.len(), &self.user_token_index)
    }

    /// Encode per-item token lists, same scheme as the user side.
    pub fn build_item_features(
        &self,
        feature_map: &BTreeMap<BrandId, Vec<String>>,
    ) -> FeatureMatrix {
        let row_tokens: Vec<&[String]> = self
            .item_ids
            .iter()
            .map(|id| {
                feature_map
                    .get(id)
                    .map(|tokens| tokens.as_slice())
                    .unwrap_or(&[])
            })
            .collect();
        Self::build_features(&row_tokens, self.item_tokens.len(), &self.item_token_index)
    }

    fn build_features(
        row_tokens: &[&[String]],
        num_tokens: usize,
        token_index: &HashMap<String, usize>,
    ) -> FeatureMatrix {
        let num_rows = row_tokens.len();
        let mut rows = Vec::with_capacity(num_rows);
        for (row, tokens) in row_tokens.iter().enumerate() {
            let mut counts: BTreeMap<usize, f32> = BTreeMap::new();
            // Identity feature first.
            counts.insert(row, 1.0);
            for token in *tokens {
                if let Some(&token_idx) = token_index.get(token) {
                    *counts.entry(num_rows + token_idx).or_insert(0.0) += 1.0;
                }
            }
            let total: f32 = counts.values().sum();
            let entries: Vec<(usize, f32)> = counts
                .into_iter()
                .map(|(idx, weight)| (idx, weight / total))
                .collect();
            rows.push(entries);
        }
        FeatureMatrix {
            num_features: num_rows + num_tokens,
            rows,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fitted_registry() -> DatasetRegistry {
        let mut registry = DatasetRegistry::new();
        registry
            .fit(
                vec![101, 102],
                vec![10, 20, 30],
                vec!["interest_10".to_string(), "cat_1".to_string()],
                vec!["category_1".to_string()],
            )
            .unwrap();
        registry
    }

    #[test]
    fn test_contiguous_indices_and_roundtrip() {
        let registry = fitted_registry();
        assert_eq!(registry.num_users(), 2);
        assert_eq!(registry.num_items(), 3);
        assert_eq!(registry.user_index(101), Some(0));
        assert_eq!(registry.user_index(102), Some(1));
        assert_eq!(registry.item_index(30), Some(2));
        assert_eq!(registry.user_id(1), Some(102));
        assert_eq!(registry.item_id(0), Some(10));
        assert_eq!(registry.user_index(999), None);
    }

    #[test]
    fn test_fit_twice_fails_fast() {
        let mut registry = fitted_registry();
        let err = registry.fit(vec![101], vec![10], Vec::new(), Vec::new());
        assert!(matches!(err, Err(RecError::RegistryRefit)));
    }

    #[test]
    fn test_feature_namespaces_are_separate() {
        let registry = fitted_registry();
        assert_eq!(registry.num_user_features(), 4);
        assert_eq!(registry.num_item_features(), 4);
    }

    #[test]
    fn test_user_feature_rows_normalized() {
        let registry = fitted_registry();
        let mut feature_map = BTreeMap::new();
        feature_map.insert(
            101,
            vec![
                "interest_10".to_string(),
                "interest_10".to_string(),
                "interest_10".to_string(),
                "cat_1".to_string(),
            ],
        );

        let matrix = registry.build_user_features(&feature_map);
        assert_eq!(matrix.num_rows(), 2);
        assert_eq!(matrix.num_features(), 4);

        let row = matrix.row(0);
        let total: f32 = row.iter().map(|(_, w)| w).sum();
        assert!((total - 1.0).abs() < 1e-6);
        // Identity 1 + cat_1 1 + interest_10 3, normalized by 5.
        assert_eq!(row.len(), 3);
        assert!((row[0].1 - 0.2).abs() < 1e-6);

        // A user with no tokens still gets the identity feature.
        let empty_row = matrix.row(1);
        assert_eq!(empty_row, &[(1, 1.0)]);
    }

    #[test]
    fn test_unknown_tokens_skipped() {
        let registry = fitted_registry();
        let mut feature_map = BTreeMap::new();
        feature_map.insert(101, vec!["never_fitted".to_string()]);

        let matrix = registry.build_user_features(&feature_map);
        assert_eq!(matrix.row(0), &[(0, 1.0)]);
    }
}
