//! Brandrec: personalized brand recommendations from sparse implicit
//! signals.
//!
//! The core is a feature-weighted implicit-feedback pipeline: behavioral
//! tables become categorical feature tokens, observed and synthesized
//! interactions form a sparse weighted matrix, a latent-factor model is
//! trained against it, and candidates are ranked top-K per user with
//! exclusion filtering. The data-access and HTTP layers sit at the edges
//! and only produce/consume the typed inputs and outputs.

pub mod dataset;
pub mod error;
pub mod evaluator;
pub mod features;
pub mod interactions;
pub mod pipeline;
pub mod recommender;
pub mod store;
pub mod trainer;
pub mod types;

// Re-export key types
pub use dataset::{DatasetRegistry, FeatureMatrix};
pub use error::{RecError, Result};
pub use evaluator::{category_overlap, evaluate, evaluate_at_k, EvaluationReport, Metrics};
pub use features::{build_item_features, build_user_features};
pub use interactions::{build_interactions, InteractionMatrix};
pub use pipeline::{derive_statistics, run, run_for_user, PipelineConfig, PipelineOutput};
pub use recommender::{recommend, recommend_all};
pub use trainer::{prepare_dataset, train, Loss, Model, TrainConfig};
pub use types::*;

#[cfg(test)]
mod tests;
