//! Typed records exchanged between the pipeline stages.
//!
//! One struct per upstream table; snapshots are read-only for the duration
//! of a pipeline run.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{HashMap, HashSet};

pub type UserId = i64;
pub type BrandId = i64;

/// A user row from the loaded snapshot. Demographics are carried through
/// for collaborators but never used for scoring.
#[derive(Debug, Clone)]
pub struct User {
    pub id: UserId,
    pub gender: Option<String>,
    pub age_range: Option<String>,
}

/// A brand (item) row from the catalog snapshot.
#[derive(Debug, Clone)]
pub struct Brand {
    pub id: BrandId,
    pub name: String,
    pub category_id: Option<i64>,
    pub category_name: Option<String>,
    pub store_type: Option<String>,
}

/// Source of a declared-preference signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalKind {
    Interest,
    Recent,
}

/// Declared interest or visit-history signal for a (user, brand) pair.
#[derive(Debug, Clone)]
pub struct InterestSignal {
    pub user_id: UserId,
    pub brand_id: BrandId,
    pub kind: SignalKind,
}

/// A bookmarked brand.
#[derive(Debug, Clone)]
pub struct BookmarkSignal {
    pub user_id: UserId,
    pub brand_id: BrandId,
}

/// Pre-aggregated map-interaction weight for a (user, brand) pair.
/// The weight is the sum of per-action coefficients over all raw events.
#[derive(Debug, Clone)]
pub struct ActionInteraction {
    pub user_id: UserId,
    pub brand_id: BrandId,
    pub weight: f32,
}

/// Brands each user has opted out of. An excluded brand must not appear in
/// feature tokens, interactions, the candidate pool, or any output.
#[derive(Debug, Clone, Default)]
pub struct ExclusionSet {
    by_user: HashMap<UserId, HashSet<BrandId>>,
}

impl ExclusionSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, user_id: UserId, brand_id: BrandId) {
        self.by_user.entry(user_id).or_default().insert(brand_id);
    }

    pub fn contains(&self, user_id: UserId, brand_id: BrandId) -> bool {
        self.by_user
            .get(&user_id)
            .map(|set| set.contains(&brand_id))
            .unwrap_or(false)
    }

    pub fn for_user(&self, user_id: UserId) -> Option<&HashSet<BrandId>> {
        self.by_user.get(&user_id)
    }

    pub fn is_empty(&self) -> bool {
        self.by_user.values().all(|set| set.is_empty())
    }
}

/// A ranked recommendation for one user. Ranks are contiguous from 1 with
/// non-increasing scores; `created_at == updated_at` within one event.
#[derive(Debug, Clone, Serialize)]
pub struct Recommendation {
    pub user_id: UserId,
    pub brand_id: BrandId,
    pub score: f32,
    pub rank: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Denormalized statistics row derived from a recommendation. Rows with
/// missing catalog metadata are dropped, never emitted with nulls.
#[derive(Debug, Clone, Serialize)]
pub struct StatisticsRow {
    pub user_id: UserId,
    pub brand_id: BrandId,
    pub brand_name: String,
    pub category_id: i64,
    pub category_name: String,
    pub statistics_type: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Everything one pipeline run reads, loaded up front by the data-access
/// layer. Immutable for the duration of the run.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    pub users: Vec<User>,
    pub brands: Vec<Brand>,
    pub signals: Vec<InterestSignal>,
    pub actions: Vec<ActionInteraction>,
    pub bookmarks: Vec<BookmarkSignal>,
    pub exclusions: ExclusionSet,
}
