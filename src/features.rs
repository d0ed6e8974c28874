//! Feature-token synthesis from behavioral signals and the item catalog.
//!
//! The encoder takes categorical tokens without per-feature numeric
//! weights, so relative importance is encoded as token multiplicity:
//! interest ×3, recent ×2, bookmark ×1, touched categories ×2.

use crate::types::{BookmarkSignal, Brand, BrandId, ExclusionSet, InterestSignal, SignalKind, UserId};
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Per-source caps on how many items contribute tokens, regardless of
/// upstream volume.
pub const MAX_RECENT: usize = 6;
pub const MAX_INTEREST: usize = 3;
pub const MAX_BOOKMARK: usize = 5;

const INTEREST_REPEAT: usize = 3;
const RECENT_REPEAT: usize = 2;
const BOOKMARK_REPEAT: usize = 1;
const CATEGORY_REPEAT: usize = 2;

/// Build per-user feature tokens. Excluded brands are dropped from every
/// signal source before any token is generated. Users are keyed in a
/// `BTreeMap` so iteration order is reproducible.
pub fn build_user_features(
    signals: &[InterestSignal],
    bookmarks: &[BookmarkSignal],
    brands: &[Brand],
    exclusions: &ExclusionSet,
) -> BTreeMap<UserId, Vec<String>> {
    let brand_to_category: HashMap<BrandId, i64> = brands
        .iter()
        .filter_map(|b| b.category_id.map(|c| (b.id, c)))
        .collect();

    let mut recent_map: BTreeMap<UserId, Vec<BrandId>> = BTreeMap::new();
    let mut interest_map: BTreeMap<UserId, Vec<BrandId>> = BTreeMap::new();
    for signal in signals {
        if exclusions.contains(signal.user_id, signal.brand_id) {
            continue;
        }
        let map = match signal.kind {
            SignalKind::Recent => &mut recent_map,
            SignalKind::Interest => &mut interest_map,
        };
        map.entry(signal.user_id).or_default().push(signal.brand_id);
    }

    let mut bookmark_map: BTreeMap<UserId, Vec<BrandId>> = BTreeMap::new();
    for bookmark in bookmarks {
        if exclusions.contains(bookmark.user_id, bookmark.brand_id) {
            continue;
        }
        bookmark_map
            .entry(bookmark.user_id)
            .or_default()
            .push(bookmark.brand_id);
    }

    let user_ids: BTreeSet<UserId> = recent_map
        .keys()
        .chain(interest_map.keys())
        .chain(bookmark_map.keys())
        .copied()
        .collect();

    let mut feature_map = BTreeMap::new();
    for user_id in user_ids {
        let recent = capped(&recent_map, user_id, MAX_RECENT);
        let interest = capped(&interest_map, user_id, MAX_INTEREST);
        let bookmarked = capped(&bookmark_map, user_id, MAX_BOOKMARK);

        let mut features = Vec::new();
        repeat_tokens(&mut features, "recent", recent, RECENT_REPEAT);
        repeat_tokens(&mut features, "interest", interest, INTEREST_REPEAT);
        repeat_tokens(&mut features, "bookmark", bookmarked, BOOKMARK_REPEAT);

        // Distinct categories touched by the capped item lists, in sorted
        // order so the token sequence is stable across runs.
        let categories: BTreeSet<i64> = recent
            .iter()
            .chain(interest.iter())
            .chain(bookmarked.iter())
            .filter_map(|b| brand_to_category.get(b).copied())
            .collect();
        for _ in 0..CATEGORY_REPEAT {
            for category in &categories {
                features.push(format!("cat_{category}"));
            }
        }

        feature_map.insert(user_id, features);
    }

    feature_map
}

/// Build per-item feature tokens from catalog metadata. Missing or empty
/// fields are silently omitted.
pub fn build_item_features(brands: &[Brand]) -> BTreeMap<BrandId, Vec<String>> {
    let mut feature_map = BTreeMap::new();
    for brand in brands {
        let mut features = Vec::new();
        if let Some(category_id) = brand.category_id {
            features.push(format!("category_{category_id}"));
        }
        if let Some(store_type) = &brand.store_type {
            if !store_type.trim().is_empty() {
                features.push(format!("store_{}", store_type.trim().to_lowercase()));
            }
        }
        for token in brand.name.to_lowercase().split_whitespace() {
            features.push(format!("name_{token}"));
        }
        feature_map.insert(brand.id, features);
    }
    feature_map
}

fn capped(map: &BTreeMap<UserId, Vec<BrandId>>, user_id: UserId, cap: usize) -> &[BrandId] {
    map.get(&user_id)
        .map(|items| &items[..items.len().min(cap)])
        .unwrap_or(&[])
}

fn repeat_tokens(out: &mut Vec<String>, prefix: &str, brands: &[BrandId], repeat: usize) {
    for _ in 0..repeat {
        for brand_id in brands {
            out.push(format!("{prefix}_{brand_id}"));
        }
    }
}
