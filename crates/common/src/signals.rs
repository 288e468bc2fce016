//! Merging fetched segments and categories into signal lists.

use std::collections::HashSet;

use serde::Serialize;

use crate::payload::FetchedPayload;

/// Key under which signals are injected everywhere (`keywords`, ortb2, GPT).
pub const SIGNAL_KEY: &str = "sd_rtd";

/// Ordered list of codes where the first occurrence wins.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct SignalList {
    codes: Vec<String>,
    #[serde(skip)]
    seen: HashSet<String>,
}

impl SignalList {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `code` unless already present. Returns true when it was added.
    pub fn push(&mut self, code: impl Into<String>) -> bool {
        let code = code.into();
        if self.seen.contains(&code) {
            return false;
        }
        self.seen.insert(code.clone());
        self.codes.push(code);
        true
    }

    #[must_use]
    pub fn contains(&self, code: &str) -> bool {
        self.seen.contains(code)
    }

    #[must_use]
    pub fn as_slice(&self) -> &[String] {
        &self.codes
    }

    pub fn iter(&self) -> impl Iterator<Item = &String> {
        self.codes.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.codes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.codes.is_empty()
    }
}

impl<S: Into<String>> FromIterator<S> for SignalList {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        let mut list = Self::new();
        for code in iter {
            list.push(code);
        }
        list
    }
}

/// Result of [`merge`]: the flat list plus its two partitions.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MergedSignals {
    /// Categories first, then segments.
    pub list: SignalList,
    /// Page-centric codes kept from `contextual_categories`.
    pub categories: Vec<String>,
    /// User-centric codes kept from `segments`.
    pub segments: Vec<String>,
}

/// Merge a payload into signal lists.
///
/// A category is kept when its score is at least `min_relevancy_score`. A code
/// already in the flat list is never added twice, so a segment that repeats a
/// kept category only appears under `categories`.
#[must_use]
pub fn merge(payload: &FetchedPayload, min_relevancy_score: u8) -> MergedSignals {
    let threshold = f64::from(min_relevancy_score);
    let mut merged = MergedSignals::default();

    for (code, score) in &payload.contextual_categories {
        if *score >= threshold && merged.list.push(code.as_str()) {
            merged.categories.push(code.clone());
        }
    }

    for (_, code) in &payload.segments {
        if merged.list.push(code.as_str()) {
            merged.segments.push(code.clone());
        }
    }

    log::debug!(
        "merged {} signals ({} categories, {} segments)",
        merged.list.len(),
        merged.categories.len(),
        merged.segments.len()
    );

    merged
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(categories: &[(&str, f64)], segments: &[(&str, &str)]) -> FetchedPayload {
        FetchedPayload {
            segments: segments
                .iter()
                .map(|(id, code)| ((*id).to_string(), (*code).to_string()))
                .collect(),
            contextual_categories: categories
                .iter()
                .map(|(code, score)| ((*code).to_string(), *score))
                .collect(),
        }
    }

    #[test]
    fn merge_filters_categories_and_orders_categories_first() {
        let merged = merge(
            &payload(&[("IAB1", 50.0), ("IAB2", 10.0)], &[("a", "S1"), ("b", "S2")]),
            30,
        );

        assert_eq!(merged.list.as_slice(), ["IAB1", "S1", "S2"]);
        assert_eq!(merged.categories, vec!["IAB1"]);
        assert_eq!(merged.segments, vec!["S1", "S2"]);
    }

    #[test]
    fn merge_threshold_is_inclusive() {
        let merged = merge(&payload(&[("IAB1", 30.0), ("IAB2", 29.9)], &[]), 30);
        assert_eq!(merged.list.as_slice(), ["IAB1"]);
    }

    #[test]
    fn merge_dedups_across_sections() {
        let merged = merge(
            &payload(
                &[("IAB1", 80.0)],
                &[("a", "S1"), ("b", "IAB1"), ("c", "S1"), ("d", "S3")],
            ),
            30,
        );

        assert_eq!(merged.list.as_slice(), ["IAB1", "S1", "S3"]);
        assert_eq!(merged.categories, vec!["IAB1"]);
        assert_eq!(merged.segments, vec!["S1", "S3"]);
    }

    #[test]
    fn merge_of_empty_payload_is_empty() {
        let merged = merge(&FetchedPayload::default(), 30);
        assert!(merged.list.is_empty());
        assert!(merged.categories.is_empty());
        assert!(merged.segments.is_empty());
    }

    #[test]
    fn zero_threshold_keeps_every_category() {
        let merged = merge(&payload(&[("IAB1", 0.0), ("IAB2", 100.0)], &[]), 0);
        assert_eq!(merged.list.as_slice(), ["IAB1", "IAB2"]);
    }

    #[test]
    fn signal_list_rejects_duplicates() {
        let mut list = SignalList::new();
        assert!(list.push("a"));
        assert!(!list.push("a"));
        assert!(list.push("b"));
        assert_eq!(list.len(), 2);
        assert!(list.contains("b"));

        let collected: SignalList = ["x", "y", "x"].into_iter().collect();
        assert_eq!(collected.as_slice(), ["x", "y"]);
    }

    #[test]
    fn signal_list_serializes_as_array() {
        let list: SignalList = ["IAB1", "S1"].into_iter().collect();
        assert_eq!(
            serde_json::to_value(&list).expect("should serialize"),
            serde_json::json!(["IAB1", "S1"])
        );
    }
}
