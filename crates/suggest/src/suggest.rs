use fin_core::{Entry, TagSet, TagStore};
use regex::Regex;
use std::collections::{BTreeMap, HashSet};
use std::sync::OnceLock;
use tracing::debug;

use crate::top_k::TopK;

fn word_re() -> &'static Regex {
    static R: OnceLock<Regex> = OnceLock::new();
    R.get_or_init(|| Regex::new(r"(?-u:\w)+").expect("invalid regex"))
}

/// Unique ASCII word tokens in `text`.
pub fn tokenize(text: &str) -> HashSet<&str> {
    word_re().find_iter(text).map(|m| m.as_str()).collect()
}

/// Suggests tags for a description by majority vote among the most
/// textually similar known entries.
///
/// Similarity is the number of distinct query words that also appear in an
/// entry's payee. A tag is suggested when it appears on more than
/// `threshold` of the `neighbors` closest entries.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TagSuggester {
    neighbors: usize,
    threshold: f64,
}

impl Default for TagSuggester {
    fn default() -> Self {
        Self {
            neighbors: 5,
            threshold: 0.3,
        }
    }
}

impl TagSuggester {
    /// Returns `None` unless `neighbors` is positive and `threshold` is a
    /// fraction in `[0, 1)`.
    pub fn new(neighbors: usize, threshold: f64) -> Option<Self> {
        if neighbors == 0 || !(0.0..1.0).contains(&threshold) {
            return None;
        }
        Some(Self {
            neighbors,
            threshold,
        })
    }

    pub fn neighbor_count(&self) -> usize {
        self.neighbors
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// The closest entries to `description`, most similar first.
    pub fn neighbors<'a>(&self, description: &str, entries: &'a [Entry]) -> Vec<&'a Entry> {
        let query = tokenize(description);
        let mut top = TopK::new(self.neighbors);
        for entry in entries {
            let score = tokenize(&entry.payee)
                .iter()
                .filter(|t| query.contains(*t))
                .count();
            top.insert(entry, score);
        }
        top.into_sorted_vec()
    }

    pub fn suggest(&self, description: &str, entries: &[Entry], tags: &TagStore) -> TagSet {
        let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
        for entry in self.neighbors(description, entries) {
            if let Some(set) = tags.get(&entry.id()) {
                for tag in set {
                    *counts.entry(tag.as_str()).or_default() += 1;
                }
            }
        }

        let suggested: TagSet = counts
            .into_iter()
            .filter(|&(_, count)| count as f64 / self.neighbors as f64 > self.threshold)
            .map(|(tag, _)| tag)
            .collect();
        debug!(description, suggested = suggested.len(), "suggested tags");
        suggested
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn entry(payee: &str, amount: i64) -> Entry {
        let date = NaiveDate::from_ymd_opt(2020, 1, 1).unwrap();
        Entry::new(date, amount, payee)
    }

    fn set(tags: &[&str]) -> TagSet {
        tags.iter().copied().collect()
    }

    #[test]
    fn tokenize_words() {
        let tokens = tokenize("SAFEWAY #1234 SAN_FRANCISCO, CA");
        let mut got: Vec<_> = tokens.into_iter().collect();
        got.sort();
        assert_eq!(got, vec!["1234", "CA", "SAFEWAY", "SAN_FRANCISCO"]);
        assert!(tokenize("  --  ").is_empty());
        // Repeats collapse.
        assert_eq!(tokenize("a a a").len(), 1);
    }

    #[test]
    fn neighbors_rank_by_overlap() {
        let entries = vec![
            entry("UNRELATED THING", 1),
            entry("SAFEWAY STORE 12", 2),
            entry("SAFEWAY FUEL", 3),
            entry("SAFEWAY STORE 99", 4),
        ];
        let s = TagSuggester::new(2, 0.3).unwrap();
        let got: Vec<i64> = s
            .neighbors("SAFEWAY STORE", &entries)
            .iter()
            .map(|e| e.amount)
            .collect();
        // Both two-word matches outrank the single-word match.
        assert_eq!(got.len(), 2);
        assert!(got.contains(&2));
        assert!(got.contains(&4));
    }

    #[test]
    fn new_rejects_unusable_settings() {
        assert!(TagSuggester::new(0, 0.3).is_none());
        assert!(TagSuggester::new(5, 1.0).is_none());
        assert!(TagSuggester::new(5, -0.1).is_none());
        assert!(TagSuggester::new(5, f64::NAN).is_none());
        let s = TagSuggester::new(3, 0.5).unwrap();
        assert_eq!(s.neighbor_count(), 3);
        assert_eq!(s.threshold(), 0.5);
        assert_eq!(TagSuggester::default(), TagSuggester::new(5, 0.3).unwrap());
    }

    /// Five equally similar neighbors, with `food` on `with_food` of them.
    fn vote(with_food: usize) -> TagSet {
        let entries: Vec<Entry> = (0..5).map(|i| entry("CAFE LUNCH", i)).collect();
        let mut store = TagStore::new();
        for (i, e) in entries.iter().enumerate() {
            let mut tags = set(&["lunch"]);
            if i < with_food {
                tags.insert("food");
            }
            store.insert(e.id(), tags);
        }
        TagSuggester::default().suggest("CAFE LUNCH", &entries, &store)
    }

    #[test]
    fn one_of_five_is_below_threshold() {
        assert_eq!(vote(1), set(&["lunch"]));
    }

    #[test]
    fn two_of_five_clears_threshold() {
        assert_eq!(vote(2), set(&["food", "lunch"]));
    }

    #[test]
    fn no_entries_no_tags() {
        let got = TagSuggester::default().suggest("anything", &[], &TagStore::new());
        assert!(got.is_empty());
    }

    #[test]
    fn untagged_neighbors_contribute_nothing() {
        let entries = vec![entry("GAS", 1), entry("GAS", 2)];
        let got = TagSuggester::default().suggest("GAS", &entries, &TagStore::new());
        assert!(got.is_empty());
    }

    #[test]
    fn dissimilar_entries_lose_their_votes() {
        let mut entries: Vec<Entry> = (0..5).map(|i| entry("PIZZA PLACE", i)).collect();
        entries.extend((10..13).map(|i| entry("AIRLINE TICKET", i)));
        let mut store = TagStore::new();
        for e in &entries {
            let tag = if e.payee.starts_with("AIRLINE") { "travel" } else { "food" };
            store.insert(e.id(), set(&[tag]));
        }
        let got = TagSuggester::default().suggest("PIZZA", &entries, &store);
        assert_eq!(got, set(&["food"]));
    }
}
