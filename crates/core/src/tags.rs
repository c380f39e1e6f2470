use serde::{Deserialize, Serialize};
use std::collections::{btree_map, btree_set, BTreeMap, BTreeSet};

/// A set of tag names.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TagSet(BTreeSet<String>);

impl TagSet {
    pub fn new() -> Self {
        TagSet::default()
    }

    pub fn insert(&mut self, tag: impl Into<String>) -> bool {
        self.0.insert(tag.into())
    }

    pub fn remove(&mut self, tag: &str) -> bool {
        self.0.remove(tag)
    }

    pub fn contains(&self, tag: &str) -> bool {
        self.0.contains(tag)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> btree_set::Iter<'_, String> {
        self.0.iter()
    }

    /// Applies a tag update: `"-name"` removes `name`, a bare `"name"` adds it.
    /// Empty strings are ignored.
    pub fn apply_update<S: AsRef<str>>(&mut self, updates: &[S]) {
        for update in updates {
            let update = update.as_ref();
            if update.is_empty() {
                continue;
            }
            match update.strip_prefix('-') {
                Some(removed) => {
                    self.0.remove(removed);
                }
                None => {
                    self.0.insert(update.to_string());
                }
            }
        }
    }
}

impl<S: Into<String>> FromIterator<S> for TagSet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        TagSet(iter.into_iter().map(Into::into).collect())
    }
}

impl<'a> IntoIterator for &'a TagSet {
    type Item = &'a String;
    type IntoIter = btree_set::Iter<'a, String>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl IntoIterator for TagSet {
    type Item = String;
    type IntoIter = btree_set::IntoIter<String>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

/// Tags assigned to entries, keyed by [`Entry::id`](crate::Entry::id).
///
/// The persisted form is one line per key, `<key> <tag1> <tag2> ...`,
/// written in key order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TagStore {
    tags: BTreeMap<String, TagSet>,
}

impl TagStore {
    pub fn new() -> Self {
        TagStore::default()
    }

    pub fn get(&self, id: &str) -> Option<&TagSet> {
        self.tags.get(id)
    }

    pub fn insert(&mut self, id: impl Into<String>, tags: TagSet) -> Option<TagSet> {
        self.tags.insert(id.into(), tags)
    }

    pub fn len(&self) -> usize {
        self.tags.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }

    pub fn iter(&self) -> btree_map::Iter<'_, String, TagSet> {
        self.tags.iter()
    }

    /// Applies the same tag update to every id, creating entries as needed.
    pub fn update<I, S>(&mut self, ids: &[I], updates: &[S])
    where
        I: AsRef<str>,
        S: AsRef<str>,
    {
        for id in ids {
            self.tags
                .entry(id.as_ref().to_string())
                .or_default()
                .apply_update(updates);
        }
    }

    pub fn encode(&self) -> String {
        let mut out = String::new();
        for (key, tags) in &self.tags {
            out.push_str(key);
            for tag in tags {
                out.push(' ');
                out.push_str(tag);
            }
            out.push('\n');
        }
        out
    }

    /// Parses the line format. Blank lines are skipped; a key with no tags is
    /// kept with an empty set.
    pub fn decode(text: &str) -> Self {
        let mut store = TagStore::new();
        for line in text.lines() {
            let mut parts = line.split(' ');
            let key = match parts.next() {
                Some(key) if !key.is_empty() => key,
                _ => continue,
            };
            let entry = store.tags.entry(key.to_string()).or_default();
            for tag in parts.filter(|t| !t.is_empty()) {
                entry.insert(tag);
            }
        }
        store
    }
}
