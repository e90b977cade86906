//! Allowed label vocabulary and the output filter.
//!
//! Raw model text is lowercased and stripped of ASCII punctuation, then every
//! allowed label that occurs as a substring is reported. Matches come out in
//! lexicographic order so multi-label results are stable across runs.

use std::collections::BTreeSet;

use crate::config::LabelConfig;

/// The allergen vocabulary the prompt advertises and the filter accepts.
pub const DEFAULT_ALLERGENS: [&str; 9] = [
    "milk",
    "egg",
    "peanut",
    "tree nut",
    "wheat",
    "soy",
    "fish",
    "shellfish",
    "sesame",
];

/// Sentinel emitted when nothing in the output matches.
pub const NO_MATCH: &str = "EMPTY";

/// Lowercase and drop ASCII punctuation.
pub fn normalize(text: &str) -> String {
    text.chars()
        .filter(|c| !c.is_ascii_punctuation())
        .flat_map(char::to_lowercase)
        .collect()
}

/// Immutable, ordered set of labels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllowedLabelSet {
    labels: BTreeSet<String>,
}

impl AllowedLabelSet {
    /// Build a set from arbitrary label strings. Labels are normalized the
    /// same way model output is, so "Tree Nut" and "tree nut" collapse.
    pub fn new<I, S>(labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let labels = labels
            .into_iter()
            .map(|l| normalize(l.as_ref()).trim().to_string())
            .filter(|l| !l.is_empty())
            .collect();
        Self { labels }
    }

    pub fn allergens() -> Self {
        Self::new(DEFAULT_ALLERGENS)
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn contains(&self, label: &str) -> bool {
        self.labels.contains(label)
    }

    /// Labels in iteration (lexicographic) order.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.labels.iter().map(String::as_str)
    }

    /// Every label that appears as a substring of the normalized text.
    pub fn find_in(&self, text: &str) -> Vec<String> {
        let normalized = normalize(text);
        self.labels
            .iter()
            .filter(|label| normalized.contains(label.as_str()))
            .cloned()
            .collect()
    }
}

impl Default for AllowedLabelSet {
    fn default() -> Self {
        Self::allergens()
    }
}

/// Turns raw generated text into the label field of a bridge result.
#[derive(Debug, Clone)]
pub struct LabelFilter {
    set: AllowedLabelSet,
    sentinel: String,
    separator: String,
}

impl LabelFilter {
    pub fn new(set: AllowedLabelSet, sentinel: impl Into<String>, separator: impl Into<String>) -> Self {
        Self {
            set,
            sentinel: sentinel.into(),
            separator: separator.into(),
        }
    }

    pub fn from_config(config: &LabelConfig) -> Self {
        Self::new(
            AllowedLabelSet::new(&config.allowed),
            config.no_match_sentinel.clone(),
            config.separator.clone(),
        )
    }

    pub fn labels(&self) -> &AllowedLabelSet {
        &self.set
    }

    pub fn sentinel(&self) -> &str {
        &self.sentinel
    }

    pub fn separator(&self) -> &str {
        &self.separator
    }

    /// Matched labels, possibly empty.
    pub fn matches(&self, text: &str) -> Vec<String> {
        self.set.find_in(text)
    }

    /// Join matches, or the sentinel when there are none. Never empty.
    pub fn render(&self, matches: &[String]) -> String {
        if matches.is_empty() {
            self.sentinel.clone()
        } else {
            matches.join(&self.separator)
        }
    }

    /// `matches` followed by `render`.
    pub fn apply(&self, text: &str) -> String {
        self.render(&self.matches(text))
    }

    /// Split a rendered label field back into labels. The sentinel and blank
    /// entries are dropped; entries are trimmed and lowercased.
    pub fn parse(&self, field: &str) -> Vec<String> {
        field
            .split(self.separator.as_str())
            .map(|s| s.trim().to_lowercase())
            .filter(|s| !s.is_empty() && !s.eq_ignore_ascii_case(&self.sentinel))
            .collect()
    }
}

impl Default for LabelFilter {
    fn default() -> Self {
        Self::new(AllowedLabelSet::allergens(), NO_MATCH, ",")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_case_and_punctuation() {
        assert_eq!(normalize("Milk!"), normalize("milk"));
        assert_eq!(normalize("Tree-Nut, SOY."), "treenut soy");
    }

    #[test]
    fn test_lexicographic_order() {
        let filter = LabelFilter::default();
        let out = filter.matches("Contains wheat, milk and egg.");
        assert_eq!(out, vec!["egg", "milk", "wheat"]);
    }

    #[test]
    fn test_substring_semantics_overlap() {
        // "shellfish" also contains "fish".
        let filter = LabelFilter::default();
        assert_eq!(filter.apply("Shellfish"), "fish,shellfish");
    }

    #[test]
    fn test_sentinel_when_nothing_matches() {
        let filter = LabelFilter::default();
        assert_eq!(filter.apply("rice, water, salt"), "EMPTY");
        assert_eq!(filter.apply(""), "EMPTY");
    }

    #[test]
    fn test_multiword_label_needs_space() {
        let filter = LabelFilter::default();
        assert_eq!(filter.apply("Tree nuts"), "tree nut");
        // Hyphen is punctuation and is dropped, gluing the words.
        assert_eq!(filter.apply("tree-nut"), "EMPTY");
    }

    #[test]
    fn test_filter_is_idempotent_over_every_subset() {
        let filter = LabelFilter::default();
        let labels: Vec<&str> = filter.labels().iter().collect();
        for mask in 0u32..(1 << labels.len()) {
            let subset: Vec<String> = labels
                .iter()
                .enumerate()
                .filter(|(i, _)| mask & (1 << i) != 0)
                .map(|(_, l)| l.to_string())
                .collect();
            let once = filter.apply(&subset.join(" "));
            let twice = filter.apply(&once);
            assert_eq!(once, twice, "subset {subset:?}");
        }
    }

    #[test]
    fn test_parse_drops_sentinel_and_blanks() {
        let filter = LabelFilter::default();
        assert_eq!(filter.parse("egg, Milk ,"), vec!["egg", "milk"]);
        assert!(filter.parse("EMPTY").is_empty());
    }

    #[test]
    fn test_custom_labels_normalized() {
        let set = AllowedLabelSet::new(["Celery", "MUSTARD!", ""]);
        assert_eq!(set.len(), 2);
        assert!(set.contains("mustard"));
    }
}
