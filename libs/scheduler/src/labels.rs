//! Label sets.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// A set of worker dimensions or task labels.
///
/// Equality is set equality: order and duplicates in the input are
/// irrelevant.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LabelSet(BTreeSet<String>);

impl LabelSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn contains(&self, label: &str) -> bool {
        self.0.contains(label)
    }

    /// True if every label of `other` is in this set.
    pub fn contains_all(&self, other: &LabelSet) -> bool {
        other.0.is_subset(&self.0)
    }

    /// Labels of this set that are not in `other`.
    pub fn difference(&self, other: &LabelSet) -> LabelSet {
        LabelSet(self.0.difference(&other.0).cloned().collect())
    }

    /// Labels in sorted order.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    pub fn to_vec(&self) -> Vec<String> {
        self.0.iter().cloned().collect()
    }
}

impl<S: Into<String>> FromIterator<S> for LabelSet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        LabelSet(iter.into_iter().map(Into::into).collect())
    }
}

impl<S: Into<String>, const N: usize> From<[S; N]> for LabelSet {
    fn from(labels: [S; N]) -> Self {
        labels.into_iter().collect()
    }
}

impl From<Vec<String>> for LabelSet {
    fn from(labels: Vec<String>) -> Self {
        labels.into_iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rstest::rstest;

    #[rstest]
    #[case(&[], &[], true)]
    #[case(&[], &["x"], false)]
    #[case(&["x"], &["x"], true)]
    #[case(&["x"], &["y"], false)]
    #[case(&["a", "b"], &["b", "a"], true)]
    #[case(&["a", "a", "b"], &["b", "a"], true)]
    #[case(&["a", "b"], &["a", "b", "c"], false)]
    fn test_label_set_equality(#[case] a: &[&str], #[case] b: &[&str], #[case] expected: bool) {
        let a: LabelSet = a.iter().copied().collect();
        let b: LabelSet = b.iter().copied().collect();
        assert_eq!(a == b, expected);
    }

    #[test]
    fn test_contains_all_and_difference() {
        let worker = LabelSet::from(["os:linux", "board:x", "pool:main"]);
        let wanted = LabelSet::from(["board:x"]);
        assert!(worker.contains_all(&wanted));
        assert!(!wanted.contains_all(&worker));
        assert!(worker.contains_all(&LabelSet::new()));
        assert_eq!(
            worker.difference(&wanted),
            LabelSet::from(["os:linux", "pool:main"])
        );
    }

    #[test]
    fn test_label_sets_key_ordered_maps() {
        let mut groups = std::collections::BTreeMap::new();
        groups.insert(LabelSet::from(["os:linux", "gpu"]), 1);
        groups.insert(LabelSet::from(["gpu", "os:linux"]), 2);
        groups.insert(LabelSet::new(), 3);

        assert_eq!(groups.len(), 2);
        assert_eq!(groups.get(&LabelSet::from(["gpu", "os:linux"])), Some(&2));
        assert!(LabelSet::new() < LabelSet::from(["gpu"]));
    }

    proptest! {
        #[test]
        fn test_equality_matches_distinct_values(
            a in proptest::collection::vec("[a-d]", 0..6),
            b in proptest::collection::vec("[a-d]", 0..6),
        ) {
            let expected = a.iter().collect::<BTreeSet<_>>() == b.iter().collect::<BTreeSet<_>>();
            let a_set: LabelSet = a.iter().cloned().collect();
            let b_set: LabelSet = b.iter().cloned().collect();
            prop_assert_eq!(a_set == b_set, expected);

            let mut reversed = a.clone();
            reversed.reverse();
            let reversed: LabelSet = reversed.into_iter().collect();
            prop_assert_eq!(reversed, a_set);
        }
    }
}
