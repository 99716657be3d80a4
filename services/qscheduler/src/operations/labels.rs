//! Account and label extraction from executor task descriptions.

use qs_id::AccountId;
use qs_scheduler::LabelSet;

use super::types::TaskSlice;
use super::OperationError;

/// Tag key naming the quota account of a task.
pub const ACCOUNT_TAG_KEY: &str = "qs_account";

/// Extracts the account from `key:value` tags.
///
/// No account tag means the task is unaccounted; more than one is an error.
pub fn account_id(tags: &[String]) -> Result<Option<AccountId>, OperationError> {
    let prefix = format!("{ACCOUNT_TAG_KEY}:");
    let values: Vec<&str> = tags
        .iter()
        .filter_map(|tag| tag.strip_prefix(&prefix))
        .collect();
    match values.as_slice() {
        [] => Ok(None),
        [value] => AccountId::new(*value)
            .map(Some)
            .map_err(OperationError::InvalidAccount),
        _ => Err(OperationError::AmbiguousAccount {
            count: values.len(),
        }),
    }
}

/// Labels of a task, split by whether running the task can provide them.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TaskLabels {
    pub provisionable: LabelSet,
    pub base: LabelSet,
}

/// Splits task slice dimensions into provisionable and base labels.
///
/// One slice: everything is base. Two slices: the second (fallback) slice
/// must be a subset of the first; its dimensions are base, and the ones only
/// the first has are provisionable.
pub fn compute_labels(slices: &[TaskSlice]) -> Result<TaskLabels, OperationError> {
    match slices {
        [only] => Ok(TaskLabels {
            provisionable: LabelSet::new(),
            base: only.dimensions.iter().cloned().collect(),
        }),
        [first, second] => {
            let first: LabelSet = first.dimensions.iter().cloned().collect();
            let base: LabelSet = second.dimensions.iter().cloned().collect();
            if let Some(missing) = base.iter().find(|d| !first.contains(d)) {
                return Err(OperationError::SliceNotSubset(missing.to_string()));
            }
            Ok(TaskLabels {
                provisionable: first.difference(&base),
                base,
            })
        }
        _ => Err(OperationError::UnsupportedSliceCount(slices.len())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn slice(dims: &[&str]) -> TaskSlice {
        TaskSlice {
            dimensions: dims.iter().map(|d| d.to_string()).collect(),
        }
    }

    fn tags(values: &[&str]) -> Vec<String> {
        values.iter().map(|t| t.to_string()).collect()
    }

    #[test]
    fn test_two_slices_split() {
        let labels = compute_labels(&[slice(&["d1", "d2", "d3"]), slice(&["d1"])]).unwrap();
        assert_eq!(labels.provisionable, LabelSet::from(["d3", "d2"]));
        assert_eq!(labels.base, LabelSet::from(["d1"]));
    }

    #[test]
    fn test_single_slice_is_all_base() {
        let labels = compute_labels(&[slice(&["os:linux", "pool:x"])]).unwrap();
        assert!(labels.provisionable.is_empty());
        assert_eq!(labels.base, LabelSet::from(["os:linux", "pool:x"]));
    }

    #[test]
    fn test_second_slice_not_subset() {
        let err = compute_labels(&[slice(&["d1"]), slice(&["d1", "d2"])]).unwrap_err();
        assert_eq!(err, OperationError::SliceNotSubset("d2".to_string()));
    }

    #[rstest]
    #[case(0)]
    #[case(3)]
    fn test_unsupported_slice_counts(#[case] count: usize) {
        let slices = vec![slice(&["d1"]); count];
        assert_eq!(
            compute_labels(&slices).unwrap_err(),
            OperationError::UnsupportedSliceCount(count)
        );
    }

    #[test]
    fn test_account_tags() {
        assert_eq!(account_id(&tags(&["pool:x", "user:y"])).unwrap(), None);
        assert_eq!(
            account_id(&tags(&["pool:x", "qs_account:team-a"])).unwrap(),
            Some(AccountId::new("team-a").unwrap())
        );
        assert_eq!(
            account_id(&tags(&["qs_account:a", "qs_account:b"])).unwrap_err(),
            OperationError::AmbiguousAccount { count: 2 }
        );
        assert!(matches!(
            account_id(&tags(&["qs_account:"])).unwrap_err(),
            OperationError::InvalidAccount(_)
        ));
    }
}
