//! Tag filter implementation for task selection.

use std::collections::BTreeSet;

use super::special;

/// A filter for selecting tasks based on tags.
///
/// An empty include set behaves like `all`. Tasks without tags are treated
/// as carrying the single tag `untagged`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TagFilter {
    /// Tags to include (tasks must match at least one)
    only_tags: BTreeSet<String>,
    /// Tags to skip (tasks matching any are excluded)
    skip_tags: BTreeSet<String>,
}

impl TagFilter {
    /// Create a new empty tag filter (matches all tasks)
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a filter with include tags
    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.only_tags.extend(tags.into_iter().map(|t| t.to_lowercase()));
        self
    }

    /// Create a filter with skip tags
    pub fn with_skip_tags(mut self, tags: Vec<String>) -> Self {
        self.skip_tags.extend(tags.into_iter().map(|t| t.to_lowercase()));
        self
    }

    /// Check if any filters are active
    pub fn is_active(&self) -> bool {
        !self.skip_tags.is_empty()
            || (!self.only_tags.is_empty() && !self.only_tags.contains(special::ALL))
    }

    /// Check if a task with the given resolved tags should run
    ///
    /// # Logic
    ///
    /// A task is selected when it carries `always`, when `all` is selected
    /// and the task is not `never`, when its tags intersect the include set,
    /// or when `tagged` is selected and the task has tags (and is not
    /// `never`). A selected task is then dropped when `all` is skipped
    /// (unless it is `always` and `always` is not skipped), when its tags
    /// intersect the skip set, or when `tagged` is skipped and it has tags.
    pub fn should_run(&self, task_tags: &[String]) -> bool {
        let mut tags: BTreeSet<String> = task_tags.iter().map(|t| t.to_lowercase()).collect();
        if tags.is_empty() {
            tags.insert(special::UNTAGGED.to_string());
        }
        let is_tagged = !tags.contains(special::UNTAGGED);
        let has_never = tags.contains(special::NEVER);

        let selected = if self.only_tags.is_empty() {
            !has_never || tags.contains(special::ALWAYS)
        } else {
            tags.contains(special::ALWAYS)
                || (self.only_tags.contains(special::ALL) && !has_never)
                || !self.only_tags.is_disjoint(&tags)
                || (self.only_tags.contains(special::TAGGED) && is_tagged && !has_never)
        };
        if !selected {
            return false;
        }

        if self.skip_tags.is_empty() {
            return true;
        }
        if self.skip_tags.contains(special::ALL) {
            return tags.contains(special::ALWAYS) && !self.skip_tags.contains(special::ALWAYS);
        }
        if !self.skip_tags.is_disjoint(&tags) {
            return false;
        }
        !(self.skip_tags.contains(special::TAGGED) && is_tagged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tags(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    #[test]
    fn test_empty_filter_matches_all_but_never() {
        let filter = TagFilter::new();

        assert!(filter.should_run(&[]));
        assert!(filter.should_run(&tags(&["deploy"])));
        assert!(!filter.should_run(&tags(&["never"])));
        assert!(filter.should_run(&tags(&["never", "always"])));
        assert!(!filter.is_active());
    }

    #[test]
    fn test_include_tags() {
        let filter = TagFilter::new().with_tags(tags(&["deploy"]));

        assert!(filter.should_run(&tags(&["deploy"])));
        assert!(filter.should_run(&tags(&["deploy", "web"])));
        assert!(!filter.should_run(&tags(&["web"])));
        assert!(!filter.should_run(&[]));
        assert!(filter.is_active());
    }

    #[test]
    fn test_always_runs_unless_skipped() {
        let filter = TagFilter::new().with_tags(tags(&["deploy"]));
        assert!(filter.should_run(&tags(&["always"])));

        let filter = TagFilter::new().with_skip_tags(tags(&["always"]));
        assert!(!filter.should_run(&tags(&["always"])));
    }

    #[test]
    fn test_never_needs_explicit_selection() {
        let filter = TagFilter::new().with_tags(tags(&["all"]));
        assert!(!filter.should_run(&tags(&["never", "debug"])));

        let filter = TagFilter::new().with_tags(tags(&["debug"]));
        assert!(filter.should_run(&tags(&["never", "debug"])));

        let filter = TagFilter::new().with_tags(tags(&["never"]));
        assert!(filter.should_run(&tags(&["never"])));
    }

    #[test]
    fn test_tagged_and_untagged() {
        let filter = TagFilter::new().with_tags(tags(&["untagged"]));
        assert!(filter.should_run(&[]));
        assert!(!filter.should_run(&tags(&["web"])));

        let filter = TagFilter::new().with_tags(tags(&["tagged"]));
        assert!(filter.should_run(&tags(&["web"])));
        assert!(!filter.should_run(&[]));

        let filter = TagFilter::new().with_skip_tags(tags(&["tagged"]));
        assert!(!filter.should_run(&tags(&["web"])));
        assert!(filter.should_run(&[]));
    }

    #[test]
    fn test_skip_tags() {
        let filter = TagFilter::new().with_skip_tags(tags(&["debug"]));
        assert!(filter.should_run(&tags(&["deploy"])));
        assert!(!filter.should_run(&tags(&["deploy", "debug"])));
    }

    #[test]
    fn test_skip_all_keeps_always() {
        let filter = TagFilter::new().with_skip_tags(tags(&["all"]));
        assert!(!filter.should_run(&tags(&["web"])));
        assert!(filter.should_run(&tags(&["always"])));
    }

    #[test]
    fn test_case_insensitive() {
        let filter = TagFilter::new().with_tags(tags(&["Deploy"]));
        assert!(filter.should_run(&tags(&["DEPLOY"])));
    }
}
