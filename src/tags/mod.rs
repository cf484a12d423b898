//! Tag selection for tasks.
//!
//! A play is compiled for iteration through a [`TagFilter`] built from the
//! run's `only_tags` and `skip_tags`. Tags resolve through the play, block
//! and task chain before filtering, so a block's tags apply to every task
//! inside it.
//!
//! # Special Tags
//!
//! - `always`: the task runs regardless of selection unless `always` is skipped
//! - `never`: the task runs only when `never` or one of its tags is selected
//! - `tagged`: matches any task with at least one tag
//! - `untagged`: matches tasks with no tags
//! - `all`: matches every task except `never` ones
//!
//! # Example
//!
//! ```rust
//! use playengine::tags::TagFilter;
//!
//! let filter = TagFilter::new()
//!     .with_tags(vec!["deploy".to_string()])
//!     .with_skip_tags(vec!["debug".to_string()]);
//!
//! assert!(filter.should_run(&["deploy".to_string(), "web".to_string()]));
//! assert!(!filter.should_run(&["deploy".to_string(), "debug".to_string()]));
//! assert!(filter.should_run(&["always".to_string()]));
//! ```

mod filter;

pub use filter::TagFilter;

/// Special tag constants
pub mod special {
    /// Tag that causes a task to always run regardless of tag selection
    pub const ALWAYS: &str = "always";

    /// Tag that causes a task to never run unless explicitly selected
    pub const NEVER: &str = "never";

    /// Matches any task that has at least one tag
    pub const TAGGED: &str = "tagged";

    /// Matches any task with no tags
    pub const UNTAGGED: &str = "untagged";

    /// Matches all tasks
    pub const ALL: &str = "all";
}

/// Check if a tag is a special tag
pub fn is_special_tag(tag: &str) -> bool {
    matches!(
        tag.to_lowercase().as_str(),
        special::ALWAYS | special::NEVER | special::TAGGED | special::UNTAGGED | special::ALL
    )
}

/// Split comma separated tag arguments into a flat, trimmed list.
pub fn parse_tag_list<I, S>(args: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    args.into_iter()
        .flat_map(|arg| {
            arg.as_ref()
                .split(',')
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(str::to_string)
                .collect::<Vec<_>>()
        })
        .collect()
}
