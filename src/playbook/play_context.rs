//! Run-wide settings layered over a play's own.

use serde::{Deserialize, Serialize};

use super::{EntityId, Playbook, Resolve};
use crate::tags::TagFilter;
use crate::vars::Vars;

/// Settings that apply to every task of a play for one run.
///
/// Command-line values win over the play's fields. [`PlayContext::for_play`]
/// fills the gaps from the play, except `connection`: a forced transport
/// comes only from the command line, and otherwise each task resolves its
/// own through the block and play chain.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayContext {
    /// Forced connection type; `None` lets tasks and hosts decide
    pub connection: Option<String>,
    pub remote_user: Option<String>,
    pub port: Option<u16>,
    pub only_tags: Vec<String>,
    pub skip_tags: Vec<String>,
    /// Glob of the task name to start at
    pub start_at_task: Option<String>,
    pub check_mode: bool,
    pub diff: bool,
    pub force_handlers: bool,
    /// Variables that override every other scope
    pub extra_vars: Vars,
}

impl PlayContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Derive the context for one play.
    pub fn for_play(&self, book: &Playbook, play: EntityId) -> Self {
        let view = book.entity_ref(play);
        let mut ctx = self.clone();
        if ctx.remote_user.is_none() {
            ctx.remote_user = view.get_string("remote_user");
        }
        if ctx.port.is_none() {
            ctx.port = view.get_int("port").and_then(|p| u16::try_from(p).ok());
        }
        ctx.check_mode |= view.get_bool("check_mode");
        ctx.diff |= view.get_bool("diff");
        ctx.force_handlers |= view.get_bool("force_handlers");
        ctx
    }

    /// The tag filter used when compiling plays.
    pub fn tag_filter(&self) -> TagFilter {
        TagFilter::new()
            .with_tags(self.only_tags.clone())
            .with_skip_tags(self.skip_tags.clone())
    }
}
