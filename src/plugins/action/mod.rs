//! Built-in action handlers.
//!
//! Most actions only need the task's connection: they build a command line,
//! run it through [`ActionContext::exec`] and shape the output into a
//! [`TaskResult`](crate::executor::TaskResult). `normal` is the fallback for
//! every action without a handler of its own and ships a module file from
//! the catalog to the host.

pub mod command;
pub mod debug;
pub mod misc;
pub mod normal;
pub mod setup;

pub use command::{CommandAction, CommandKind};
pub use debug::DebugAction;
pub use misc::{AssertAction, FailAction, MetaAction, PingAction, SetFactAction, SkippedAction};
pub use normal::NormalAction;
pub use setup::SetupAction;

use std::sync::Arc;

use crate::traits::ActionHandler;

/// Every action handler shipped with the engine.
pub fn builtin_actions() -> Vec<Arc<dyn ActionHandler>> {
    vec![
        Arc::new(NormalAction),
        Arc::new(CommandAction::new(CommandKind::Command)),
        Arc::new(CommandAction::new(CommandKind::Shell)),
        Arc::new(CommandAction::new(CommandKind::Raw)),
        Arc::new(DebugAction),
        Arc::new(SetupAction),
        Arc::new(SetFactAction),
        Arc::new(FailAction),
        Arc::new(PingAction),
        Arc::new(AssertAction),
        Arc::new(MetaAction),
        Arc::new(SkippedAction::new("include")),
        Arc::new(SkippedAction::new("include_tasks")),
        Arc::new(SkippedAction::new("import_tasks")),
        Arc::new(SkippedAction::new("include_vars")),
    ]
}
