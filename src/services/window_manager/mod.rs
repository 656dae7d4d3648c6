//! WindowManager: граница с оконным менеджером
//!
//! This module and its submodules are responsible ONLY for talking to the
//! compositor: establishing per-category event subscriptions, answering
//! window queries and running commands. They MUST NOT decide where a window
//! goes; placement decisions belong to the resolution cascade and the
//! assignment executor.

mod dry_run;
mod sway;
mod r#trait;

pub use self::dry_run::{CommandBehavior, DryRunWindowManager};
pub use self::r#trait::{create_window_manager, CommandReply, CommandReplies, SubscriptionTask, WindowManager};
