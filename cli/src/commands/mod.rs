mod entry;
mod helpers;
mod import;
mod stats;
mod user;

pub(crate) use entry::{EntryArgs, cmd_delete, cmd_edit, cmd_history, cmd_log};
pub(crate) use import::{cmd_export, cmd_import};
pub(crate) use stats::cmd_stats;
pub(crate) use user::{cmd_user_add, cmd_user_delete, cmd_user_goals, cmd_user_list};
