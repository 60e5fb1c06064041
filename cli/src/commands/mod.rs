mod helpers;
mod run;
mod stats;
mod weight;

pub(crate) use run::{cmd_run_delete, cmd_run_list, cmd_run_log};
pub(crate) use stats::{
    cmd_achievements, cmd_goals, cmd_records, cmd_review, cmd_streak, cmd_summary,
};
pub(crate) use weight::{cmd_weight_delete, cmd_weight_history, cmd_weight_log};
