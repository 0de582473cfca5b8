mod helpers;
mod plan;
mod queue;
mod sync;

pub(crate) use plan::{PlanInput, cmd_plan, cmd_plan_delete, cmd_plans};
pub(crate) use queue::{
    build_operation, cmd_queue_clear, cmd_queue_drain, cmd_queue_push, cmd_queue_show,
};
pub(crate) use sync::cmd_sync;
