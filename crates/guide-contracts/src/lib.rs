pub mod error;
pub mod events;
pub mod geometry;
pub mod plan;
pub mod profiles;
pub mod store;

pub use error::{ContractError, ContractResult};
pub use geometry::{NormalizedBox, NormalizedPoint, PixelBox};
pub use plan::{
    actionable_steps, find_object_by_label, merge_objects, DetectedObject, PixelPlan, Plan,
    PlanState, PlanStep, StepStatus, TrajectoryPoint,
};
pub use profiles::{PlanningProfile, ProfileRegistry, TrajectoryPolicy};
pub use store::GoalStore;
