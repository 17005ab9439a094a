pub mod hierarchy;
pub mod ucb;

pub use hierarchy::{hierarchical_bonus, HierarchyContext, ParentStats};
pub use ucb::{confidence_bonus, exploration_bonus, score_arms, ArmScore, ArmStats};
