//! Rule, chain, and composition definitions and their validation.

pub mod model;
pub mod validator;

pub use model::{
    ActionDescriptor, ConditionDescriptor, ExecutionMode, Logic, RetryConfig, Rule, RuleChain,
    RuleComposition, StepCondition,
};
pub use validator::{ValidationReport, Validator};
