//! Triage Engine: rule chain and composition execution for email triage.

pub mod capabilities;
pub mod config;
pub mod engine;
pub mod error;
pub mod rules;
pub mod store;

pub use engine::{EngineDeps, RuleEngine};
pub use error::{Error, Result};
