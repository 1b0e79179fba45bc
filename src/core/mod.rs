//! Core: config, template model, stack builder, ordering, checks, and execution.

pub mod checks;
pub mod codegen;
pub mod error;
pub mod executor;
pub mod lint;
pub mod naming;
pub mod parser;
pub mod planner;
pub mod resolver;
pub mod stack;
pub mod state;
pub mod template;
pub mod types;
