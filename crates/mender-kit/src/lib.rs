//! Default collaborators for the mender orchestrator.
//!
//! Simple, in-memory implementations of every collaborator contract:
//! regex analysis, template generation, rule-based validation, handler
//! dispatch for execution and tallied learning. [`register_defaults`] wires
//! them into a container under their canonical names.

pub mod analyzer;
pub mod error;
pub mod executor;
pub mod generator;
pub mod learning;
pub mod validator;
pub mod wiring;

pub use analyzer::{builtin_rules, CauseRule, PatternAnalyzer};
pub use error::KitError;
pub use executor::{ActionHandler, FnHandler, HandlerExecutor, LoggingHandler};
pub use generator::{builtin_templates, StrategyTemplate, TemplateStrategyGenerator};
pub use learning::InMemoryLearningSystem;
pub use validator::{RuleValidationRunner, ValidationRules};
pub use wiring::{register_defaults, KitOptions, LEARNING_STORE};
