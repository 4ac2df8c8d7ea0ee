//! # Conjecture Symbolic
//!
//! A symbolic draw provider for Conjecture-style property testing, together
//! with the controller that explores the paths of a property one iteration at
//! a time.
//!
//! Every draw of a property answers with a solver-backed proxy instead of a
//! concrete value. Comparisons on proxies become branch points of a path tree;
//! each iteration steers down an unexplored branch, and a property that passes
//! on every branch of a finite tree is reported as verified. Failures found on
//! a symbolic path are replayed concretely before they are reported.
//!
//! ```no_run
//! use conjecture_symbolic::{ExplorationRunner, RunResult, RunnerConfig};
//!
//! let mut runner = ExplorationRunner::new(RunnerConfig::default()).unwrap();
//! let result = runner.run(|tc| tc.draw_integer(0, 9) < 10i128).unwrap();
//! assert_eq!(result, RunResult::Verified);
//! ```

pub mod choice;
pub mod config;
pub mod data;
pub mod datatree;
pub mod engine;
pub mod errors;
pub mod observability;
pub mod providers;
pub mod realization;
pub mod session;
pub mod solver;
pub mod symbolic;
mod translator;
pub mod validator;
pub mod verdict;

// Re-export core types for easy access
pub use choice::{ChoiceType, ChoiceValue, Constraints};
pub use config::{ConfigError, ProviderConfig};
pub use data::{interrupt, Abort, DrawBudget, DrawRequest, Interrupt, TestCase};
pub use datatree::{PathTree, TreeStats};
pub use engine::{ExplorationRunner, RunResult, RunnerConfig, RunnerStats};
pub use errors::{BridgeError, CannotProceedScope};
pub use observability::{IterationObservation, LogSink, MemorySink, ObservationSink};
pub use providers::{
    provider_registry, register_symbolic_backend, ExplorationStatus, PrimitiveProvider, ProviderRegistry,
    RandomProvider, ReplayProvider, SymbolicProvider,
};
pub use realization::{host_scope, in_host_scope, RealizationGuard};
pub use session::{session_active, ExplorationProbe};
pub use solver::{EngineError, EnumerativeEngine, SymbolicEngine};
pub use symbolic::{SymBool, SymBytes, SymFloat, SymInt, SymStr, Value};
pub use verdict::{Counterexample, DiscardReason, Verdict};
