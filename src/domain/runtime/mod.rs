//! Bar-by-bar execution of compiled units.

pub mod context;
pub mod eval;
pub mod scheduler;
pub mod security;
pub mod series;

pub use context::{ExecutionContext, RunResult};
pub use eval::{Evaluator, ScriptOutput};
pub use scheduler::{Page, PageEvent, Pages, Runner};
pub use series::Series;
