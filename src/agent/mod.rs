pub mod react;
pub mod tools;

pub use react::{ReactLoop, ReactOutcome, ReasoningStep};
pub use tools::{AsyncToolExecutor, ToolRegistry};
