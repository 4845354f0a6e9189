pub mod executor;
pub mod router;

pub use executor::{ExecutionMode, ExecutionReport, ExecutorOptions, HybridExecutor};
pub use router::{Complexity, RouteContext, Router, RoutingDecision};
