//! Local analysis sandbox.
//!
//! Generated analysis code is parsed into a small statement language whose only
//! callable functions are the tools in [`tools`]. Nothing else is reachable, so
//! a bad snippet can fail but cannot touch the host.

pub mod chart;
pub mod interpreter;
pub mod parser;
pub mod tools;

pub use chart::{ChartKind, ChartPoint, ChartSeries, ChartSpec};
pub use interpreter::{Execution, Interpreter};
pub use parser::{parse_snippet, strip_code_fences, Snippet};
pub use tools::{tool_definitions, Tool, ToolContext, ToolOutput};
