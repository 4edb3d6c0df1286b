//! CLI domain: parse, route, output and presentation only.
//! Engine work goes through `RunContext`; formatting lives in presentation.

mod output;
mod parse;
mod presentation;
mod route;

pub use output::map_error;
pub use parse::{Cli, Commands};
pub use presentation::{format_script_report_json, format_script_report_text, format_usage};
pub use route::{CommandOutcome, RunContext, ScriptReport};
