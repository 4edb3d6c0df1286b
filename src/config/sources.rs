//! Configuration sources, lowest precedence first: global file, workspace files.

pub mod global_file;
pub mod workspace_file;
