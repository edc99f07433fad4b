//! CLI command handling

pub mod exec;
pub mod output;
pub mod serve;

pub use exec::*;
pub use output::*;
pub use serve::*;
