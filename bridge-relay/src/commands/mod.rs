//! CLI command implementations.

pub mod allow;
pub mod run;
