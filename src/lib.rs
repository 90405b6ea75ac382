//! DeepDive library crate
//!
//! Root cause analysis as a forest of "five whys" trees: each tree starts at a problem
//! statement and descends through why steps to root causes, solutions and actions. The
//! core is the data model and its pure tree algorithms; a session layer enforces the
//! analysis-wide rules and drives AI-assisted suggestions through a pluggable text
//! generator.

pub mod api;
pub mod assist;
pub mod cli;
pub mod context;
pub mod generate;
pub mod ids;
pub mod models;
pub mod tree;

pub use models::Core;
