//! `prereq`: a test scheduler with runtime dependencies.
//!
//! Tests declare prerequisites while they run. A test whose prerequisite has
//! not completed is postponed, the postponed set is ordered prerequisites
//! first, and the tree is walked again until nothing more can be resolved.

pub mod cli;
pub mod emit;
pub mod graph;
pub mod run;
pub mod runner;
pub mod suite;
pub mod tree;
pub mod util;
