pub mod identity;

pub use identity::{GroupId, RunArena, RunId, RunInstance};
