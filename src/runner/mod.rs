pub mod context;
pub mod display;
pub mod executor;
pub mod invoker;
pub mod logger;
pub mod report;
pub mod result;
pub mod store;
pub mod walker;
