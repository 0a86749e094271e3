pub mod app;
pub mod cli;
pub mod config;
pub mod logging;
pub mod matcher;
pub mod reconcile;
pub mod schedule;
pub mod shutdown;
pub mod storage;
pub mod upload;

pub use app::run;
