#![forbid(unsafe_code)]

pub mod cli;
pub mod config;
pub mod error;
pub mod git;
pub mod lock;
pub mod mirror;
mod paths;
pub mod report;
pub mod run;
pub mod telemetry;
pub mod upgrade;

pub use error::{Effect, Error, Transience};
pub type Result<T> = std::result::Result<T, Error>;
