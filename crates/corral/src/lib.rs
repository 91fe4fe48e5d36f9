#![doc = include_str!("../README.md")]

mod completion;
mod config;
mod dispatcher;
mod error;
mod job;
mod pool;
mod stats;
mod worker;

#[cfg(test)]
mod tests;

pub use crate::completion::*;
pub use crate::config::*;
pub use crate::error::*;
pub use crate::job::*;
pub use crate::pool::*;
pub use crate::stats::StatsSnapshot;
