pub mod build;
pub mod config;
pub mod decision;
pub mod diagnostics;
pub mod error;
pub mod hooks;
pub mod inspect;
pub mod io;
pub mod launch;
pub mod lock;
pub mod orchestrator;
pub mod paths;
pub mod readiness;
pub mod runtime;
pub mod secret;

#[cfg(test)]
mod testing;

pub use error::{Result, StackError};
