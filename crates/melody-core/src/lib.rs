pub mod client;
pub mod config;
pub mod error;
pub mod flow;
pub mod io;
pub mod paths;
pub mod pulumi;
pub mod runner;
pub mod stack;

pub use error::{MelodyError, Result};
