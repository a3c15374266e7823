pub mod config;
pub mod run;
pub mod stack;
pub mod steps;
