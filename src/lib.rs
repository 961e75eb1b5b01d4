pub mod backend;
pub mod config;
pub mod error;
pub mod pipeline;
pub mod progress;
pub mod verse;
