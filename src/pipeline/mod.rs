pub mod assemble;
pub mod chunk;
pub mod config;
pub mod driver;
pub mod extra_data;
pub mod merge;
pub mod prompts;
pub mod scheduler;
mod trace;
pub mod tracker;

pub use config::{init_default_config, Execution, PipelineConfig};
pub use driver::{GroupReport, RunOutcome, TranslationDriver};
pub use trace::TraceWriter;
