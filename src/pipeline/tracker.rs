use serde::Serialize;

use crate::pipeline::config::Execution;
use crate::verse::get_max_line_number;

/// Per-cycle snapshot of one execution. Never persisted.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ExecutionProgress {
    pub execution: String,
    pub current_max_line: u64,
    pub source_max_line: u64,
    pub adjusted_progress: f64,
    pub completed: bool,
    pub same_line_factor: f64,
}

impl ExecutionProgress {
    /// Plain completion ratio in `[0, 1]` for display.
    pub fn ratio(&self) -> f64 {
        if self.source_max_line == 0 {
            return 1.0;
        }
        (self.current_max_line as f64 / self.source_max_line as f64).min(1.0)
    }
}

pub fn compute_progress(
    execution: &str,
    current_max_line: u64,
    source_max_line: u64,
    same_line_factor: f64,
) -> ExecutionProgress {
    // Nothing to translate counts as done; keeps NaN/inf out of scheduling.
    if source_max_line == 0 {
        return ExecutionProgress {
            execution: execution.to_string(),
            current_max_line,
            source_max_line,
            adjusted_progress: 0.0,
            completed: true,
            same_line_factor: 0.0,
        };
    }

    let completed = current_max_line >= source_max_line;
    let mut factor = if same_line_factor.is_finite() && same_line_factor > 0.0 {
        same_line_factor
    } else {
        0.0
    };
    if completed {
        factor = 0.0;
    }

    let current = current_max_line as f64;
    let inverse_progress = 1.0 - current / source_max_line as f64;
    let weight = if factor == 0.0 { 1.0 } else { current / factor };

    ExecutionProgress {
        execution: execution.to_string(),
        current_max_line,
        source_max_line,
        adjusted_progress: inverse_progress * weight,
        completed,
        same_line_factor: factor,
    }
}

pub fn track_progress(
    execution: &Execution,
    source_max_line: u64,
) -> anyhow::Result<ExecutionProgress> {
    let current = get_max_line_number(&execution.output_path)?;
    Ok(compute_progress(
        &execution.name,
        current,
        source_max_line,
        execution.same_line_factor,
    ))
}
