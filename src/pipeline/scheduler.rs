use crate::pipeline::tracker::ExecutionProgress;

/// Pick the executions that advance this cycle.
///
/// With `keep_aligned`, only incomplete executions sitting exactly at the lowest
/// `adjusted_progress` are chosen (ties run together). Without it, every incomplete execution
/// runs. An empty pick falls back to the whole list so the loop never stalls on a bad tie.
pub fn select_next(progress: &[ExecutionProgress], keep_aligned: bool) -> Vec<&ExecutionProgress> {
    let pending = progress.iter().filter(|p| !p.completed);

    let selected: Vec<&ExecutionProgress> = if keep_aligned {
        let min = pending
            .clone()
            .map(|p| p.adjusted_progress)
            .fold(f64::INFINITY, f64::min);
        pending.filter(|p| p.adjusted_progress == min).collect()
    } else {
        pending.collect()
    };

    if selected.is_empty() {
        return progress.iter().collect();
    }
    selected
}
