use std::cell::RefCell;
use std::collections::HashMap;
use std::io::{self, Write};
use std::time::Instant;

/// Where an execution stood the first time it reported in this process.
struct Baseline {
    at: Instant,
    verse: u64,
}

/// Human-facing progress lines on stderr. Passed explicitly into the driver; a disabled
/// instance swallows everything, so nothing in the engine depends on it.
pub struct ConsoleProgress {
    enabled: bool,
    t0: Instant,
    baselines: RefCell<HashMap<String, Baseline>>,
}

impl ConsoleProgress {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            t0: Instant::now(),
            baselines: RefCell::new(HashMap::new()),
        }
    }

    pub fn quiet() -> Self {
        Self::new(false)
    }

    pub fn info(&self, msg: impl AsRef<str>) {
        if !self.enabled {
            return;
        }
        let ts = fmt_elapsed(self.t0.elapsed().as_secs_f64());
        let mut stderr = io::stderr().lock();
        let _ = writeln!(stderr, "[{ts}] {}", msg.as_ref());
    }

    /// `current`/`total` are verse numbers: the merged cursor and the source maximum.
    /// Rate and ETA are measured per execution, from its first report in this run, so a
    /// resumed execution is not credited with verses translated earlier.
    pub fn verses(&self, execution: &str, current: u64, total: u64) {
        if !self.enabled {
            return;
        }
        let (advanced, secs) = {
            let mut baselines = self.baselines.borrow_mut();
            let base = baselines
                .entry(execution.to_string())
                .or_insert_with(|| Baseline {
                    at: Instant::now(),
                    verse: current,
                });
            (current.saturating_sub(base.verse), base.at.elapsed().as_secs_f64())
        };
        let line = fmt_verse_line(execution, current, total, verses_per_minute(advanced, secs));
        let ts = fmt_elapsed(self.t0.elapsed().as_secs_f64());
        let mut stderr = io::stderr().lock();
        let _ = writeln!(stderr, "[{ts}] {line}");
    }
}

/// `None` until there is at least a second of history and some movement.
fn verses_per_minute(advanced: u64, secs: f64) -> Option<f64> {
    if advanced == 0 || secs.is_nan() || secs < 1.0 {
        return None;
    }
    Some(advanced as f64 * 60.0 / secs)
}

fn fmt_verse_line(execution: &str, current: u64, total: u64, rate: Option<f64>) -> String {
    let total = total.max(1);
    let current = current.min(total);
    let pct = (current as f64 / total as f64) * 100.0;
    let mut line = format!("{execution} verse {current}/{total} ({pct:5.1}%)");
    if let Some(rate) = rate {
        let eta = (total - current) as f64 * 60.0 / rate;
        line.push_str(&format!(", {rate:.1} verses/min, eta {}", fmt_elapsed(eta)));
    }
    line
}

fn fmt_elapsed(seconds: f64) -> String {
    let seconds = seconds.max(0.0) as u64;
    let h = seconds / 3600;
    let m = (seconds % 3600) / 60;
    let s = seconds % 60;
    if h > 0 {
        format!("{h:02}:{m:02}:{s:02}")
    } else {
        format!("{m:02}:{s:02}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn elapsed_formatting() {
        assert_eq!(fmt_elapsed(5.9), "00:05");
        assert_eq!(fmt_elapsed(125.0), "02:05");
        assert_eq!(fmt_elapsed(3725.0), "01:02:05");
        assert_eq!(fmt_elapsed(-3.0), "00:00");
    }

    #[test]
    fn rate_needs_history_and_movement() {
        assert_eq!(verses_per_minute(0, 30.0), None);
        assert_eq!(verses_per_minute(10, 0.2), None);
        assert_eq!(verses_per_minute(10, f64::NAN), None);
        assert_eq!(verses_per_minute(10, 30.0), Some(20.0));
    }

    #[test]
    fn verse_line_with_and_without_rate() {
        assert_eq!(fmt_verse_line("gpt", 25, 100, None), "gpt verse 25/100 ( 25.0%)");
        assert_eq!(
            fmt_verse_line("gpt", 40, 100, Some(30.0)),
            "gpt verse 40/100 ( 40.0%), 30.0 verses/min, eta 02:00"
        );
        assert_eq!(fmt_verse_line("empty", 0, 0, None), "empty verse 0/1 (  0.0%)");
    }

    #[test]
    fn baselines_are_per_execution() {
        let progress = ConsoleProgress::new(true);
        progress.verses("a", 10, 100);
        progress.verses("b", 3, 100);
        progress.verses("a", 20, 100);
        let baselines = progress.baselines.borrow();
        assert_eq!(baselines["a"].verse, 10);
        assert_eq!(baselines["b"].verse, 3);
    }
}
