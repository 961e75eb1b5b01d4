use crate::verse::Verse;

/// One contiguous span of source verses sent to the model together.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChunkPlan {
    pub text: String,
    pub first_line: u64,
    pub last_line: u64,
    /// `None` when the chunk ends on the highest representable verse number.
    pub next_start_line: Option<u64>,
    /// Character count of the chunk text including one newline per line.
    pub size_chars: usize,
    pub separator_count: usize,
    /// Set when a single line larger than the whole budget had to be taken alone.
    pub over_budget: bool,
}

impl ChunkPlan {
    pub fn verse_count(&self, verses: &[Verse]) -> usize {
        verses
            .iter()
            .filter(|v| v.number >= self.first_line && v.number <= self.last_line)
            .count()
    }
}

fn line_cost(line: &str) -> usize {
    line.chars().count() + 1
}

/// Greedy fill from `start_line` up to `max_line` within `budget_chars` (minus the preamble),
/// then cut back to the last separator so a chunk ends on a paragraph boundary when it can.
///
/// `verses` must be ascending by number. Returns `None` once nothing is left in range.
pub fn plan_chunk(
    verses: &[Verse],
    start_line: u64,
    max_line: u64,
    budget_chars: usize,
    preamble_len: usize,
) -> Option<ChunkPlan> {
    let begin = verses.partition_point(|v| v.number < start_line);
    let candidates = verses[begin..]
        .iter()
        .take_while(|v| v.number <= max_line);

    let mut picked: Vec<(&Verse, String)> = Vec::new();
    let mut used = 0usize;
    let mut over_budget = false;
    for verse in candidates {
        let line = verse.to_line();
        let cost = line_cost(&line);
        if used + cost + preamble_len > budget_chars {
            if picked.is_empty() {
                // Never stall: an oversize line goes out alone.
                tracing::warn!(
                    verse = verse.number,
                    cost,
                    budget_chars,
                    preamble_len,
                    "single verse exceeds chunk budget"
                );
                used += cost;
                picked.push((verse, line));
                over_budget = true;
            }
            break;
        }
        used += cost;
        picked.push((verse, line));
    }

    if picked.is_empty() {
        return None;
    }

    if let Some(sep_idx) = picked.iter().rposition(|(v, _)| v.body.is_separator()) {
        if sep_idx + 1 < picked.len() {
            picked.truncate(sep_idx + 1);
        }
    }

    let first_line = picked.first().map(|(v, _)| v.number)?;
    let last_line = picked.last().map(|(v, _)| v.number)?;
    let size_chars = picked.iter().map(|(_, l)| line_cost(l)).sum();
    let separator_count = picked
        .iter()
        .filter(|(v, _)| v.body.is_separator())
        .count();
    let text = picked
        .iter()
        .map(|(_, l)| l.as_str())
        .collect::<Vec<_>>()
        .join("\n");

    Some(ChunkPlan {
        text,
        first_line,
        last_line,
        next_start_line: last_line.checked_add(1),
        size_chars,
        separator_count,
        over_budget,
    })
}
