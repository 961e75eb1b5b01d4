use std::collections::BTreeMap;
use std::path::Path;

use anyhow::anyhow;

use crate::verse::{
    parse_verse_map, read_text_or_empty, serialize_verses, write_text_file, DuplicatePolicy,
    VerseBody,
};

pub const CONFLICT_OPEN: &str = "<<<<<<<";
pub const CONFLICT_CLOSE: &str = ">>>>>>>";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum MergeStrategy {
    #[default]
    Replace,
    Append,
    Prepend,
    MarkConflict,
}

impl MergeStrategy {
    pub fn parse(s: &str) -> anyhow::Result<Self> {
        let key = s
            .trim()
            .to_ascii_lowercase()
            .replace(|c: char| c == '-' || c == '_', "");
        match key.as_str() {
            "replace" => Ok(Self::Replace),
            "append" => Ok(Self::Append),
            "prepend" => Ok(Self::Prepend),
            "markconflict" | "conflict" => Ok(Self::MarkConflict),
            other => Err(anyhow!("unknown merge strategy: {other}")),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MergeOptions {
    pub strategy: MergeStrategy,
    /// When false, verses already present are never touched.
    pub overwrite: bool,
    /// When both sides hold different non-empty text, keep the stored one.
    pub keep_existing_on_conflict: bool,
    pub append_new_verses: bool,
}

impl Default for MergeOptions {
    fn default() -> Self {
        Self {
            strategy: MergeStrategy::Replace,
            overwrite: true,
            keep_existing_on_conflict: false,
            append_new_verses: true,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MergeStats {
    pub updated: usize,
    pub appended: usize,
    pub unchanged: usize,
    pub kept: usize,
    pub skipped: usize,
    pub conflicts: usize,
}

impl MergeStats {
    pub fn touched(&self) -> usize {
        self.updated + self.appended
    }
}

#[derive(Clone, Debug)]
pub struct MergeOutcome {
    pub text: String,
    pub stats: MergeStats,
}

/// Verse-keyed merge of `updates` into `existing`. The result is always ascending by number,
/// so chunks written out of order converge to the same file.
pub fn merge_verse_text(
    existing: &str,
    updates: &BTreeMap<u64, VerseBody>,
    opts: &MergeOptions,
) -> MergeOutcome {
    let mut merged = parse_verse_map(existing, DuplicatePolicy::KeepLast);
    let mut stats = MergeStats::default();

    for (&number, new_body) in updates {
        if !merged.contains_key(&number) {
            if opts.append_new_verses {
                merged.insert(number, new_body.clone());
                stats.appended += 1;
            } else {
                tracing::debug!(verse = number, "skip new verse (append disabled)");
                stats.skipped += 1;
            }
            continue;
        }
        let old_body = &merged[&number];

        if old_body == new_body {
            stats.unchanged += 1;
            continue;
        }
        if !opts.overwrite {
            stats.kept += 1;
            continue;
        }

        let conflict = match (old_body, new_body) {
            (VerseBody::Text(a), VerseBody::Text(b)) => {
                !a.trim().is_empty() && !b.trim().is_empty()
            }
            _ => false,
        };
        if conflict && opts.keep_existing_on_conflict {
            stats.kept += 1;
            continue;
        }

        let combined = combine(old_body, new_body, opts.strategy);
        if opts.strategy == MergeStrategy::MarkConflict && conflict {
            stats.conflicts += 1;
        }
        merged.insert(number, combined);
        stats.updated += 1;
    }

    MergeOutcome {
        text: serialize_verses(&merged),
        stats,
    }
}

fn combine(old: &VerseBody, new: &VerseBody, strategy: MergeStrategy) -> VerseBody {
    let (VerseBody::Text(a), VerseBody::Text(b)) = (old, new) else {
        return new.clone();
    };
    if a.trim().is_empty() {
        return new.clone();
    }
    if b.trim().is_empty() {
        return old.clone();
    }
    match strategy {
        MergeStrategy::Replace => new.clone(),
        MergeStrategy::Append => VerseBody::Text(format!("{} {}", a.trim_end(), b.trim_start())),
        MergeStrategy::Prepend => VerseBody::Text(format!("{} {}", b.trim_end(), a.trim_start())),
        MergeStrategy::MarkConflict => VerseBody::Text(mark_conflict(a, b)),
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum DiffOp {
    Equal,
    Delete,
    Insert,
}

fn word_diff<'a>(old: &[&'a str], new: &[&'a str]) -> Vec<(DiffOp, &'a str)> {
    let (n, m) = (old.len(), new.len());
    // lcs[i][j] = LCS length of old[i..] and new[j..]
    let mut lcs = vec![vec![0usize; m + 1]; n + 1];
    for i in (0..n).rev() {
        for j in (0..m).rev() {
            lcs[i][j] = if old[i] == new[j] {
                lcs[i + 1][j + 1] + 1
            } else {
                lcs[i + 1][j].max(lcs[i][j + 1])
            };
        }
    }

    let mut ops = Vec::with_capacity(n + m);
    let (mut i, mut j) = (0, 0);
    while i < n && j < m {
        if old[i] == new[j] {
            ops.push((DiffOp::Equal, old[i]));
            i += 1;
            j += 1;
        } else if lcs[i + 1][j] >= lcs[i][j + 1] {
            ops.push((DiffOp::Delete, old[i]));
            i += 1;
        } else {
            ops.push((DiffOp::Insert, new[j]));
            j += 1;
        }
    }
    ops.extend(old[i..].iter().map(|w| (DiffOp::Delete, *w)));
    ops.extend(new[j..].iter().map(|w| (DiffOp::Insert, *w)));
    ops
}

/// Word-level diff of two verse texts wrapped in conflict markers. Deleted runs render as
/// `[-...-]`, inserted runs as `{+...+}`; every word of both sides survives.
pub fn mark_conflict(old: &str, new: &str) -> String {
    let a: Vec<&str> = old.split_whitespace().collect();
    let b: Vec<&str> = new.split_whitespace().collect();
    let ops = word_diff(&a, &b);

    let mut parts: Vec<String> = Vec::new();
    let mut idx = 0usize;
    while idx < ops.len() {
        let op = ops[idx].0;
        let mut run: Vec<&str> = Vec::new();
        while idx < ops.len() && ops[idx].0 == op {
            run.push(ops[idx].1);
            idx += 1;
        }
        let joined = run.join(" ");
        parts.push(match op {
            DiffOp::Equal => joined,
            DiffOp::Delete => format!("[-{joined}-]"),
            DiffOp::Insert => format!("{{+{joined}+}}"),
        });
    }

    format!("{CONFLICT_OPEN} {} {CONFLICT_CLOSE}", parts.join(" "))
}

/// Read, merge, rewrite. Callers must serialize writes per path.
pub fn merge_into_file(
    path: &Path,
    updates: &BTreeMap<u64, VerseBody>,
    opts: &MergeOptions,
) -> anyhow::Result<MergeStats> {
    let existing = read_text_or_empty(path)?;
    let outcome = merge_verse_text(&existing, updates, opts);
    write_text_file(path, &outcome.text)?;
    Ok(outcome.stats)
}

/// Merge an externally produced partial verse file into `target`.
pub fn merge_partial_file(
    target: &Path,
    partial: &Path,
    opts: &MergeOptions,
) -> anyhow::Result<MergeStats> {
    if !partial.exists() {
        return Err(anyhow!("partial file not found: {}", partial.display()));
    }
    let updates = parse_verse_map(&read_text_or_empty(partial)?, DuplicatePolicy::KeepLast);
    let stats = merge_into_file(target, &updates, opts)?;
    tracing::info!(
        file = %target.display(),
        partial = %partial.display(),
        updated = stats.updated,
        appended = stats.appended,
        conflicts = stats.conflicts,
        "merged partial file"
    );
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn updates(items: &[(u64, &str)]) -> BTreeMap<u64, VerseBody> {
        items
            .iter()
            .map(|(n, t)| (*n, VerseBody::from_content(t)))
            .collect()
    }

    #[test]
    fn out_of_order_chunks_converge() {
        let opts = MergeOptions::default();
        let mut text = String::new();
        for chunk in [updates(&[(1, "a")]), updates(&[(3, "c")]), updates(&[(2, "b")])] {
            text = merge_verse_text(&text, &chunk, &opts).text;
        }
        assert_eq!(text, "|1.| a\n|2.| b\n|3.| c");

        let mut ascending = String::new();
        for chunk in [updates(&[(1, "a")]), updates(&[(2, "b")]), updates(&[(3, "c")])] {
            ascending = merge_verse_text(&ascending, &chunk, &opts).text;
        }
        assert_eq!(text, ascending);
    }

    #[test]
    fn replace_overwrites_and_counts() {
        let out = merge_verse_text(
            "|1.| old\n|2.| same",
            &updates(&[(1, "new"), (2, "same"), (4, "more")]),
            &MergeOptions::default(),
        );
        assert_eq!(out.text, "|1.| new\n|2.| same\n|4.| more");
        assert_eq!(out.stats.updated, 1);
        assert_eq!(out.stats.unchanged, 1);
        assert_eq!(out.stats.appended, 1);
    }

    #[test]
    fn no_overwrite_only_fills_gaps() {
        let opts = MergeOptions {
            overwrite: false,
            ..MergeOptions::default()
        };
        let out = merge_verse_text("|1.| old", &updates(&[(1, "new"), (2, "b")]), &opts);
        assert_eq!(out.text, "|1.| old\n|2.| b");
        assert_eq!(out.stats.kept, 1);
    }

    #[test]
    fn append_new_disabled_skips_unknown_verses() {
        let opts = MergeOptions {
            append_new_verses: false,
            ..MergeOptions::default()
        };
        let out = merge_verse_text("|1.| old", &updates(&[(1, "new"), (2, "b")]), &opts);
        assert_eq!(out.text, "|1.| new");
        assert_eq!(out.stats.skipped, 1);
    }

    #[test]
    fn keep_existing_on_conflict_still_fills_empty_text() {
        let opts = MergeOptions {
            keep_existing_on_conflict: true,
            ..MergeOptions::default()
        };
        let out = merge_verse_text("|1.| old\n|2.| ", &updates(&[(1, "new"), (2, "b")]), &opts);
        assert_eq!(out.text, "|1.| old\n|2.| b");
    }

    #[test]
    fn append_and_prepend_concatenate() {
        let append = MergeOptions {
            strategy: MergeStrategy::Append,
            ..MergeOptions::default()
        };
        let prepend = MergeOptions {
            strategy: MergeStrategy::Prepend,
            ..MergeOptions::default()
        };
        let u = updates(&[(1, "second")]);
        assert_eq!(merge_verse_text("|1.| first", &u, &append).text, "|1.| first second");
        assert_eq!(merge_verse_text("|1.| first", &u, &prepend).text, "|1.| second first");
    }

    #[test]
    fn separators_never_concatenate() {
        let opts = MergeOptions {
            strategy: MergeStrategy::Append,
            ..MergeOptions::default()
        };
        let out = merge_verse_text("|1.| text", &updates(&[(1, "---")]), &opts);
        assert_eq!(out.text, "|1.|---");
    }

    #[test]
    fn mark_conflict_keeps_both_sides() {
        let marked = mark_conflict("old text", "new text");
        assert!(!marked.is_empty());
        assert!(marked.contains("[-old-]"));
        assert!(marked.contains("{+new+}"));
        assert!(marked.contains("text"));
        assert!(marked.starts_with(CONFLICT_OPEN));
        assert!(marked.ends_with(CONFLICT_CLOSE));
        assert_eq!(marked, mark_conflict("old text", "new text"));
    }

    #[test]
    fn mark_conflict_groups_runs() {
        let marked = mark_conflict("the quick brown fox", "the slow red fox jumps");
        assert_eq!(
            marked,
            "<<<<<<< the [-quick brown-] {+slow red+} fox {+jumps+} >>>>>>>"
        );
    }

    #[test]
    fn mark_conflict_strategy_counts_conflicts() {
        let opts = MergeOptions {
            strategy: MergeStrategy::MarkConflict,
            ..MergeOptions::default()
        };
        let out = merge_verse_text("|5.| old text", &updates(&[(5, "new text")]), &opts);
        assert_eq!(out.stats.conflicts, 1);
        assert_eq!(out.text, "|5.| <<<<<<< [-old-] {+new+} text >>>>>>>");
    }

    #[test]
    fn strategy_names_parse() {
        assert_eq!(MergeStrategy::parse("mark-conflict").unwrap(), MergeStrategy::MarkConflict);
        assert_eq!(MergeStrategy::parse("markConflict").unwrap(), MergeStrategy::MarkConflict);
        assert_eq!(MergeStrategy::parse("Replace").unwrap(), MergeStrategy::Replace);
        assert!(MergeStrategy::parse("shuffle").is_err());
    }

    #[test]
    fn partial_file_merges_into_target() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("de.txt");
        let partial = dir.path().join("partial.txt");
        std::fs::write(&target, "|1.| eins\n|3.| drei").unwrap();
        std::fs::write(&partial, "notes\n|2.| zwei\n|3.| DREI").unwrap();

        let stats = merge_partial_file(&target, &partial, &MergeOptions::default()).unwrap();
        assert_eq!(stats.appended, 1);
        assert_eq!(stats.updated, 1);
        assert_eq!(
            std::fs::read_to_string(&target).unwrap(),
            "|1.| eins\n|2.| zwei\n|3.| DREI"
        );
        assert!(merge_partial_file(&target, &dir.path().join("nope"), &MergeOptions::default())
            .is_err());
    }
}
