use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::Context;

use crate::backend::TranslationBackend;
use crate::error::TranslateError;
use crate::pipeline::chunk::{plan_chunk, ChunkPlan};
use crate::pipeline::config::{Execution, PipelineConfig};
use crate::pipeline::merge::{merge_into_file, MergeOptions};
use crate::pipeline::prompts::{build_prompt, load_directions, preamble_len, render_directions};
use crate::pipeline::scheduler::select_next;
use crate::pipeline::trace::TraceWriter;
use crate::pipeline::tracker::{track_progress, ExecutionProgress};
use crate::progress::ConsoleProgress;
use crate::verse::{
    get_max_line_number, parse_verse_map, read_text_or_empty, DuplicatePolicy, Verse, VerseBody,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DriverState {
    Pending,
    Chunking,
    AwaitingModel,
    Merging,
    Done,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RunOutcome {
    pub chunks: usize,
    pub verses_merged: usize,
    /// First verse the next run would translate; `None` past the last representable number.
    pub next_start_line: Option<u64>,
    pub done: bool,
}

#[derive(Clone, Debug, Default)]
pub struct GroupReport {
    pub rounds: usize,
    pub completed: Vec<String>,
    pub failed: Vec<(String, String)>,
    pub progress: Vec<ExecutionProgress>,
}

impl GroupReport {
    pub fn all_completed(&self) -> bool {
        self.failed.is_empty() && self.progress.iter().all(|p| p.completed)
    }
}

/// The shared source, read once per driver. Ascending, one verse per number.
#[derive(Clone, Debug)]
pub struct SourceText {
    pub path: PathBuf,
    pub verses: Vec<Verse>,
    pub max_line: u64,
}

impl SourceText {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            return Err(TranslateError::MissingSource(path.to_path_buf()).into());
        }
        let text = read_text_or_empty(path)?;
        let verses: Vec<Verse> = parse_verse_map(&text, DuplicatePolicy::KeepFirst)
            .into_iter()
            .map(|(number, body)| Verse { number, body })
            .collect();
        let max_line = verses.last().map(|v| v.number).unwrap_or(0);
        Ok(Self {
            path: path.to_path_buf(),
            verses,
            max_line,
        })
    }

    fn range(&self, first: u64, last: u64) -> impl Iterator<Item = &Verse> + '_ {
        let begin = self.verses.partition_point(|v| v.number < first);
        self.verses[begin..].iter().take_while(move |v| v.number <= last)
    }
}

pub struct TranslationDriver {
    source: SourceText,
    directions: String,
    trace: TraceWriter,
    progress: ConsoleProgress,
}

impl TranslationDriver {
    /// Refuses to start when the source or directions file is missing.
    pub fn new(
        source: &Path,
        directions: &Path,
        trace: TraceWriter,
        progress: ConsoleProgress,
    ) -> anyhow::Result<Self> {
        let source = SourceText::load(source)?;
        let directions = load_directions(directions)?;
        Ok(Self {
            source,
            directions,
            trace,
            progress,
        })
    }

    pub fn from_config(cfg: &PipelineConfig, progress: ConsoleProgress) -> anyhow::Result<Self> {
        let trace = TraceWriter::new(cfg.trace_dir.clone(), cfg.trace_prompts)?;
        if cfg.trace_prompts {
            tracing::info!(dir = %trace.dir().display(), "writing chunk traces");
        }
        Self::new(&cfg.source, &cfg.directions, trace, progress)
    }

    pub fn source(&self) -> &SourceText {
        &self.source
    }

    pub fn progress_of(&self, execution: &Execution) -> anyhow::Result<ExecutionProgress> {
        track_progress(execution, self.source.max_line)
    }

    /// Translate from the first verse after the last merged one. `single_round` stops after one
    /// chunk so several executions can interleave under the scheduler.
    pub fn run_execution(
        &self,
        backend: &mut dyn TranslationBackend,
        execution: &Execution,
        single_round: bool,
    ) -> anyhow::Result<RunOutcome> {
        let max_line = self.source.max_line;
        let mut cursor = get_max_line_number(&execution.output_path)
            .with_context(|| format!("resume cursor for {}", execution.name))?
            .checked_add(1);
        let directions =
            render_directions(&self.directions, &execution.name, &execution.language);
        let preamble = preamble_len(&directions);

        let mut state = DriverState::Pending;
        let mut outcome = RunOutcome::default();
        loop {
            let Some(start) = cursor.filter(|s| *s <= max_line) else {
                transition(&mut state, DriverState::Done, &execution.name);
                break;
            };

            transition(&mut state, DriverState::Chunking, &execution.name);
            let Some(plan) = plan_chunk(
                &self.source.verses,
                start,
                max_line,
                execution.maximum_input_length,
                preamble,
            ) else {
                transition(&mut state, DriverState::Done, &execution.name);
                break;
            };

            let updates = self.translate_chunk(backend, execution, &directions, &plan, &mut state)?;

            transition(&mut state, DriverState::Merging, &execution.name);
            let stats = merge_into_file(&execution.output_path, &updates, &MergeOptions::default())
                .with_context(|| {
                    format!(
                        "merge verses {}-{} into {}",
                        plan.first_line,
                        plan.last_line,
                        execution.output_path.display()
                    )
                })?;
            outcome.chunks += 1;
            outcome.verses_merged += stats.touched();
            cursor = plan.next_start_line;
            self.progress.verses(&execution.name, plan.last_line, max_line);

            transition(&mut state, DriverState::Pending, &execution.name);
            if single_round {
                break;
            }
        }

        outcome.next_start_line = cursor;
        outcome.done = cursor.map_or(true, |s| s > max_line);
        Ok(outcome)
    }

    fn translate_chunk(
        &self,
        backend: &mut dyn TranslationBackend,
        execution: &Execution,
        directions: &str,
        plan: &ChunkPlan,
        state: &mut DriverState,
    ) -> anyhow::Result<BTreeMap<u64, VerseBody>> {
        let (first, last) = (plan.first_line, plan.last_line);
        let mut updates: BTreeMap<u64, VerseBody> = BTreeMap::new();
        let needs_model = self.source.range(first, last).any(|v| !v.body.is_separator());

        if needs_model {
            transition(state, DriverState::AwaitingModel, &execution.name);
            let prompt = build_prompt(directions, &plan.text);
            let _ = self
                .trace
                .write_chunk_text(&execution.name, first, last, "prompt", &prompt);

            let raw = match backend.translate(&prompt, &execution.model) {
                Ok(raw) => raw,
                Err(err) => {
                    tracing::error!(
                        execution = %execution.name,
                        model = %execution.model,
                        first,
                        last,
                        output = %execution.output_path.display(),
                        "model call failed: {err:#}"
                    );
                    return Err(TranslateError::ModelCall {
                        execution: execution.name.clone(),
                        model: execution.model.clone(),
                        first,
                        last,
                        message: format!("{err:#}"),
                    }
                    .into());
                }
            };
            let _ = self
                .trace
                .write_chunk_text(&execution.name, first, last, "output.raw", &raw);

            let returned = parse_verse_map(&cleanup_model_text(&raw), DuplicatePolicy::KeepLast);
            let total = returned.len();
            updates.extend(returned.into_iter().filter(|(n, _)| *n >= first && *n <= last));
            if updates.len() < total {
                tracing::warn!(
                    execution = %execution.name,
                    first,
                    last,
                    dropped = total - updates.len(),
                    "model returned verses outside the chunk"
                );
            }
            if !updates.values().any(|b| !b.is_separator()) {
                tracing::error!(
                    execution = %execution.name,
                    model = %execution.model,
                    first,
                    last,
                    "model output contains no verse lines"
                );
                return Err(TranslateError::EmptyModelOutput {
                    execution: execution.name.clone(),
                    model: execution.model.clone(),
                    first,
                    last,
                }
                .into());
            }

            let missing: Vec<u64> = self
                .source
                .range(first, last)
                .filter(|v| !v.body.is_separator() && !updates.contains_key(&v.number))
                .map(|v| v.number)
                .collect();
            if !missing.is_empty() {
                tracing::error!(
                    execution = %execution.name,
                    model = %execution.model,
                    first,
                    last,
                    ?missing,
                    "model output skipped verses"
                );
                return Err(TranslateError::IncompleteModelOutput {
                    execution: execution.name.clone(),
                    model: execution.model.clone(),
                    first,
                    last,
                    missing,
                }
                .into());
            }
        }

        // Paragraph breaks come from the source, whatever the model did with them.
        for v in self.source.range(first, last).filter(|v| v.body.is_separator()) {
            updates.insert(v.number, VerseBody::Separator);
        }
        Ok(updates)
    }

    /// Drive several executions over the shared source, one chunk per selected execution per
    /// cycle, until all are complete. A failing execution is dropped from scheduling and
    /// reported; the others keep going. `max_rounds` caps the number of cycles.
    pub fn run_group(
        &self,
        backend: &mut dyn TranslationBackend,
        executions: &[Execution],
        keep_aligned: bool,
        max_rounds: Option<usize>,
    ) -> anyhow::Result<GroupReport> {
        let mut report = GroupReport::default();

        loop {
            let progress = executions
                .iter()
                .filter(|e| !report.failed.iter().any(|(n, _)| n == &e.name))
                .map(|e| self.progress_of(e))
                .collect::<anyhow::Result<Vec<_>>>()?;
            report.progress = progress.clone();

            if progress.iter().all(|p| p.completed) {
                break;
            }
            if max_rounds.is_some_and(|max| report.rounds >= max) {
                break;
            }

            let selected: Vec<String> = select_next(&progress, keep_aligned)
                .into_iter()
                .filter(|p| !p.completed)
                .map(|p| p.execution.clone())
                .collect();
            tracing::debug!(round = report.rounds + 1, ?selected, keep_aligned, "schedule");

            for name in selected {
                let Some(exec) = executions.iter().find(|e| e.name == name) else {
                    continue;
                };
                match self.run_execution(backend, exec, true) {
                    Ok(_) => {}
                    Err(err) if err.downcast_ref::<TranslateError>().is_some() => {
                        self.progress
                            .info(format!("[error] {name} stopped: {err:#}"));
                        report.failed.push((name, format!("{err:#}")));
                    }
                    Err(err) => return Err(err),
                }
            }
            report.rounds += 1;
        }

        report.completed = report
            .progress
            .iter()
            .filter(|p| p.completed)
            .map(|p| p.execution.clone())
            .collect();
        Ok(report)
    }
}

fn transition(state: &mut DriverState, next: DriverState, execution: &str) {
    tracing::debug!(execution, from = ?*state, to = ?next, "driver state");
    *state = next;
}

/// Strip a markdown code fence some models wrap their answer in.
fn cleanup_model_text(text: &str) -> String {
    let mut s = text.trim();
    if s.starts_with("```") {
        if let Some(i) = s.find('\n') {
            s = &s[i + 1..];
        }
        if let Some(end) = s.rfind("```") {
            s = &s[..end];
        }
    }
    s.trim().to_string()
}
