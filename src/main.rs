use std::path::PathBuf;

use anyhow::{anyhow, Context};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use verse_translator::backend::CommandBackend;
use verse_translator::pipeline::assemble::{assemble_from_config, write_parallel_json};
use verse_translator::pipeline::extra_data::{parse_patch, update_extra_data_file};
use verse_translator::pipeline::merge::{merge_partial_file, MergeOptions, MergeStrategy};
use verse_translator::pipeline::{init_default_config, PipelineConfig, TranslationDriver};
use verse_translator::progress::ConsoleProgress;

#[derive(Parser, Debug)]
#[command(name = "verse-translator")]
#[command(about = "Incremental, resumable LLM translation of line-numbered verse text", long_about = None)]
struct Args {
    /// Generate default config + directions files, then exit
    #[arg(long)]
    init_config: bool,

    /// Directory to write config/directions files (default: current directory)
    #[arg(long, value_name = "DIR")]
    init_config_dir: Option<PathBuf>,

    /// Overwrite existing config/directions files when used with --init-config
    #[arg(long)]
    force: bool,

    /// Config file path (default: search for verse-translator.toml upwards)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Only run these executions (repeatable; default: all)
    #[arg(long = "execution", value_name = "NAME")]
    executions: Vec<String>,

    /// Run one scheduling cycle (one chunk per selected execution), then exit
    #[arg(long)]
    single_round: bool,

    /// Override attempt_to_keep_translations_at_the_same_line
    #[arg(long)]
    keep_aligned: Option<bool>,

    /// Print per-execution progress and exit
    #[arg(long)]
    status: bool,

    /// Merge an externally produced partial verse file (requires --into)
    #[arg(long, value_name = "FILE")]
    merge_partial: Option<PathBuf>,

    /// Target verse file for --merge-partial
    #[arg(long, value_name = "FILE")]
    into: Option<PathBuf>,

    /// Merge strategy for --merge-partial: replace, append, prepend, mark-conflict
    #[arg(long, default_value = "replace")]
    strategy: String,

    /// Never modify verses already present in the target
    #[arg(long)]
    no_overwrite: bool,

    /// Keep the target's text when both sides differ
    #[arg(long)]
    keep_existing: bool,

    /// Do not add verses missing from the target
    #[arg(long)]
    no_append: bool,

    /// Merge a JSON object into the extra data record of this verse (requires --extra-json)
    #[arg(long, value_name = "VERSE")]
    set_extra: Option<u64>,

    /// JSON patch for --set-extra; null values delete properties
    #[arg(long, value_name = "JSON")]
    extra_json: Option<String>,

    /// Write the assembled parallel translations as JSON
    #[arg(long, value_name = "JSON")]
    export_json: Option<PathBuf>,

    /// Suppress progress lines
    #[arg(long)]
    quiet: bool,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let progress = ConsoleProgress::new(!args.quiet);

    if args.init_config {
        let dir = args
            .init_config_dir
            .clone()
            .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));
        let cfg_path = init_default_config(&dir, args.force).context("init default config")?;
        eprintln!("Wrote config: {}", cfg_path.display());
        return Ok(());
    }

    if let Some(partial) = args.merge_partial.as_ref() {
        let target = args.into.clone().context("missing --into for --merge-partial")?;
        let opts = MergeOptions {
            strategy: MergeStrategy::parse(&args.strategy)?,
            overwrite: !args.no_overwrite,
            keep_existing_on_conflict: args.keep_existing,
            append_new_verses: !args.no_append,
        };
        let stats = merge_partial_file(&target, partial, &opts)?;
        progress.info(format!(
            "Merged {} into {}: {} updated, {} appended, {} unchanged, {} kept, {} conflicts",
            partial.display(),
            target.display(),
            stats.updated,
            stats.appended,
            stats.unchanged,
            stats.kept,
            stats.conflicts
        ));
        return Ok(());
    }

    let cfg = PipelineConfig::load(args.config.clone()).context("load config")?;

    if let Some(verse) = args.set_extra {
        let json = args
            .extra_json
            .as_deref()
            .context("missing --extra-json for --set-extra")?;
        let patch = parse_patch(json)?;
        let rec = update_extra_data_file(&cfg.extra_data, verse, &patch)?;
        match rec {
            Some(r) => println!("{}", serde_json::Value::Object(r)),
            None => println!("verse {verse}: no extra data"),
        }
        return Ok(());
    }

    if let Some(out) = args.export_json.as_ref() {
        let rows = assemble_from_config(&cfg)?;
        write_parallel_json(out, &rows)?;
        progress.info(format!("Exported {} verses to {}", rows.len(), out.display()));
        return Ok(());
    }

    let executions = cfg.select_executions(&args.executions)?;
    if executions.is_empty() {
        return Err(anyhow!(
            "no executions configured (config={})",
            cfg.config_path.display()
        ));
    }
    let driver = TranslationDriver::from_config(&cfg, progress)?;

    if args.status {
        for exec in &executions {
            let p = driver.progress_of(exec)?;
            println!(
                "{:<20} {:>7}/{:<7} {:5.1}%  adjusted={:.4}{}",
                p.execution,
                p.current_max_line,
                p.source_max_line,
                p.ratio() * 100.0,
                p.adjusted_progress,
                if p.completed { "  done" } else { "" }
            );
        }
        return Ok(());
    }

    let backend_cfg = cfg
        .backend
        .as_ref()
        .context("no [backend] command configured")?;
    let mut backend = CommandBackend::new(backend_cfg);
    let keep_aligned = args.keep_aligned.unwrap_or(cfg.keep_aligned);
    let max_rounds = args.single_round.then_some(1);

    tracing::info!(
        source = %cfg.source.display(),
        verses = driver.source().max_line,
        executions = executions.len(),
        keep_aligned,
        "start"
    );
    let report = driver.run_group(&mut backend, &executions, keep_aligned, max_rounds)?;
    tracing::info!(
        rounds = report.rounds,
        completed = report.completed.len(),
        failed = report.failed.len(),
        "finished"
    );

    if !report.failed.is_empty() {
        let names = report
            .failed
            .iter()
            .map(|(n, _)| n.as_str())
            .collect::<Vec<_>>()
            .join(", ");
        return Err(anyhow!("executions stopped on error: {names}"));
    }
    Ok(())
}
