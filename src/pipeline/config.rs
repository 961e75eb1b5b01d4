use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context};

use crate::config::{
    find_default_config, load_config, AppConfig, ExecutionSection, CONFIG_ENV,
    DEFAULT_CONFIG_FILENAME,
};
use crate::pipeline::prompts::{DEFAULT_DIRECTIONS_FILE, DEFAULT_DIRECTIONS_TEXT};

pub const DEFAULT_MAXIMUM_INPUT_LENGTH: usize = 6000;

/// One configured translation job over the shared source.
#[derive(Clone, Debug, PartialEq)]
pub struct Execution {
    pub name: String,
    pub model: String,
    pub language: String,
    pub output_path: PathBuf,
    /// Throughput normalizer for scheduling; `0` disables the weighting.
    pub same_line_factor: f64,
    /// Chunk budget in characters, directions included.
    pub maximum_input_length: usize,
}

impl Execution {
    pub fn from_section(sec: &ExecutionSection, output_dir: &Path, default_budget: usize) -> Self {
        let prefix = sec.output_prefix.as_deref().unwrap_or("");
        let postfix = sec.output_postfix.as_deref().unwrap_or(".txt");
        let name = sec.name.trim().to_string();
        Self {
            model: sec
                .model
                .clone()
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| name.clone()),
            language: sec
                .language
                .clone()
                .unwrap_or_else(|| "English".to_string()),
            output_path: output_dir.join(format!("{prefix}{name}{postfix}")),
            same_line_factor: sec.same_line_factor.unwrap_or(0.0),
            maximum_input_length: sec.maximum_input_length.unwrap_or(default_budget).max(1),
            name,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct BackendConfig {
    pub command: String,
    pub args: Vec<String>,
}

#[derive(Clone, Debug)]
pub struct PipelineConfig {
    pub config_path: PathBuf,
    pub source: PathBuf,
    pub directions: PathBuf,
    pub output_dir: PathBuf,
    pub extra_data: PathBuf,
    pub keep_aligned: bool,
    pub trace_dir: PathBuf,
    pub trace_prompts: bool,
    pub backend: Option<BackendConfig>,
    pub executions: Vec<Execution>,
}

impl PipelineConfig {
    pub fn load(config_path: Option<PathBuf>) -> anyhow::Result<Self> {
        let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        let cfg_file = config_path
            .or_else(|| std::env::var(CONFIG_ENV).ok().map(PathBuf::from))
            .or_else(|| find_default_config(&cwd, DEFAULT_CONFIG_FILENAME))
            .ok_or_else(|| {
                anyhow!(
                    "no {DEFAULT_CONFIG_FILENAME} found (pass --config, set {CONFIG_ENV}, or run --init-config)"
                )
            })?;
        let file_cfg = load_config(&cfg_file)?;
        Self::from_app_config(&cfg_file, &file_cfg)
    }

    pub fn from_app_config(config_path: &Path, file_cfg: &AppConfig) -> anyhow::Result<Self> {
        let config_dir = config_path
            .parent()
            .map(|p| p.to_path_buf())
            .unwrap_or_else(|| PathBuf::from("."));
        let resolve = |p: &Path| -> PathBuf {
            if p.is_relative() {
                config_dir.join(p)
            } else {
                p.to_path_buf()
            }
        };

        let p = &file_cfg.pipeline;
        let source = resolve(p.source.as_deref().unwrap_or(Path::new("source.txt")));
        let directions = resolve(
            p.directions
                .as_deref()
                .unwrap_or(Path::new(DEFAULT_DIRECTIONS_FILE)),
        );
        let output_dir = resolve(p.output_dir.as_deref().unwrap_or(Path::new("translations")));
        let extra_data = resolve(
            p.extra_data
                .as_deref()
                .unwrap_or(Path::new("extra-data.txt")),
        );
        let trace_dir = resolve(Path::new(p.trace_dir.as_deref().unwrap_or("_trace")));
        let default_budget = p
            .maximum_input_length
            .unwrap_or(DEFAULT_MAXIMUM_INPUT_LENGTH);

        let backend = file_cfg
            .backend
            .command
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|command| BackendConfig {
                command: command.to_string(),
                args: file_cfg.backend.args.clone(),
            });

        let mut executions: Vec<Execution> = Vec::new();
        for sec in &file_cfg.executions {
            if sec.name.trim().is_empty() {
                return Err(anyhow!(
                    "execution without a name (config={})",
                    config_path.display()
                ));
            }
            let exec = Execution::from_section(sec, &output_dir, default_budget);
            if executions.iter().any(|e| e.name == exec.name) {
                return Err(anyhow!("duplicate execution name: {}", exec.name));
            }
            executions.push(exec);
        }

        Ok(Self {
            config_path: config_path.to_path_buf(),
            source,
            directions,
            output_dir,
            extra_data,
            keep_aligned: p
                .attempt_to_keep_translations_at_the_same_line
                .unwrap_or(false),
            trace_dir,
            trace_prompts: p.trace_prompts.unwrap_or(false),
            backend,
            executions,
        })
    }

    /// Restrict to the named executions, keeping config order.
    pub fn select_executions(&self, names: &[String]) -> anyhow::Result<Vec<Execution>> {
        if names.is_empty() {
            return Ok(self.executions.clone());
        }
        for n in names {
            if !self.executions.iter().any(|e| &e.name == n) {
                return Err(crate::error::TranslateError::UnknownExecution(n.clone()).into());
            }
        }
        Ok(self
            .executions
            .iter()
            .filter(|e| names.contains(&e.name))
            .cloned()
            .collect())
    }
}

pub fn init_default_config(dir: &Path, force: bool) -> anyhow::Result<PathBuf> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("create config dir: {}", dir.display()))?;
    let cfg_path = dir.join(DEFAULT_CONFIG_FILENAME);

    let directions = dir.join(DEFAULT_DIRECTIONS_FILE);
    if !directions.exists() || force {
        std::fs::write(&directions, DEFAULT_DIRECTIONS_TEXT)
            .with_context(|| format!("write directions: {}", directions.display()))?;
    }

    if cfg_path.exists() && !force {
        return Ok(cfg_path);
    }

    let cfg_text = r#"[pipeline]
source = "source.txt"
directions = "directions.txt"
output_dir = "translations"
extra_data = "extra-data.txt"

# Advance only the execution(s) furthest behind each cycle, so parallel translations stay
# at roughly the same verse for side-by-side review.
attempt_to_keep_translations_at_the_same_line = true

# Chunk budget (characters, directions included) for executions that do not set their own.
maximum_input_length = 6000

trace_dir = "_trace"
trace_prompts = false

[backend]
# Any program that reads the prompt on stdin and prints the translation on stdout.
command = "llm"
args = ["-m", "{{model}}"]

[[executions]]
name = "gpt4o"
model = "gpt-4o"
language = "German"
output_prefix = "de_"
output_postfix = ".txt"
same_line_factor = 1.0

# [[executions]]
# name = "sonnet"
# model = "claude-sonnet"
# language = "German"
# output_prefix = "de_"
# same_line_factor = 1.2
# maximum_input_length = 8000
"#;

    std::fs::write(&cfg_path, cfg_text)
        .with_context(|| format!("write config: {}", cfg_path.display()))?;
    Ok(cfg_path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parse_config;

    #[test]
    fn resolves_paths_and_execution_defaults() {
        let cfg = parse_config(
            r#"
[pipeline]
source = "src.txt"
output_dir = "/abs/out"
maximum_input_length = 4000

[[executions]]
name = "gpt"
model = "gpt-4o"
language = "German"
output_prefix = "de_"
same_line_factor = 2.0

[[executions]]
name = "local"
maximum_input_length = 900
"#,
        )
        .unwrap();
        let pc = PipelineConfig::from_app_config(Path::new("/work/verse-translator.toml"), &cfg)
            .unwrap();
        assert_eq!(pc.source, PathBuf::from("/work/src.txt"));
        assert_eq!(pc.directions, PathBuf::from("/work/directions.txt"));
        assert!(!pc.keep_aligned);
        assert!(pc.backend.is_none());

        let gpt = &pc.executions[0];
        assert_eq!(gpt.output_path, PathBuf::from("/abs/out/de_gpt.txt"));
        assert_eq!(gpt.maximum_input_length, 4000);
        assert_eq!(gpt.same_line_factor, 2.0);

        let local = &pc.executions[1];
        assert_eq!(local.model, "local");
        assert_eq!(local.maximum_input_length, 900);
        assert_eq!(local.same_line_factor, 0.0);
    }

    #[test]
    fn rejects_duplicate_and_unknown_executions() {
        let cfg = parse_config("[[executions]]\nname = \"a\"\n[[executions]]\nname = \"a\"\n").unwrap();
        assert!(PipelineConfig::from_app_config(Path::new("x.toml"), &cfg).is_err());

        let cfg = parse_config("[[executions]]\nname = \"a\"\n[[executions]]\nname = \"b\"\n").unwrap();
        let pc = PipelineConfig::from_app_config(Path::new("x.toml"), &cfg).unwrap();
        assert_eq!(pc.select_executions(&["b".to_string()]).unwrap()[0].name, "b");
        assert!(pc.select_executions(&["zzz".to_string()]).is_err());
        assert_eq!(pc.select_executions(&[]).unwrap().len(), 2);
    }

    #[test]
    fn init_config_writes_loadable_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = init_default_config(dir.path(), false).unwrap();
        assert!(dir.path().join(DEFAULT_DIRECTIONS_FILE).exists());
        let pc = PipelineConfig::load(Some(path)).unwrap();
        assert!(pc.keep_aligned);
        assert_eq!(pc.executions.len(), 1);
        assert_eq!(
            pc.backend,
            Some(BackendConfig {
                command: "llm".to_string(),
                args: vec!["-m".to_string(), "{{model}}".to_string()],
            })
        );
    }
}
