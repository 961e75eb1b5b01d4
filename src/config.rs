use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::Deserialize;

pub const DEFAULT_CONFIG_FILENAME: &str = "verse-translator.toml";
pub const CONFIG_ENV: &str = "VERSE_TRANSLATOR_CONFIG";

#[derive(Clone, Debug, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub pipeline: PipelineSection,
    #[serde(default)]
    pub backend: BackendSection,
    #[serde(default)]
    pub executions: Vec<ExecutionSection>,
}

#[derive(Clone, Debug, Deserialize, Default)]
pub struct PipelineSection {
    /// Source verse file. Relative paths resolve against the config file directory.
    #[serde(default)]
    pub source: Option<PathBuf>,
    /// Directions template sent ahead of every chunk.
    #[serde(default)]
    pub directions: Option<PathBuf>,
    #[serde(default)]
    pub output_dir: Option<PathBuf>,
    #[serde(default)]
    pub extra_data: Option<PathBuf>,

    /// Advance only the least-progressed execution(s) each cycle.
    #[serde(default)]
    pub attempt_to_keep_translations_at_the_same_line: Option<bool>,

    /// Budget used by executions that do not set `maximum_input_length`.
    #[serde(default)]
    pub maximum_input_length: Option<usize>,

    #[serde(default)]
    pub trace_dir: Option<String>,
    #[serde(default)]
    pub trace_prompts: Option<bool>,
}

#[derive(Clone, Debug, Deserialize, Default)]
pub struct BackendSection {
    /// External program that reads a prompt on stdin and prints the translation.
    #[serde(default)]
    pub command: Option<String>,
    /// Arguments; `{{model}}` is replaced with the execution's model id.
    #[serde(default)]
    pub args: Vec<String>,
}

#[derive(Clone, Debug, Deserialize, Default)]
pub struct ExecutionSection {
    pub name: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub output_prefix: Option<String>,
    #[serde(default)]
    pub output_postfix: Option<String>,
    #[serde(default)]
    pub same_line_factor: Option<f64>,
    #[serde(default)]
    pub maximum_input_length: Option<usize>,
}

pub fn find_file_upwards(start_dir: &Path, filename: &str, max_levels: usize) -> Option<PathBuf> {
    let mut dir = start_dir;
    for _ in 0..=max_levels {
        let candidate = dir.join(filename);
        if candidate.exists() {
            return Some(candidate);
        }
        dir = dir.parent()?;
    }
    None
}

pub fn find_default_config(workdir: &Path, filename: &str) -> Option<PathBuf> {
    if let Ok(cwd) = std::env::current_dir() {
        if let Some(p) = find_file_upwards(&cwd, filename, 8) {
            return Some(p);
        }
    }
    if let Some(p) = find_file_upwards(workdir, filename, 8) {
        return Some(p);
    }
    if let Ok(exe) = std::env::current_exe() {
        if let Some(dir) = exe.parent() {
            if let Some(p) = find_file_upwards(dir, filename, 10) {
                return Some(p);
            }
        }
    }
    None
}

pub fn load_config(path: &Path) -> anyhow::Result<AppConfig> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("read config: {}", path.display()))?;
    parse_config(&text).with_context(|| format!("config: {}", path.display()))
}

pub fn parse_config(text: &str) -> anyhow::Result<AppConfig> {
    let cfg: AppConfig = toml::from_str(text).context("parse config toml")?;
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_full_config() {
        let cfg = parse_config(
            r#"
[pipeline]
source = "bible.txt"
attempt_to_keep_translations_at_the_same_line = true

[backend]
command = "llm"
args = ["-m", "{{model}}"]

[[executions]]
name = "gpt"
model = "gpt-4o"
language = "German"
same_line_factor = 1.5
maximum_input_length = 6000

[[executions]]
name = "claude"
"#,
        )
        .unwrap();
        assert_eq!(cfg.pipeline.source, Some(PathBuf::from("bible.txt")));
        assert_eq!(cfg.pipeline.attempt_to_keep_translations_at_the_same_line, Some(true));
        assert_eq!(cfg.backend.args, vec!["-m", "{{model}}"]);
        assert_eq!(cfg.executions.len(), 2);
        assert_eq!(cfg.executions[0].same_line_factor, Some(1.5));
        assert_eq!(cfg.executions[1].model, None);
    }

    #[test]
    fn finds_config_in_parent_dir() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("a/b");
        std::fs::create_dir_all(&nested).unwrap();
        std::fs::write(dir.path().join(DEFAULT_CONFIG_FILENAME), "").unwrap();
        let found = find_file_upwards(&nested, DEFAULT_CONFIG_FILENAME, 4).unwrap();
        assert_eq!(found, dir.path().join(DEFAULT_CONFIG_FILENAME));
        assert!(find_file_upwards(&nested, "missing.toml", 1).is_none());
    }
}
