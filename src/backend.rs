use std::io::Write;
use std::process::{Command, Stdio};

use anyhow::{anyhow, Context};

use crate::pipeline::config::BackendConfig;
use crate::pipeline::prompts::render_template;

/// The model call. Any error is fatal to the execution that issued it.
pub trait TranslationBackend {
    fn translate(&mut self, prompt: &str, model: &str) -> anyhow::Result<String>;
}

/// Runs an external program per chunk: prompt on stdin, translation on stdout.
pub struct CommandBackend {
    command: String,
    args: Vec<String>,
}

impl CommandBackend {
    pub fn new(cfg: &BackendConfig) -> Self {
        Self {
            command: cfg.command.clone(),
            args: cfg.args.clone(),
        }
    }

    fn render_args(&self, model: &str) -> Vec<String> {
        self.args
            .iter()
            .map(|a| render_template(a, &[("model", model)]))
            .collect()
    }
}

impl TranslationBackend for CommandBackend {
    fn translate(&mut self, prompt: &str, model: &str) -> anyhow::Result<String> {
        let args = self.render_args(model);
        let mut child = Command::new(&self.command)
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .with_context(|| format!("spawn backend: {}", self.command))?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| anyhow!("backend stdin unavailable"))?;
        // Feed stdin from its own thread: a child that streams output while reading would
        // otherwise fill the stdout pipe and block both sides.
        let prompt = prompt.to_string();
        let writer = std::thread::spawn(move || stdin.write_all(prompt.as_bytes()));

        let out = child.wait_with_output().context("wait for backend")?;
        let written = writer
            .join()
            .map_err(|_| anyhow!("backend stdin writer panicked"))?;
        if !out.status.success() {
            let stderr = String::from_utf8_lossy(&out.stderr);
            return Err(anyhow!(
                "backend {} exited with {}: {}",
                self.command,
                out.status,
                stderr.trim()
            ));
        }
        written.context("write prompt to backend")?;
        String::from_utf8(out.stdout).context("backend output is not UTF-8")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn model_placeholder_in_args() {
        let backend = CommandBackend::new(&BackendConfig {
            command: "llm".into(),
            args: vec!["-m".into(), "{{model}}".into(), "--no-stream".into()],
        });
        assert_eq!(backend.render_args("gpt-4o"), vec!["-m", "gpt-4o", "--no-stream"]);
    }

    #[cfg(unix)]
    #[test]
    fn pipes_prompt_through_command() {
        let mut backend = CommandBackend::new(&BackendConfig {
            command: "cat".into(),
            args: vec![],
        });
        assert_eq!(backend.translate("|1.| hi", "any").unwrap(), "|1.| hi");
    }

    #[cfg(unix)]
    #[test]
    fn large_prompt_does_not_block_on_full_pipes() {
        let mut backend = CommandBackend::new(&BackendConfig {
            command: "cat".into(),
            args: vec![],
        });
        let prompt = "|1.| x\n".repeat(40_000);
        let out = backend.translate(&prompt, "any").unwrap();
        assert_eq!(out.len(), prompt.len());
        assert_eq!(out, prompt);
    }

    #[cfg(unix)]
    #[test]
    fn failing_command_is_an_error() {
        let mut backend = CommandBackend::new(&BackendConfig {
            command: "false".into(),
            args: vec![],
        });
        assert!(backend.translate("x", "m").is_err());
    }

    #[test]
    fn missing_program_is_an_error() {
        let mut backend = CommandBackend::new(&BackendConfig {
            command: "definitely-not-a-real-binary-4711".into(),
            args: vec![],
        });
        assert!(backend.translate("x", "m").is_err());
    }
}
