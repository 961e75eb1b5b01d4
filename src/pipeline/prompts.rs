use std::path::Path;

use anyhow::Context;

use crate::error::TranslateError;

pub const DEFAULT_DIRECTIONS_FILE: &str = "directions.txt";

pub fn render_template(template: &str, vars: &[(&str, &str)]) -> String {
    let mut out = template.to_string();
    for (k, v) in vars {
        let pat = format!("{{{{{k}}}}}");
        out = out.replace(&pat, v);
    }
    out
}

/// Directions are a precondition: a missing file stops the driver before any model call.
pub fn load_directions(path: &Path) -> anyhow::Result<String> {
    if !path.exists() {
        return Err(TranslateError::MissingDirections(path.to_path_buf()).into());
    }
    std::fs::read_to_string(path).with_context(|| format!("read directions: {}", path.display()))
}

pub fn render_directions(template: &str, execution: &str, language: &str) -> String {
    render_template(
        template,
        &[("execution", execution), ("language", language)],
    )
    .trim_end()
    .to_string()
}

/// Prompt sent to the backend: rendered directions, a blank line, then the chunk verses.
pub fn build_prompt(directions: &str, chunk_text: &str) -> String {
    let mut prompt = String::with_capacity(directions.len() + chunk_text.len() + 2);
    prompt.push_str(directions);
    prompt.push_str("\n\n");
    prompt.push_str(chunk_text);
    prompt
}

/// Characters the directions occupy in every prompt, counted against the chunk budget.
pub fn preamble_len(directions: &str) -> usize {
    directions.chars().count() + 2
}

pub const DEFAULT_DIRECTIONS_TEXT: &str = r#"Translate the following verses into {{language}}.

Rules:
- Keep every line marker like |12.| exactly as given, one output line per input line.
- Lines of the form |N.|--- are paragraph breaks: copy them unchanged.
- Do NOT merge, split, skip or reorder verses.
- Do NOT summarize; translate everything.
- Output ONLY the translated verse lines, no commentary.

VERSES:"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_known_vars_and_leaves_unknown() {
        let out = render_template("to {{language}} by {{execution}} {{other}}", &[
            ("language", "German"),
            ("execution", "gpt"),
        ]);
        assert_eq!(out, "to German by gpt {{other}}");
    }

    #[test]
    fn prompt_is_directions_then_chunk() {
        let directions = render_directions(DEFAULT_DIRECTIONS_TEXT, "gpt", "Latin");
        assert!(directions.contains("into Latin."));
        let prompt = build_prompt(&directions, "|1.| A");
        assert!(prompt.ends_with("VERSES:\n\n|1.| A"));
        assert_eq!(
            prompt.chars().count(),
            preamble_len(&directions) + "|1.| A".len()
        );
    }

    #[test]
    fn missing_directions_is_typed_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_directions(&dir.path().join("none.txt")).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<TranslateError>(),
            Some(TranslateError::MissingDirections(_))
        ));
    }
}
