use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::Serialize;

use crate::error::TranslateError;
use crate::pipeline::config::PipelineConfig;
use crate::pipeline::extra_data::{read_extra_data_file, ExtraRecord};
use crate::verse::{parse_verse_map, read_text_or_empty, read_verse_file, DuplicatePolicy};

/// One row of the side-by-side review view.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ParallelVerse {
    pub verse: u64,
    pub original: String,
    pub translations: BTreeMap<String, String>,
    pub extra_data: Option<ExtraRecord>,
}

/// Join the source with every translation by verse number and attach reviewer annotations.
/// Rows follow the source; translations missing a verse simply leave it out of the map.
pub fn assemble_parallel(
    source: &Path,
    translations: &[(String, PathBuf)],
    extra_data: Option<&Path>,
) -> anyhow::Result<Vec<ParallelVerse>> {
    if !source.exists() {
        return Err(TranslateError::MissingSource(source.to_path_buf()).into());
    }
    let original = parse_verse_map(&read_text_or_empty(source)?, DuplicatePolicy::KeepFirst);

    let mut loaded = Vec::with_capacity(translations.len());
    for (name, path) in translations {
        let verses = read_verse_file(path)
            .with_context(|| format!("read translation {name}: {}", path.display()))?;
        loaded.push((name.as_str(), verses));
    }
    let mut extra = match extra_data {
        Some(p) => read_extra_data_file(p)?,
        None => BTreeMap::new(),
    };

    let rows = original
        .into_iter()
        .map(|(verse, body)| {
            let translations = loaded
                .iter()
                .filter_map(|(name, verses)| {
                    verses
                        .get(&verse)
                        .map(|b| (name.to_string(), b.as_str().to_string()))
                })
                .collect();
            ParallelVerse {
                verse,
                original: body.as_str().to_string(),
                translations,
                extra_data: extra.remove(&verse),
            }
        })
        .collect();
    Ok(rows)
}

pub fn assemble_from_config(cfg: &PipelineConfig) -> anyhow::Result<Vec<ParallelVerse>> {
    let translations: Vec<(String, PathBuf)> = cfg
        .executions
        .iter()
        .map(|e| (e.name.clone(), e.output_path.clone()))
        .collect();
    assemble_parallel(&cfg.source, &translations, Some(&cfg.extra_data))
}

pub fn write_parallel_json(path: &Path, rows: &[ParallelVerse]) -> anyhow::Result<()> {
    let json = serde_json::to_string_pretty(rows).context("serialize parallel verses")?;
    std::fs::write(path, json).with_context(|| format!("write export: {}", path.display()))?;
    Ok(())
}
