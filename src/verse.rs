use std::collections::BTreeMap;
use std::path::Path;

use anyhow::Context;
use once_cell::sync::Lazy;
use regex::Regex;

pub const SEPARATOR: &str = "---";

static VERSE_LINE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\|(\d+)\.\|\s*(.*)").expect("verse line regex"));

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum VerseBody {
    Text(String),
    Separator,
}

impl VerseBody {
    pub fn from_content(content: &str) -> Self {
        if content.trim() == SEPARATOR {
            Self::Separator
        } else {
            Self::Text(content.to_string())
        }
    }

    #[must_use]
    pub fn is_separator(&self) -> bool {
        matches!(self, Self::Separator)
    }

    /// Payload as it appears after the `|N.|` marker.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Text(t) => t.as_str(),
            Self::Separator => SEPARATOR,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Verse {
    pub number: u64,
    pub body: VerseBody,
}

impl Verse {
    pub fn text(number: u64, text: impl Into<String>) -> Self {
        Self {
            number,
            body: VerseBody::Text(text.into()),
        }
    }

    pub fn separator(number: u64) -> Self {
        Self {
            number,
            body: VerseBody::Separator,
        }
    }

    pub fn to_line(&self) -> String {
        format_verse_line(self.number, &self.body)
    }
}

/// Which occurrence wins when a file carries the same verse number twice.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum DuplicatePolicy {
    KeepFirst,
    #[default]
    KeepLast,
}

pub fn format_verse_line(number: u64, body: &VerseBody) -> String {
    match body {
        VerseBody::Separator => format!("|{number}.|{SEPARATOR}"),
        VerseBody::Text(t) => format!("|{number}.| {t}"),
    }
}

pub fn parse_verse_line(line: &str) -> Option<Verse> {
    let line = line.strip_suffix('\r').unwrap_or(line);
    let caps = VERSE_LINE_RE.captures(line)?;
    let number: u64 = caps.get(1)?.as_str().parse().ok()?;
    let content = caps.get(2).map(|m| m.as_str()).unwrap_or("");
    Some(Verse {
        number,
        body: VerseBody::from_content(content),
    })
}

/// Structured read: file order, gaps preserved, free text between verse lines dropped.
pub fn parse_verses(text: &str) -> Vec<Verse> {
    let text = text.strip_prefix('\u{FEFF}').unwrap_or(text);
    let mut out = Vec::new();
    for (idx, line) in text.lines().enumerate() {
        match parse_verse_line(line) {
            Some(v) => out.push(v),
            None => {
                if !line.trim().is_empty() {
                    tracing::trace!(line = idx + 1, "skip non-verse line");
                }
            }
        }
    }
    out
}

pub fn parse_verse_map(text: &str, policy: DuplicatePolicy) -> BTreeMap<u64, VerseBody> {
    let mut map = BTreeMap::new();
    for v in parse_verses(text) {
        match policy {
            DuplicatePolicy::KeepLast => {
                map.insert(v.number, v.body);
            }
            DuplicatePolicy::KeepFirst => {
                map.entry(v.number).or_insert(v.body);
            }
        }
    }
    map
}

pub fn serialize_verses<'a>(verses: impl IntoIterator<Item = (&'a u64, &'a VerseBody)>) -> String {
    verses
        .into_iter()
        .map(|(n, body)| format_verse_line(*n, body))
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn max_verse_number(text: &str) -> u64 {
    parse_verses(text)
        .iter()
        .map(|v| v.number)
        .max()
        .unwrap_or(0)
}

/// Missing file reads as empty text.
pub fn read_text_or_empty(path: &Path) -> anyhow::Result<String> {
    match std::fs::read_to_string(path) {
        Ok(s) => Ok(s),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(String::new()),
        Err(e) => Err(e).with_context(|| format!("read verse file: {}", path.display())),
    }
}

pub fn read_verse_file(path: &Path) -> anyhow::Result<BTreeMap<u64, VerseBody>> {
    let text = read_text_or_empty(path)?;
    Ok(parse_verse_map(&text, DuplicatePolicy::KeepLast))
}

/// Rewrites the whole file. Callers must serialize writes per path.
pub fn write_verse_file(path: &Path, verses: &BTreeMap<u64, VerseBody>) -> anyhow::Result<()> {
    write_text_file(path, &serialize_verses(verses))
}

pub(crate) fn write_text_file(path: &Path, text: &str) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("create dir: {}", parent.display()))?;
        }
    }
    std::fs::write(path, text).with_context(|| format!("write verse file: {}", path.display()))
}

/// Resumability cursor: highest verse number present, `0` when the file is missing or empty.
pub fn get_max_line_number(path: &Path) -> anyhow::Result<u64> {
    Ok(max_verse_number(&read_text_or_empty(path)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_text_and_separator_lines() {
        let verses = parse_verses("|1.| In the beginning\n|2.|---\n|3.|   spaced\n");
        assert_eq!(
            verses,
            vec![
                Verse::text(1, "In the beginning"),
                Verse::separator(2),
                Verse::text(3, "spaced"),
            ]
        );
    }

    #[test]
    fn drops_free_text_and_malformed_markers() {
        let verses = parse_verses("heading\n|1.| a\n|x.| nope\n| 2.| nope\nnotes |3.| b\n|4.| d");
        let numbers: Vec<u64> = verses.iter().map(|v| v.number).collect();
        assert_eq!(numbers, vec![1, 4]);
    }

    #[test]
    fn separator_detection_trims_content() {
        assert_eq!(parse_verse_line("|7.|  ---  ").unwrap().body, VerseBody::Separator);
        assert_eq!(
            parse_verse_line("|7.| ----").unwrap().body,
            VerseBody::Text("----".to_string())
        );
    }

    #[test]
    fn handles_crlf_and_bom() {
        let verses = parse_verses("\u{FEFF}|1.| a\r\n|2.| b\r\n");
        assert_eq!(verses, vec![Verse::text(1, "a"), Verse::text(2, "b")]);
    }

    #[test]
    fn duplicate_policy_selects_occurrence() {
        let text = "|1.| first\n|2.| x\n|1.| second";
        let last = parse_verse_map(text, DuplicatePolicy::KeepLast);
        let first = parse_verse_map(text, DuplicatePolicy::KeepFirst);
        assert_eq!(last[&1], VerseBody::Text("second".into()));
        assert_eq!(first[&1], VerseBody::Text("first".into()));
    }

    #[test]
    fn round_trip_well_formed_text() {
        let text = "|1.| Alpha beta\n|2.|---\n|3.| Gamma, delta.\n|4.| ε ζ η";
        let map = parse_verse_map(text, DuplicatePolicy::KeepLast);
        assert_eq!(serialize_verses(&map), text);
    }

    #[test]
    fn max_line_of_missing_and_present_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.txt");
        assert_eq!(get_max_line_number(&path).unwrap(), 0);

        std::fs::write(&path, "").unwrap();
        assert_eq!(get_max_line_number(&path).unwrap(), 0);

        std::fs::write(&path, "|12.| a\n|3.| b\nfree text").unwrap();
        assert_eq!(get_max_line_number(&path).unwrap(), 12);
    }

    #[test]
    fn write_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/deeper/out.txt");
        let mut map = BTreeMap::new();
        map.insert(2, VerseBody::Text("b".into()));
        map.insert(1, VerseBody::Separator);
        write_verse_file(&path, &map).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "|1.|---\n|2.| b");
    }
}
