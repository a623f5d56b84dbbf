//! Patient-name heuristics for lab report text and file names.
//!
//! Pure string processing. The PDF side lives in `reports::pdf`.

use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::reports::recognizer::PersonRecognizer;

/// Where an extracted name came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NameSource {
    Text,
    Tables,
    Filename,
}

impl NameSource {
    pub fn label(self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Tables => "tables",
            Self::Filename => "filename",
        }
    }
}

/// Honorific prefixes stripped from candidates, in application order.
const PREFIXES: &[&str] = &[
    "Mr", "Mrs", "Ms", "Miss", "Dr", "Shri", "Smt", "Sh", "Smt.", "Dr.", "श्री", "श्रीमती",
];

/// Lines that look like names but are report boilerplate.
const JUNK_KEYWORDS: &[&str] = &[
    "sample collected",
    "tests done",
    "lab report",
    "report",
    "result",
    "date",
    "patient no",
];

static NON_NAME_CHARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^\w\s\x{0900}-\x{097F}]").expect("valid regex"));

static WHITESPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").expect("valid regex"));

static AGE_GENDER: LazyLock<[Regex; 2]> = LazyLock::new(|| {
    [
        Regex::new(r"\(?\s*\d{1,3}\s*[Yy]\s*/?\s*[MF]\s*\)?").expect("valid regex"),
        Regex::new(r"\(?\s*[MF]\s*/?\s*\d{1,3}\s*[Yy]?\s*\)?").expect("valid regex"),
    ]
});

static STOP_WORDS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(?:DOB|Age|Gender|Sex|MRN|VID|ID|Patient No|UHID|Registration|Tests Done|Sample Collected)\b",
    )
    .expect("valid regex")
});

static PREFIX_RES: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    PREFIXES
        .iter()
        .map(|p| {
            Regex::new(&format!(r"(?i)^\s*{}\.?\s+", regex::escape(p))).expect("valid regex")
        })
        .collect()
});

static CODES: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(\bNo\.?\s*[:\-]?\s*\d+\b|\bC\d+\b|\bT\d+\b|\bVID\s*[:\-]?\d+\b|\b\d{1,4}\b)")
        .expect("valid regex")
});

static BARCODE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Z0-9]{8,}$").expect("valid regex"));

static LABEL_PATTERNS: LazyLock<[Regex; 3]> = LazyLock::new(|| {
    [
        Regex::new(r"(?i)Patient\s*Name\s*[:\-]?\s*([^\n]+)").expect("valid regex"),
        Regex::new(r"(?i)Name\s*[:\-]?\s*([^\n]+)").expect("valid regex"),
        Regex::new(r"(?i)Patient\s*[:\-]?\s*([^\n]+)").expect("valid regex"),
    ]
});

static FILENAME_SEPARATORS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[_\-]+").expect("valid regex"));

static NON_LETTERS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^A-Za-z\x{0900}-\x{097F}]").expect("valid regex"));

/// AG Diagnostics file names: `<digits>_<name>_wl`.
static AG_STEM: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\d+_.*_wl$").expect("valid regex"));

/// Collapse character runs of three or more down to a single character.
fn squeeze_runs(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len());
    let mut i = 0;
    while i < chars.len() {
        let ch = chars[i];
        let mut j = i;
        while j < chars.len() && chars[j] == ch {
            j += 1;
        }
        let run = j - i;
        if run >= 3 {
            out.push(ch);
        } else {
            out.extend(&chars[i..j]);
        }
        i = j;
    }
    out
}

/// Reduce repeated characters, drop punctuation, collapse whitespace.
pub fn normalize_text(text: &str) -> String {
    if text.is_empty() {
        return String::new();
    }
    let text = squeeze_runs(text);
    let text = NON_NAME_CHARS.replace_all(&text, "");
    let text = WHITESPACE.replace_all(&text, " ");
    text.trim().to_string()
}

/// Turn a raw candidate into a bare name, or `""` if it doesn't look like one.
pub fn clean_name(raw: &str) -> String {
    let raw = raw.trim();
    if raw.is_empty() {
        return String::new();
    }
    let mut name = normalize_text(raw);

    for re in AGE_GENDER.iter() {
        name = re.replace_all(&name, "").into_owned();
    }

    if let Some(cut) = STOP_WORDS.find(&name).map(|m| m.start()) {
        name.truncate(cut);
    }
    let mut name = name.trim().to_string();

    for re in PREFIX_RES.iter() {
        name = re.replace(&name, "").into_owned();
    }

    let name = CODES.replace_all(&name, "");
    let name = WHITESPACE.replace_all(&name, " ").trim().to_string();

    if BARCODE.is_match(&name) {
        return String::new();
    }
    if JUNK_KEYWORDS.contains(&name.to_lowercase().as_str()) || name.split_whitespace().count() > 6 {
        return String::new();
    }
    name
}

/// Labelled fields first, then recognised person entities, then any 2–5 word line.
pub fn extract_from_text(text: &str, recognizer: &dyn PersonRecognizer) -> String {
    for re in LABEL_PATTERNS.iter() {
        if let Some(caps) = re.captures(text) {
            let candidate = clean_name(&caps[1]);
            if !candidate.is_empty() {
                return candidate;
            }
        }
    }

    for person in recognizer.persons(text) {
        let candidate = clean_name(&person);
        if !candidate.is_empty() {
            return candidate;
        }
    }

    for line in text.split('\n') {
        let candidate = clean_name(line);
        let words = candidate.split_whitespace().count();
        if (2..=5).contains(&words) {
            return candidate;
        }
    }

    String::new()
}

/// Cells of a text-rendered table row: tab, `|`, or wide-space separated.
static CELL_SEPARATOR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\t+|\s*\|\s*| {2,}").expect("valid regex"));

/// Try each table-like cell of the raw page text.
pub fn extract_from_tables(raw_text: &str, recognizer: &dyn PersonRecognizer) -> String {
    for line in raw_text.lines() {
        if !CELL_SEPARATOR.is_match(line.trim()) {
            continue;
        }
        for cell in CELL_SEPARATOR.split(line.trim()) {
            if cell.trim().is_empty() {
                continue;
            }
            let candidate = extract_from_text(cell, recognizer);
            if !candidate.is_empty() {
                return candidate;
            }
        }
    }
    String::new()
}

/// File stem: basename without its last extension (leading dots don't count).
fn file_stem(file_name: &str) -> String {
    Path::new(file_name)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Build a name from a report file name like `125090547_JOHN_DOE_WL.pdf`.
pub fn extract_from_filename(file_name: &str) -> String {
    let stem = file_stem(file_name);

    let mut parts: Vec<&str> = FILENAME_SEPARATORS
        .split(&stem)
        .filter(|p| !p.is_empty())
        .filter(|p| !p.chars().all(char::is_numeric))
        .collect();

    if let Some(last) = parts.last()
        && matches!(last.to_uppercase().as_str(), "WL" | "REPORT" | "RESULT")
    {
        parts.pop();
    }

    parts
        .iter()
        .map(|p| NON_LETTERS.replace_all(p, "").into_owned())
        .filter(|p| p.chars().count() > 1)
        .map(|p| capitalize(&p))
        .collect::<Vec<_>>()
        .join(" ")
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
        None => String::new(),
    }
}

/// Whether a file name follows the AG Diagnostics convention.
pub fn is_ag_diagnostics_name(file_name: &str) -> bool {
    AG_STEM.is_match(&file_stem(&file_name.to_lowercase()))
}

/// Full extraction over already-extracted page text.
///
/// `pages` holds the raw text of each page; `None` means the PDF text layer
/// could not be read, in which case only the file name is used.
pub fn extract_patient_name(
    pages: Option<&[String]>,
    file_name: &str,
    recognizer: &dyn PersonRecognizer,
) -> (String, NameSource) {
    if is_ag_diagnostics_name(file_name) {
        return (extract_from_filename(file_name), NameSource::Filename);
    }

    if let Some(pages) = pages {
        let normalized: String = pages
            .iter()
            .filter(|p| !p.is_empty())
            .map(|p| normalize_text(p) + "\n")
            .collect();

        let name = extract_from_text(&normalized, recognizer);
        if !name.is_empty() {
            return (name, NameSource::Text);
        }

        for page in pages {
            let name = extract_from_tables(page, recognizer);
            if !name.is_empty() {
                return (name, NameSource::Tables);
            }
        }
    }

    (extract_from_filename(file_name), NameSource::Filename)
}
