//! Keyword taxonomy CSV.
//!
//! Two layouts are accepted, chosen from the header row:
//! - `Term,Parent` (any case, extra columns ignored; empty parent = root)
//! - GCMD levels `Topic,Term,Variable_Level_1,Variable_Level_2,Variable_Level_3,Detailed_Variable`,
//!   where each filled level becomes a row whose parent is the path of the levels above it.
//!
//! Leading preamble lines before the header (GCMD exports carry a version line) are skipped.

use std::collections::HashSet;
use std::path::Path;

use csv::StringRecord;

use eokg_common::IngestError;

use super::{non_empty, Loaded};

pub const GCMD_LEVELS: [&str; 6] = [
    "Topic",
    "Term",
    "Variable_Level_1",
    "Variable_Level_2",
    "Variable_Level_3",
    "Detailed_Variable",
];

/// Separator between segments of a keyword path.
pub const PATH_SEPARATOR: &str = " > ";

/// One (term, parent) row. `parent` is a bare name or an `A > B` path.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct KeywordRow {
    /// Data row index in the source file.
    pub offset: usize,
    pub term: String,
    pub parent: Option<String>,
}

impl KeywordRow {
    pub fn new(offset: usize, term: &str, parent: Option<&str>) -> Self {
        Self {
            offset,
            term: term.to_string(),
            parent: parent.map(str::to_string),
        }
    }
}

enum Layout {
    TermParent { term: usize, parent: usize },
    Levels(Vec<Option<usize>>),
}

fn column(header: &StringRecord, name: &str) -> Option<usize> {
    header.iter().position(|h| h.trim().eq_ignore_ascii_case(name))
}

fn detect(header: &StringRecord) -> Option<Layout> {
    if let (Some(term), Some(parent)) = (column(header, "term"), column(header, "parent")) {
        return Some(Layout::TermParent { term, parent });
    }
    if column(header, "topic").is_some() && column(header, "term").is_some() {
        let levels = GCMD_LEVELS.iter().map(|l| column(header, l)).collect();
        return Some(Layout::Levels(levels));
    }
    None
}

pub fn read_keywords(path: &Path) -> Result<Loaded<KeywordRow>, IngestError> {
    let origin = path.display().to_string();
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_path(path)
        .map_err(|e| IngestError::unavailable(&origin, e))?;

    let mut layout = None;
    let mut loaded = Loaded::default();
    let mut seen = HashSet::new();
    let mut offset = 0;

    for record in reader.records() {
        let record = match record {
            Ok(r) => r,
            Err(e) if layout.is_some() => {
                loaded.skip(IngestError::format(&origin, offset, e));
                offset += 1;
                continue;
            }
            Err(e) => return Err(IngestError::unavailable(&origin, e)),
        };

        if layout.is_none() {
            layout = detect(&record);
            continue;
        }
        let Some(current) = &layout else { continue };

        let cell = |i: Option<usize>| non_empty(i.and_then(|i| record.get(i)));
        match current {
            Layout::TermParent { term, parent } => match cell(Some(*term)) {
                Some(term) => loaded.push(KeywordRow {
                    offset,
                    term,
                    parent: cell(Some(*parent)),
                }),
                None => loaded.skip(IngestError::format(&origin, offset, "empty term")),
            },
            Layout::Levels(columns) => {
                let mut ancestors: Vec<String> = Vec::new();
                for value in columns.iter().map(|c| cell(*c)) {
                    // A blank level ends the path for this row.
                    let Some(term) = value else { break };
                    let parent = (!ancestors.is_empty()).then(|| ancestors.join(PATH_SEPARATOR));
                    let row = KeywordRow { offset, term: term.clone(), parent };
                    if seen.insert((row.term.clone(), row.parent.clone())) {
                        loaded.push(row);
                    }
                    ancestors.push(term);
                }
                if ancestors.is_empty() {
                    loaded.skip(IngestError::format(&origin, offset, "row has no keyword levels"));
                }
            }
        }
        offset += 1;
    }

    if layout.is_none() {
        return Err(IngestError::unavailable(
            origin,
            "no Term/Parent or GCMD level header found",
        ));
    }
    Ok(loaded)
}
