//! Line- and symbol-aligned chunking.
//!
//! Chunk text is always an exact slice of the source, line terminators
//! included, so concatenating the chunks of a file reproduces it.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::extractor::Symbol;

/// A contiguous range of source lines. Lines are 0-indexed, `end_line` inclusive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    pub file_path: String,
    pub start_line: usize,
    pub end_line: usize,
    pub text: String,
    /// Names of the definitions fully contained in the chunk.
    #[serde(default)]
    pub symbols: Vec<String>,
}

impl Chunk {
    #[must_use]
    pub fn line_count(&self) -> usize {
        self.end_line + 1 - self.start_line
    }
}

/// How files are cut before embedding.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkStrategy {
    #[default]
    Symbols,
    Lines,
}

impl FromStr for ChunkStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "symbols" | "symbol" => Ok(Self::Symbols),
            "lines" | "line" => Ok(Self::Lines),
            other => Err(format!("unknown chunk strategy: {other}")),
        }
    }
}

impl std::fmt::Display for ChunkStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Symbols => f.write_str("symbols"),
            Self::Lines => f.write_str("lines"),
        }
    }
}

/// Fixed windows of at most `max_lines` lines (0 is treated as 1).
#[must_use]
pub fn chunk_by_lines(file_path: &str, text: &str, max_lines: usize) -> Vec<Chunk> {
    let lines: Vec<&str> = text.split_inclusive('\n').collect();
    let max = max_lines.max(1);
    lines
        .chunks(max)
        .enumerate()
        .map(|(i, window)| Chunk {
            file_path: file_path.to_string(),
            start_line: i * max,
            end_line: i * max + window.len() - 1,
            text: window.concat(),
            symbols: Vec::new(),
        })
        .collect()
}

/// Chunks aligned to definition boundaries.
///
/// Overlapping or nested definitions form one group. A group that fits in
/// `max_lines` is never split; a larger group becomes one oversized chunk on
/// its own. Lines between groups join the chunk in progress while it fits.
/// Without definitions this is [`chunk_by_lines`].
#[must_use]
pub fn chunk_by_symbols(
    file_path: &str,
    text: &str,
    symbols: &[Symbol],
    max_lines: usize,
) -> Vec<Chunk> {
    let lines: Vec<&str> = text.split_inclusive('\n').collect();
    if lines.is_empty() {
        return Vec::new();
    }
    let last = lines.len() - 1;
    let spans: Vec<(usize, usize)> = symbols
        .iter()
        .filter(|s| s.kind.is_definition())
        .map(|s| {
            let start = s.start_line.min(last);
            (start, s.end_line.clamp(start, last))
        })
        .collect();
    if spans.is_empty() {
        return chunk_by_lines(file_path, text, max_lines);
    }

    let ranges = pack_groups(&merge_spans(spans), lines.len(), max_lines.max(1));
    ranges
        .into_iter()
        .map(|(start, end)| Chunk {
            file_path: file_path.to_string(),
            start_line: start,
            end_line: end,
            text: lines[start..=end].concat(),
            symbols: contained_names(symbols, start, end, last),
        })
        .collect()
}

/// Sort spans and merge every overlapping pair into one group.
fn merge_spans(mut spans: Vec<(usize, usize)>) -> Vec<(usize, usize)> {
    spans.sort_unstable();
    let mut groups: Vec<(usize, usize)> = Vec::with_capacity(spans.len());
    for (start, end) in spans {
        match groups.last_mut() {
            Some(group) if start <= group.1 => group.1 = group.1.max(end),
            _ => groups.push((start, end)),
        }
    }
    groups
}

struct Packer {
    max: usize,
    ranges: Vec<(usize, usize)>,
    current: Option<(usize, usize)>,
}

impl Packer {
    fn flush(&mut self) {
        if let Some(range) = self.current.take() {
            self.ranges.push(range);
        }
    }

    /// Extend the chunk in progress to `end`, or start a new one at `start`
    /// if the result would exceed the window.
    fn append(&mut self, start: usize, end: usize) {
        match self.current {
            Some((s, _)) if end + 1 - s > self.max => {
                self.flush();
                self.current = Some((start, end));
            }
            Some((s, _)) => self.current = Some((s, end)),
            None => self.current = Some((start, end)),
        }
    }

    fn gap(&mut self, from: usize, to: usize) {
        for line in from..to {
            self.append(line, line);
        }
    }
}

fn pack_groups(groups: &[(usize, usize)], line_count: usize, max: usize) -> Vec<(usize, usize)> {
    let mut packer = Packer {
        max,
        ranges: Vec::new(),
        current: None,
    };
    let mut cursor = 0;
    for &(start, end) in groups {
        packer.gap(cursor, start);
        packer.append(start, end);
        if let Some((s, e)) = packer.current
            && e + 1 - s > max
        {
            packer.flush();
        }
        cursor = end + 1;
    }
    packer.gap(cursor, line_count);
    packer.flush();
    packer.ranges
}

fn contained_names(symbols: &[Symbol], start: usize, end: usize, last: usize) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    for symbol in symbols.iter().filter(|s| s.kind.is_definition()) {
        let s_start = symbol.start_line.min(last);
        let s_end = symbol.end_line.clamp(s_start, last);
        if s_start >= start && s_end <= end && !names.contains(&symbol.name) {
            names.push(symbol.name.clone());
        }
    }
    names
}
