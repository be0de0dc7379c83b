//! Budget-bounded prompt context from ranked chunks.
//!
//! Each chunk becomes a block: a provenance header followed by the chunk
//! text. Blocks are kept whole; assembly stops at the first block that would
//! overflow the budget.

use crate::chunker::Chunk;
use crate::searcher::SearchHit;

/// Outcome of an assembly pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AssembledContext {
    pub text: String,
    /// Blocks written to `text`.
    pub included: usize,
    /// Blocks offered after the budget ran out.
    pub omitted: usize,
}

/// Provenance header, rendering the 0-indexed range 1-based.
#[must_use]
pub fn chunk_header(chunk: &Chunk) -> String {
    format!(
        "# {} (lines {}-{})\n",
        chunk.file_path,
        chunk.start_line + 1,
        chunk.end_line + 1
    )
}

fn render_block(chunk: &Chunk) -> String {
    let mut block = chunk_header(chunk);
    block.push_str(&chunk.text);
    if !block.ends_with('\n') {
        block.push('\n');
    }
    block
}

/// Incremental assembler; push chunks best first.
#[derive(Debug)]
pub struct ContextAssembler {
    max_chars: usize,
    used: usize,
    full: bool,
    out: AssembledContext,
}

impl ContextAssembler {
    #[must_use]
    pub fn new(max_chars: usize) -> Self {
        Self {
            max_chars,
            used: 0,
            full: false,
            out: AssembledContext::default(),
        }
    }

    /// Append one chunk. Returns `false` once the budget is exhausted; every
    /// later chunk is counted as omitted.
    pub fn push_chunk(&mut self, chunk: &Chunk) -> bool {
        if self.full {
            self.out.omitted += 1;
            return false;
        }
        let block = render_block(chunk);
        let cost = block.chars().count();
        if self.used + cost > self.max_chars {
            tracing::debug!(
                file = %chunk.file_path,
                cost,
                remaining = self.max_chars - self.used,
                "context budget exhausted"
            );
            self.full = true;
            self.out.omitted += 1;
            return false;
        }
        self.used += cost;
        self.out.text.push_str(&block);
        self.out.included += 1;
        true
    }

    /// Append search hits in rank order.
    pub fn push_hits(&mut self, hits: impl IntoIterator<Item = SearchHit>) {
        for hit in hits {
            self.push_chunk(&Chunk::from(hit));
        }
    }

    /// Characters still available.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.max_chars - self.used
    }

    #[must_use]
    pub fn finish(self) -> AssembledContext {
        self.out
    }
}

/// Concatenate ranked chunks into one context string of at most `max_chars`
/// characters.
#[must_use]
pub fn assemble(ranked_chunks: &[Chunk], max_chars: usize) -> String {
    let mut assembler = ContextAssembler::new(max_chars);
    for chunk in ranked_chunks {
        if !assembler.push_chunk(chunk) {
            break;
        }
    }
    assembler.finish().text
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(path: &str, start: usize, end: usize, text: &str) -> Chunk {
        Chunk {
            file_path: path.into(),
            start_line: start,
            end_line: end,
            text: text.into(),
            symbols: vec![],
        }
    }

    #[test]
    fn header_is_one_based() {
        assert_eq!(
            chunk_header(&chunk("src/lib.rs", 0, 2, "")),
            "# src/lib.rs (lines 1-3)\n"
        );
    }

    #[test]
    fn missing_trailing_newline_is_added() {
        let text = assemble(&[chunk("a", 4, 4, "x")], 100);
        assert_eq!(text, "# a (lines 5-5)\nx\n");
    }

    #[test]
    fn budget_keeps_whole_blocks_only() {
        // header "# a (lines 1-1)\n" is 16 chars, so every block is 20
        let chunks = [
            chunk("a", 0, 0, "one\n"),
            chunk("b", 0, 0, "two\n"),
            chunk("c", 0, 0, "six\n"),
        ];
        for c in &chunks {
            assert_eq!(render_block(c).chars().count(), 20);
        }

        let text = assemble(&chunks, 50);
        assert_eq!(text, "# a (lines 1-1)\none\n# b (lines 1-1)\ntwo\n");
        assert!(!text.contains("six"));
        assert!(text.chars().count() <= 50);
    }

    #[test]
    fn stops_at_first_overflow() {
        let chunks = [
            chunk("a", 0, 0, "one\n"),
            chunk("big", 0, 9, &"x".repeat(200)),
            chunk("b", 0, 0, "two\n"),
        ];
        let mut assembler = ContextAssembler::new(50);
        for c in &chunks {
            assembler.push_chunk(c);
        }
        let out = assembler.finish();
        assert_eq!(out.included, 1);
        assert_eq!(out.omitted, 2);
        assert!(!out.text.contains("two"));
    }

    #[test]
    fn budget_counts_chars_not_bytes() {
        let c = chunk("a", 0, 0, "ééé\n");
        let block_chars = render_block(&c).chars().count();
        assert_eq!(assemble(std::slice::from_ref(&c), block_chars), render_block(&c));
    }

    #[test]
    fn zero_budget_is_empty() {
        assert_eq!(assemble(&[chunk("a", 0, 0, "x\n")], 0), "");
    }

    #[test]
    fn hits_feed_the_assembler() {
        let hit = SearchHit {
            file_path: "src/main.rs".into(),
            score: 0.9,
            content: "fn main() {}\n".into(),
            start_line: 2,
            end_line: 2,
            symbol: Some("main".into()),
            kind: Some("function".into()),
        };
        let mut assembler = ContextAssembler::new(1000);
        assembler.push_hits(vec![hit]);
        let out = assembler.finish();
        assert_eq!(out.text, "# src/main.rs (lines 3-3)\nfn main() {}\n");
        assert_eq!(out.included, 1);
    }
}
