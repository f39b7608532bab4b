//! Diagram extraction: find fenced diagram blocks in Markdown text.
//!
//! ## Why a state machine instead of a regex?
//!
//! A pattern like `` ```mermaid\n(.*?)\n``` `` silently does the wrong thing
//! on every malformed input: an unterminated fence swallows the next block,
//! a fence nested inside the diagram cuts it in half, and a Mermaid example
//! shown inside a longer ```` ````markdown ```` fence gets rendered. Scanning
//! line by line with an explicit state (`Outside`, `InDiagram`,
//! `InOtherFence`) makes each of those cases a single, testable transition.
//!
//! ## Rules
//!
//! - A fence is a run of at least three `` ` `` or `~`, optionally indented.
//! - The block's tag is the first word of the info string and must equal the
//!   configured language exactly (case-sensitive).
//! - A block closes on a bare fence of the same character that is at least as
//!   long as the opener.
//! - A diagram containing a fence of its own character is malformed and
//!   skipped once the nesting unwinds.
//! - A new diagram opener seen inside an unclosed fence abandons that fence,
//!   whatever its fence character or length, so a missing closer never
//!   hides the diagrams after it. The one exception is a shorter fence of
//!   the same character inside a non-diagram block, which is how Markdown
//!   shows a fenced example.
//! - Blank-only blocks are dropped; leading/trailing blank lines are trimmed
//!   and everything in between is kept verbatim.

use crate::output::DiagramBlock;
use std::iter::{Enumerate, FusedIterator};
use std::str::Lines;
use tracing::{debug, warn};

/// Why a fenced diagram did not produce a [`DiagramBlock`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// The document ended, or another diagram opened, before the closer.
    Unterminated,
    /// The block contained a fence of its own kind.
    NestedFence,
    /// The block held nothing but whitespace.
    Empty,
}

/// A diagram fence that was dropped during extraction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedBlock {
    /// 1-indexed line of the opening fence.
    pub start_line: usize,
    pub reason: SkipReason,
}

/// Lazily extract diagram blocks tagged `language` from `text`.
///
/// Blocks are yielded in document order with contiguous 1-based indices.
pub fn extract_blocks<'a>(text: &'a str, language: &'a str) -> Blocks<'a> {
    Blocks {
        lines: text.lines().enumerate(),
        language,
        state: State::Outside,
        next_index: 1,
        skipped: Vec::new(),
    }
}

/// Iterator returned by [`extract_blocks`]. Single pass; not restartable.
pub struct Blocks<'a> {
    lines: Enumerate<Lines<'a>>,
    language: &'a str,
    state: State<'a>,
    next_index: usize,
    skipped: Vec<SkippedBlock>,
}

impl Blocks<'_> {
    /// Blocks dropped so far. Complete once the iterator is exhausted.
    pub fn skipped(&self) -> &[SkippedBlock] {
        &self.skipped
    }
}

enum State<'a> {
    Outside,
    InDiagram(OpenBlock<'a>),
    InOtherFence { marker: char, len: usize },
}

struct OpenBlock<'a> {
    marker: char,
    len: usize,
    indent: usize,
    /// Line number of the opening fence.
    start_line: usize,
    lines: Vec<&'a str>,
    depth: usize,
    nested: bool,
}

impl<'a> OpenBlock<'a> {
    fn new(fence: &Fence<'_>, start_line: usize) -> Self {
        Self {
            marker: fence.marker,
            len: fence.len,
            indent: fence.indent,
            start_line,
            lines: Vec::new(),
            depth: 0,
            nested: false,
        }
    }

    fn push(&mut self, line: &'a str) {
        self.lines.push(strip_indent(line, self.indent));
    }

    fn open_nested(&mut self, line: &'a str) {
        self.nested = true;
        self.depth += 1;
        self.push(line);
    }
}

struct Fence<'a> {
    indent: usize,
    marker: char,
    len: usize,
    info: &'a str,
}

impl Fence<'_> {
    fn tag(&self) -> &str {
        self.info.split_whitespace().next().unwrap_or("")
    }

    fn is_bare(&self) -> bool {
        self.info.is_empty()
    }
}

fn parse_fence(line: &str) -> Option<Fence<'_>> {
    let body = line.trim_start_matches([' ', '\t']);
    let indent = line.len() - body.len();
    let marker = body.chars().next()?;
    if marker != '`' && marker != '~' {
        return None;
    }
    let len = body.chars().take_while(|&c| c == marker).count();
    if len < 3 {
        return None;
    }
    let info = body[len..].trim();
    // A backtick info string may not itself contain backticks.
    if marker == '`' && info.contains('`') {
        return None;
    }
    Some(Fence {
        indent,
        marker,
        len,
        info,
    })
}

/// Remove up to `indent` leading spaces/tabs.
fn strip_indent(line: &str, indent: usize) -> &str {
    let strip = line
        .bytes()
        .take(indent)
        .take_while(|b| *b == b' ' || *b == b'\t')
        .count();
    &line[strip..]
}

impl<'a> Blocks<'a> {
    fn skip(&mut self, start_line: usize, reason: SkipReason) {
        match reason {
            SkipReason::Empty => debug!("Skipping empty diagram block at line {}", start_line),
            _ => warn!(
                "Skipping malformed diagram block at line {}: {:?}",
                start_line, reason
            ),
        }
        self.skipped.push(SkippedBlock { start_line, reason });
    }

    fn close(&mut self, block: OpenBlock<'a>) -> Option<DiagramBlock> {
        if block.nested {
            self.skip(block.start_line, SkipReason::NestedFence);
            return None;
        }

        let is_blank = |l: &&str| l.trim().is_empty();
        let Some(first) = block.lines.iter().position(|l| !is_blank(l)) else {
            self.skip(block.start_line, SkipReason::Empty);
            return None;
        };
        let last = block
            .lines
            .iter()
            .rposition(|l| !is_blank(l))
            .unwrap_or(first);

        let index = self.next_index;
        self.next_index += 1;
        let content_start = block.start_line + 1;
        debug!(
            "Extracted diagram {} (lines {}-{})",
            index,
            content_start + first,
            content_start + last
        );

        Some(DiagramBlock::new(
            index,
            block.lines[first..=last].join("\n"),
            Some(content_start + first..=content_start + last),
        ))
    }

    fn step(&mut self, line_no: usize, line: &'a str) -> Option<DiagramBlock> {
        let state = std::mem::replace(&mut self.state, State::Outside);
        match state {
            State::Outside => {
                if let Some(f) = parse_fence(line) {
                    self.state = if f.tag() == self.language {
                        State::InDiagram(OpenBlock::new(&f, line_no))
                    } else {
                        State::InOtherFence {
                            marker: f.marker,
                            len: f.len,
                        }
                    };
                }
                None
            }
            State::InOtherFence { marker, len } => {
                match parse_fence(line) {
                    Some(f) if f.marker == marker && f.len >= len && f.is_bare() => {}
                    // A shorter fence of the same kind is an example shown
                    // inside the outer block, never an opener.
                    Some(f)
                        if f.tag() == self.language && !(f.marker == marker && f.len < len) =>
                    {
                        debug!(
                            "Unclosed fence abandoned by diagram opener at line {}",
                            line_no
                        );
                        self.state = State::InDiagram(OpenBlock::new(&f, line_no));
                    }
                    _ => self.state = State::InOtherFence { marker, len },
                }
                None
            }
            State::InDiagram(mut block) => {
                let fence = parse_fence(line);
                if let Some(f) = fence.as_ref() {
                    if block.depth == 0 && f.tag() == self.language {
                        self.skip(block.start_line, SkipReason::Unterminated);
                        self.state = State::InDiagram(OpenBlock::new(f, line_no));
                        return None;
                    }
                }
                match fence.filter(|f| f.marker == block.marker) {
                    None => block.push(line),
                    Some(f) if !f.is_bare() => block.open_nested(line),
                    Some(_) if block.depth > 0 => {
                        block.depth -= 1;
                        block.push(line);
                    }
                    Some(f) if f.len >= block.len => return self.close(block),
                    Some(_) => block.open_nested(line),
                }
                self.state = State::InDiagram(block);
                None
            }
        }
    }
}

impl Iterator for Blocks<'_> {
    type Item = DiagramBlock;

    fn next(&mut self) -> Option<DiagramBlock> {
        loop {
            let Some((i, line)) = self.lines.next() else {
                if let State::InDiagram(block) =
                    std::mem::replace(&mut self.state, State::Outside)
                {
                    self.skip(block.start_line, SkipReason::Unterminated);
                }
                return None;
            };
            if let Some(block) = self.step(i + 1, line) {
                return Some(block);
            }
        }
    }
}

impl FusedIterator for Blocks<'_> {}
