//! Block-level parsing of Markdown, reStructuredText and plain text.
//!
//! A block is the smallest unit the chunker never splits on its own: a
//! heading, a paragraph, a numbered clause, a list item or a code block.

use regex::Regex;
use std::path::Path;
use std::sync::OnceLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentFormat {
    Markdown,
    RestructuredText,
    Plain,
}

impl DocumentFormat {
    /// Detect format from file extension
    pub fn from_path(path: impl AsRef<Path>) -> Self {
        match path
            .as_ref()
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_ascii_lowercase)
            .as_deref()
        {
            Some("md" | "markdown") => DocumentFormat::Markdown,
            Some("rst") => DocumentFormat::RestructuredText,
            _ => DocumentFormat::Plain,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum BlockKind {
    Heading { level: usize, title: String },
    Paragraph,
    /// Numbered clause: `1.`, `1.2.3`, `(a)`, `#.`
    Clause,
    /// Bullet list item
    Item,
    Code,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Block {
    pub kind: BlockKind,
    /// Byte range in the document
    pub start: usize,
    pub end: usize,
}

#[derive(Debug, Clone, Copy)]
struct Line<'t> {
    start: usize,
    /// End of the line content, before the newline
    end: usize,
    text: &'t str,
}

impl Line<'_> {
    fn trimmed(&self) -> &str {
        self.text.trim()
    }

    fn indent(&self) -> usize {
        self.text.len() - self.text.trim_start().len()
    }

    fn is_blank(&self) -> bool {
        self.text.trim().is_empty()
    }
}

fn split_lines(text: &str) -> Vec<Line<'_>> {
    let mut lines = Vec::new();
    let mut start = 0;
    for raw in text.split_inclusive('\n') {
        let content = raw.trim_end_matches(['\n', '\r']);
        lines.push(Line {
            start,
            end: start + content.len(),
            text: content,
        });
        start += raw.len();
    }
    lines
}

fn clause_re() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^\s{0,3}(?:\d+(?:\.\d+)*[.)]|#\.|\([A-Za-z0-9]{1,3}\)|[a-z][.)])\s+\S").ok()
    })
    .as_ref()
}

fn bullet_re() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\s*[-*+•]\s+\S").ok()).as_ref()
}

fn atx_re() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\s{0,3}(#{1,6})\s+(.*?)\s*#*\s*$").ok())
        .as_ref()
}

fn block_start_kind(line: &str) -> Option<BlockKind> {
    if clause_re().is_some_and(|re| re.is_match(line)) {
        Some(BlockKind::Clause)
    } else if bullet_re().is_some_and(|re| re.is_match(line)) {
        Some(BlockKind::Item)
    } else {
        None
    }
}

/// RST section adornment: a run of one punctuation character
fn is_adornment(line: &str) -> bool {
    let mut chars = line.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    line.len() >= 3
        && "=-~^\"'*+#`:.".contains(first)
        && chars.all(|c| c == first)
}

fn fence_marker(line: &str) -> Option<&'static str> {
    let trimmed = line.trim_start();
    if trimmed.starts_with("```") {
        Some("```")
    } else if trimmed.starts_with("~~~") {
        Some("~~~")
    } else {
        None
    }
}

struct BlockParser<'t> {
    lines: Vec<Line<'t>>,
    blocks: Vec<Block>,
    open: Option<Block>,
    rst_levels: Vec<char>,
}

impl<'t> BlockParser<'t> {
    fn close(&mut self) {
        if let Some(block) = self.open.take() {
            self.blocks.push(block);
        }
    }

    fn push(&mut self, kind: BlockKind, first: usize, last: usize) {
        self.close();
        self.blocks.push(Block {
            kind,
            start: self.lines[first].start,
            end: self.lines[last].end,
        });
    }

    fn extend(&mut self, index: usize) {
        let line = self.lines[index];
        if let Some(kind) = block_start_kind(line.text) {
            self.close();
            self.open = Some(Block {
                kind,
                start: line.start,
                end: line.end,
            });
        } else if let Some(open) = self.open.as_mut() {
            open.end = line.end;
        } else {
            self.open = Some(Block {
                kind: BlockKind::Paragraph,
                start: line.start,
                end: line.end,
            });
        }
    }

    /// Consume lines from `from` up to the closing fence; returns the next index.
    fn fenced(&mut self, from: usize, marker: &str) -> usize {
        let last = (from + 1..self.lines.len())
            .find(|&i| self.lines[i].text.trim_start().starts_with(marker))
            .unwrap_or(self.lines.len() - 1);
        self.push(BlockKind::Code, from, last);
        last + 1
    }

    /// Consume an indented literal block that follows line `after`; returns
    /// the next index when one was found.
    fn literal(&mut self, after: usize) -> Option<usize> {
        let base = self.lines[after].indent();
        let mut i = after + 1;
        while i < self.lines.len() && self.lines[i].is_blank() {
            i += 1;
        }
        let first = i;
        let mut last = None;
        while i < self.lines.len() && (self.lines[i].is_blank() || self.lines[i].indent() > base) {
            if !self.lines[i].is_blank() {
                last = Some(i);
            }
            i += 1;
        }
        let last = last?;
        self.push(BlockKind::Code, first, last);
        Some(last + 1)
    }

    fn rst_level(&mut self, adornment: char) -> usize {
        match self.rst_levels.iter().position(|&c| c == adornment) {
            Some(pos) => pos + 1,
            None => {
                self.rst_levels.push(adornment);
                self.rst_levels.len()
            }
        }
    }

    fn step_markdown(&mut self, i: usize) -> Option<usize> {
        let line = self.lines[i];
        if let Some(marker) = fence_marker(line.text) {
            return Some(self.fenced(i, marker));
        }
        if let Some(caps) = atx_re().and_then(|re| re.captures(line.text)) {
            let level = caps[1].len();
            let title = caps[2].to_string();
            self.push(BlockKind::Heading { level, title }, i, i);
            return Some(i + 1);
        }
        // Setext: a single paragraph line underlined with === or ---
        if self.open.is_none() {
            if let Some(&next) = self.lines.get(i + 1) {
                let under = next.text.trim();
                let level = match under.chars().next() {
                    Some('=') if under.chars().all(|c| c == '=') => Some(1),
                    Some('-') if under.len() >= 2 && under.chars().all(|c| c == '-') => Some(2),
                    _ => None,
                };
                if let Some(level) = level {
                    let title = line.trimmed().to_string();
                    self.push(BlockKind::Heading { level, title }, i, i + 1);
                    return Some(i + 2);
                }
            }
        }
        None
    }

    fn step_rst(&mut self, i: usize) -> Option<usize> {
        let line = self.lines[i];
        let trimmed = line.trimmed();
        if self.open.is_none() && is_adornment(trimmed) {
            // Overline, title, underline
            if let (Some(&title), Some(&under)) = (self.lines.get(i + 1), self.lines.get(i + 2)) {
                if !title.is_blank() && under.trimmed() == trimmed {
                    let title = title.trimmed().to_string();
                    let level = self.rst_level(trimmed.chars().next().unwrap_or('='));
                    self.push(BlockKind::Heading { level, title }, i, i + 2);
                    return Some(i + 3);
                }
            }
        }
        if self.open.is_none() && !is_adornment(trimmed) {
            if let Some(&under) = self.lines.get(i + 1) {
                let under = under.text.trim();
                if is_adornment(under) && under.chars().count() >= trimmed.chars().count() {
                    let title = trimmed.to_string();
                    let level = self.rst_level(under.chars().next().unwrap_or('='));
                    self.push(BlockKind::Heading { level, title }, i, i + 1);
                    return Some(i + 2);
                }
            }
        }
        if trimmed.starts_with(".. code-block::") || trimmed.starts_with(".. code::") {
            self.close();
            let next = self.literal(i).unwrap_or(i + 1);
            return Some(next);
        }
        if trimmed.ends_with("::") {
            self.extend(i);
            self.close();
            return Some(self.literal(i).unwrap_or(i + 1));
        }
        None
    }
}

/// Split a document into blocks, in document order.
pub(crate) fn parse_blocks(text: &str, format: DocumentFormat) -> Vec<Block> {
    let mut parser = BlockParser {
        lines: split_lines(text),
        blocks: Vec::new(),
        open: None,
        rst_levels: Vec::new(),
    };

    let mut i = 0;
    while i < parser.lines.len() {
        if parser.lines[i].is_blank() {
            parser.close();
            i += 1;
            continue;
        }
        let handled = match format {
            DocumentFormat::Markdown => parser.step_markdown(i),
            DocumentFormat::RestructuredText => parser.step_rst(i),
            DocumentFormat::Plain => None,
        };
        match handled {
            Some(next) => i = next,
            None => {
                parser.extend(i);
                i += 1;
            }
        }
    }
    parser.close();
    parser.blocks
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn kinds(text: &str, format: DocumentFormat) -> Vec<BlockKind> {
        parse_blocks(text, format)
            .into_iter()
            .map(|block| block.kind)
            .collect()
    }

    #[test]
    fn markdown_headings_fences_and_clauses() {
        let doc = "# Blobs\n\nIntro text\ncontinues here.\n\n1. First rule.\n2. Second rule\n   wraps.\n\n```python\nx = 1\n\ny = 2\n```\n- bullet\n";
        assert_eq!(
            kinds(doc, DocumentFormat::Markdown),
            vec![
                BlockKind::Heading {
                    level: 1,
                    title: "Blobs".into()
                },
                BlockKind::Paragraph,
                BlockKind::Clause,
                BlockKind::Clause,
                BlockKind::Code,
                BlockKind::Item,
            ]
        );
    }

    #[test]
    fn fenced_code_keeps_blank_lines() {
        let doc = "```\na\n\nb\n```\n";
        let blocks = parse_blocks(doc, DocumentFormat::Markdown);
        assert_eq!(blocks.len(), 1);
        assert_eq!(&doc[blocks[0].start..blocks[0].end], "```\na\n\nb\n```");
    }

    #[test]
    fn rst_underlines_assign_levels_in_order() {
        let doc = "Title\n=====\n\nSection\n-------\n\nText::\n\n    code here\n\nAfter.\n";
        assert_eq!(
            kinds(doc, DocumentFormat::RestructuredText),
            vec![
                BlockKind::Heading {
                    level: 1,
                    title: "Title".into()
                },
                BlockKind::Heading {
                    level: 2,
                    title: "Section".into()
                },
                BlockKind::Paragraph,
                BlockKind::Code,
                BlockKind::Paragraph,
            ]
        );
    }

    #[test]
    fn format_from_extension() {
        assert_eq!(DocumentFormat::from_path("specs/eip.md"), DocumentFormat::Markdown);
        assert_eq!(DocumentFormat::from_path("a.RST"), DocumentFormat::RestructuredText);
        assert_eq!(DocumentFormat::from_path("notes.txt"), DocumentFormat::Plain);
    }
}
