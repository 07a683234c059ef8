use crate::config::{estimate_tokens, ChunkerConfig};
use crate::error::{ChunkerError, Result};
use crate::format::{parse_blocks, Block, BlockKind, DocumentFormat};
use crate::tags::topic_tags;
use drift_protocol::{chunk_id, normalize_text, Fork, SpecChunk, TextSpan};
use std::collections::HashSet;
use unicode_segmentation::UnicodeSegmentation;

/// A specification document with its fork metadata
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpecDocument {
    pub document_id: String,
    pub fork: Fork,
    /// Used for format detection; defaults to the document id
    pub path: String,
    pub text: String,
}

impl SpecDocument {
    pub fn new(document_id: impl Into<String>, fork: Fork, text: impl Into<String>) -> Self {
        let document_id = document_id.into();
        Self {
            path: document_id.clone(),
            document_id,
            fork,
            text: text.into(),
        }
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    pub fn format(&self) -> DocumentFormat {
        DocumentFormat::from_path(&self.path)
    }
}

/// Byte range waiting to become a chunk
#[derive(Debug, Clone, Copy)]
struct Piece {
    start: usize,
    end: usize,
    forced: bool,
}

/// Splits specification documents into boundary-respecting chunks
#[derive(Debug, Clone)]
pub struct SpecChunker {
    config: ChunkerConfig,
}

impl SpecChunker {
    pub fn new(config: ChunkerConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &ChunkerConfig {
        &self.config
    }

    /// Chunk a document. Identical content always yields identical chunks.
    pub fn chunk(&self, doc: &SpecDocument) -> Result<Vec<SpecChunk>> {
        if doc.text.trim().is_empty() {
            return Err(ChunkerError::EmptyDocument(doc.document_id.clone()));
        }
        let text = doc.text.as_str();

        let mut sections: Vec<(usize, String)> = Vec::new();
        let mut pieces: Vec<(Piece, Vec<String>)> = Vec::new();
        let mut current: Option<Piece> = None;

        let section_path = |sections: &[(usize, String)]| -> Vec<String> {
            sections.iter().map(|(_, title)| title.clone()).collect()
        };

        for block in parse_blocks(text, doc.format()) {
            if let BlockKind::Heading { level, title } = &block.kind {
                if let Some(piece) = current.take() {
                    pieces.push((piece, section_path(&sections)));
                }
                while sections.last().is_some_and(|(l, _)| l >= level) {
                    sections.pop();
                }
                sections.push((*level, title.clone()));
                continue;
            }

            let tokens = estimate_tokens(&text[block.start..block.end]);
            if tokens > self.config.max_tokens {
                if let Some(piece) = current.take() {
                    pieces.push((piece, section_path(&sections)));
                }
                for piece in self.split_oversized(text, &block) {
                    pieces.push((piece, section_path(&sections)));
                }
                continue;
            }

            current = match current {
                Some(mut piece) if self.can_absorb(text, &piece, &block) => {
                    piece.end = block.end;
                    Some(piece)
                }
                Some(piece) => {
                    pieces.push((piece, section_path(&sections)));
                    Some(Piece {
                        start: block.start,
                        end: block.end,
                        forced: false,
                    })
                }
                None => Some(Piece {
                    start: block.start,
                    end: block.end,
                    forced: false,
                }),
            };
        }
        if let Some(piece) = current.take() {
            pieces.push((piece, section_path(&sections)));
        }

        let mut seen = HashSet::new();
        let mut chunks = Vec::with_capacity(pieces.len());
        for (piece, section) in pieces {
            let Some((start, end)) = trim_span(text, piece.start, piece.end) else {
                continue;
            };
            let body = &text[start..end];
            let id = chunk_id(&doc.document_id, &doc.fork, &normalize_text(body));
            if !seen.insert(id.clone()) {
                log::debug!("{}: skipping repeated chunk {id}", doc.document_id);
                continue;
            }
            chunks.push(SpecChunk {
                id,
                document_id: doc.document_id.clone(),
                fork_version: doc.fork.clone(),
                text: body.to_string(),
                span: TextSpan::new(start, end),
                topic_tags: topic_tags(body, &section),
                forced_split: piece.forced,
                section,
                ordinal: chunks.len(),
            });
        }

        log::debug!(
            "Chunked {} ({}) into {} chunks",
            doc.document_id,
            doc.fork,
            chunks.len()
        );
        Ok(chunks)
    }

    /// Whether `block` may join the chunk being built.
    fn can_absorb(&self, text: &str, piece: &Piece, block: &Block) -> bool {
        let current = estimate_tokens(&text[piece.start..piece.end]);
        let merged = estimate_tokens(&text[piece.start..block.end]);
        let undersized = current < self.config.min_tokens;
        let boundary = matches!(block.kind, BlockKind::Clause | BlockKind::Code);

        if boundary && !undersized {
            return false;
        }
        merged <= self.config.target_tokens || (undersized && merged <= self.config.max_tokens)
    }

    /// Split a block larger than the window: prose at sentence boundaries,
    /// code (and single huge sentences) at the window itself.
    fn split_oversized(&self, text: &str, block: &Block) -> Vec<Piece> {
        if block.kind == BlockKind::Code {
            return self.force_split(text, block.start, block.end);
        }

        let mut pieces = Vec::new();
        let mut group: Option<(usize, usize)> = None;
        for (offset, sentence) in text[block.start..block.end].split_sentence_bound_indices() {
            let start = block.start + offset;
            let end = start + sentence.len();

            if estimate_tokens(sentence) > self.config.max_tokens {
                if let Some((s, e)) = group.take() {
                    pieces.push(Piece {
                        start: s,
                        end: e,
                        forced: false,
                    });
                }
                pieces.extend(self.force_split(text, start, end));
                continue;
            }

            group = match group {
                Some((s, _)) if estimate_tokens(&text[s..end]) <= self.config.target_tokens => {
                    Some((s, end))
                }
                Some((s, e)) => {
                    pieces.push(Piece {
                        start: s,
                        end: e,
                        forced: false,
                    });
                    Some((start, end))
                }
                None => Some((start, end)),
            };
        }
        if let Some((s, e)) = group {
            pieces.push(Piece {
                start: s,
                end: e,
                forced: false,
            });
        }
        pieces
    }

    /// Cut `[start, end)` into windows of at most `max_tokens`, preferring
    /// whitespace in the second half of each window.
    fn force_split(&self, text: &str, start: usize, end: usize) -> Vec<Piece> {
        let window = self.config.max_tokens.saturating_mul(4).max(4);
        let mut pieces = Vec::new();
        let mut pos = start;
        while pos < end {
            let mut cut = (pos + window).min(end);
            while cut > pos && !text.is_char_boundary(cut) {
                cut -= 1;
            }
            if cut < end {
                if let Some(ws) = text[pos..cut].rfind(char::is_whitespace) {
                    if ws > window / 2 {
                        cut = pos + ws;
                    }
                }
            }
            if cut <= pos {
                // Window smaller than one character
                cut = text[pos..]
                    .char_indices()
                    .nth(1)
                    .map_or(end, |(i, _)| pos + i);
            }
            pieces.push(Piece {
                start: pos,
                end: cut,
                forced: true,
            });
            pos = cut;
        }
        pieces
    }
}

fn trim_span(text: &str, start: usize, end: usize) -> Option<(usize, usize)> {
    let raw = &text[start..end];
    let lead = raw.len() - raw.trim_start().len();
    let tail = raw.len() - raw.trim_end().len();
    let (start, end) = (start + lead, end - tail);
    (start < end).then_some((start, end))
}
