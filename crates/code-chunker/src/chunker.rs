use crate::config::ChunkerConfig;
use crate::error::Result;
use crate::hash::{chunk_id, content_hash};
use crate::language::Language;
use crate::types::{estimate_tokens, Chunk, ChunkId};

/// A contiguous byte span of the file that is never split across chunks.
#[derive(Debug, Clone, Copy)]
struct Segment {
    start: usize,
    end: usize,
    line: usize,
}

/// Token-bounded overlapping chunker
#[derive(Debug, Clone)]
pub struct Chunker {
    config: ChunkerConfig,
}

impl Chunker {
    /// Create a new chunker, validating the configuration
    pub fn new(config: ChunkerConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    #[must_use]
    pub const fn config(&self) -> &ChunkerConfig {
        &self.config
    }

    /// Split `text` into chunks. An empty file yields no chunks.
    #[must_use]
    pub fn chunk(&self, path: &str, text: &str) -> Vec<Chunk> {
        let language = Language::from_path(path);
        let segments = self.segments(text);
        let mut chunks = Vec::new();
        let mut start = 0;

        while start < segments.len() {
            let end = self.extend(text, &segments, start);
            let first = segments[start];
            let last = segments[end - 1];
            let body = &text[first.start..last.end];
            let index = chunks.len();

            chunks.push(Chunk {
                id: ChunkId(chunk_id(path, index)),
                path: path.to_string(),
                index,
                byte_range: first.start..last.end,
                start_line: first.line,
                end_line: end_line_of(body, first.line),
                content_hash: content_hash(body),
                language,
                text: body.to_string(),
            });

            if end == segments.len() {
                break;
            }
            start = self.overlap_start(text, &segments, start, end);
        }

        log::debug!("chunked {path} into {} chunk(s)", chunks.len());
        chunks
    }

    /// Exclusive end segment of a chunk beginning at `start`.
    fn extend(&self, text: &str, segments: &[Segment], start: usize) -> usize {
        let origin = segments[start].start;
        let mut end = start + 1;
        while end < segments.len() {
            let current = estimate_tokens(&text[origin..segments[end - 1].end]);
            let next = estimate_tokens(&text[origin..segments[end].end]);
            if current >= self.config.target_chunk_tokens || next > self.config.max_chunk_tokens
            {
                break;
            }
            end += 1;
        }
        end
    }

    /// First segment of the next chunk; always strictly after `start`.
    fn overlap_start(&self, text: &str, segments: &[Segment], start: usize, end: usize) -> usize {
        if self.config.overlap_tokens == 0 {
            return end;
        }
        let tail = segments[end - 1].end;
        let mut next = end;
        while next - 1 > start {
            let span = estimate_tokens(&text[segments[next - 1].start..tail]);
            if span > self.config.overlap_tokens {
                break;
            }
            next -= 1;
        }
        next
    }

    /// Line segments, with lines above the hard limit split at char boundaries.
    fn segments(&self, text: &str) -> Vec<Segment> {
        let max_chars = self.config.max_chunk_tokens.saturating_mul(4).max(4);
        let mut segments = Vec::new();
        let mut offset = 0;

        for (line_idx, line) in text.split_inclusive('\n').enumerate() {
            let line_no = line_idx + 1;
            let mut piece_start = 0;
            while let Some((cut, _)) = line[piece_start..].char_indices().nth(max_chars) {
                segments.push(Segment {
                    start: offset + piece_start,
                    end: offset + piece_start + cut,
                    line: line_no,
                });
                piece_start += cut;
            }
            if piece_start < line.len() {
                segments.push(Segment {
                    start: offset + piece_start,
                    end: offset + line.len(),
                    line: line_no,
                });
            }
            offset += line.len();
        }

        segments
    }
}

fn end_line_of(body: &str, start_line: usize) -> usize {
    let trimmed = body.strip_suffix('\n').unwrap_or(body);
    start_line + trimmed.matches('\n').count()
}
