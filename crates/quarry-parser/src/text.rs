use crate::ParserConfig;
use quarry_core::{Chunk, ChunkKind, text_chunk_id};
use std::collections::BTreeSet;

/// Plain-text fallback: fixed-size character windows cut at line boundaries,
/// with the tail of each window carried into the next as overlap. A file
/// that fits one window becomes a single chunk.
pub fn chunk_text(
    path: &str,
    content: &str,
    file_hash: &str,
    language: &str,
    config: &ParserConfig,
) -> Vec<Chunk> {
    let max = config.max_chunk_size.max(1);
    if content.len() <= max {
        return vec![make_chunk(path, content, file_hash, language, 0, content)];
    }

    let mut chunks = Vec::new();
    let mut pos = 0usize;
    while pos < content.len() {
        let mut end = (pos + max).min(content.len());
        while end < content.len() && !content.is_char_boundary(end) {
            end += 1;
        }
        // Prefer ending on a line boundary inside the window.
        if end < content.len()
            && let Some(newline) = content[pos..end].rfind('\n')
        {
            end = pos + newline + 1;
        }
        chunks.push(make_chunk(
            path,
            content,
            file_hash,
            language,
            pos,
            &content[pos..end],
        ));
        if end >= content.len() {
            break;
        }

        // Overlap starts at the last newline inside the previous tail when
        // one exists, otherwise at the raw character offset.
        let mut overlap_start = end.saturating_sub(config.overlap_size);
        while overlap_start > 0 && !content.is_char_boundary(overlap_start) {
            overlap_start -= 1;
        }
        let tail_end = if content[..end].ends_with('\n') {
            end - 1
        } else {
            end
        };
        if tail_end > overlap_start
            && let Some(newline) = content[overlap_start..tail_end].rfind('\n')
        {
            overlap_start += newline + 1;
        }
        pos = if overlap_start > pos { overlap_start } else { end };
    }
    chunks
}

fn make_chunk(
    path: &str,
    full: &str,
    file_hash: &str,
    language: &str,
    start_byte: usize,
    body: &str,
) -> Chunk {
    let start_line = full[..start_byte].matches('\n').count() + 1;
    let line_span = body.trim_end_matches('\n').matches('\n').count();
    Chunk {
        id: text_chunk_id(path, start_line, body),
        path: path.to_string(),
        content: body.to_string(),
        start_line,
        end_line: start_line + line_span,
        kind: ChunkKind::Document,
        symbols: Vec::new(),
        references: BTreeSet::new(),
        conformances: BTreeSet::new(),
        file_hash: file_hash.to_string(),
        doc_comment: None,
        signature: None,
        breadcrumb: None,
        language: language.to_string(),
    }
}
