use quarry_core::{Chunk, ChunkKind, Snippet, SnippetKind, chunk_id, hash16};
use std::collections::BTreeSet;

/// Split a markdown document into one chunk per ATX-header section, with a
/// parallel snippet record for each section. The breadcrumb is the heading
/// stack down to the section, joined with ` > `.
pub fn parse(path: &str, content: &str, file_hash: &str) -> (Vec<Chunk>, Vec<Snippet>) {
    let lines: Vec<&str> = content.lines().collect();
    let mut sections: Vec<Section> = Vec::new();
    // (level, title) stack of enclosing headings.
    let mut heading_stack: Vec<(usize, String)> = Vec::new();

    for (i, line) in lines.iter().enumerate() {
        let Some((level, title)) = atx_heading(line) else {
            continue;
        };
        if let Some(open) = sections.last_mut()
            && open.end_line == 0
        {
            open.end_line = i;
        }
        while let Some((top, _)) = heading_stack.last() {
            if *top >= level {
                heading_stack.pop();
            } else {
                break;
            }
        }
        let breadcrumb = heading_stack
            .iter()
            .map(|(_, t)| t.clone())
            .chain(std::iter::once(title.clone()))
            .collect::<Vec<_>>()
            .join(" > ");
        heading_stack.push((level, title.clone()));
        sections.push(Section {
            title,
            breadcrumb,
            start_line: i + 1,
            end_line: 0,
        });
    }
    if let Some(open) = sections.last_mut()
        && open.end_line == 0
    {
        open.end_line = lines.len();
    }

    let mut chunks = Vec::new();
    let mut snippets = Vec::new();

    // Content before the first header, if any, becomes a document chunk.
    let preamble_end = sections.first().map(|s| s.start_line - 1).unwrap_or(lines.len());
    let preamble = lines[..preamble_end].join("\n");
    if !preamble.trim().is_empty() {
        let name = std::path::Path::new(path)
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or(path)
            .to_string();
        chunks.push(section_chunk(
            path,
            file_hash,
            &name,
            None,
            &preamble,
            1,
            preamble_end.max(1),
            ChunkKind::Document,
        ));
    }

    for section in &sections {
        let body = lines[section.start_line - 1..section.end_line].join("\n");
        let chunk = section_chunk(
            path,
            file_hash,
            &section.title,
            Some(section.breadcrumb.clone()),
            &body,
            section.start_line,
            section.end_line,
            ChunkKind::Section,
        );
        snippets.push(Snippet {
            id: hash16(&format!("{path}:snippet:{}:{}", section.start_line, section.title)),
            path: path.to_string(),
            content: body,
            start_line: section.start_line,
            end_line: section.end_line,
            breadcrumb: Some(section.breadcrumb.clone()),
            language: "markdown".to_string(),
            chunk_id: chunk.id.clone(),
            kind: SnippetKind::MarkdownSection,
            file_hash: file_hash.to_string(),
        });
        chunks.push(chunk);
    }

    (chunks, snippets)
}

struct Section {
    title: String,
    breadcrumb: String,
    start_line: usize,
    /// 1-based inclusive end; 0 while the section is still open.
    end_line: usize,
}

#[allow(clippy::too_many_arguments)]
fn section_chunk(
    path: &str,
    file_hash: &str,
    title: &str,
    breadcrumb: Option<String>,
    body: &str,
    start_line: usize,
    end_line: usize,
    kind: ChunkKind,
) -> Chunk {
    Chunk {
        id: chunk_id(path, title, kind, start_line),
        path: path.to_string(),
        content: body.to_string(),
        start_line,
        end_line,
        kind,
        symbols: vec![title.to_string()],
        references: BTreeSet::new(),
        conformances: BTreeSet::new(),
        file_hash: file_hash.to_string(),
        doc_comment: None,
        signature: None,
        breadcrumb,
        language: "markdown".to_string(),
    }
}

fn atx_heading(line: &str) -> Option<(usize, String)> {
    let trimmed = line.trim_start();
    let hashes = trimmed.chars().take_while(|c| *c == '#').count();
    if hashes == 0 || hashes > 6 {
        return None;
    }
    let rest = &trimmed[hashes..];
    if !rest.starts_with(' ') {
        return None;
    }
    let title = rest.trim().trim_end_matches('#').trim().to_string();
    if title.is_empty() {
        return None;
    }
    Some((hashes, title))
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOC: &str = "\
Intro paragraph before any heading.

# Guide

Opening words.

## Install

Run the installer.

## Usage

### Advanced

Deep detail.
";

    #[test]
    fn one_chunk_per_section_plus_preamble() {
        let (chunks, snippets) = parse("docs/guide.md", DOC, "beefbeefbeefbeef");
        let titles: Vec<&str> = chunks.iter().map(|c| c.symbols[0].as_str()).collect();
        assert_eq!(titles, vec!["guide", "Guide", "Install", "Usage", "Advanced"]);
        assert_eq!(snippets.len(), 4);
        assert_eq!(chunks[0].kind, ChunkKind::Document);
        assert!(chunks[1..].iter().all(|c| c.kind == ChunkKind::Section));
    }

    #[test]
    fn breadcrumbs_follow_the_heading_stack() {
        let (chunks, _) = parse("docs/guide.md", DOC, "beefbeefbeefbeef");
        let advanced = chunks
            .iter()
            .find(|c| c.symbols[0] == "Advanced")
            .expect("advanced section");
        assert_eq!(
            advanced.breadcrumb.as_deref(),
            Some("Guide > Usage > Advanced")
        );
    }

    #[test]
    fn sections_cover_their_body_lines() {
        let (chunks, _) = parse("docs/guide.md", DOC, "beefbeefbeefbeef");
        let install = chunks
            .iter()
            .find(|c| c.symbols[0] == "Install")
            .expect("install section");
        assert!(install.content.contains("Run the installer."));
        assert!(!install.content.contains("Deep detail."));
        assert!(install.start_line <= install.end_line);
    }

    #[test]
    fn snippets_point_back_to_their_chunk() {
        let (chunks, snippets) = parse("docs/guide.md", DOC, "beefbeefbeefbeef");
        for snippet in &snippets {
            assert!(chunks.iter().any(|c| c.id == snippet.chunk_id));
            assert_eq!(snippet.kind, SnippetKind::MarkdownSection);
        }
    }

    #[test]
    fn document_without_headings_is_one_chunk() {
        let (chunks, snippets) = parse("notes.md", "plain text only\n", "beefbeefbeefbeef");
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].kind, ChunkKind::Document);
        assert!(snippets.is_empty());
    }
}
