use quarry_core::{Chunk, ChunkKind, ParseError, chunk_id};
use std::collections::BTreeSet;
use tree_sitter::{Node, Parser};

/// Extract declaration chunks from a Swift source file.
///
/// Declarations are recognized by the keyword token inside any
/// `*_declaration` node rather than by exact node kind, which keeps the
/// extractor stable across grammar revisions. A type stack is maintained
/// while descending into type bodies so nested members carry qualified
/// symbols and breadcrumbs; function bodies are never descended into, which
/// keeps locals out of the chunk list.
pub fn parse(path: &str, content: &str, file_hash: &str) -> Result<Vec<Chunk>, ParseError> {
    let mut parser = Parser::new();
    parser
        .set_language(&tree_sitter_swift::LANGUAGE.into())
        .map_err(|err| ParseError::ParsingFailed {
            path: path.to_string(),
            detail: format!("loading swift grammar: {err}"),
        })?;
    let tree = parser
        .parse(content, None)
        .ok_or_else(|| ParseError::ParsingFailed {
            path: path.to_string(),
            detail: "tree-sitter produced no tree".to_string(),
        })?;

    let mut extractor = Extractor {
        path,
        source: content,
        file_hash,
        type_stack: Vec::new(),
        chunks: Vec::new(),
    };
    extractor.walk_container(tree.root_node());

    if extractor.chunks.is_empty() && tree.root_node().has_error() {
        return Err(ParseError::InvalidSyntax {
            path: path.to_string(),
            detail: "no declarations recovered from malformed source".to_string(),
        });
    }
    Ok(extractor.chunks)
}

struct Extractor<'a> {
    path: &'a str,
    source: &'a str,
    file_hash: &'a str,
    type_stack: Vec<String>,
    chunks: Vec<Chunk>,
}

const TYPE_KINDS: &[ChunkKind] = &[
    ChunkKind::Class,
    ChunkKind::Struct,
    ChunkKind::Enum,
    ChunkKind::Actor,
    ChunkKind::Extension,
    ChunkKind::Protocol,
];

impl<'a> Extractor<'a> {
    fn walk_container<'t>(&mut self, container: Node<'t>) {
        let mut cursor = container.walk();
        let children: Vec<Node<'t>> = container.named_children(&mut cursor).collect();
        for child in children {
            self.visit(child);
        }
    }

    fn visit<'t>(&mut self, node: Node<'t>) {
        if !node.kind().ends_with("_declaration") {
            return;
        }
        let Some(kind) = self.classify(node) else {
            return;
        };
        let name = self.declaration_name(node, kind);
        let Some(name) = name else {
            return;
        };

        self.emit(node, kind, &name);

        if TYPE_KINDS.contains(&kind)
            && let Some(body) = body_node(node)
        {
            self.type_stack.push(name);
            self.walk_container(body);
            self.type_stack.pop();
        }
    }

    /// Determine the chunk kind from the declaration keyword token. Direct
    /// children are checked first, then one nested level for wrapped
    /// binding patterns.
    fn classify(&self, node: Node<'_>) -> Option<ChunkKind> {
        if let Some(kind) = self.keyword_in_children(node) {
            return Some(kind);
        }
        let mut cursor = node.walk();
        for child in node.children(&mut cursor) {
            if child.kind().ends_with("_body") || child.kind() == "code_block" {
                continue;
            }
            if let Some(kind) = self.keyword_in_children(child) {
                return Some(kind);
            }
        }
        None
    }

    fn keyword_in_children(&self, node: Node<'_>) -> Option<ChunkKind> {
        let mut cursor = node.walk();
        for child in node.children(&mut cursor) {
            let kind = match child.kind() {
                "class" => ChunkKind::Class,
                "struct" => ChunkKind::Struct,
                "enum" => ChunkKind::Enum,
                "actor" => ChunkKind::Actor,
                "extension" => ChunkKind::Extension,
                "protocol" => ChunkKind::Protocol,
                "func" => {
                    if self.type_stack.is_empty() {
                        ChunkKind::Function
                    } else {
                        ChunkKind::Method
                    }
                }
                "init" => ChunkKind::Initializer,
                "deinit" => ChunkKind::Deinitializer,
                "subscript" => ChunkKind::Subscript,
                "typealias" => ChunkKind::Typealias,
                "macro" => ChunkKind::Macro,
                "let" => ChunkKind::Constant,
                "var" => ChunkKind::Variable,
                _ => continue,
            };
            return Some(kind);
        }
        None
    }

    fn declaration_name(&self, node: Node<'_>, kind: ChunkKind) -> Option<String> {
        if let Some(name) = node.child_by_field_name("name") {
            return Some(base_type_name(self.node_text(name)));
        }
        // Initializer-family declarations have no name of their own; the
        // identifier fallback would pick up a parameter name instead.
        match kind {
            ChunkKind::Initializer => return Some("init".to_string()),
            ChunkKind::Deinitializer => return Some("deinit".to_string()),
            ChunkKind::Subscript => return Some("subscript".to_string()),
            _ => {}
        }
        self.first_identifier(node)
    }

    /// First identifier token before the body, searched shallow-first.
    fn first_identifier<'t>(&self, node: Node<'t>) -> Option<String> {
        let body_start = body_node(node).map(|b| b.start_byte()).unwrap_or(usize::MAX);
        let mut queue: Vec<Node<'t>> = Vec::new();
        let mut cursor = node.walk();
        queue.extend(node.children(&mut cursor));
        let mut i = 0;
        while i < queue.len() {
            let current = queue[i];
            i += 1;
            if current.start_byte() >= body_start {
                continue;
            }
            match current.kind() {
                "simple_identifier" | "type_identifier" => {
                    return Some(self.node_text(current).to_string());
                }
                "modifiers" | "attribute" => continue,
                _ => {
                    let mut cursor = current.walk();
                    queue.extend(current.children(&mut cursor));
                }
            }
        }
        None
    }

    fn emit(&mut self, node: Node<'_>, kind: ChunkKind, name: &str) {
        let start_line = node.start_position().row + 1;
        let end_line = node.end_position().row + 1;
        let content = self.node_text(node).to_string();

        let qualified = if self.type_stack.is_empty() {
            name.to_string()
        } else {
            format!("{}.{name}", self.type_stack.join("."))
        };
        let mut symbols = vec![qualified.clone()];
        if qualified != name {
            symbols.push(name.to_string());
        }
        let breadcrumb = if self.type_stack.is_empty() {
            None
        } else {
            Some(format!("{} > {name}", self.type_stack.join(" > ")))
        };

        let body = body_node(node);
        let signature_end = body.map(|b| b.start_byte()).unwrap_or(node.end_byte());
        let signature = single_line(&self.source[node.start_byte()..signature_end]);
        let signature = (!signature.is_empty()).then_some(signature);

        let conformances = if TYPE_KINDS.contains(&kind) {
            self.conformances(node, signature_end)
        } else {
            BTreeSet::new()
        };

        let references = self.collect_references(body.unwrap_or(node), name);

        self.chunks.push(Chunk {
            id: chunk_id(self.path, &qualified, kind, start_line),
            path: self.path.to_string(),
            content,
            start_line,
            end_line,
            kind,
            symbols,
            references,
            conformances,
            file_hash: self.file_hash.to_string(),
            doc_comment: self.doc_comment(node),
            signature,
            breadcrumb,
            language: "swift".to_string(),
        });
    }

    /// Inheritance clause between the declared name and the body: skip the
    /// generic parameter list, expect `:`, stop at a `where` clause.
    fn conformances(&self, node: Node<'_>, body_start: usize) -> BTreeSet<String> {
        let name_end = node
            .child_by_field_name("name")
            .map(|n| n.end_byte())
            .or_else(|| self.first_identifier_end(node, body_start))
            .unwrap_or(node.start_byte());
        if name_end >= body_start {
            return BTreeSet::new();
        }
        let clause = skip_generic_params(self.source[name_end..body_start].trim_start());
        let Some(rest) = clause.trim_start().strip_prefix(':') else {
            return BTreeSet::new();
        };
        let rest = rest.split(" where ").next().unwrap_or(rest);
        rest.split(',')
            .map(|part| {
                let part = part.trim();
                let part = part.strip_prefix("@unchecked").unwrap_or(part).trim();
                base_type_name(part)
            })
            .filter(|name| {
                !name.is_empty()
                    && name
                        .chars()
                        .all(|c| c.is_alphanumeric() || c == '_' || c == '.')
            })
            .collect()
    }

    fn first_identifier_end<'t>(&self, node: Node<'t>, body_start: usize) -> Option<usize> {
        let mut queue: Vec<Node<'t>> = Vec::new();
        let mut cursor = node.walk();
        queue.extend(node.children(&mut cursor));
        let mut i = 0;
        while i < queue.len() {
            let current = queue[i];
            i += 1;
            if current.start_byte() >= body_start {
                continue;
            }
            match current.kind() {
                "simple_identifier" | "type_identifier" => return Some(current.end_byte()),
                _ => {
                    let mut cursor = current.walk();
                    queue.extend(current.children(&mut cursor));
                }
            }
        }
        None
    }

    /// Identifier and type names appearing inside `scope`.
    fn collect_references(&self, scope: Node<'_>, declared: &str) -> BTreeSet<String> {
        let mut refs = BTreeSet::new();
        let mut queue = vec![scope];
        while let Some(current) = queue.pop() {
            if matches!(current.kind(), "simple_identifier" | "type_identifier") {
                let text = self.node_text(current);
                if text.len() >= 2
                    && text != declared
                    && !matches!(text, "self" | "Self" | "super" | "true" | "false" | "nil")
                {
                    refs.insert(text.to_string());
                }
                continue;
            }
            let mut cursor = current.walk();
            queue.extend(current.children(&mut cursor));
        }
        refs
    }

    /// Documentation comment directly above the declaration: consecutive
    /// `///` lines or a `/** */` block, markers stripped.
    fn doc_comment(&self, node: Node<'_>) -> Option<String> {
        let mut pieces: Vec<String> = Vec::new();
        let mut boundary_row = node.start_position().row;
        let mut prev = node.prev_sibling();
        while let Some(comment) = prev {
            if !comment.kind().contains("comment") {
                break;
            }
            if comment.end_position().row + 1 < boundary_row {
                break;
            }
            let text = self.node_text(comment);
            if !(text.starts_with("///") || text.starts_with("/**")) {
                break;
            }
            pieces.push(strip_comment_markers(text));
            boundary_row = comment.start_position().row;
            prev = comment.prev_sibling();
        }
        if pieces.is_empty() {
            return None;
        }
        pieces.reverse();
        let joined = pieces.join("\n").trim().to_string();
        (!joined.is_empty()).then_some(joined)
    }

    fn node_text(&self, node: Node<'_>) -> &str {
        &self.source[node.byte_range()]
    }
}

fn body_node<'a>(node: Node<'a>) -> Option<Node<'a>> {
    let mut cursor = node.walk();
    node.children(&mut cursor)
        .find(|c| c.kind().ends_with("_body") || c.kind() == "code_block")
}

fn single_line(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Drop a leading balanced `<...>` generic parameter list.
fn skip_generic_params(text: &str) -> &str {
    if !text.starts_with('<') {
        return text;
    }
    let mut depth = 0usize;
    for (i, c) in text.char_indices() {
        match c {
            '<' => depth += 1,
            '>' => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return &text[i + 1..];
                }
            }
            _ => {}
        }
    }
    text
}

/// `Collection<Int>` -> `Collection`.
fn base_type_name(text: &str) -> String {
    text.split('<').next().unwrap_or(text).trim().to_string()
}

fn strip_comment_markers(comment: &str) -> String {
    comment
        .lines()
        .map(|line| {
            let line = line.trim_start();
            let line = line
                .strip_prefix("///")
                .or_else(|| line.strip_prefix("/**"))
                .or_else(|| line.strip_prefix("/*"))
                .unwrap_or(line);
            let line = line.strip_suffix("*/").unwrap_or(line);
            let line = line.trim_start();
            line.strip_prefix("* ")
                .or_else(|| line.strip_prefix('*'))
                .unwrap_or(line)
                .trim()
                .to_string()
        })
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    const SOURCE: &str = r#"import Foundation

/// Stores values by key.
protocol Cache {
    func value(for key: String) -> String?
}

public final class DiskCache: Cache, Sendable {
    let root: String

    init(root: String) {
        self.root = root
    }

    /// Look up a cached value.
    public func value(for key: String) -> String? {
        return readEntry(key)
    }
}

extension DiskCache: CustomStringConvertible {
    public var description: String { root }
}

func makeDefaultCache() -> DiskCache {
    return DiskCache(root: defaultRoot)
}
"#;

    fn parse_fixture() -> Vec<Chunk> {
        parse("Sources/Cache.swift", SOURCE, "aaaabbbbccccdddd").expect("parse")
    }

    fn find<'a>(chunks: &'a [Chunk], qualified: &str) -> &'a Chunk {
        chunks
            .iter()
            .find(|c| c.symbols.first().map(String::as_str) == Some(qualified))
            .unwrap_or_else(|| panic!("no chunk named {qualified}"))
    }

    #[test]
    fn extracts_types_members_and_free_functions() {
        let chunks = parse_fixture();

        let protocol = find(&chunks, "Cache");
        assert_eq!(protocol.kind, ChunkKind::Protocol);

        let class = find(&chunks, "DiskCache");
        assert_eq!(class.kind, ChunkKind::Class);
        assert!(class.conformances.contains("Cache"));
        assert!(class.conformances.contains("Sendable"));

        let method = find(&chunks, "DiskCache.value");
        assert_eq!(method.kind, ChunkKind::Method);
        assert_eq!(method.symbols, vec!["DiskCache.value", "value"]);
        assert_eq!(method.breadcrumb.as_deref(), Some("DiskCache > value"));

        let function = find(&chunks, "makeDefaultCache");
        assert_eq!(function.kind, ChunkKind::Function);
        assert!(function.breadcrumb.is_none());
    }

    #[test]
    fn members_include_initializer_and_stored_property() {
        let chunks = parse_fixture();
        let init = find(&chunks, "DiskCache.init");
        assert_eq!(init.kind, ChunkKind::Initializer);
        let property = find(&chunks, "DiskCache.root");
        assert_eq!(property.kind, ChunkKind::Constant);
    }

    #[test]
    fn extension_carries_its_conformances() {
        let chunks = parse_fixture();
        let extension = chunks
            .iter()
            .find(|c| c.kind == ChunkKind::Extension)
            .expect("extension chunk");
        assert_eq!(extension.symbols[0], "DiskCache");
        assert!(extension.conformances.contains("CustomStringConvertible"));
    }

    #[test]
    fn doc_comments_are_stripped_of_markers() {
        let chunks = parse_fixture();
        let protocol = find(&chunks, "Cache");
        assert_eq!(protocol.doc_comment.as_deref(), Some("Stores values by key."));
        let method = find(&chunks, "DiskCache.value");
        assert_eq!(
            method.doc_comment.as_deref(),
            Some("Look up a cached value.")
        );
    }

    #[test]
    fn references_come_from_the_body() {
        let chunks = parse_fixture();
        let function = find(&chunks, "makeDefaultCache");
        assert!(function.references.contains("DiskCache"));
        assert!(function.references.contains("defaultRoot"));
    }

    #[test]
    fn signatures_are_single_line() {
        let chunks = parse_fixture();
        let class = find(&chunks, "DiskCache");
        let signature = class.signature.as_deref().expect("signature");
        assert!(signature.starts_with("public final class DiskCache"));
        assert!(!signature.contains('\n'));
    }

    #[test]
    fn locals_are_not_emitted() {
        let source = "func outer() {\n    let local = 1\n    print(local)\n}\n";
        let chunks = parse("Sources/L.swift", source, "aaaabbbbccccdddd").expect("parse");
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].symbols[0], "outer");
    }

    #[test]
    fn content_is_a_substring_with_correct_lines() {
        let chunks = parse_fixture();
        for chunk in &chunks {
            assert!(SOURCE.contains(&chunk.content));
            assert!(chunk.start_line >= 1 && chunk.start_line <= chunk.end_line);
        }
        let class = find(&chunks, "DiskCache");
        assert_eq!(class.start_line, 8);
    }
}
