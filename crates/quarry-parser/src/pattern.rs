use quarry_core::{Chunk, ChunkKind, chunk_id};
use regex::Regex;
use std::collections::BTreeSet;
use std::sync::LazyLock;

// Declaration-line patterns for the C-family languages. These are scanned
// per line; block extent comes from brace counting afterwards.
static TYPE_DECL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^\s*(?:(?:public|private|protected|internal|abstract|final|sealed|static|export|default|partial)\s+)*(class|struct|interface|enum|namespace)\s+([A-Za-z_][A-Za-z0-9_:.]*)",
    )
    .expect("type pattern")
});

static FUNCTION_DECL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^\s*(?:(?:export|default|public|private|protected|static|async)\s+)*function\s+([A-Za-z_][A-Za-z0-9_]*)\s*\(",
    )
    .expect("function pattern")
});

static ARROW_DECL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^\s*(?:export\s+)?(?:const|let)\s+([A-Za-z_][A-Za-z0-9_]*)\s*=\s*(?:async\s+)?(?:\([^)]*\)|[A-Za-z_][A-Za-z0-9_]*)\s*=>",
    )
    .expect("arrow pattern")
});

static GO_FUNC_DECL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^\s*func\s+(?:\(\s*[A-Za-z_][A-Za-z0-9_]*\s+\*?([A-Za-z_][A-Za-z0-9_]*)\s*\)\s*)?([A-Za-z_][A-Za-z0-9_]*)\s*\(",
    )
    .expect("go func pattern")
});

static C_FUNC_DECL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^\s*(?:[A-Za-z_][A-Za-z0-9_:<>,\s\*&\[\]]*[\s\*&])?([A-Za-z_][A-Za-z0-9_]*)\s*\([^;{}]*\)\s*(?:const\s*)?\{",
    )
    .expect("c func pattern")
});

static KOTLIN_FUN_DECL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^\s*(?:(?:public|private|protected|internal|open|override|suspend|inline)\s+)*fun\s+(?:<[^>]*>\s*)?([A-Za-z_][A-Za-z0-9_]*)\s*\(",
    )
    .expect("kotlin fun pattern")
});

static JSON_KEY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?m)^\s{0,4}"([^"]+)"\s*:"#).expect("json key pattern"));

static YAML_KEY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^([A-Za-z0-9_.-]+)\s*:").expect("yaml key pattern"));

static IDENTIFIER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[A-Za-z_][A-Za-z0-9_]*").expect("identifier pattern"));

const RESERVED: &[&str] = &[
    "if", "else", "for", "while", "do", "switch", "case", "break", "continue", "return", "new",
    "delete", "this", "self", "true", "false", "null", "nil", "void", "int", "char", "bool",
    "float", "double", "long", "short", "unsigned", "const", "static", "public", "private",
    "protected", "class", "struct", "enum", "interface", "namespace", "import", "package", "func",
    "function", "let", "var", "fun", "in", "of", "typeof", "instanceof", "try", "catch", "throw",
    "finally", "async", "await", "string",
];

/// One declaration found on a source line.
struct Declaration {
    kind: ChunkKind,
    name: String,
    receiver: Option<String>,
}

/// Extract declaration chunks from a C-family source file by line patterns.
/// Nested declarations inside a type block become methods qualified by the
/// enclosing type.
pub fn parse_code(path: &str, content: &str, file_hash: &str, language: &str) -> Vec<Chunk> {
    let lines: Vec<&str> = content.lines().collect();
    let mut chunks = Vec::new();
    // Enclosing type blocks as (name, last_line) while the scan is inside them.
    let mut type_spans: Vec<(String, usize)> = Vec::new();

    for (i, line) in lines.iter().enumerate() {
        let line_no = i + 1;
        while let Some((_, end)) = type_spans.last() {
            if line_no > *end {
                type_spans.pop();
            } else {
                break;
            }
        }

        let Some(decl) = match_declaration(line, language) else {
            continue;
        };

        let end_line = block_end(&lines, i);
        let content_slice = lines[i..end_line].join("\n");
        let in_type = type_spans.last().map(|(name, _)| name.clone());

        let kind = match decl.kind {
            ChunkKind::Function if in_type.is_some() || decl.receiver.is_some() => ChunkKind::Method,
            other => other,
        };

        let owner = decl.receiver.clone().or(in_type);
        let qualified = match &owner {
            Some(owner) => format!("{owner}.{}", decl.name),
            None => decl.name.clone(),
        };
        let mut symbols = vec![qualified.clone()];
        if qualified != decl.name {
            symbols.push(decl.name.clone());
        }

        let conformances = if matches!(
            decl.kind,
            ChunkKind::Class | ChunkKind::Struct | ChunkKind::Interface | ChunkKind::Enum
        ) {
            inheritance_names(line, &decl.name)
        } else {
            BTreeSet::new()
        };

        chunks.push(Chunk {
            id: chunk_id(path, &qualified, kind, line_no),
            path: path.to_string(),
            content: content_slice.clone(),
            start_line: line_no,
            end_line,
            kind,
            symbols,
            references: identifier_references(&content_slice, &decl.name),
            conformances,
            file_hash: file_hash.to_string(),
            doc_comment: leading_doc_comment(&lines, i),
            signature: Some(signature_line(line)),
            breadcrumb: owner.as_ref().map(|o| format!("{o} > {}", decl.name)),
            language: language.to_string(),
        });

        if matches!(
            decl.kind,
            ChunkKind::Class
                | ChunkKind::Struct
                | ChunkKind::Interface
                | ChunkKind::Enum
                | ChunkKind::Namespace
        ) {
            type_spans.push((decl.name, end_line));
        }
    }

    chunks
}

/// JSON/YAML files become a single document chunk whose symbols are the
/// top-level keys.
pub fn parse_config(path: &str, content: &str, file_hash: &str, language: &str) -> Vec<Chunk> {
    let key_pattern: &Regex = if language == "json" { &JSON_KEY } else { &YAML_KEY };
    let mut symbols: Vec<String> = Vec::new();
    for captures in key_pattern.captures_iter(content) {
        let key = captures[1].to_string();
        if !symbols.contains(&key) {
            symbols.push(key);
        }
    }
    let name = std::path::Path::new(path)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(path)
        .to_string();
    if symbols.is_empty() {
        symbols.push(name.clone());
    }
    vec![Chunk {
        id: chunk_id(path, &name, ChunkKind::Document, 1),
        path: path.to_string(),
        content: content.to_string(),
        start_line: 1,
        end_line: content.lines().count().max(1),
        kind: ChunkKind::Document,
        symbols,
        references: BTreeSet::new(),
        conformances: BTreeSet::new(),
        file_hash: file_hash.to_string(),
        doc_comment: None,
        signature: None,
        breadcrumb: None,
        language: language.to_string(),
    }]
}

fn match_declaration(line: &str, language: &str) -> Option<Declaration> {
    if let Some(captures) = TYPE_DECL.captures(line) {
        let kind = match &captures[1] {
            "class" => ChunkKind::Class,
            "struct" => ChunkKind::Struct,
            "interface" => ChunkKind::Interface,
            "enum" => ChunkKind::Enum,
            _ => ChunkKind::Namespace,
        };
        return Some(Declaration {
            kind,
            name: captures[2].trim_end_matches(':').to_string(),
            receiver: None,
        });
    }

    match language {
        "javascript" | "typescript" => {
            if let Some(captures) = FUNCTION_DECL.captures(line) {
                return Some(Declaration {
                    kind: ChunkKind::Function,
                    name: captures[1].to_string(),
                    receiver: None,
                });
            }
            if let Some(captures) = ARROW_DECL.captures(line) {
                return Some(Declaration {
                    kind: ChunkKind::Function,
                    name: captures[1].to_string(),
                    receiver: None,
                });
            }
        }
        "go" => {
            if let Some(captures) = GO_FUNC_DECL.captures(line) {
                return Some(Declaration {
                    kind: ChunkKind::Function,
                    name: captures[2].to_string(),
                    receiver: captures.get(1).map(|m| m.as_str().to_string()),
                });
            }
        }
        "kotlin" => {
            if let Some(captures) = KOTLIN_FUN_DECL.captures(line) {
                return Some(Declaration {
                    kind: ChunkKind::Function,
                    name: captures[1].to_string(),
                    receiver: None,
                });
            }
        }
        _ => {
            if let Some(captures) = C_FUNC_DECL.captures(line) {
                let name = captures[1].to_string();
                if !RESERVED.contains(&name.as_str()) {
                    return Some(Declaration {
                        kind: ChunkKind::Function,
                        name,
                        receiver: None,
                    });
                }
            }
        }
    }
    None
}

/// Last line of the brace-balanced block opened at `start`. Declarations
/// with no opening brace span a single line.
fn block_end(lines: &[&str], start: usize) -> usize {
    let mut depth = 0i32;
    let mut opened = false;
    for (offset, line) in lines[start..].iter().enumerate() {
        for c in line.chars() {
            match c {
                '{' => {
                    depth += 1;
                    opened = true;
                }
                '}' => depth -= 1,
                _ => {}
            }
        }
        if opened && depth <= 0 {
            return start + offset + 1;
        }
        // A `;`-terminated declaration never opens a block.
        if !opened && line.trim_end().ends_with(';') {
            return start + offset + 1;
        }
        // Nothing opened within a few lines: treat as a one-line declaration.
        if !opened && offset >= 2 {
            return start + 1;
        }
    }
    lines.len()
}

fn inheritance_names(line: &str, declared: &str) -> BTreeSet<String> {
    let mut names = BTreeSet::new();
    let header = line.split('{').next().unwrap_or(line);

    for keyword in ["extends", "implements"] {
        if let Some(idx) = header.find(keyword) {
            let rest = &header[idx + keyword.len()..];
            let rest = rest
                .split(|c| c == '{')
                .next()
                .unwrap_or(rest)
                .split("implements")
                .next()
                .unwrap_or(rest);
            collect_type_list(rest, declared, &mut names);
        }
    }

    // C++/C# style `class Foo : Bar, Baz`.
    if names.is_empty()
        && let Some(idx) = header.find(':')
    {
        collect_type_list(&header[idx + 1..], declared, &mut names);
    }
    names
}

fn collect_type_list(list: &str, declared: &str, out: &mut BTreeSet<String>) {
    for part in list.split(',') {
        let name = part
            .split_whitespace()
            .find(|w| {
                !matches!(
                    *w,
                    "public" | "private" | "protected" | "virtual" | "final" | "sealed"
                )
            })
            .unwrap_or("");
        let name = name.split('<').next().unwrap_or(name).trim();
        if !name.is_empty()
            && name != declared
            && name
                .chars()
                .all(|c| c.is_alphanumeric() || c == '_' || c == '.')
        {
            out.insert(name.to_string());
        }
    }
}

fn identifier_references(content: &str, declared: &str) -> BTreeSet<String> {
    IDENTIFIER
        .find_iter(content)
        .map(|m| m.as_str())
        .filter(|word| {
            word.len() >= 2 && *word != declared && !RESERVED.contains(&word.to_lowercase().as_str())
        })
        .map(|word| word.to_string())
        .collect()
}

fn leading_doc_comment(lines: &[&str], decl_index: usize) -> Option<String> {
    let mut pieces: Vec<String> = Vec::new();
    for raw in lines[..decl_index].iter().rev() {
        let line = raw.trim_start();
        if line.starts_with("///") || line.starts_with("//!") {
            pieces.push(line.trim_start_matches(['/', '!']).trim().to_string());
        } else if line.starts_with("/*") || line.starts_with('*') || line.ends_with("*/") {
            let cleaned = line
                .trim_start_matches("/**")
                .trim_start_matches("/*")
                .trim_end_matches("*/")
                .trim_start_matches('*')
                .trim()
                .to_string();
            if !cleaned.is_empty() {
                pieces.push(cleaned);
            }
            if line.starts_with("/*") {
                break;
            }
        } else {
            break;
        }
    }
    if pieces.is_empty() {
        return None;
    }
    pieces.reverse();
    Some(pieces.join("\n"))
}

fn signature_line(line: &str) -> String {
    line.split('{')
        .next()
        .unwrap_or(line)
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn java_class_with_interfaces_and_methods() {
        let source = "\
/** Repository over users. */
public class UserRepository extends BaseRepository implements Store, Closeable {
    public User findById(long id) {
        return lookup(id);
    }
}
";
        let chunks = parse_code("src/UserRepository.java", source, "f00d000000000000", "java");
        let class = &chunks[0];
        assert_eq!(class.kind, ChunkKind::Class);
        assert_eq!(class.symbols[0], "UserRepository");
        assert!(class.conformances.contains("BaseRepository"));
        assert!(class.conformances.contains("Store"));
        assert!(class.conformances.contains("Closeable"));
        assert_eq!(class.doc_comment.as_deref(), Some("Repository over users."));
        assert_eq!(class.start_line, 2);
        assert_eq!(class.end_line, 6);

        let method = chunks
            .iter()
            .find(|c| c.symbols[0] == "UserRepository.findById")
            .expect("method chunk");
        assert_eq!(method.kind, ChunkKind::Method);
        assert_eq!(
            method.breadcrumb.as_deref(),
            Some("UserRepository > findById")
        );
        assert!(method.references.contains("lookup"));
    }

    #[test]
    fn typescript_functions_and_arrows() {
        let source = "\
export function renderPage(input: Input): string {
    return template(input);
}

export const formatDate = (d: Date) => d.toISOString();
";
        let chunks = parse_code("web/render.ts", source, "f00d000000000000", "typescript");
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].symbols[0], "renderPage");
        assert_eq!(chunks[0].kind, ChunkKind::Function);
        assert_eq!(chunks[1].symbols[0], "formatDate");
    }

    #[test]
    fn go_methods_carry_their_receiver() {
        let source = "\
func (s *Server) Handle(w ResponseWriter, r *Request) {
    s.mux.route(w, r)
}

func NewServer() *Server {
    return &Server{}
}
";
        let chunks = parse_code("srv/server.go", source, "f00d000000000000", "go");
        let method = &chunks[0];
        assert_eq!(method.kind, ChunkKind::Method);
        assert_eq!(method.symbols[0], "Server.Handle");
        let ctor = &chunks[1];
        assert_eq!(ctor.kind, ChunkKind::Function);
        assert_eq!(ctor.symbols[0], "NewServer");
    }

    #[test]
    fn c_function_definitions_are_found() {
        let source = "\
static int parse_header(const char *buf, size_t len) {
    return scan(buf, len);
}
";
        let chunks = parse_code("src/parse.c", source, "f00d000000000000", "c");
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].symbols[0], "parse_header");
        assert_eq!(chunks[0].kind, ChunkKind::Function);
    }

    #[test]
    fn json_becomes_one_document_with_top_level_keys() {
        let source = "{\n  \"name\": \"quarry\",\n  \"version\": \"1.0\"\n}\n";
        let chunks = parse_config("package.json", source, "f00d000000000000", "json");
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].kind, ChunkKind::Document);
        assert!(chunks[0].symbols.contains(&"name".to_string()));
        assert!(chunks[0].symbols.contains(&"version".to_string()));
    }

    #[test]
    fn yaml_top_level_keys_become_symbols() {
        let source = "name: pipeline\nsteps:\n  - run: build\n";
        let chunks = parse_config("ci.yaml", source, "f00d000000000000", "yaml");
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].symbols.contains(&"name".to_string()));
        assert!(chunks[0].symbols.contains(&"steps".to_string()));
    }
}
