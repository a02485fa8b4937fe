use anyhow::Result;
use quarry_core::{Snippet, SnippetKind};
use rusqlite::{Connection, params};
use std::path::Path;
use std::sync::Mutex;

/// Documentation snippets with their own full-text index, searchable
/// independently of the main chunk ranker.
pub struct SnippetStore {
    conn: Mutex<Connection>,
}

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS snippets (
    id TEXT PRIMARY KEY,
    path TEXT NOT NULL,
    content TEXT NOT NULL,
    start_line INTEGER NOT NULL,
    end_line INTEGER NOT NULL,
    breadcrumb TEXT,
    language TEXT NOT NULL,
    chunk_id TEXT NOT NULL,
    kind TEXT NOT NULL,
    file_hash TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_snippets_path ON snippets(path);

CREATE VIRTUAL TABLE IF NOT EXISTS snippets_fts USING fts5(
    content, content='snippets', content_rowid='rowid'
);

CREATE TRIGGER IF NOT EXISTS snippets_ai AFTER INSERT ON snippets BEGIN
    INSERT INTO snippets_fts(rowid, content) VALUES (new.rowid, new.content);
END;
CREATE TRIGGER IF NOT EXISTS snippets_ad AFTER DELETE ON snippets BEGIN
    INSERT INTO snippets_fts(snippets_fts, rowid, content)
    VALUES ('delete', old.rowid, old.content);
END;
CREATE TRIGGER IF NOT EXISTS snippets_au AFTER UPDATE ON snippets BEGIN
    INSERT INTO snippets_fts(snippets_fts, rowid, content)
    VALUES ('delete', old.rowid, old.content);
    INSERT INTO snippets_fts(rowid, content) VALUES (new.rowid, new.content);
END;
";

impl SnippetStore {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn upsert_batch(&self, snippets: &[Snippet]) -> Result<()> {
        let mut conn = self.conn.lock().expect("snippet store poisoned");
        let tx = conn.transaction()?;
        for snippet in snippets {
            tx.execute(
                "INSERT INTO snippets (id, path, content, start_line, end_line,
                                       breadcrumb, language, chunk_id, kind, file_hash)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
                 ON CONFLICT(id) DO UPDATE SET
                     path = excluded.path,
                     content = excluded.content,
                     start_line = excluded.start_line,
                     end_line = excluded.end_line,
                     breadcrumb = excluded.breadcrumb,
                     language = excluded.language,
                     chunk_id = excluded.chunk_id,
                     kind = excluded.kind,
                     file_hash = excluded.file_hash",
                params![
                    snippet.id,
                    snippet.path,
                    snippet.content,
                    snippet.start_line as i64,
                    snippet.end_line as i64,
                    snippet.breadcrumb,
                    snippet.language,
                    snippet.chunk_id,
                    snippet.kind.as_str(),
                    snippet.file_hash,
                ],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    pub fn delete_by_path(&self, path: &str) -> Result<usize> {
        let conn = self.conn.lock().expect("snippet store poisoned");
        let changed = conn.execute("DELETE FROM snippets WHERE path = ?1", params![path])?;
        Ok(changed)
    }

    /// BM25-ranked snippets for `query`, best first; unparsable queries
    /// produce an empty list, matching the chunk store contract.
    pub fn search_fts(&self, query: &str, limit: usize) -> Result<Vec<(Snippet, f32)>> {
        let terms: Vec<String> = query
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
            .map(|t| format!("\"{t}\""))
            .collect();
        if terms.is_empty() {
            return Ok(Vec::new());
        }
        let match_expr = terms.join(" OR ");

        let conn = self.conn.lock().expect("snippet store poisoned");
        let mut stmt = conn.prepare_cached(
            "SELECT s.id, s.path, s.content, s.start_line, s.end_line, s.breadcrumb,
                    s.language, s.chunk_id, s.kind, s.file_hash, bm25(snippets_fts) AS rank
             FROM snippets_fts
             JOIN snippets s ON s.rowid = snippets_fts.rowid
             WHERE snippets_fts MATCH ?1
             ORDER BY rank ASC, s.rowid ASC
             LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![match_expr, limit as i64], |row| {
            let kind: String = row.get(8)?;
            Ok((
                Snippet {
                    id: row.get(0)?,
                    path: row.get(1)?,
                    content: row.get(2)?,
                    start_line: row.get::<_, i64>(3)? as usize,
                    end_line: row.get::<_, i64>(4)? as usize,
                    breadcrumb: row.get(5)?,
                    language: row.get(6)?,
                    chunk_id: row.get(7)?,
                    kind: SnippetKind::parse(&kind),
                    file_hash: row.get(9)?,
                },
                row.get::<_, f64>(10)?,
            ))
        });
        match rows {
            Ok(rows) => {
                let mut out = Vec::new();
                for row in rows {
                    let (snippet, rank) = row?;
                    out.push((snippet, -rank as f32));
                }
                Ok(out)
            }
            Err(err) => {
                tracing::debug!(query, %err, "snippet fts query rejected");
                Ok(Vec::new())
            }
        }
    }

    pub fn count(&self) -> Result<usize> {
        let conn = self.conn.lock().expect("snippet store poisoned");
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM snippets", [], |row| row.get(0))?;
        Ok(count as usize)
    }
}
