use anyhow::Result;
use quarry_core::{Chunk, ChunkKind};
use rusqlite::{Connection, params, params_from_iter};
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Mutex;

/// Persistent keyed chunk storage plus a full-text inverted index.
///
/// Backed by a single SQLite file. The FTS5 table mirrors the `content` and
/// `symbols` columns of the base table through triggers, so lexical state can
/// never drift from the row state. BM25 ranking and per-term document
/// frequencies both come from the FTS layer.
pub struct ChunkStore {
    conn: Mutex<Connection>,
}

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS chunks (
    id TEXT PRIMARY KEY,
    path TEXT NOT NULL,
    content TEXT NOT NULL,
    start_line INTEGER NOT NULL,
    end_line INTEGER NOT NULL,
    kind TEXT NOT NULL,
    symbols TEXT NOT NULL,
    refs TEXT NOT NULL,
    conformances TEXT NOT NULL,
    file_hash TEXT NOT NULL,
    doc_comment TEXT,
    signature TEXT,
    breadcrumb TEXT,
    language TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_chunks_path ON chunks(path);

CREATE VIRTUAL TABLE IF NOT EXISTS chunks_fts USING fts5(
    content, symbols, content='chunks', content_rowid='rowid'
);
CREATE VIRTUAL TABLE IF NOT EXISTS chunks_vocab USING fts5vocab('chunks_fts', 'row');

CREATE TRIGGER IF NOT EXISTS chunks_ai AFTER INSERT ON chunks BEGIN
    INSERT INTO chunks_fts(rowid, content, symbols)
    VALUES (new.rowid, new.content, new.symbols);
END;
CREATE TRIGGER IF NOT EXISTS chunks_ad AFTER DELETE ON chunks BEGIN
    INSERT INTO chunks_fts(chunks_fts, rowid, content, symbols)
    VALUES ('delete', old.rowid, old.content, old.symbols);
END;
CREATE TRIGGER IF NOT EXISTS chunks_au AFTER UPDATE ON chunks BEGIN
    INSERT INTO chunks_fts(chunks_fts, rowid, content, symbols)
    VALUES ('delete', old.rowid, old.content, old.symbols);
    INSERT INTO chunks_fts(rowid, content, symbols)
    VALUES (new.rowid, new.content, new.symbols);
END;

CREATE TABLE IF NOT EXISTS chunk_conformances (
    chunk_id TEXT NOT NULL,
    conformance TEXT NOT NULL COLLATE NOCASE
);
CREATE INDEX IF NOT EXISTS idx_conformances ON chunk_conformances(conformance);
CREATE INDEX IF NOT EXISTS idx_conformances_chunk ON chunk_conformances(chunk_id);
";

impl ChunkStore {
    /// Open (or create) the store at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// In-memory store, for tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn get(&self, id: &str) -> Result<Option<Chunk>> {
        let conn = self.conn.lock().expect("chunk store poisoned");
        let mut stmt = conn.prepare_cached(&format!("{SELECT_CHUNK} WHERE id = ?1"))?;
        let mut rows = stmt.query(params![id])?;
        match rows.next()? {
            Some(row) => Ok(Some(row_to_chunk(row)?)),
            None => Ok(None),
        }
    }

    /// Batch lookup. Duplicate ids fold to a single row; absent ids are skipped.
    pub fn get_by_ids(&self, ids: &[String]) -> Result<Vec<Chunk>> {
        let unique: BTreeSet<&String> = ids.iter().collect();
        if unique.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders = vec!["?"; unique.len()].join(",");
        let sql = format!("{SELECT_CHUNK} WHERE id IN ({placeholders})");
        let conn = self.conn.lock().expect("chunk store poisoned");
        let mut stmt = conn.prepare(&sql)?;
        let mut rows = stmt.query(params_from_iter(unique))?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            out.push(row_to_chunk(row)?);
        }
        Ok(out)
    }

    /// Insert or replace a chunk, idempotent by id.
    pub fn upsert(&self, chunk: &Chunk) -> Result<()> {
        let mut conn = self.conn.lock().expect("chunk store poisoned");
        let tx = conn.transaction()?;
        upsert_in_tx(&tx, chunk)?;
        tx.commit()?;
        Ok(())
    }

    pub fn upsert_batch(&self, chunks: &[Chunk]) -> Result<()> {
        let mut conn = self.conn.lock().expect("chunk store poisoned");
        let tx = conn.transaction()?;
        for chunk in chunks {
            upsert_in_tx(&tx, chunk)?;
        }
        tx.commit()?;
        Ok(())
    }

    /// Remove one chunk by id. Returns whether a row existed.
    pub fn delete(&self, id: &str) -> Result<bool> {
        let mut conn = self.conn.lock().expect("chunk store poisoned");
        let tx = conn.transaction()?;
        tx.execute(
            "DELETE FROM chunk_conformances WHERE chunk_id = ?1",
            params![id],
        )?;
        let changed = tx.execute("DELETE FROM chunks WHERE id = ?1", params![id])?;
        tx.commit()?;
        Ok(changed > 0)
    }

    /// Remove every chunk stored under `path`. Returns the number removed.
    pub fn delete_by_path(&self, path: &str) -> Result<usize> {
        let mut conn = self.conn.lock().expect("chunk store poisoned");
        let tx = conn.transaction()?;
        tx.execute(
            "DELETE FROM chunk_conformances
             WHERE chunk_id IN (SELECT id FROM chunks WHERE path = ?1)",
            params![path],
        )?;
        let changed = tx.execute("DELETE FROM chunks WHERE path = ?1", params![path])?;
        tx.commit()?;
        Ok(changed)
    }

    /// Ids of every chunk stored under `path`.
    pub fn ids_for_path(&self, path: &str) -> Result<Vec<String>> {
        let conn = self.conn.lock().expect("chunk store poisoned");
        let mut stmt =
            conn.prepare_cached("SELECT id FROM chunks WHERE path = ?1 ORDER BY rowid")?;
        let ids = stmt
            .query_map(params![path], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(ids)
    }

    /// Top-`limit` chunks for `query`, BM25-scored, best first. Queries that
    /// the FTS layer cannot parse yield an empty list rather than an error.
    pub fn search_fts(&self, query: &str, limit: usize) -> Result<Vec<(String, f32)>> {
        let Some(match_expr) = fts_match_expression(query) else {
            return Ok(Vec::new());
        };
        let conn = self.conn.lock().expect("chunk store poisoned");
        let mut stmt = conn.prepare_cached(
            "SELECT c.id, bm25(chunks_fts) AS rank
             FROM chunks_fts
             JOIN chunks c ON c.rowid = chunks_fts.rowid
             WHERE chunks_fts MATCH ?1
             ORDER BY rank ASC, c.rowid ASC
             LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![match_expr, limit as i64], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, f64>(1)?))
        });
        match rows {
            Ok(rows) => {
                let mut out = Vec::new();
                for row in rows {
                    let (id, rank) = row?;
                    // FTS5 bm25() is smaller-is-better and negative for
                    // relevant rows; flip it so higher is better.
                    out.push((id, -rank as f32));
                }
                Ok(out)
            }
            Err(err) => {
                tracing::debug!(query, %err, "fts query rejected, returning empty result");
                Ok(Vec::new())
            }
        }
    }

    /// Number of distinct chunks whose content or symbols contain `term`.
    pub fn term_frequency(&self, term: &str) -> Result<usize> {
        let needle = term.to_lowercase();
        let conn = self.conn.lock().expect("chunk store poisoned");
        let mut stmt = conn.prepare_cached("SELECT doc FROM chunks_vocab WHERE term = ?1")?;
        let count: Option<i64> = stmt
            .query_row(params![needle], |row| row.get(0))
            .map(Some)
            .or_else(|err| match err {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(other),
            })?;
        Ok(count.unwrap_or(0) as usize)
    }

    /// Chunks that declare `protocol_name` in their conformance clause,
    /// concrete types first, stable order.
    pub fn find_conforming_types(&self, protocol_name: &str, limit: usize) -> Result<Vec<Chunk>> {
        let conn = self.conn.lock().expect("chunk store poisoned");
        let mut stmt = conn.prepare_cached(&format!(
            "{SELECT_CHUNK} WHERE id IN
                (SELECT chunk_id FROM chunk_conformances WHERE conformance = ?1)
             ORDER BY CASE kind
                 WHEN 'class' THEN 0
                 WHEN 'struct' THEN 0
                 WHEN 'actor' THEN 0
                 WHEN 'enum' THEN 0
                 WHEN 'extension' THEN 1
                 ELSE 2
             END, path ASC, start_line ASC
             LIMIT ?2"
        ))?;
        let mut rows = stmt.query(params![protocol_name, limit as i64])?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            out.push(row_to_chunk(row)?);
        }
        Ok(out)
    }

    pub fn count(&self) -> Result<usize> {
        let conn = self.conn.lock().expect("chunk store poisoned");
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM chunks", [], |row| row.get(0))?;
        Ok(count as usize)
    }
}

const SELECT_CHUNK: &str = "SELECT id, path, content, start_line, end_line, kind, symbols,
    refs, conformances, file_hash, doc_comment, signature, breadcrumb, language FROM chunks";

fn upsert_in_tx(tx: &rusqlite::Transaction<'_>, chunk: &Chunk) -> Result<()> {
    tx.execute(
        "INSERT INTO chunks (id, path, content, start_line, end_line, kind, symbols,
                             refs, conformances, file_hash, doc_comment, signature,
                             breadcrumb, language)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
         ON CONFLICT(id) DO UPDATE SET
             path = excluded.path,
             content = excluded.content,
             start_line = excluded.start_line,
             end_line = excluded.end_line,
             kind = excluded.kind,
             symbols = excluded.symbols,
             refs = excluded.refs,
             conformances = excluded.conformances,
             file_hash = excluded.file_hash,
             doc_comment = excluded.doc_comment,
             signature = excluded.signature,
             breadcrumb = excluded.breadcrumb,
             language = excluded.language",
        params![
            chunk.id,
            chunk.path,
            chunk.content,
            chunk.start_line as i64,
            chunk.end_line as i64,
            chunk.kind.as_str(),
            serde_json::to_string(&chunk.symbols)?,
            serde_json::to_string(&chunk.references)?,
            serde_json::to_string(&chunk.conformances)?,
            chunk.file_hash,
            chunk.doc_comment,
            chunk.signature,
            chunk.breadcrumb,
            chunk.language,
        ],
    )?;
    tx.execute(
        "DELETE FROM chunk_conformances WHERE chunk_id = ?1",
        params![chunk.id],
    )?;
    for conformance in &chunk.conformances {
        tx.execute(
            "INSERT INTO chunk_conformances (chunk_id, conformance) VALUES (?1, ?2)",
            params![chunk.id, conformance],
        )?;
    }
    Ok(())
}

fn row_to_chunk(row: &rusqlite::Row<'_>) -> rusqlite::Result<Chunk> {
    let kind: String = row.get(5)?;
    let symbols: String = row.get(6)?;
    let refs: String = row.get(7)?;
    let conformances: String = row.get(8)?;
    Ok(Chunk {
        id: row.get(0)?,
        path: row.get(1)?,
        content: row.get(2)?,
        start_line: row.get::<_, i64>(3)? as usize,
        end_line: row.get::<_, i64>(4)? as usize,
        kind: ChunkKind::parse(&kind),
        symbols: serde_json::from_str(&symbols).unwrap_or_default(),
        references: serde_json::from_str(&refs).unwrap_or_default(),
        conformances: serde_json::from_str(&conformances).unwrap_or_default(),
        file_hash: row.get(9)?,
        doc_comment: row.get(10)?,
        signature: row.get(11)?,
        breadcrumb: row.get(12)?,
        language: row.get(13)?,
    })
}

/// Build a syntax-safe FTS5 match expression: each alphanumeric run becomes a
/// quoted token, joined with OR. Punctuation in the raw query can never reach
/// the FTS parser this way.
fn fts_match_expression(query: &str) -> Option<String> {
    let terms: Vec<String> = query
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| format!("\"{t}\""))
        .collect();
    if terms.is_empty() {
        None
    } else {
        Some(terms.join(" OR "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    fn chunk(id: &str, path: &str, content: &str, symbols: &[&str]) -> Chunk {
        Chunk {
            id: id.to_string(),
            path: path.to_string(),
            content: content.to_string(),
            start_line: 1,
            end_line: 5,
            kind: ChunkKind::Function,
            symbols: symbols.iter().map(|s| s.to_string()).collect(),
            references: BTreeSet::new(),
            conformances: BTreeSet::new(),
            file_hash: "abcdef0123456789".to_string(),
            doc_comment: None,
            signature: None,
            breadcrumb: None,
            language: "swift".to_string(),
        }
    }

    #[test]
    fn get_returns_inserted_chunk() {
        let store = ChunkStore::open_in_memory().expect("store");
        let c = chunk("c1", "src/A.swift", "func alpha() {}", &["alpha"]);
        store.upsert(&c).expect("upsert");
        let got = store.get("c1").expect("get").expect("present");
        assert_eq!(got, c);
        assert!(store.get("missing").expect("get").is_none());
    }

    #[test]
    fn upsert_is_idempotent_by_id() {
        let store = ChunkStore::open_in_memory().expect("store");
        let mut c = chunk("c1", "src/A.swift", "func alpha() {}", &["alpha"]);
        store.upsert(&c).expect("upsert");
        c.content = "func alpha() { return }".to_string();
        store.upsert(&c).expect("upsert again");
        assert_eq!(store.count().expect("count"), 1);
        let got = store.get("c1").expect("get").expect("present");
        assert!(got.content.contains("return"));
    }

    #[test]
    fn get_by_ids_folds_duplicates() {
        let store = ChunkStore::open_in_memory().expect("store");
        store
            .upsert(&chunk("c1", "a.swift", "func one() {}", &["one"]))
            .expect("upsert");
        store
            .upsert(&chunk("c2", "b.swift", "func two() {}", &["two"]))
            .expect("upsert");
        let got = store
            .get_by_ids(&[
                "c1".to_string(),
                "c1".to_string(),
                "c2".to_string(),
                "nope".to_string(),
            ])
            .expect("batch");
        assert_eq!(got.len(), 2);
    }

    #[test]
    fn delete_by_path_removes_all_rows_for_path() {
        let store = ChunkStore::open_in_memory().expect("store");
        store
            .upsert(&chunk("c1", "a.swift", "func one() {}", &["one"]))
            .expect("upsert");
        store
            .upsert(&chunk("c2", "a.swift", "func two() {}", &["two"]))
            .expect("upsert");
        store
            .upsert(&chunk("c3", "b.swift", "func three() {}", &["three"]))
            .expect("upsert");
        let removed = store.delete_by_path("a.swift").expect("delete");
        assert_eq!(removed, 2);
        assert_eq!(store.count().expect("count"), 1);
        assert!(store.search_fts("one", 10).expect("fts").is_empty());
    }

    #[test]
    fn fts_ranks_matching_chunks_best_first() {
        let store = ChunkStore::open_in_memory().expect("store");
        store
            .upsert(&chunk(
                "c1",
                "a.swift",
                "func resolveConfig() { resolveConfig marker }",
                &["resolveConfig"],
            ))
            .expect("upsert");
        store
            .upsert(&chunk("c2", "b.swift", "unrelated body text", &["other"]))
            .expect("upsert");
        let hits = store.search_fts("resolveConfig", 10).expect("fts");
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].0, "c1");
        assert!(hits[0].1 > 0.0);
    }

    #[test]
    fn fts_survives_punctuation_queries() {
        let store = ChunkStore::open_in_memory().expect("store");
        store
            .upsert(&chunk("c1", "a.swift", "func alpha() {}", &["alpha"]))
            .expect("upsert");
        assert!(store.search_fts("\"unbalanced", 10).is_ok());
        assert!(store.search_fts("(((", 10).expect("fts").is_empty());
        assert!(store.search_fts("", 10).expect("fts").is_empty());
    }

    #[test]
    fn term_frequency_counts_distinct_chunks() {
        let store = ChunkStore::open_in_memory().expect("store");
        store
            .upsert(&chunk(
                "c1",
                "a.swift",
                "VectorStore VectorStore appears twice here",
                &["VectorStore"],
            ))
            .expect("upsert");
        store
            .upsert(&chunk("c2", "b.swift", "VectorStore once", &["other"]))
            .expect("upsert");
        assert_eq!(store.term_frequency("VectorStore").expect("tf"), 2);
        assert_eq!(store.term_frequency("vectorstore").expect("tf"), 2);
        assert_eq!(store.term_frequency("absent").expect("tf"), 0);
    }

    #[test]
    fn conforming_types_rank_concrete_types_before_extensions() {
        let store = ChunkStore::open_in_memory().expect("store");
        let mut ext = chunk("e1", "z/Ext.swift", "extension Foo: Cache {}", &["Foo"]);
        ext.kind = ChunkKind::Extension;
        ext.conformances = BTreeSet::from(["Cache".to_string()]);
        let mut class = chunk("k1", "a/Impl.swift", "class DiskCache: Cache {}", &[
            "DiskCache",
        ]);
        class.kind = ChunkKind::Class;
        class.conformances = BTreeSet::from(["Cache".to_string()]);
        store.upsert(&ext).expect("upsert");
        store.upsert(&class).expect("upsert");

        let found = store.find_conforming_types("Cache", 10).expect("find");
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].id, "k1");
        assert_eq!(found[1].id, "e1");

        // Case-insensitive lookup.
        assert_eq!(store.find_conforming_types("cache", 10).expect("find").len(), 2);
        assert!(store.find_conforming_types("Nope", 10).expect("find").is_empty());
    }

    #[test]
    fn conformance_index_follows_updates() {
        let store = ChunkStore::open_in_memory().expect("store");
        let mut c = chunk("c1", "a.swift", "struct S: Codable {}", &["S"]);
        c.kind = ChunkKind::Struct;
        c.conformances = BTreeSet::from(["Codable".to_string()]);
        store.upsert(&c).expect("upsert");
        assert_eq!(store.find_conforming_types("Codable", 10).expect("f").len(), 1);

        c.conformances = BTreeSet::from(["Sendable".to_string()]);
        store.upsert(&c).expect("upsert");
        assert!(store.find_conforming_types("Codable", 10).expect("f").is_empty());
        assert_eq!(store.find_conforming_types("Sendable", 10).expect("f").len(), 1);
    }
}
