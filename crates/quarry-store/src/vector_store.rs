use anyhow::Result;
use quarry_core::StoreError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

/// Cosine-similarity top-k index over chunk embeddings.
///
/// Vectors live in one flat row-major buffer; deletion swaps the last row
/// into the hole so the buffer stays dense. Persistence is a raw
/// little-endian f32 file plus a JSON mapping of row order to chunk ids.
#[derive(Debug)]
pub struct VectorStore {
    dimension: usize,
    data_path: PathBuf,
    mapping_path: PathBuf,
    inner: RwLock<VectorData>,
}

#[derive(Default, Debug)]
struct VectorData {
    ids: Vec<String>,
    rows: HashMap<String, usize>,
    values: Vec<f32>,
}

#[derive(Serialize, Deserialize)]
struct VectorMapping {
    dimension: usize,
    ids: Vec<String>,
}

impl VectorStore {
    /// Open the store under `index_dir`, loading any persisted index.
    pub fn open(index_dir: &Path, dimension: usize) -> Result<Self> {
        let data_path = index_dir.join("vectors.bin");
        let mapping_path = index_dir.join("vectors.bin.mapping");
        let store = Self {
            dimension,
            data_path,
            mapping_path,
            inner: RwLock::new(VectorData::default()),
        };
        store.load()?;
        Ok(store)
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn add(&self, id: &str, vector: &[f32]) -> Result<()> {
        self.check_dimension(vector)?;
        let mut inner = self.inner.write().expect("vector store poisoned");
        if let Some(&row) = inner.rows.get(id) {
            let start = row * self.dimension;
            inner.values[start..start + self.dimension].copy_from_slice(vector);
        } else {
            let row = inner.ids.len();
            inner.ids.push(id.to_string());
            inner.rows.insert(id.to_string(), row);
            inner.values.extend_from_slice(vector);
        }
        Ok(())
    }

    pub fn add_batch(&self, entries: &[(String, Vec<f32>)]) -> Result<()> {
        for (id, vector) in entries {
            self.add(id, vector)?;
        }
        Ok(())
    }

    /// Top-`limit` entries by cosine similarity, best first. Equal scores
    /// order by id so identical state always produces identical output.
    pub fn search(&self, query: &[f32], limit: usize) -> Result<Vec<(String, f32)>> {
        self.check_dimension(query)?;
        let inner = self.inner.read().expect("vector store poisoned");
        let mut scored: Vec<(String, f32)> = inner
            .ids
            .iter()
            .enumerate()
            .map(|(row, id)| {
                let start = row * self.dimension;
                let sim = cosine_similarity(query, &inner.values[start..start + self.dimension]);
                (id.clone(), sim)
            })
            .collect();
        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        scored.truncate(limit);
        Ok(scored)
    }

    /// Remove a vector by id. Returns whether it was present.
    pub fn delete(&self, id: &str) -> bool {
        let mut inner = self.inner.write().expect("vector store poisoned");
        let Some(row) = inner.rows.remove(id) else {
            return false;
        };
        let last = inner.ids.len() - 1;
        let dim = self.dimension;
        if row != last {
            let moved_id = inner.ids[last].clone();
            let (head, tail) = inner.values.split_at_mut(last * dim);
            head[row * dim..row * dim + dim].copy_from_slice(&tail[..dim]);
            inner.ids[row] = moved_id.clone();
            inner.rows.insert(moved_id, row);
        }
        inner.ids.pop();
        inner.values.truncate(last * dim);
        true
    }

    pub fn contains(&self, id: &str) -> bool {
        self.inner
            .read()
            .expect("vector store poisoned")
            .rows
            .contains_key(id)
    }

    pub fn count(&self) -> usize {
        self.inner.read().expect("vector store poisoned").ids.len()
    }

    pub fn clear(&self) {
        let mut inner = self.inner.write().expect("vector store poisoned");
        *inner = VectorData::default();
    }

    /// Write the index and its id mapping to disk.
    pub fn save(&self) -> Result<()> {
        let inner = self.inner.read().expect("vector store poisoned");
        let mut bytes = Vec::with_capacity(inner.values.len() * 4);
        for value in &inner.values {
            bytes.extend_from_slice(&value.to_le_bytes());
        }
        std::fs::write(&self.data_path, bytes)?;
        let mapping = VectorMapping {
            dimension: self.dimension,
            ids: inner.ids.clone(),
        };
        std::fs::write(&self.mapping_path, serde_json::to_vec_pretty(&mapping)?)?;
        Ok(())
    }

    /// Replace in-memory state with the persisted index, if one exists.
    pub fn load(&self) -> Result<()> {
        if !self.data_path.exists() || !self.mapping_path.exists() {
            return Ok(());
        }
        let mapping: VectorMapping =
            serde_json::from_slice(&std::fs::read(&self.mapping_path)?).map_err(|err| {
                StoreError::Corruption {
                    detail: format!("vector mapping unreadable: {err}"),
                }
            })?;
        if mapping.dimension != self.dimension {
            return Err(StoreError::DimensionMismatch {
                expected: self.dimension,
                actual: mapping.dimension,
            }
            .into());
        }
        let bytes = std::fs::read(&self.data_path)?;
        if bytes.len() != mapping.ids.len() * self.dimension * 4 {
            return Err(StoreError::Corruption {
                detail: format!(
                    "vector file holds {} bytes, mapping expects {} rows of dim {}",
                    bytes.len(),
                    mapping.ids.len(),
                    self.dimension
                ),
            }
            .into());
        }
        let values: Vec<f32> = bytes
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect();
        let rows = mapping
            .ids
            .iter()
            .enumerate()
            .map(|(row, id)| (id.clone(), row))
            .collect();
        let mut inner = self.inner.write().expect("vector store poisoned");
        *inner = VectorData {
            ids: mapping.ids,
            rows,
            values,
        };
        Ok(())
    }

    fn check_dimension(&self, vector: &[f32]) -> Result<()> {
        if vector.len() != self.dimension {
            return Err(StoreError::DimensionMismatch {
                expected: self.dimension,
                actual: vector.len(),
            }
            .into());
        }
        Ok(())
    }
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}
