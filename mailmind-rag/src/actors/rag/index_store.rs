//! Persisted index generations.
//!
//! One generation is two co-located artifacts:
//! - `rag_index.arrow`: an Arrow IPC file with a single `vector` column of
//!   fixed-size float lists, one row per chunk
//! - `rag_chunks.json`: the chunk texts and their metadata, in the same order,
//!   plus the model, dimension and a SHA-256 of the vector file
//!
//! Row `i` of the vector file, `chunks[i]` and `meta[i]` describe the same
//! chunk. Loading validates that correspondence before any lookup.

use arrow::ipc::reader::FileReader;
use arrow::ipc::writer::FileWriter;
use arrow_array::types::Float32Type;
use arrow_array::{Array, ArrayRef, FixedSizeListArray, Float32Array, RecordBatch};
use arrow_schema::{DataType, Field, Schema};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::io::Cursor;
use std::sync::Arc;
use tokio::fs;
use tracing::{debug, info};

use crate::error::{RagError, RagResult};
use crate::paths::IndexPaths;
use crate::protocol::ScoredChunk;

/// Name of the vector column in the Arrow artifact
const VECTOR_COLUMN: &str = "vector";

/// Per-position metadata stored in the sidecar
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChunkMeta {
    pub filename: String,
    pub chunk_id: String,
}

/// A chunk ready to be written into a generation
#[derive(Debug, Clone, PartialEq)]
pub struct IndexedChunk {
    pub chunk_id: String,
    pub source_file: String,
    pub content: String,
}

/// Contents of `rag_chunks.json`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SidecarFile {
    pub chunks: Vec<String>,
    pub meta: Vec<ChunkMeta>,
    pub model: String,
    pub dimensions: usize,
    pub vectors_sha256: String,
    pub built_at: String,
}

/// Exhaustive nearest-neighbour search by squared Euclidean distance.
#[derive(Debug, Clone, PartialEq)]
pub struct FlatL2Index {
    dimensions: usize,
    /// Row-major, `len() * dimensions` values
    vectors: Vec<f32>,
}

impl FlatL2Index {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions,
            vectors: Vec::new(),
        }
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    pub fn len(&self) -> usize {
        if self.dimensions == 0 {
            0
        } else {
            self.vectors.len() / self.dimensions
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn add(&mut self, vector: &[f32]) -> RagResult<()> {
        if vector.len() != self.dimensions {
            return Err(RagError::EmbeddingService(format!(
                "vector has {} dimensions, index expects {}",
                vector.len(),
                self.dimensions
            )));
        }
        self.vectors.extend_from_slice(vector);
        Ok(())
    }

    pub fn row(&self, position: usize) -> Option<&[f32]> {
        let start = position.checked_mul(self.dimensions)?;
        self.vectors.get(start..start + self.dimensions)
    }

    /// The `min(k, len)` closest positions with their distances, closest first.
    /// Equal distances keep position order.
    pub fn search(&self, query: &[f32], k: usize) -> RagResult<Vec<(usize, f32)>> {
        if query.len() != self.dimensions {
            return Err(RagError::EmbeddingService(format!(
                "query vector has {} dimensions but the index was built with {}",
                query.len(),
                self.dimensions
            )));
        }
        if k == 0 || self.is_empty() {
            return Ok(Vec::new());
        }

        let mut scored: Vec<(usize, f32)> = self
            .vectors
            .chunks_exact(self.dimensions)
            .enumerate()
            .map(|(position, row)| (position, squared_l2(row, query)))
            .collect();

        scored.sort_by(|a, b| a.1.total_cmp(&b.1).then(a.0.cmp(&b.0)));
        scored.truncate(k.min(self.len()));
        Ok(scored)
    }
}

fn squared_l2(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| {
            let d = x - y;
            d * d
        })
        .sum()
}

/// Compute SHA-256 hash of bytes as lowercase hex
pub fn compute_content_hash(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// Schema of the vector artifact
pub fn vector_schema(dimensions: usize, model: &str) -> Arc<Schema> {
    let metadata = HashMap::from([
        ("model".to_string(), model.to_string()),
        ("dimensions".to_string(), dimensions.to_string()),
    ]);
    Arc::new(
        Schema::new(vec![Field::new(
            VECTOR_COLUMN,
            DataType::FixedSizeList(
                Arc::new(Field::new("item", DataType::Float32, true)),
                dimensions as i32,
            ),
            false,
        )])
        .with_metadata(metadata),
    )
}

/// Serialize the index as an Arrow IPC file.
pub fn encode_vectors(index: &FlatL2Index, model: &str) -> RagResult<Vec<u8>> {
    let schema = vector_schema(index.dimensions(), model);

    let rows = index
        .vectors
        .chunks_exact(index.dimensions().max(1))
        .map(|row| Some(row.iter().copied().map(Some).collect::<Vec<_>>()));
    let vector_arr: ArrayRef = Arc::new(FixedSizeListArray::from_iter_primitive::<
        Float32Type,
        _,
        _,
    >(rows, index.dimensions() as i32));

    let batch = RecordBatch::try_new(schema.clone(), vec![vector_arr])?;

    let mut buf = Vec::new();
    {
        let mut writer = FileWriter::try_new(&mut buf, &schema)?;
        writer.write(&batch)?;
        writer.finish()?;
    }
    Ok(buf)
}

/// Decode an Arrow IPC vector file back into a flat index.
pub fn decode_vectors(bytes: &[u8]) -> RagResult<FlatL2Index> {
    let reader = FileReader::try_new(Cursor::new(bytes), None)?;

    let schema = reader.schema();
    let field = schema
        .field_with_name(VECTOR_COLUMN)
        .map_err(|_| RagError::IndexUnavailable("vector column missing".to_string()))?;
    let dimensions = match field.data_type() {
        DataType::FixedSizeList(_, n) if *n > 0 => *n as usize,
        other => {
            return Err(RagError::IndexUnavailable(format!(
                "unexpected vector column type {:?}",
                other
            )))
        }
    };

    let mut index = FlatL2Index::new(dimensions);
    for batch in reader {
        let batch = batch?;
        let list = batch
            .column_by_name(VECTOR_COLUMN)
            .and_then(|c| c.as_any().downcast_ref::<FixedSizeListArray>())
            .ok_or_else(|| RagError::IndexUnavailable("vector column unreadable".to_string()))?;

        for i in 0..list.len() {
            if list.is_null(i) {
                return Err(RagError::IndexUnavailable(format!("vector {} is null", i)));
            }
            let row = list.value(i);
            let floats = row
                .as_any()
                .downcast_ref::<Float32Array>()
                .ok_or_else(|| RagError::IndexUnavailable("vector values are not f32".to_string()))?;
            index.vectors.extend(floats.values().iter().copied());
        }
    }

    Ok(index)
}

/// One loaded, validated index generation
#[derive(Debug, Clone)]
pub struct PersistedIndex {
    pub index: FlatL2Index,
    pub chunks: Vec<String>,
    pub meta: Vec<ChunkMeta>,
    pub model: String,
}

impl PersistedIndex {
    /// Read both artifacts and check that they describe the same chunks.
    pub async fn load(paths: &IndexPaths) -> RagResult<Self> {
        let vector_bytes = read_artifact(&paths.vectors_file()).await?;
        let sidecar_bytes = read_artifact(&paths.sidecar_file()).await?;

        let sidecar: SidecarFile = serde_json::from_slice(&sidecar_bytes).map_err(|e| {
            RagError::IndexUnavailable(format!(
                "{} is unreadable: {}",
                paths.sidecar_file().display(),
                e
            ))
        })?;
        let index = decode_vectors(&vector_bytes)?;

        if index.len() != sidecar.chunks.len() || sidecar.chunks.len() != sidecar.meta.len() {
            return Err(RagError::IndexCorruption {
                vectors: index.len(),
                chunks: sidecar.chunks.len(),
                meta: sidecar.meta.len(),
            });
        }

        let actual = compute_content_hash(&vector_bytes);
        if actual != sidecar.vectors_sha256 {
            return Err(RagError::IndexChecksum(format!(
                "vector file checksum {} does not match sidecar {}",
                actual, sidecar.vectors_sha256
            )));
        }

        if index.dimensions() != sidecar.dimensions {
            return Err(RagError::IndexChecksum(format!(
                "vector file has {} dimensions, sidecar records {}",
                index.dimensions(),
                sidecar.dimensions
            )));
        }

        debug!(
            dir = %paths.dir().display(),
            chunks = index.len(),
            dimensions = index.dimensions(),
            "Index loaded"
        );

        Ok(Self {
            index,
            chunks: sidecar.chunks,
            meta: sidecar.meta,
            model: sidecar.model,
        })
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// The `k` chunks closest to `query`, closest first.
    pub fn search(&self, query: &[f32], k: usize) -> RagResult<Vec<ScoredChunk>> {
        let hits = self.index.search(query, k)?;
        hits.into_iter()
            .map(|(position, distance)| {
                let (Some(content), Some(meta)) =
                    (self.chunks.get(position), self.meta.get(position))
                else {
                    return Err(RagError::IndexCorruption {
                        vectors: self.index.len(),
                        chunks: self.chunks.len(),
                        meta: self.meta.len(),
                    });
                };
                Ok(ScoredChunk {
                    position,
                    chunk_id: meta.chunk_id.clone(),
                    source_file: meta.filename.clone(),
                    content: content.clone(),
                    distance,
                })
            })
            .collect()
    }
}

async fn read_artifact(path: &std::path::Path) -> RagResult<Vec<u8>> {
    match fs::read(path).await {
        Ok(bytes) => Ok(bytes),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(RagError::IndexUnavailable(
            format!("{} not found; build the index first", path.display()),
        )),
        Err(e) => Err(RagError::IndexUnavailable(format!(
            "{} is unreadable: {}",
            path.display(),
            e
        ))),
    }
}

/// Write both artifacts of a generation into `paths` (a staging directory).
pub async fn write_generation(
    paths: &IndexPaths,
    index: &FlatL2Index,
    chunks: &[IndexedChunk],
    model: &str,
) -> RagResult<()> {
    let vector_bytes = encode_vectors(index, model)?;

    let sidecar = SidecarFile {
        chunks: chunks.iter().map(|c| c.content.clone()).collect(),
        meta: chunks
            .iter()
            .map(|c| ChunkMeta {
                filename: c.source_file.clone(),
                chunk_id: c.chunk_id.clone(),
            })
            .collect(),
        model: model.to_string(),
        dimensions: index.dimensions(),
        vectors_sha256: compute_content_hash(&vector_bytes),
        built_at: chrono::Utc::now().to_rfc3339(),
    };

    fs::write(paths.vectors_file(), &vector_bytes).await?;
    fs::write(paths.sidecar_file(), serde_json::to_vec_pretty(&sidecar)?).await?;
    Ok(())
}

/// Replace the generation at `target` with a new one, both artifacts together.
pub async fn persist_generation(
    target: &IndexPaths,
    index: &FlatL2Index,
    chunks: &[IndexedChunk],
    model: &str,
) -> RagResult<()> {
    if index.len() != chunks.len() {
        return Err(RagError::IndexCorruption {
            vectors: index.len(),
            chunks: chunks.len(),
            meta: chunks.len(),
        });
    }

    if let Some(parent) = target.dir().parent() {
        fs::create_dir_all(parent).await?;
    }

    let staging = target.create_staging().await?;
    if let Err(e) = write_generation(&staging, index, chunks, model).await {
        staging.discard().await;
        return Err(e);
    }
    if let Err(e) = target.swap_in(&staging).await {
        staging.discard().await;
        return Err(e);
    }

    info!(
        dir = %target.dir().display(),
        chunks = chunks.len(),
        dimensions = index.dimensions(),
        "Index persisted"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn index_of(rows: &[[f32; 2]]) -> FlatL2Index {
        let mut index = FlatL2Index::new(2);
        for row in rows {
            index.add(row).unwrap();
        }
        index
    }

    fn chunks(n: usize) -> Vec<IndexedChunk> {
        (0..n)
            .map(|i| IndexedChunk {
                chunk_id: format!("id-{}", i),
                source_file: "faq.docx".to_string(),
                content: format!("chunk {}", i),
            })
            .collect()
    }

    #[test]
    fn test_search_orders_by_distance() {
        let index = index_of(&[[5.0, 5.0], [0.0, 1.0], [2.0, 0.0]]);
        let hits = index.search(&[0.0, 0.0], 3).unwrap();
        let positions: Vec<usize> = hits.iter().map(|h| h.0).collect();
        assert_eq!(positions, vec![1, 2, 0]);
        assert_eq!(hits[0].1, 1.0);
        assert_eq!(hits[1].1, 4.0);
        assert_eq!(hits[2].1, 50.0);
    }

    #[test]
    fn test_search_truncates_to_stored_count() {
        let index = index_of(&[[1.0, 0.0], [0.0, 1.0]]);
        assert_eq!(index.search(&[0.0, 0.0], 10).unwrap().len(), 2);
        assert!(index.search(&[0.0, 0.0], 0).unwrap().is_empty());
    }

    #[test]
    fn test_ties_keep_position_order() {
        let index = index_of(&[[1.0, 0.0], [0.0, 1.0], [-1.0, 0.0]]);
        let positions: Vec<usize> = index
            .search(&[0.0, 0.0], 3)
            .unwrap()
            .into_iter()
            .map(|h| h.0)
            .collect();
        assert_eq!(positions, vec![0, 1, 2]);
    }

    #[test]
    fn test_dimension_mismatch_is_rejected() {
        let mut index = index_of(&[[1.0, 0.0]]);
        assert!(index.add(&[1.0, 2.0, 3.0]).is_err());
        assert!(matches!(
            index.search(&[1.0], 1),
            Err(RagError::EmbeddingService(_))
        ));
    }

    #[test]
    fn test_arrow_encoding_preserves_vectors() {
        let index = index_of(&[[0.25, -1.5], [3.0, 4.0]]);
        let bytes = encode_vectors(&index, "test-model").unwrap();
        assert_eq!(decode_vectors(&bytes).unwrap(), index);
    }

    #[test]
    fn test_truncated_arrow_file_is_unavailable() {
        let index = index_of(&[[0.25, -1.5], [3.0, 4.0]]);
        let bytes = encode_vectors(&index, "test-model").unwrap();
        let err = decode_vectors(&bytes[..bytes.len() / 2]).unwrap_err();
        assert!(matches!(err, RagError::IndexUnavailable(_)));
    }

    #[tokio::test]
    async fn test_persist_and_load_generation() {
        let root = tempfile::tempdir().unwrap();
        let paths = IndexPaths::new(root.path().join("rag-index"));
        let index = index_of(&[[0.0, 0.0], [1.0, 1.0]]);

        persist_generation(&paths, &index, &chunks(2), "test-model")
            .await
            .unwrap();

        let loaded = PersistedIndex::load(&paths).await.unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded.model, "test-model");
        assert_eq!(loaded.meta[1].chunk_id, "id-1");

        let hits = loaded.search(&[0.9, 0.9], 1).unwrap();
        assert_eq!(hits[0].content, "chunk 1");
        assert_eq!(hits[0].source_file, "faq.docx");
    }

    #[tokio::test]
    async fn test_missing_generation_is_unavailable() {
        let root = tempfile::tempdir().unwrap();
        let paths = IndexPaths::new(root.path().join("rag-index"));
        let err = PersistedIndex::load(&paths).await.unwrap_err();
        assert!(matches!(err, RagError::IndexUnavailable(_)));
    }

    #[tokio::test]
    async fn test_count_mismatch_is_corruption() {
        let root = tempfile::tempdir().unwrap();
        let paths = IndexPaths::new(root.path().join("rag-index"));
        let index = index_of(&[[0.0, 0.0], [1.0, 1.0]]);
        persist_generation(&paths, &index, &chunks(2), "m").await.unwrap();

        let raw = std::fs::read(paths.sidecar_file()).unwrap();
        let mut sidecar: SidecarFile = serde_json::from_slice(&raw).unwrap();
        sidecar.chunks.pop();
        std::fs::write(paths.sidecar_file(), serde_json::to_vec(&sidecar).unwrap()).unwrap();

        let err = PersistedIndex::load(&paths).await.unwrap_err();
        assert!(matches!(
            err,
            RagError::IndexCorruption {
                vectors: 2,
                chunks: 1,
                meta: 2
            }
        ));
    }

    #[tokio::test]
    async fn test_checksum_mismatch_is_detected() {
        let root = tempfile::tempdir().unwrap();
        let paths = IndexPaths::new(root.path().join("rag-index"));
        let index = index_of(&[[0.0, 0.0]]);
        persist_generation(&paths, &index, &chunks(1), "m").await.unwrap();

        // Swap in a valid vector file from a different build
        let other = encode_vectors(&index_of(&[[9.0, 9.0]]), "m").unwrap();
        std::fs::write(paths.vectors_file(), other).unwrap();

        let err = PersistedIndex::load(&paths).await.unwrap_err();
        assert!(matches!(err, RagError::IndexChecksum(_)));
        assert!(err.is_index_error());
    }
}
