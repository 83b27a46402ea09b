//! LanceDB Vector Store - 벡터 저장소 구현
//!
//! 문서 ID를 키로 임베딩을 저장하고 ANN 검색을 제공합니다.
//! 스코프가 주어지면 `doc_id IN (...)` 필터로 검색 범위를 제한합니다.
//!
//! ref: https://lancedb.github.io/lancedb/

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use arrow_array::{
    Array, FixedSizeListArray, Float32Array, RecordBatch, RecordBatchIterator, StringArray,
};
use arrow_schema::{DataType, Field, Schema};
use async_trait::async_trait;
use lancedb::connection::Connection;
use lancedb::query::{ExecutableQuery, QueryBase};
use serde_json::{json, Value};

use super::vector::{VectorHits, VectorStore};

/// 벡터 테이블 이름
const TABLE_NAME: &str = "embeddings";

/// 기본 임베딩 차원
pub const DEFAULT_DIMENSION: usize = 768;

// ============================================================================
// LanceVectorStore
// ============================================================================

/// LanceDB 벡터 저장소 구현
///
/// Apache Arrow 기반 columnar 포맷으로 임베딩을 저장합니다.
/// 차원은 열 때 고정되며, 이후 모든 임베딩은 같은 차원이어야 합니다.
pub struct LanceVectorStore {
    db: Connection,
    path: PathBuf,
    dimension: i32,
}

impl LanceVectorStore {
    /// LanceDB 저장소 열기
    ///
    /// # Arguments
    /// * `path` - .lance 디렉토리 경로
    /// * `dimension` - 임베딩 차원
    pub async fn open(path: &Path, dimension: usize) -> Result<Self> {
        if dimension == 0 {
            anyhow::bail!("Embedding dimension must be positive");
        }

        if let Some(parent) = path.parent() {
            if !parent.exists() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .context("Failed to create LanceDB directory")?;
            }
        }

        let path_str = path
            .to_str()
            .ok_or_else(|| anyhow::anyhow!("Invalid path encoding"))?;

        let db = lancedb::connect(path_str)
            .execute()
            .await
            .context("Failed to connect to LanceDB")?;

        Ok(Self {
            db,
            path: path.to_path_buf(),
            dimension: dimension as i32,
        })
    }

    /// 기본 차원으로 열기
    pub async fn open_with_defaults(path: &Path) -> Result<Self> {
        Self::open(path, DEFAULT_DIMENSION).await
    }

    /// 임베딩 차원
    pub fn dimension(&self) -> usize {
        self.dimension as usize
    }

    /// 벡터 테이블 스키마 생성
    fn schema(&self) -> Schema {
        Schema::new(vec![
            Field::new("doc_id", DataType::Utf8, false),
            Field::new(
                "embedding",
                DataType::FixedSizeList(
                    Arc::new(Field::new("item", DataType::Float32, true)),
                    self.dimension,
                ),
                false,
            ),
        ])
    }

    /// (임베딩, ID) 배치를 Arrow RecordBatch로 변환
    fn to_batch(&self, embeddings: &[Vec<f32>], ids: &[String]) -> Result<RecordBatch> {
        if embeddings.is_empty() {
            anyhow::bail!("Cannot create batch from empty embeddings");
        }
        if embeddings.len() != ids.len() {
            anyhow::bail!(
                "Embedding/id count mismatch: {} != {}",
                embeddings.len(),
                ids.len()
            );
        }
        for emb in embeddings {
            if emb.len() != self.dimension as usize {
                anyhow::bail!(
                    "Embedding dimension mismatch: expected {}, got {}",
                    self.dimension,
                    emb.len()
                );
            }
        }

        let doc_ids: Vec<&str> = ids.iter().map(String::as_str).collect();
        let values_flat: Vec<f32> = embeddings.iter().flatten().copied().collect();

        let values = Float32Array::from(values_flat);
        let field = Arc::new(Field::new("item", DataType::Float32, true));
        let embedding_list = FixedSizeListArray::try_new(
            field,
            self.dimension,
            Arc::new(values) as Arc<dyn Array>,
            None,
        )
        .context("Failed to create embedding array")?;

        let batch = RecordBatch::try_new(
            Arc::new(self.schema()),
            vec![Arc::new(StringArray::from(doc_ids)), Arc::new(embedding_list)],
        )
        .context("Failed to create RecordBatch")?;

        Ok(batch)
    }

    /// 테이블 존재 여부 확인
    async fn table_exists(&self) -> bool {
        self.db
            .table_names()
            .execute()
            .await
            .map(|names| names.contains(&TABLE_NAME.to_string()))
            .unwrap_or(false)
    }
}

/// 스코프 ID 집합을 SQL 필터로 변환 (`doc_id IN ('a', 'b')`)
fn scope_filter(ids: &[String]) -> String {
    let quoted: Vec<String> = ids
        .iter()
        .map(|id| format!("'{}'", id.replace('\'', "''")))
        .collect();
    format!("doc_id IN ({})", quoted.join(", "))
}

#[async_trait]
impl VectorStore for LanceVectorStore {
    async fn add(&self, embeddings: &[Vec<f32>], ids: &[String]) -> Result<usize> {
        if embeddings.is_empty() {
            return Ok(0);
        }

        let batch = self.to_batch(embeddings, ids)?;
        let schema = batch.schema();
        let batches = RecordBatchIterator::new(vec![Ok(batch)], schema);

        if self.table_exists().await {
            let table = self
                .db
                .open_table(TABLE_NAME)
                .execute()
                .await
                .context("Failed to open table")?;

            table
                .add(batches)
                .execute()
                .await
                .context("Failed to add vectors to table")?;
        } else {
            self.db
                .create_table(TABLE_NAME, batches)
                .execute()
                .await
                .context("Failed to create table")?;
        }

        Ok(embeddings.len())
    }

    async fn query(
        &self,
        embedding: &[f32],
        top_k: usize,
        scope: Option<&[String]>,
    ) -> Result<VectorHits> {
        if !self.table_exists().await {
            return Ok(VectorHits::default());
        }

        let table = self
            .db
            .open_table(TABLE_NAME)
            .execute()
            .await
            .context("Failed to open table for search")?;

        let mut query = table
            .vector_search(embedding.to_vec())
            .context("Failed to create vector search")?
            .limit(top_k);

        if let Some(ids) = scope {
            if !ids.is_empty() {
                query = query.only_if(scope_filter(ids));
            }
        }

        let results = query
            .execute()
            .await
            .context("Failed to execute vector search")?;

        use futures::TryStreamExt;
        let batches: Vec<RecordBatch> = results.try_collect().await?;

        let mut hits = VectorHits::default();

        for batch in batches {
            let doc_ids = batch
                .column_by_name("doc_id")
                .and_then(|c| c.as_any().downcast_ref::<StringArray>())
                .ok_or_else(|| anyhow::anyhow!("Missing doc_id column"))?;

            // _distance 컬럼 (LanceDB가 자동 추가)
            let distances = batch
                .column_by_name("_distance")
                .and_then(|c| c.as_any().downcast_ref::<Float32Array>())
                .ok_or_else(|| anyhow::anyhow!("Missing _distance column"))?;

            for i in 0..batch.num_rows() {
                // 거리를 유사도로 변환 (L2 거리 -> 0.0 ~ 1.0)
                let similarity = 1.0 / (1.0 + distances.value(i));

                hits.ids.push(doc_ids.value(i).to_string());
                hits.scores.push(similarity);
            }
        }

        Ok(hits)
    }

    async fn delete(&self, ids: &[String]) -> Result<usize> {
        if ids.is_empty() || !self.table_exists().await {
            return Ok(0);
        }

        let table = self
            .db
            .open_table(TABLE_NAME)
            .execute()
            .await
            .context("Failed to open table for delete")?;

        let before_count = self.count().await?;

        table
            .delete(&scope_filter(ids))
            .await
            .context("Failed to delete vectors")?;

        let after_count = self.count().await?;
        Ok(before_count.saturating_sub(after_count))
    }

    async fn count(&self) -> Result<usize> {
        if !self.table_exists().await {
            return Ok(0);
        }

        let table = self
            .db
            .open_table(TABLE_NAME)
            .execute()
            .await
            .context("Failed to open table for count")?;

        let count = table.count_rows(None).await.context("Failed to count rows")?;
        Ok(count)
    }

    fn describe(&self) -> Value {
        json!({
            "backend": "lancedb",
            "path": self.path.display().to_string(),
            "table": TABLE_NAME,
            "dimension": self.dimension,
        })
    }
}

// ============================================================================
// Tests
// ============================================================================
