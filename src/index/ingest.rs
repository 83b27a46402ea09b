//! Ingestion - 문서 인덱싱 엔진
//!
//! 텍스트/문서 배치를 임베딩해서 벡터 저장소에 쓰고, 같은 배치를
//! 문서 저장소에도 저장합니다. 선택적으로 각 청크를 사람이 읽을 수 있는
//! 형태로 캐시 디렉토리에 남깁니다 (디버깅용, 검색 정확성과 무관).

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use uuid::Uuid;

use crate::embedding::EmbeddingProvider;

use super::document::{metadata_keys, Document, TYPE_IMAGE};
use super::rerank::Reranker;
use super::retrieval::{HybridRetrieval, RetrievalConfig};
use super::store::DocumentStore;
use super::vector::VectorStore;

// ============================================================================
// IndexInput
// ============================================================================

/// 인덱싱 입력 (텍스트 또는 완성된 문서)
pub enum IndexInput {
    /// ID가 자동 생성되는 순수 텍스트
    Text(String),
    /// ID/메타데이터를 가진 문서
    Document(Document),
}

impl From<&str> for IndexInput {
    fn from(text: &str) -> Self {
        IndexInput::Text(text.to_string())
    }
}

impl From<String> for IndexInput {
    fn from(text: String) -> Self {
        IndexInput::Text(text)
    }
}

impl From<Document> for IndexInput {
    fn from(doc: Document) -> Self {
        IndexInput::Document(doc)
    }
}

// ============================================================================
// VectorIndexer
// ============================================================================

/// 문서 인덱싱 엔진
///
/// 검색 엔진과 같은 저장소 계약을 공유하지만 런타임에는 독립입니다.
pub struct VectorIndexer {
    vector_store: Arc<dyn VectorStore>,
    doc_store: Option<Arc<dyn DocumentStore>>,
    embedder: Arc<dyn EmbeddingProvider>,
    chunk_cache_dir: Option<PathBuf>,
    // 캐시 파일 이름에만 쓰이는 단조 증가 카운터
    counter: AtomicUsize,
}

impl VectorIndexer {
    /// 새 인덱서 생성 (청크 캐시 없음)
    pub fn new(
        vector_store: Arc<dyn VectorStore>,
        doc_store: Option<Arc<dyn DocumentStore>>,
        embedder: Arc<dyn EmbeddingProvider>,
    ) -> Self {
        Self {
            vector_store,
            doc_store,
            embedder,
            chunk_cache_dir: None,
            counter: AtomicUsize::new(0),
        }
    }

    /// 청크 캐시 디렉토리 지정
    pub fn with_chunk_cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.chunk_cache_dir = Some(dir.into());
        self
    }

    /// 입력 배치 인덱싱
    ///
    /// 순수 텍스트 입력에는 UUID v4 ID가 부여됩니다.
    ///
    /// # Returns
    /// 인덱싱된 문서 ID 목록 (입력 순서)
    pub async fn index(&self, inputs: Vec<IndexInput>) -> Result<Vec<String>> {
        if inputs.is_empty() {
            return Ok(vec![]);
        }

        let docs: Vec<Document> = inputs
            .into_iter()
            .map(|input| match input {
                IndexInput::Text(text) => Document::new(Uuid::new_v4().to_string(), text),
                IndexInput::Document(doc) => doc,
            })
            .collect();

        let ids: Vec<String> = docs.iter().map(|d| d.doc_id.clone()).collect();
        let texts: Vec<String> = docs.iter().map(|d| d.text.clone()).collect();

        tracing::info!("Embedding {} documents", docs.len());
        let embeddings = self
            .embedder
            .embed_documents(&texts)
            .await
            .context("Failed to embed documents")?;

        self.vector_store
            .add(&embeddings, &ids)
            .await
            .context("Failed to add embeddings to vector store")?;

        if let Some(doc_store) = &self.doc_store {
            doc_store
                .add(&docs)
                .await
                .context("Failed to add documents to doc store")?;
        }

        self.write_chunk_cache(&docs);
        self.counter.fetch_add(docs.len(), Ordering::Relaxed);

        tracing::info!("Indexed {} documents", ids.len());
        Ok(ids)
    }

    /// 같은 컴포넌트를 공유하는 검색 엔진 생성
    pub fn to_retrieval(
        &self,
        rerankers: Vec<Arc<dyn Reranker>>,
        config: RetrievalConfig,
    ) -> HybridRetrieval {
        let mut engine = HybridRetrieval::new(
            Arc::clone(&self.vector_store),
            self.doc_store.clone(),
            Arc::clone(&self.embedder),
        )
        .with_config(config);

        for reranker in rerankers {
            engine = engine.with_reranker(reranker);
        }

        engine
    }

    /// 청크 캐시 렌더링 (best-effort, 실패해도 인덱싱은 계속)
    fn write_chunk_cache(&self, docs: &[Document]) {
        let cache_dir = match &self.chunk_cache_dir {
            Some(dir) => dir,
            None => return,
        };

        // 첫 문서의 file_name을 기준으로 캐시 파일 이름을 정함
        let file_name = match docs.first().and_then(|d| d.meta_str(metadata_keys::FILE_NAME)) {
            Some(name) => name.to_string(),
            None => return,
        };
        let stem = Path::new(&file_name)
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or(file_name.as_str())
            .to_string();

        if let Err(e) = std::fs::create_dir_all(cache_dir) {
            tracing::warn!("Could not create chunk cache dir {:?}: {}", cache_dir, e);
            return;
        }

        let base = self.counter.load(Ordering::Relaxed);
        for (i, doc) in docs.iter().enumerate() {
            let path = cache_dir.join(format!("{}_{}.md", stem, base + i));
            if let Err(e) = std::fs::write(&path, render_chunk(doc)) {
                tracing::warn!("Could not write chunk cache {:?}: {}", path, e);
            }
        }
    }
}

/// 청크를 Markdown으로 렌더링
fn render_chunk(doc: &Document) -> String {
    let mut out = String::new();

    if let Some(page) = doc.meta_str(metadata_keys::PAGE_LABEL) {
        out.push_str(&format!("Page label: {}", page));
    }
    if let Some(name) = doc.meta_str(metadata_keys::FILE_NAME) {
        out.push_str(&format!("\nFile name: {}", name));
    }
    if let Some(section) = doc.meta_str(metadata_keys::SECTION) {
        out.push_str(&format!("\nSection: {}", section));
    }
    if doc.doc_type() == Some(TYPE_IMAGE) {
        if let Some(origin) = doc.meta_str(metadata_keys::IMAGE_ORIGIN) {
            out.push_str(&format!("\nImage origin: <p><img src=\"{}\"></p>", origin));
        }
    }
    if !doc.text.is_empty() {
        out.push_str(&format!("\ntext:\n{}", doc.text));
    }

    out
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::retrieval::{RetrievalMode, RetrievalOptions};
    use crate::index::store::DocumentStore;
    use crate::index::testutil::{MemoryDocumentStore, MemoryVectorStore, MockEmbedder};
    use crate::index::vector::VectorStore;
    use tempfile::TempDir;

    fn indexer_with_stores() -> (Arc<MemoryVectorStore>, Arc<MemoryDocumentStore>, VectorIndexer) {
        let vector_store = Arc::new(MemoryVectorStore::new(vec![]));
        let doc_store = Arc::new(MemoryDocumentStore::new(vec![]));
        let indexer = VectorIndexer::new(
            Arc::clone(&vector_store) as Arc<dyn VectorStore>,
            Some(Arc::clone(&doc_store) as Arc<dyn DocumentStore>),
            Arc::new(MockEmbedder::new(8)),
        );
        (vector_store, doc_store, indexer)
    }

    #[tokio::test]
    async fn test_bare_text_gets_generated_id() {
        let (vector_store, doc_store, indexer) = indexer_with_stores();

        let ids = indexer
            .index(vec![IndexInput::from("hello world")])
            .await
            .unwrap();

        assert_eq!(ids.len(), 1);
        assert!(!ids[0].is_empty());
        assert_eq!(vector_store.count().await.unwrap(), 1);

        let stored = doc_store.get(&ids).await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].text, "hello world");
    }

    #[tokio::test]
    async fn test_documents_keep_their_ids() {
        let (_vector_store, doc_store, indexer) = indexer_with_stores();

        let doc = Document::new("my-id", "content");
        let ids = indexer.index(vec![IndexInput::from(doc)]).await.unwrap();

        assert_eq!(ids, vec!["my-id".to_string()]);
        assert_eq!(doc_store.get(&ids).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_empty_batch_is_noop() {
        let (vector_store, _doc_store, indexer) = indexer_with_stores();

        let ids = indexer.index(vec![]).await.unwrap();
        assert!(ids.is_empty());
        assert_eq!(vector_store.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_works_without_doc_store() {
        let vector_store = Arc::new(MemoryVectorStore::new(vec![]));
        let indexer = VectorIndexer::new(
            Arc::clone(&vector_store) as Arc<dyn VectorStore>,
            None,
            Arc::new(MockEmbedder::new(8)),
        );

        let ids = indexer.index(vec![IndexInput::from("text")]).await.unwrap();
        assert_eq!(ids.len(), 1);
        assert_eq!(vector_store.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_chunk_cache_rendering_and_counter() {
        let cache_dir = TempDir::new().unwrap();
        let (_vector_store, _doc_store, indexer) = indexer_with_stores();
        let indexer = indexer.with_chunk_cache_dir(cache_dir.path());

        let doc = Document::new("c0", "chunk body")
            .with_metadata(metadata_keys::FILE_NAME, "report.pdf")
            .with_metadata(metadata_keys::PAGE_LABEL, "2")
            .with_metadata(metadata_keys::SECTION, "Intro");
        indexer.index(vec![IndexInput::from(doc)]).await.unwrap();

        let rendered = std::fs::read_to_string(cache_dir.path().join("report_0.md")).unwrap();
        assert!(rendered.contains("Page label: 2"));
        assert!(rendered.contains("File name: report.pdf"));
        assert!(rendered.contains("Section: Intro"));
        assert!(rendered.contains("text:\nchunk body"));

        // 두 번째 배치는 카운터가 이어짐
        let doc = Document::new("c1", "second")
            .with_metadata(metadata_keys::FILE_NAME, "report.pdf");
        indexer.index(vec![IndexInput::from(doc)]).await.unwrap();
        assert!(cache_dir.path().join("report_1.md").exists());
    }

    #[tokio::test]
    async fn test_chunk_cache_skipped_without_file_name() {
        let cache_dir = TempDir::new().unwrap();
        let (_vector_store, _doc_store, indexer) = indexer_with_stores();
        let indexer = indexer.with_chunk_cache_dir(cache_dir.path());

        indexer
            .index(vec![IndexInput::from("no file metadata")])
            .await
            .unwrap();

        assert_eq!(std::fs::read_dir(cache_dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_image_chunk_renders_origin() {
        let doc = Document::new("i0", "figure description")
            .with_metadata(metadata_keys::TYPE, TYPE_IMAGE)
            .with_metadata(metadata_keys::IMAGE_ORIGIN, "data:image/png;base64,abc");

        let rendered = render_chunk(&doc);
        assert!(rendered.contains(r#"<img src="data:image/png;base64,abc">"#));
    }

    #[tokio::test]
    async fn test_to_retrieval_shares_stores() {
        let (_vector_store, _doc_store, indexer) = indexer_with_stores();

        indexer
            .index(vec![IndexInput::from(Document::new("a", "alpha content"))])
            .await
            .unwrap();

        let engine = indexer.to_retrieval(vec![], RetrievalConfig::default());
        let result = engine
            .retrieve(
                "alpha",
                RetrievalOptions::default().with_mode(RetrievalMode::Vector),
            )
            .await
            .unwrap();

        assert_eq!(result.len(), 1);
        assert_eq!(result[0].doc_id(), "a");
    }
}
