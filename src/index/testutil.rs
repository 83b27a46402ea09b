//! 테스트용 인메모리 모의 컴포넌트
//!
//! 엔진/인제스트 테스트가 공유합니다. 전부 결정적으로 동작합니다.

use std::sync::{Arc, Mutex};

use anyhow::Result;
use async_trait::async_trait;

use crate::embedding::EmbeddingProvider;
use crate::llm::CompletionProvider;

use super::document::{Document, RetrievedDocument};
use super::error::RetrievalResult;
use super::rerank::Reranker;
use super::store::DocumentStore;
use super::vector::{VectorHits, VectorStore};

// ============================================================================
// MemoryVectorStore
// ============================================================================

/// 고정된 (ID, 스코어) 목록을 돌려주는 벡터 저장소
///
/// 쿼리 임베딩은 무시하고, 스코프 필터와 top_k 절단만 적용합니다.
pub(crate) struct MemoryVectorStore {
    entries: Mutex<Vec<(String, f32)>>,
}

impl MemoryVectorStore {
    pub(crate) fn new(entries: Vec<(String, f32)>) -> Self {
        Self {
            entries: Mutex::new(entries),
        }
    }
}

#[async_trait]
impl VectorStore for MemoryVectorStore {
    async fn add(&self, embeddings: &[Vec<f32>], ids: &[String]) -> Result<usize> {
        let mut entries = self.entries.lock().unwrap();
        for id in ids {
            entries.push((id.clone(), 1.0));
        }
        Ok(embeddings.len())
    }

    async fn query(
        &self,
        _embedding: &[f32],
        top_k: usize,
        scope: Option<&[String]>,
    ) -> Result<VectorHits> {
        let entries = self.entries.lock().unwrap();
        let mut hits = VectorHits::default();

        for (id, score) in entries.iter() {
            if let Some(scope_ids) = scope {
                if !scope_ids.contains(id) {
                    continue;
                }
            }
            if hits.len() >= top_k {
                break;
            }
            hits.ids.push(id.clone());
            hits.scores.push(*score);
        }

        Ok(hits)
    }

    async fn delete(&self, ids: &[String]) -> Result<usize> {
        let mut entries = self.entries.lock().unwrap();
        let before = entries.len();
        entries.retain(|(id, _)| !ids.contains(id));
        Ok(before - entries.len())
    }

    async fn count(&self) -> Result<usize> {
        Ok(self.entries.lock().unwrap().len())
    }
}

/// 모든 호출이 실패하는 벡터 저장소
pub(crate) struct FailingVectorStore;

#[async_trait]
impl VectorStore for FailingVectorStore {
    async fn add(&self, _embeddings: &[Vec<f32>], _ids: &[String]) -> Result<usize> {
        anyhow::bail!("vector store unavailable")
    }

    async fn query(
        &self,
        _embedding: &[f32],
        _top_k: usize,
        _scope: Option<&[String]>,
    ) -> Result<VectorHits> {
        anyhow::bail!("vector store unavailable")
    }

    async fn delete(&self, _ids: &[String]) -> Result<usize> {
        anyhow::bail!("vector store unavailable")
    }

    async fn count(&self) -> Result<usize> {
        anyhow::bail!("vector store unavailable")
    }
}

// ============================================================================
// MemoryDocumentStore
// ============================================================================

/// 인메모리 문서 저장소
///
/// `get`은 일부러 삽입 역순으로 반환합니다 - 호출자가 반환 순서에
/// 의존하지 않는지 검증하기 위해서입니다. `query`는 단순 부분 문자열
/// 매치입니다.
pub(crate) struct MemoryDocumentStore {
    docs: Mutex<Vec<Document>>,
}

impl MemoryDocumentStore {
    pub(crate) fn new(docs: Vec<Document>) -> Self {
        Self {
            docs: Mutex::new(docs),
        }
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn add(&self, docs: &[Document]) -> Result<usize> {
        let mut stored = self.docs.lock().unwrap();
        for doc in docs {
            stored.retain(|d| d.doc_id != doc.doc_id);
            stored.push(doc.clone());
        }
        Ok(docs.len())
    }

    async fn get(&self, ids: &[String]) -> Result<Vec<Document>> {
        let stored = self.docs.lock().unwrap();
        Ok(stored
            .iter()
            .rev()
            .filter(|d| ids.contains(&d.doc_id))
            .cloned()
            .collect())
    }

    async fn query(
        &self,
        text: &str,
        top_k: usize,
        scope: Option<&[String]>,
    ) -> Result<Vec<Document>> {
        let stored = self.docs.lock().unwrap();
        Ok(stored
            .iter()
            .filter(|d| d.text.contains(text))
            .filter(|d| match scope {
                Some(ids) => ids.contains(&d.doc_id),
                None => true,
            })
            .take(top_k)
            .cloned()
            .collect())
    }

    async fn delete(&self, ids: &[String]) -> Result<usize> {
        let mut stored = self.docs.lock().unwrap();
        let before = stored.len();
        stored.retain(|d| !ids.contains(&d.doc_id));
        Ok(before - stored.len())
    }

    async fn count(&self) -> Result<usize> {
        Ok(self.docs.lock().unwrap().len())
    }
}

// ============================================================================
// MockEmbedder
// ============================================================================

/// 고정 벡터를 돌려주는 임베더
pub(crate) struct MockEmbedder {
    dimension: usize,
}

impl MockEmbedder {
    pub(crate) fn new(dimension: usize) -> Self {
        Self { dimension }
    }
}

#[async_trait]
impl EmbeddingProvider for MockEmbedder {
    async fn embed_query(&self, _text: &str) -> Result<Vec<f32>> {
        Ok(vec![0.1; self.dimension])
    }

    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|_| vec![0.1; self.dimension]).collect())
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn name(&self) -> &str {
        "mock-embedder"
    }
}

// ============================================================================
// FixedAnswerLlm
// ============================================================================

/// 항상 같은 답을 돌려주는 LLM
pub(crate) struct FixedAnswerLlm(pub(crate) &'static str);

#[async_trait]
impl CompletionProvider for FixedAnswerLlm {
    async fn complete(&self, _prompt: &str) -> Result<String> {
        Ok(self.0.to_string())
    }

    fn name(&self) -> &str {
        "fixed-answer"
    }
}

// ============================================================================
// RecordingReranker
// ============================================================================

/// 입력 크기를 기록하고 그대로 통과시키는 리랭커
#[derive(Clone)]
pub(crate) struct RecordingReranker {
    seen: Arc<Mutex<Vec<usize>>>,
    bounded: bool,
}

impl RecordingReranker {
    pub(crate) fn new(bounded: bool) -> Self {
        Self {
            seen: Arc::new(Mutex::new(Vec::new())),
            bounded,
        }
    }

    /// 지금까지 기록된 입력 크기
    pub(crate) fn seen_sizes(&self) -> Vec<usize> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl Reranker for RecordingReranker {
    async fn rerank(
        &self,
        documents: Vec<RetrievedDocument>,
        _query: &str,
    ) -> RetrievalResult<Vec<RetrievedDocument>> {
        self.seen.lock().unwrap().push(documents.len());
        Ok(documents)
    }

    fn requires_bounded_input(&self) -> bool {
        self.bounded
    }

    fn name(&self) -> &'static str {
        "recording"
    }
}
