//! Hybrid Retrieval - 하이브리드 검색 엔진
//!
//! 벡터 유사도 검색과 FTS 전문 검색을 동시에 실행하고,
//! 병합/중복 제거 후 리랭킹과 페이지 썸네일 합성을 거쳐
//! 최종 결과 목록을 조립합니다.
//!
//! 병합 정책: 벡터 히트에 없는 텍스트 전용 히트를 센티널 스코어로
//! 앞에 두고, 그 뒤에 벡터 히트를 스코어 순서대로 붙입니다.
//! 양쪽에 모두 있는 문서는 벡터 쪽에서 한 번만 나옵니다.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde_json::json;

use crate::embedding::EmbeddingProvider;

use super::document::{metadata_keys, Document, RetrievedDocument, TYPE_IMAGE, TYPE_THUMBNAIL};
use super::error::{RetrievalError, RetrievalResult};
use super::rerank::Reranker;
use super::store::DocumentStore;
use super::vector::{VectorHits, VectorStore};

// ============================================================================
// Configuration
// ============================================================================

/// 검색 엔진 설정
///
/// 전역 설정 조회 대신 생성 시점에 명시적으로 전달됩니다.
#[derive(Debug, Clone)]
pub struct RetrievalConfig {
    /// 기본 top-k
    pub top_k: usize,
    /// extend 검색 시 1차 후보 배수
    pub first_round_top_k_mult: usize,
    /// 결과에 합성할 썸네일 수
    pub thumbnail_count: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: 5,
            first_round_top_k_mult: 10,
            thumbnail_count: 3,
        }
    }
}

/// 검색 모드
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetrievalMode {
    /// 벡터 유사도 검색만
    Vector,
    /// FTS 전문 검색만 (스코프 필수)
    Text,
    /// 벡터 + 전문 검색 병합
    Hybrid,
}

impl Default for RetrievalMode {
    fn default() -> Self {
        RetrievalMode::Hybrid
    }
}

/// 검색 쿼리 (텍스트 또는 문서)
#[derive(Debug, Clone)]
pub enum RetrievalQuery {
    Text(String),
    Document(Document),
}

impl RetrievalQuery {
    /// 검색에 사용할 텍스트
    pub fn text(&self) -> &str {
        match self {
            RetrievalQuery::Text(t) => t,
            RetrievalQuery::Document(d) => &d.text,
        }
    }
}

impl From<&str> for RetrievalQuery {
    fn from(text: &str) -> Self {
        RetrievalQuery::Text(text.to_string())
    }
}

impl From<String> for RetrievalQuery {
    fn from(text: String) -> Self {
        RetrievalQuery::Text(text)
    }
}

impl From<Document> for RetrievalQuery {
    fn from(doc: Document) -> Self {
        RetrievalQuery::Document(doc)
    }
}

/// 검색 호출 옵션
#[derive(Debug, Clone, Default)]
pub struct RetrievalOptions {
    /// 최종 결과 수 (None이면 설정 기본값)
    pub top_k: Option<usize>,
    /// 검색 모드
    pub mode: RetrievalMode,
    /// 검색 대상을 제한할 문서 ID 집합
    pub scope: Option<Vec<String>>,
    /// 1차 검색에서 top_k * 배수만큼 후보를 가져올지 여부
    pub extend: bool,
    /// 썸네일 수 재정의 (None이면 설정 기본값)
    pub thumbnail_count: Option<usize>,
}

impl RetrievalOptions {
    pub fn with_mode(mut self, mode: RetrievalMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = Some(top_k);
        self
    }

    pub fn with_scope(mut self, scope: Vec<String>) -> Self {
        self.scope = Some(scope);
        self
    }

    pub fn extended(mut self) -> Self {
        self.extend = true;
        self
    }
}

// ============================================================================
// HybridRetrieval
// ============================================================================

/// 하이브리드 검색 엔진
///
/// 저장소/임베더는 트레이트 뒤에 있으며 읽기 전용으로만 접근합니다.
/// 백엔드 에러는 그대로 전파하고, 진단 출력은 best-effort로만 수행합니다.
pub struct HybridRetrieval {
    vector_store: Arc<dyn VectorStore>,
    doc_store: Option<Arc<dyn DocumentStore>>,
    embedder: Arc<dyn EmbeddingProvider>,
    rerankers: Vec<Arc<dyn Reranker>>,
    config: RetrievalConfig,
}

impl HybridRetrieval {
    /// 새 검색 엔진 생성 (기본 설정, 리랭커 없음)
    pub fn new(
        vector_store: Arc<dyn VectorStore>,
        doc_store: Option<Arc<dyn DocumentStore>>,
        embedder: Arc<dyn EmbeddingProvider>,
    ) -> Self {
        Self {
            vector_store,
            doc_store,
            embedder,
            rerankers: Vec::new(),
            config: RetrievalConfig::default(),
        }
    }

    /// 설정 지정
    pub fn with_config(mut self, config: RetrievalConfig) -> Self {
        self.config = config;
        self
    }

    /// 리랭커 추가 (추가된 순서대로 적용)
    pub fn with_reranker(mut self, reranker: Arc<dyn Reranker>) -> Self {
        self.rerankers.push(reranker);
        self
    }

    /// 검색 실행
    ///
    /// # Arguments
    /// * `query` - 검색 텍스트 또는 문서 (문서면 text 필드 사용)
    /// * `options` - 모드/top-k/스코프 등 호출 옵션
    ///
    /// # Returns
    /// 스코어 순서가 보존된 검색 결과 목록
    pub async fn retrieve(
        &self,
        query: impl Into<RetrievalQuery>,
        options: RetrievalOptions,
    ) -> RetrievalResult<Vec<RetrievedDocument>> {
        let query = query.into();
        let top_k = options.top_k.unwrap_or(self.config.top_k);
        let thumbnail_count = options.thumbnail_count.unwrap_or(self.config.thumbnail_count);
        let first_round_top_k = if options.extend {
            top_k * self.config.first_round_top_k_mult
        } else {
            top_k
        };

        // 벡터 히트를 문서로 구체화하려면 문서 저장소가 필수
        let doc_store = self.doc_store.as_ref().ok_or_else(|| {
            RetrievalError::Configuration(
                "document store is not configured; required to materialize retrieval hits"
                    .to_string(),
            )
        })?;

        // 빈 스코프는 없음으로 정규화
        let scope = options.scope.as_deref().filter(|s| !s.is_empty());

        self.log_diagnostics().await;

        let mut result = match options.mode {
            RetrievalMode::Vector => {
                self.search_vector(&query, first_round_top_k, scope, doc_store)
                    .await?
            }
            RetrievalMode::Text => {
                self.search_text(&query, first_round_top_k, scope, doc_store)
                    .await?
            }
            RetrievalMode::Hybrid => {
                self.search_hybrid(&query, first_round_top_k, scope, doc_store)
                    .await?
            }
        };

        if !query.text().is_empty() {
            for reranker in &self.rerankers {
                // 문서당 비용이 있는 리랭커는 호출 전에 top_k로 제한
                if reranker.requires_bounded_input() {
                    result.truncate(top_k);
                }
                result = reranker.rerank(result, query.text()).await?;
            }
        }

        result.truncate(top_k);

        let result = self
            .attach_thumbnails(result, thumbnail_count, doc_store)
            .await?;

        log_result_summary(&result);
        Ok(result)
    }

    /// 벡터 검색: 임베딩 -> 벡터 저장소 -> ID로 문서 구체화
    async fn search_vector(
        &self,
        query: &RetrievalQuery,
        top_k: usize,
        scope: Option<&[String]>,
        doc_store: &Arc<dyn DocumentStore>,
    ) -> RetrievalResult<Vec<RetrievedDocument>> {
        let embedding = self.embedder.embed_query(query.text()).await?;
        let hits = self.vector_store.query(&embedding, top_k, scope).await?;
        let docs = doc_store.get(&hits.ids).await?;

        tracing::debug!("Vector search returned {} hits", hits.len());
        Ok(pair_hits(hits, docs))
    }

    /// 전문 검색: 스코프가 있을 때만 수행, 전부 센티널 스코어
    async fn search_text(
        &self,
        query: &RetrievalQuery,
        top_k: usize,
        scope: Option<&[String]>,
        doc_store: &Arc<dyn DocumentStore>,
    ) -> RetrievalResult<Vec<RetrievedDocument>> {
        let docs = match scope {
            Some(ids) => doc_store.query(query.text(), top_k, Some(ids)).await?,
            // 스코프 없는 전문 검색은 빈 결과 (에러 아님)
            None => Vec::new(),
        };

        Ok(docs
            .into_iter()
            .map(RetrievedDocument::without_score)
            .collect())
    }

    /// 하이브리드 검색: 두 검색을 태스크로 띄우고 모두 join 후 병합
    async fn search_hybrid(
        &self,
        query: &RetrievalQuery,
        top_k: usize,
        scope: Option<&[String]>,
        doc_store: &Arc<dyn DocumentStore>,
    ) -> RetrievalResult<Vec<RetrievedDocument>> {
        // 임베딩은 한 번만
        let embedding = self.embedder.embed_query(query.text()).await?;

        let vector_store = Arc::clone(&self.vector_store);
        let vs_doc_store = Arc::clone(doc_store);
        let vs_scope: Option<Vec<String>> = scope.map(<[String]>::to_vec);
        let vector_task = tokio::spawn(async move {
            let hits = vector_store
                .query(&embedding, top_k, vs_scope.as_deref())
                .await?;
            let docs = vs_doc_store.get(&hits.ids).await?;
            Ok::<_, anyhow::Error>((hits, docs))
        });

        let ds_doc_store = Arc::clone(doc_store);
        let ds_scope: Option<Vec<String>> = scope.map(<[String]>::to_vec);
        let query_text = query.text().to_string();
        let text_task = tokio::spawn(async move {
            match ds_scope {
                Some(ids) => ds_doc_store.query(&query_text, top_k, Some(&ids)).await,
                None => Ok(Vec::new()),
            }
        });

        // 두 태스크 모두 join - 어느 쪽 실패든 join 이후 관찰됨
        let (vector_res, text_res) = tokio::join!(vector_task, text_task);
        let (hits, vs_docs) = vector_res??;
        let ds_docs = text_res??;

        tracing::debug!(
            "Hybrid search: {} vector hits, {} text hits",
            hits.len(),
            ds_docs.len()
        );

        // 병합: 텍스트 전용 히트 먼저, 벡터 히트는 한 번만
        let vector_ids: HashSet<&str> = hits.ids.iter().map(String::as_str).collect();
        let mut result: Vec<RetrievedDocument> = ds_docs
            .into_iter()
            .filter(|d| !vector_ids.contains(d.doc_id.as_str()))
            .map(RetrievedDocument::without_score)
            .collect();
        result.extend(pair_hits(hits, vs_docs));

        Ok(result)
    }

    /// 페이지 썸네일 합성
    ///
    /// top-k 결과를 세 그룹으로 나눕니다:
    /// - 썸네일 문서 자체: 타입을 "image"로 재라벨하고 폴백 풀로 분리
    /// - `thumbnail_doc_id`를 참조하는 문서: 참조 썸네일을 일괄 조회해서
    ///   원본 텍스트 문서의 ID/본문/스코어를 가진 이미지 문서로 합성
    ///   (LLM 관련성 평가가 이미지가 아닌 텍스트 기준으로 동작하도록)
    /// - 나머지: 그대로 통과
    async fn attach_thumbnails(
        &self,
        result: Vec<RetrievedDocument>,
        thumbnail_count: usize,
        doc_store: &Arc<dyn DocumentStore>,
    ) -> RetrievalResult<Vec<RetrievedDocument>> {
        // 수집 순서 유지 (출력 결정성)
        let mut thumbnail_ids: Vec<String> = Vec::new();
        // 참조 썸네일 ID -> 원본 텍스트 문서. 같은 썸네일을 참조하는
        // 문서가 여럿이면 나중 문서가 남는다.
        let mut source_docs: HashMap<String, RetrievedDocument> = HashMap::new();
        let mut passthrough: Vec<RetrievedDocument> = Vec::new();
        let mut raw_thumbnails: Vec<RetrievedDocument> = Vec::new();

        for mut item in result {
            if item.doc.doc_type() == Some(TYPE_THUMBNAIL) {
                item.doc
                    .metadata
                    .insert(metadata_keys::TYPE.to_string(), json!(TYPE_IMAGE));
                raw_thumbnails.push(item);
                continue;
            }

            let thumb_ref = item
                .doc
                .meta_str(metadata_keys::THUMBNAIL_DOC_ID)
                .map(str::to_string);

            match thumb_ref {
                Some(thumb_id) if thumbnail_ids.len() < thumbnail_count => {
                    if !thumbnail_ids.contains(&thumb_id) {
                        thumbnail_ids.push(thumb_id.clone());
                    }
                    source_docs.insert(thumb_id, item);
                }
                _ => passthrough.push(item),
            }
        }

        let fetched = doc_store.get(&thumbnail_ids).await?;
        let mut fetched_by_id: HashMap<String, Document> = fetched
            .into_iter()
            .map(|d| (d.doc_id.clone(), d))
            .collect();

        tracing::debug!(
            "Thumbnail assembly: {} referenced, {} passthrough, {} raw",
            thumbnail_ids.len(),
            passthrough.len(),
            raw_thumbnails.len()
        );

        let mut output = Vec::with_capacity(thumbnail_ids.len() + passthrough.len());
        for thumb_id in &thumbnail_ids {
            let thumbnail = match fetched_by_id.remove(thumb_id) {
                Some(doc) => doc,
                None => {
                    tracing::warn!("Referenced thumbnail {} not found in document store", thumb_id);
                    continue;
                }
            };
            if let Some(source) = source_docs.remove(thumb_id) {
                output.push(synthesize_thumbnail(thumbnail, source));
            }
        }
        output.extend(passthrough);

        if output.is_empty() {
            // 합성/통과 문서가 없으면 원시 썸네일로 폴백
            raw_thumbnails.truncate(thumbnail_count);
            return Ok(raw_thumbnails);
        }

        Ok(output)
    }

    /// 진단 출력 (best-effort, 검색을 실패시키지 않음)
    async fn log_diagnostics(&self) {
        let vs_info = self.vector_store.describe();
        if !vs_info.is_null() {
            tracing::debug!("Vector store: {}", vs_info);
        }
        if let Some(ds) = &self.doc_store {
            let ds_info = ds.describe();
            if !ds_info.is_null() {
                tracing::debug!("Document store: {}", ds_info);
            }
        }

        match self.vector_store.count().await {
            Ok(count) => {
                tracing::debug!("Vector store count: {}", count);
                if count == 0 {
                    tracing::warn!("Vector store is empty - nothing has been indexed yet?");
                }
            }
            Err(e) => tracing::debug!("Could not count vector store: {}", e),
        }
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

/// 벡터 히트와 구체화된 문서를 ID로 재결합
///
/// 문서 저장소 `get`의 반환 순서는 비보장이므로, 벡터 저장소가 돌려준
/// ID 순서(유사도 순)를 기준으로 스코어와 문서를 짝짓습니다.
fn pair_hits(hits: VectorHits, docs: Vec<Document>) -> Vec<RetrievedDocument> {
    let mut by_id: HashMap<String, Document> = docs
        .into_iter()
        .map(|d| (d.doc_id.clone(), d))
        .collect();

    let mut result = Vec::with_capacity(hits.len());
    for (id, score) in hits.ids.iter().zip(hits.scores.iter()) {
        match by_id.remove(id) {
            Some(doc) => result.push(RetrievedDocument::new(doc, *score)),
            None => tracing::warn!("Vector hit {} missing from document store", id),
        }
    }

    result
}

/// 참조 썸네일과 원본 텍스트 문서를 합성
///
/// ID/본문/스코어는 원본 텍스트 문서의 것을 쓰고, 메타데이터는
/// 썸네일 것을 기반으로 타입을 "image"로 바꾼 뒤 원본에만 있는
/// 키를 병합합니다.
fn synthesize_thumbnail(thumbnail: Document, source: RetrievedDocument) -> RetrievedDocument {
    let mut metadata = thumbnail.metadata;
    metadata.insert(metadata_keys::TYPE.to_string(), json!(TYPE_IMAGE));

    for (key, value) in &source.doc.metadata {
        if !metadata.contains_key(key) {
            metadata.insert(key.clone(), value.clone());
        }
    }

    RetrievedDocument::new(
        Document {
            doc_id: source.doc.doc_id,
            text: source.doc.text,
            metadata,
        },
        source.score,
    )
}

/// 결과 요약 로그 (best-effort)
fn log_result_summary(result: &[RetrievedDocument]) {
    tracing::debug!("Retrieved {} results", result.len());
    for (i, item) in result.iter().enumerate() {
        let file_name = item.doc.meta_str(metadata_keys::FILE_NAME).unwrap_or("");
        let page = item.doc.meta_str(metadata_keys::PAGE_LABEL).unwrap_or("");
        let snippet: String = item.doc.text.chars().take(80).collect();
        tracing::debug!(
            "[{}] id={} score={:.4} file={} page={} text={:?}",
            i + 1,
            item.doc_id(),
            item.score,
            file_name,
            page,
            snippet
        );
    }
}

// ============================================================================
// Tests
// ============================================================================
