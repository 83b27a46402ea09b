//! docpage-rag - 문서 페이지 하이브리드 RAG 검색 엔진
//!
//! 벡터 검색(LanceDB)과 전문 검색(SQLite FTS5)을 동시에 실행해서 병합하고,
//! LLM 관련성 필터로 재정렬한 뒤 페이지 썸네일을 합성하는
//! 검색/인덱싱 파이프라인입니다.

pub mod cli;
pub mod embedding;
pub mod index;
pub mod llm;

// Re-exports
pub use embedding::{get_api_key, has_api_key, EmbeddingProvider, GeminiEmbedding};
pub use index::{
    cosine_similarity, get_data_dir, leading_heading, metadata_keys, ChunkConfig, Chunker,
    Document, DocumentStore, HybridRetrieval, IndexInput, LanceVectorStore, LlmReranker, Metadata,
    Reranker, RetrievalConfig, RetrievalError, RetrievalMode, RetrievalOptions, RetrievalQuery,
    RetrievalResult, RetrievedDocument, SqliteDocumentStore, StoreStats, TextChunker,
    VectorHits, VectorIndexer, VectorStore, DEFAULT_DIMENSION, SCORE_NO_SIMILARITY, TYPE_IMAGE,
    TYPE_THUMBNAIL,
};
pub use llm::{CompletionProvider, GeminiChat};
