//! Index 모듈 - 하이브리드 RAG 인덱싱/검색 코어
//!
//! - Document Store (SQLite FTS5): 원문 + 메타데이터 저장, 전문 검색
//! - Vector Store (LanceDB): 임베딩 저장, 유사도 검색
//! - HybridRetrieval: 동시 이중 검색 + 병합 + 리랭킹 + 썸네일 합성
//! - VectorIndexer: 임베딩 생성 및 양쪽 저장소 기록

mod chunker;
mod document;
mod error;
mod ingest;
mod lance;
mod rerank;
mod retrieval;
mod store;
mod vector;

#[cfg(test)]
mod testutil;

// Re-exports
pub use chunker::{leading_heading, ChunkConfig, Chunker, TextChunker};
pub use document::{
    metadata_keys, Document, Metadata, RetrievedDocument, SCORE_NO_SIMILARITY, TYPE_IMAGE,
    TYPE_THUMBNAIL,
};
pub use error::{RetrievalError, RetrievalResult};
pub use ingest::{IndexInput, VectorIndexer};
pub use lance::{LanceVectorStore, DEFAULT_DIMENSION};
pub use rerank::{LlmReranker, Reranker};
pub use retrieval::{
    HybridRetrieval, RetrievalConfig, RetrievalMode, RetrievalOptions, RetrievalQuery,
};
pub use store::{get_data_dir, DocumentStore, SqliteDocumentStore, StoreStats};
pub use vector::{cosine_similarity, VectorHits, VectorStore};
