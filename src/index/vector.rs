//! Vector Store - 벡터 저장소 트레이트 및 유틸리티
//!
//! 문서 ID를 키로 임베딩을 저장하고, 유사도 검색으로
//! (ID, 스코어) 목록을 돌려주는 공통 인터페이스입니다.

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;

// ============================================================================
// Types
// ============================================================================

/// 유사도 검색 결과
///
/// `ids`와 `scores`는 같은 길이이며, 유사도 내림차순으로 정렬되어 있습니다.
#[derive(Debug, Clone, Default)]
pub struct VectorHits {
    /// 히트한 문서 ID (유사도 순)
    pub ids: Vec<String>,
    /// 각 ID의 유사도 스코어
    pub scores: Vec<f32>,
}

impl VectorHits {
    /// 히트 개수
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// 히트가 없는지 여부
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

// ============================================================================
// VectorStore Trait
// ============================================================================

/// VectorStore 트레이트 (async)
///
/// 벡터 저장소의 공통 인터페이스입니다. 검색 엔진은 이 트레이트만 의존하며,
/// 물리적 인덱스 구조는 구현체가 결정합니다.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// 임베딩 배치 저장 (문서 ID를 키로)
    async fn add(&self, embeddings: &[Vec<f32>], ids: &[String]) -> Result<usize>;

    /// 유사도 검색
    ///
    /// # Arguments
    /// * `embedding` - 쿼리 임베딩
    /// * `top_k` - 최대 결과 수
    /// * `scope` - 검색 대상을 제한할 문서 ID 집합 (None이면 전체)
    async fn query(
        &self,
        embedding: &[f32],
        top_k: usize,
        scope: Option<&[String]>,
    ) -> Result<VectorHits>;

    /// 문서 ID로 벡터 삭제
    async fn delete(&self, ids: &[String]) -> Result<usize>;

    /// 저장된 벡터 개수
    async fn count(&self) -> Result<usize>;

    /// 진단용 자기 서술
    ///
    /// 백엔드 종류, 경로 등 디버깅에 유용한 정보를 돌려줍니다.
    /// 실패해서는 안 되며, 제공할 정보가 없으면 `Null`을 반환합니다.
    fn describe(&self) -> Value {
        Value::Null
    }
}

// ============================================================================
// Utility Functions
// ============================================================================

/// 코사인 유사도 계산
///
/// 결과는 -1.0 ~ 1.0 범위입니다. 길이가 다르거나 빈 벡터면 0.0을 반환합니다.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot_product: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot_product / (norm_a * norm_b)
}

// ============================================================================
// Tests
// ============================================================================
