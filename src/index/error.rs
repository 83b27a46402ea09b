//! 검색 파이프라인 에러 타입
//!
//! - 설정 에러: 필수 컴포넌트 누락. 즉시 실패, 재시도 없음.
//! - 파싱 에러: 리랭커의 LLM 응답을 불리언으로 해석할 수 없음.
//! - 백엔드 에러: 저장소/임베더/LLM 호출 실패. 변형 없이 전파.
//! - 태스크 에러: 동시 실행 단위의 패닉. join 이후 반드시 관찰 가능.

use thiserror::Error;

/// 검색 파이프라인 에러
#[derive(Debug, Error)]
pub enum RetrievalError {
    /// 필수 컴포넌트가 구성되지 않음
    #[error("configuration error: {0}")]
    Configuration(String),

    /// LLM 응답을 YES/NO 판정으로 해석할 수 없음
    #[error("could not parse relevance judgment from LLM output: {0:?}")]
    ParseBoolean(String),

    /// 저장소/임베더/LLM 백엔드 에러
    #[error(transparent)]
    Backend(#[from] anyhow::Error),

    /// 동시 실행 태스크가 패닉하거나 중단됨
    #[error("retrieval task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// 검색 파이프라인 Result
pub type RetrievalResult<T> = std::result::Result<T, RetrievalError>;
