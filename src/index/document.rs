//! 문서 데이터 모델
//!
//! 인덱싱/검색 파이프라인이 공유하는 문서 단위를 정의합니다.
//! - `Document`: 텍스트 + 자유형 메타데이터 (인덱싱 시 생성, 이후 불변)
//! - `RetrievedDocument`: 검색 호출마다 새로 생성되는 문서 + 스코어 쌍

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// 유사도 스코어 없음 (전문 검색 전용 히트)을 나타내는 센티널 값
pub const SCORE_NO_SIMILARITY: f32 = -1.0;

// ============================================================================
// Metadata Keys
// ============================================================================

/// 파이프라인이 해석하는 메타데이터 키
pub mod metadata_keys {
    /// 문서 종류 ("image" | "thumbnail" | "page_diagram")
    pub const TYPE: &str = "type";
    /// 원본 페이지 라벨
    pub const PAGE_LABEL: &str = "page_label";
    /// 원본 파일 이름
    pub const FILE_NAME: &str = "file_name";
    /// 문서 내 섹션 제목
    pub const SECTION: &str = "section";
    /// 텍스트 청크가 참조하는 페이지 썸네일 문서 ID
    pub const THUMBNAIL_DOC_ID: &str = "thumbnail_doc_id";
    /// 이미지 원본 (data URI 등)
    pub const IMAGE_ORIGIN: &str = "image_origin";
}

/// 페이지 썸네일 문서 타입
pub const TYPE_THUMBNAIL: &str = "thumbnail";
/// 표시용 이미지 문서 타입
pub const TYPE_IMAGE: &str = "image";

// ============================================================================
// Document
// ============================================================================

/// 문서 메타데이터 (키 -> 임의 JSON 값)
pub type Metadata = serde_json::Map<String, Value>;

/// 불변 콘텐츠 단위
///
/// 인덱싱 시 생성되며, 검색 결과 후처리의 타입 재라벨링을 제외하면
/// 이후 변경되지 않습니다.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    /// 고유 문서 ID
    pub doc_id: String,
    /// 텍스트 콘텐츠
    pub text: String,
    /// 자유형 메타데이터
    #[serde(default)]
    pub metadata: Metadata,
}

impl Document {
    /// ID와 텍스트로 생성 (메타데이터 없음)
    pub fn new(doc_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            doc_id: doc_id.into(),
            text: text.into(),
            metadata: Metadata::new(),
        }
    }

    /// 메타데이터 키 하나를 추가한 채 반환 (빌더 스타일)
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// 문자열 메타데이터 값 조회
    pub fn meta_str(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).and_then(Value::as_str)
    }

    /// 문서 타입 (`metadata["type"]`)
    pub fn doc_type(&self) -> Option<&str> {
        self.meta_str(metadata_keys::TYPE)
    }
}

// ============================================================================
// RetrievedDocument
// ============================================================================

/// 검색된 문서 + 스코어
///
/// 검색 호출마다 새로 생성되며 저장되지 않습니다.
/// 전문 검색 전용 히트는 [`SCORE_NO_SIMILARITY`] 스코어를 갖습니다.
#[derive(Debug, Clone, Serialize)]
pub struct RetrievedDocument {
    /// 검색된 문서
    pub doc: Document,
    /// 유사도 스코어 (벡터 검색) 또는 -1.0 센티널
    pub score: f32,
}

impl RetrievedDocument {
    /// 유사도 스코어와 함께 생성
    pub fn new(doc: Document, score: f32) -> Self {
        Self { doc, score }
    }

    /// 스코어 없는 (전문 검색 전용) 결과 생성
    pub fn without_score(doc: Document) -> Self {
        Self {
            doc,
            score: SCORE_NO_SIMILARITY,
        }
    }

    /// 문서 ID
    pub fn doc_id(&self) -> &str {
        &self.doc.doc_id
    }

    /// 유사도 스코어가 있는지 여부
    pub fn has_similarity(&self) -> bool {
        self.score != SCORE_NO_SIMILARITY
    }
}

// ============================================================================
// Tests
// ============================================================================
