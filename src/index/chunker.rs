//! Text Chunking - CLI 인제스트용 텍스트 분할
//!
//! 파일 단위 입력을 인덱싱 가능한 청크로 나눕니다.
//! 검색 엔진 자체는 청킹 방식에 의존하지 않습니다.

use regex::Regex;

// ============================================================================
// Chunk Configuration
// ============================================================================

/// 청킹 설정
#[derive(Debug, Clone)]
pub struct ChunkConfig {
    /// 최대 청크 크기 (문자 수)
    pub max_characters: usize,
    /// 청크 간 중첩 크기 (문자 수)
    pub overlap_characters: usize,
}

impl Default for ChunkConfig {
    fn default() -> Self {
        Self {
            max_characters: 1200,
            overlap_characters: 100,
        }
    }
}

// ============================================================================
// Chunker Trait
// ============================================================================

/// 텍스트 청킹 전략 트레이트
pub trait Chunker: Send + Sync {
    /// 텍스트를 청크로 분할
    fn chunk(&self, text: &str) -> Vec<String>;

    /// 청커 이름
    fn name(&self) -> &'static str;
}

// ============================================================================
// TextChunker
// ============================================================================

/// Markdown 헤더/문단 경계를 존중하는 청커
///
/// - 헤더에서 새 블록 시작
/// - 코드 블록은 분할하지 않음
/// - 블록을 최대 크기까지 탐욕적으로 병합
pub struct TextChunker {
    config: ChunkConfig,
    heading_re: Regex,
}

impl TextChunker {
    /// 설정으로 생성
    pub fn new(config: ChunkConfig) -> Self {
        Self {
            config,
            heading_re: Regex::new(r"^#{1,6}\s+").expect("static regex"),
        }
    }

    /// 기본 설정으로 생성
    pub fn with_defaults() -> Self {
        Self::new(ChunkConfig::default())
    }

    /// 헤더/빈 줄 경계로 블록 분할
    fn split_blocks(&self, text: &str) -> Vec<String> {
        let mut blocks = Vec::new();
        let mut current = String::new();
        let mut in_code_block = false;

        for line in text.lines() {
            if line.trim_start().starts_with("```") {
                in_code_block = !in_code_block;
            }

            let boundary = !in_code_block
                && (self.heading_re.is_match(line) || line.trim().is_empty());

            if boundary && !current.trim().is_empty() && line.trim().is_empty() {
                blocks.push(std::mem::take(&mut current));
                continue;
            }
            if boundary && self.heading_re.is_match(line) && !current.trim().is_empty() {
                blocks.push(std::mem::take(&mut current));
            }

            if !line.trim().is_empty() || in_code_block {
                current.push_str(line);
                current.push('\n');
            }
        }

        if !current.trim().is_empty() {
            blocks.push(current);
        }

        blocks
    }

    /// 긴 블록을 최대 크기로 강제 분할 (문자 경계 안전)
    fn hard_split(&self, block: &str) -> Vec<String> {
        let max = self.config.max_characters.max(1);
        let chars: Vec<char> = block.chars().collect();

        if chars.len() <= max {
            return vec![block.to_string()];
        }

        let overlap = self.config.overlap_characters.min(max.saturating_sub(1));
        let step = max - overlap;
        let mut parts = Vec::new();
        let mut start = 0;

        while start < chars.len() {
            let end = (start + max).min(chars.len());
            parts.push(chars[start..end].iter().collect());
            if end >= chars.len() {
                break;
            }
            start += step;
        }

        parts
    }
}

impl Chunker for TextChunker {
    fn chunk(&self, text: &str) -> Vec<String> {
        let blocks = self.split_blocks(text);
        let mut chunks: Vec<String> = Vec::new();
        let mut current = String::new();

        for block in blocks {
            let candidate_len = current.chars().count() + block.chars().count();

            if !current.is_empty() && candidate_len > self.config.max_characters {
                chunks.push(std::mem::take(&mut current));
            }

            if block.chars().count() > self.config.max_characters {
                if !current.is_empty() {
                    chunks.push(std::mem::take(&mut current));
                }
                chunks.extend(self.hard_split(&block));
                continue;
            }

            if !current.is_empty() {
                current.push('\n');
            }
            current.push_str(&block);
        }

        if !current.trim().is_empty() {
            chunks.push(current);
        }

        chunks
            .into_iter()
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty())
            .collect()
    }

    fn name(&self) -> &'static str {
        "text-chunker"
    }
}

/// 청크 선두의 Markdown 헤더 추출 (섹션 메타데이터용)
pub fn leading_heading(chunk: &str) -> Option<String> {
    let first = chunk.lines().next()?;
    let trimmed = first.trim_start_matches('#');
    if trimmed.len() != first.len() && trimmed.starts_with(' ') {
        Some(trimmed.trim().to_string())
    } else {
        None
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_empty() {
        let chunker = TextChunker::with_defaults();
        assert!(chunker.chunk("").is_empty());
        assert!(chunker.chunk("   \n\n  ").is_empty());
    }

    #[test]
    fn test_chunk_small_text_single_chunk() {
        let chunker = TextChunker::with_defaults();
        let chunks = chunker.chunk("short paragraph");
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0], "short paragraph");
    }

    #[test]
    fn test_heading_starts_new_block() {
        let chunker = TextChunker::new(ChunkConfig {
            max_characters: 30,
            overlap_characters: 0,
        });

        let text = "# First\nalpha beta gamma\n# Second\ndelta epsilon zeta";
        let chunks = chunker.chunk(text);

        assert!(chunks.len() >= 2);
        assert!(chunks[0].starts_with("# First"));
        assert!(chunks.iter().any(|c| c.starts_with("# Second")));
    }

    #[test]
    fn test_long_block_hard_split_with_overlap() {
        let chunker = TextChunker::new(ChunkConfig {
            max_characters: 10,
            overlap_characters: 3,
        });

        let text = "abcdefghijklmnopqrst";
        let chunks = chunker.chunk(text);

        assert!(chunks.len() > 1);
        assert_eq!(chunks[0], "abcdefghij");
        // 다음 청크는 overlap 만큼 이전 꼬리를 포함
        assert!(chunks[1].starts_with("hij"));
    }

    #[test]
    fn test_code_block_not_split_on_blank_lines() {
        let chunker = TextChunker::with_defaults();

        let text = "```\nline one\n\nline two\n```";
        let chunks = chunker.chunk(text);

        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].contains("line one"));
        assert!(chunks[0].contains("line two"));
    }

    #[test]
    fn test_leading_heading() {
        assert_eq!(leading_heading("## Setup\nbody"), Some("Setup".to_string()));
        assert_eq!(leading_heading("no heading here"), None);
        assert_eq!(leading_heading("#not-a-heading"), None);
    }
}
