//! LLM 모듈 - Gemini API를 통한 텍스트 생성
//!
//! 리랭커의 관련성 판정에 사용되는 경량 completion 클라이언트입니다.
//! 판정 일관성을 위해 temperature 0으로 호출합니다.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::embedding::get_api_key;

// ============================================================================
// CompletionProvider Trait
// ============================================================================

/// 텍스트 completion 프로바이더 트레이트
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    /// 프롬프트에 대한 응답 텍스트 생성
    async fn complete(&self, prompt: &str) -> Result<String>;

    /// 프로바이더 이름
    fn name(&self) -> &str;
}

// ============================================================================
// Google Gemini Chat
// ============================================================================

/// 기본 모델
const DEFAULT_MODEL: &str = "gemini-2.0-flash";

/// 429 에러 시 최대 재시도 횟수
const MAX_RETRIES: u32 = 3;
/// 재시도 시 초기 백오프 (ms)
const INITIAL_BACKOFF_MS: u64 = 2000;
/// 판정 응답은 짧음 - 출력 토큰 상한
const MAX_OUTPUT_TOKENS: u32 = 16;

/// Google Gemini completion 구현체
///
/// ref: https://ai.google.dev/gemini-api/docs/text-generation
#[derive(Debug)]
pub struct GeminiChat {
    api_key: String,
    client: reqwest::Client,
    model: String,
}

impl GeminiChat {
    /// 새 인스턴스 생성
    pub fn new(api_key: String) -> Result<Self> {
        Self::with_model(api_key, DEFAULT_MODEL)
    }

    /// 모델을 지정하여 생성
    pub fn with_model(api_key: String, model: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            api_key,
            client,
            model: model.into(),
        })
    }

    /// 환경변수에서 API 키를 읽어 생성
    pub fn from_env() -> Result<Self> {
        Self::new(get_api_key()?)
    }

    fn endpoint(&self) -> String {
        format!(
            "https://generativelanguage.googleapis.com/v1beta/models/{}:generateContent",
            self.model
        )
    }
}

/// Gemini generateContent 요청 본문
#[derive(Debug, Serialize)]
struct GenerateRequest {
    contents: Vec<GenerateContent>,
    #[serde(rename = "generationConfig")]
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
struct GenerateContent {
    parts: Vec<GeneratePart>,
}

#[derive(Debug, Serialize)]
struct GeneratePart {
    text: String,
}

#[derive(Debug, Serialize)]
struct GenerationConfig {
    temperature: f32,
    #[serde(rename = "maxOutputTokens")]
    max_output_tokens: u32,
}

/// Gemini generateContent 응답
#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: CandidateContent,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Debug, Deserialize)]
struct CandidatePart {
    #[serde(default)]
    text: String,
}

impl GenerateResponse {
    /// 첫 후보의 파트 텍스트를 이어붙여 반환
    fn text(&self) -> Option<String> {
        let candidate = self.candidates.first()?;
        let text: String = candidate
            .content
            .parts
            .iter()
            .map(|p| p.text.as_str())
            .collect();
        Some(text)
    }
}

#[async_trait]
impl CompletionProvider for GeminiChat {
    async fn complete(&self, prompt: &str) -> Result<String> {
        let request = GenerateRequest {
            contents: vec![GenerateContent {
                parts: vec![GeneratePart {
                    text: prompt.to_string(),
                }],
            }],
            generation_config: GenerationConfig {
                temperature: 0.0,
                max_output_tokens: MAX_OUTPUT_TOKENS,
            },
        };

        let mut last_error: Option<anyhow::Error> = None;

        for attempt in 0..=MAX_RETRIES {
            let response = match self
                .client
                .post(self.endpoint())
                .header("x-goog-api-key", &self.api_key)
                .json(&request)
                .send()
                .await
            {
                Ok(resp) => resp,
                Err(e) => {
                    last_error = Some(anyhow::anyhow!("Failed to send completion request: {}", e));
                    if attempt < MAX_RETRIES {
                        let backoff = Duration::from_millis(INITIAL_BACKOFF_MS * 2u64.pow(attempt));
                        tracing::warn!(
                            "Completion request failed, retrying in {:?} (attempt {}/{})",
                            backoff,
                            attempt + 1,
                            MAX_RETRIES
                        );
                        tokio::time::sleep(backoff).await;
                        continue;
                    }
                    break;
                }
            };

            let status = response.status();
            let body = response
                .text()
                .await
                .context("Failed to read response body")?;

            if status.is_success() {
                let parsed: GenerateResponse =
                    serde_json::from_str(&body).context("Failed to parse completion response")?;
                return parsed
                    .text()
                    .ok_or_else(|| anyhow::anyhow!("Completion response has no candidates"));
            }

            if status.as_u16() == 429 {
                let backoff = Duration::from_millis(INITIAL_BACKOFF_MS * 2u64.pow(attempt));
                tracing::warn!(
                    "Rate limit hit (429), backing off {:?} (attempt {}/{})",
                    backoff,
                    attempt + 1,
                    MAX_RETRIES
                );
                last_error = Some(anyhow::anyhow!("Rate limit exceeded (429)"));

                if attempt < MAX_RETRIES {
                    tokio::time::sleep(backoff).await;
                    continue;
                }
            } else {
                anyhow::bail!("Gemini API error ({}): {}", status, body);
            }
        }

        Err(last_error
            .unwrap_or_else(|| anyhow::anyhow!("Completion failed after {} retries", MAX_RETRIES)))
    }

    fn name(&self) -> &str {
        &self.model
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_generate_response() {
        let body = r#"{
            "candidates": [
                {"content": {"parts": [{"text": "YES"}]}}
            ]
        }"#;

        let parsed: GenerateResponse = serde_json::from_str(body).unwrap();
        assert_eq!(parsed.text(), Some("YES".to_string()));
    }

    #[test]
    fn test_parse_generate_response_multi_part() {
        let body = r#"{
            "candidates": [
                {"content": {"parts": [{"text": "N"}, {"text": "O"}]}}
            ]
        }"#;

        let parsed: GenerateResponse = serde_json::from_str(body).unwrap();
        assert_eq!(parsed.text(), Some("NO".to_string()));
    }

    #[test]
    fn test_parse_generate_response_empty() {
        let parsed: GenerateResponse = serde_json::from_str("{}").unwrap();
        assert_eq!(parsed.text(), None);
    }

    #[test]
    fn test_endpoint_includes_model() {
        let chat = GeminiChat::with_model("fake_key".to_string(), "gemini-2.0-flash").unwrap();
        assert!(chat.endpoint().contains("gemini-2.0-flash"));
        assert_eq!(chat.name(), "gemini-2.0-flash");
    }
}
