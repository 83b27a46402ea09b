//! Reranking - 검색 결과 재정렬/필터 단계
//!
//! 검색된 문서 목록을 쿼리와 함께 받아 걸러내거나 재정렬합니다.
//! `LlmReranker`는 문서마다 LLM에 이진 관련성 판정을 요청합니다.

use std::sync::Arc;

use async_trait::async_trait;

use crate::llm::CompletionProvider;

use super::document::RetrievedDocument;
use super::error::{RetrievalError, RetrievalResult};

// ============================================================================
// Reranker Trait
// ============================================================================

/// 리랭커 트레이트
///
/// 구현체는 입력 순서를 존중해야 합니다 - 반환 목록은 입력 목록의
/// 부분 수열(또는 재정렬)이며, 추가 문서를 만들어내지 않습니다.
#[async_trait]
pub trait Reranker: Send + Sync {
    /// 문서 목록 필터/재정렬
    async fn rerank(
        &self,
        documents: Vec<RetrievedDocument>,
        query: &str,
    ) -> RetrievalResult<Vec<RetrievedDocument>>;

    /// 입력 크기 제한이 필요한지 여부
    ///
    /// true를 반환하면 엔진이 호출 전에 목록을 top_k로 자릅니다.
    /// 문서당 비용이 발생하는 구현체(LLM 호출 등)가 사용합니다.
    fn requires_bounded_input(&self) -> bool {
        false
    }

    /// 리랭커 이름
    fn name(&self) -> &'static str;
}

// ============================================================================
// Boolean Output Parsing
// ============================================================================

/// LLM 응답을 YES/NO 판정으로 파싱
///
/// 응답에서 단어 단위로 YES 또는 NO를 찾습니다. 둘 다 있거나 둘 다 없으면
/// 판정 불가로 에러를 반환합니다 (배치 전체 실패로 전파됨).
fn parse_boolean(answer: &str) -> RetrievalResult<bool> {
    let upper = answer.to_uppercase();
    let mut words = upper.split(|c: char| !c.is_ascii_alphabetic());

    let has_yes = words.clone().any(|w| w == "YES");
    let has_no = words.any(|w| w == "NO");

    match (has_yes, has_no) {
        (true, false) => Ok(true),
        (false, true) => Ok(false),
        _ => Err(RetrievalError::ParseBoolean(answer.trim().to_string())),
    }
}

// ============================================================================
// LlmReranker
// ============================================================================

/// 관련성 판정 프롬프트
const RERANK_PROMPT_TEMPLATE: &str = "\
Given the following question and context,
return YES if the context is relevant to the question and NO if it isn't.

> Question: {question}
> Context:
>>>
{context}
>>>
> Relevant (YES / NO):";

/// 폴백으로 유지할 문서 수 기본값
const DEFAULT_FALLBACK_TOP_K: usize = 3;

/// LLM 관련성 필터
///
/// 문서마다 이진 관련성 판정을 요청하고, 관련 판정을 받은 문서만
/// 원래 순서대로 남깁니다. 전부 탈락하면 빈 결과 대신 입력의
/// 앞쪽 `top_k`개를 돌려줍니다 (다운스트림 생성 단계가 항상
/// 컨텍스트를 받도록).
pub struct LlmReranker {
    llm: Arc<dyn CompletionProvider>,
    prompt_template: String,
    top_k: usize,
    concurrent: bool,
}

impl LlmReranker {
    /// 새 리랭커 생성 (동시 판정, 폴백 3개)
    pub fn new(llm: Arc<dyn CompletionProvider>) -> Self {
        Self {
            llm,
            prompt_template: RERANK_PROMPT_TEMPLATE.to_string(),
            top_k: DEFAULT_FALLBACK_TOP_K,
            concurrent: true,
        }
    }

    /// 폴백 문서 수 지정
    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k;
        self
    }

    /// 순차 판정 모드로 전환
    pub fn sequential(mut self) -> Self {
        self.concurrent = false;
        self
    }

    fn render_prompt(&self, query: &str, context: &str) -> String {
        self.prompt_template
            .replace("{question}", query)
            .replace("{context}", context)
    }

    /// 문서별 판정 수집 (입력 순서와 정렬됨)
    async fn collect_answers(
        &self,
        documents: &[RetrievedDocument],
        query: &str,
    ) -> RetrievalResult<Vec<String>> {
        if self.concurrent {
            // 문서당 태스크 하나씩 생성 후 전부 join.
            // 핸들을 입력 순서대로 await하므로 완료 순서와 무관하게
            // 응답이 원래 문서 위치와 재결합된다.
            let mut handles = Vec::with_capacity(documents.len());
            for doc in documents {
                let llm = Arc::clone(&self.llm);
                let prompt = self.render_prompt(query, &doc.doc.text);
                handles.push(tokio::spawn(async move { llm.complete(&prompt).await }));
            }

            let mut answers = Vec::with_capacity(handles.len());
            for handle in handles {
                answers.push(handle.await??);
            }
            Ok(answers)
        } else {
            let mut answers = Vec::with_capacity(documents.len());
            for doc in documents {
                let prompt = self.render_prompt(query, &doc.doc.text);
                answers.push(self.llm.complete(&prompt).await?);
            }
            Ok(answers)
        }
    }
}

#[async_trait]
impl Reranker for LlmReranker {
    async fn rerank(
        &self,
        mut documents: Vec<RetrievedDocument>,
        query: &str,
    ) -> RetrievalResult<Vec<RetrievedDocument>> {
        if documents.is_empty() {
            return Ok(documents);
        }

        let answers = self.collect_answers(&documents, query).await?;

        let verdicts = answers
            .iter()
            .map(|a| parse_boolean(a))
            .collect::<RetrievalResult<Vec<bool>>>()?;

        let relevant = verdicts.iter().filter(|&&v| v).count();
        tracing::debug!(
            "LLM reranker kept {}/{} documents",
            relevant,
            documents.len()
        );

        if relevant == 0 {
            // 빈 결과 방지 - 입력 앞쪽 top_k개 유지
            documents.truncate(self.top_k);
            return Ok(documents);
        }

        Ok(documents
            .into_iter()
            .zip(verdicts)
            .filter(|(_, keep)| *keep)
            .map(|(doc, _)| doc)
            .collect())
    }

    fn requires_bounded_input(&self) -> bool {
        true
    }

    fn name(&self) -> &'static str {
        "llm-relevance"
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::document::Document;
    use anyhow::Result;
    use std::time::Duration;

    /// 컨텍스트 내용으로 응답을 결정하는 모의 LLM
    ///
    /// - "keep"이 포함된 문서 -> "YES"
    /// - "slow"가 포함된 문서 -> 지연 후 응답 (완료 순서 교란용)
    /// - "garbled" -> 파싱 불가 응답
    /// - 그 외 -> "NO"
    struct ScriptedLlm;

    #[async_trait]
    impl CompletionProvider for ScriptedLlm {
        async fn complete(&self, prompt: &str) -> Result<String> {
            if prompt.contains("slow") {
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
            if prompt.contains("garbled") {
                return Ok("I cannot answer that".to_string());
            }
            if prompt.contains("keep") {
                Ok("YES".to_string())
            } else {
                Ok("NO".to_string())
            }
        }

        fn name(&self) -> &str {
            "scripted"
        }
    }

    /// 항상 실패하는 모의 LLM
    struct FailingLlm;

    #[async_trait]
    impl CompletionProvider for FailingLlm {
        async fn complete(&self, _prompt: &str) -> Result<String> {
            anyhow::bail!("connection refused")
        }

        fn name(&self) -> &str {
            "failing"
        }
    }

    fn docs(texts: &[&str]) -> Vec<RetrievedDocument> {
        texts
            .iter()
            .enumerate()
            .map(|(i, t)| RetrievedDocument::new(Document::new(format!("d{}", i), *t), 0.5))
            .collect()
    }

    fn reranker(llm: impl CompletionProvider + 'static) -> LlmReranker {
        LlmReranker::new(Arc::new(llm))
    }

    #[test]
    fn test_parse_boolean() {
        assert!(parse_boolean("YES").unwrap());
        assert!(parse_boolean("yes.").unwrap());
        assert!(parse_boolean("**Yes**, it is relevant").unwrap());
        assert!(!parse_boolean("NO").unwrap());
        assert!(!parse_boolean("no, not relevant").unwrap());

        assert!(parse_boolean("maybe").is_err());
        assert!(parse_boolean("yes and no").is_err());
        assert!(parse_boolean("").is_err());
        // "NOT"은 NO 단어가 아님
        assert!(parse_boolean("NOT SURE").is_err());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_filters_by_judgment_preserving_order() {
        let input = docs(&["keep alpha", "drop beta", "keep gamma"]);

        let result = reranker(ScriptedLlm).rerank(input, "query").await.unwrap();

        let ids: Vec<&str> = result.iter().map(|d| d.doc_id()).collect();
        assert_eq!(ids, vec!["d0", "d2"]);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_order_independent_of_completion_order() {
        // 첫 문서가 가장 늦게 완료되어도 출력은 입력 순서
        let input = docs(&["keep slow first", "keep second", "keep third"]);

        let result = reranker(ScriptedLlm).rerank(input, "query").await.unwrap();

        let ids: Vec<&str> = result.iter().map(|d| d.doc_id()).collect();
        assert_eq!(ids, vec!["d0", "d1", "d2"]);
    }

    #[tokio::test]
    async fn test_all_rejected_falls_back_to_top_k() {
        let input = docs(&["one", "two", "three", "four", "five"]);

        let result = reranker(ScriptedLlm)
            .with_top_k(3)
            .rerank(input, "query")
            .await
            .unwrap();

        // 전부 NO여도 빈 결과가 아니라 입력 앞쪽 3개
        let ids: Vec<&str> = result.iter().map(|d| d.doc_id()).collect();
        assert_eq!(ids, vec!["d0", "d1", "d2"]);
    }

    #[tokio::test]
    async fn test_sequential_mode_same_result() {
        let input = docs(&["keep alpha", "drop beta", "keep gamma"]);

        let result = reranker(ScriptedLlm)
            .sequential()
            .rerank(input, "query")
            .await
            .unwrap();

        let ids: Vec<&str> = result.iter().map(|d| d.doc_id()).collect();
        assert_eq!(ids, vec!["d0", "d2"]);
    }

    #[tokio::test]
    async fn test_unparseable_answer_fails_batch() {
        let input = docs(&["keep alpha", "garbled text"]);

        let result = reranker(ScriptedLlm).rerank(input, "query").await;

        assert!(matches!(result, Err(RetrievalError::ParseBoolean(_))));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_llm_failure_observable_after_join() {
        let input = docs(&["anything"]);

        let result = reranker(FailingLlm).rerank(input, "query").await;

        assert!(matches!(result, Err(RetrievalError::Backend(_))));
    }

    #[tokio::test]
    async fn test_empty_input_returns_empty() {
        let result = reranker(ScriptedLlm).rerank(vec![], "query").await.unwrap();
        assert!(result.is_empty());
    }

    #[test]
    fn test_capability_flag() {
        assert!(reranker(ScriptedLlm).requires_bounded_input());
    }
}
