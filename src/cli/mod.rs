//! CLI 모듈
//!
//! docpage-rag CLI 명령어 정의 및 구현

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use sha2::{Digest, Sha256};

use crate::embedding::{has_api_key, EmbeddingProvider, GeminiEmbedding};
use crate::index::{
    get_data_dir, leading_heading, metadata_keys, Chunker, Document, DocumentStore, HybridRetrieval,
    IndexInput, LanceVectorStore, LlmReranker, RetrievalConfig, RetrievalMode, RetrievalOptions,
    SqliteDocumentStore, TextChunker, VectorIndexer, VectorStore,
};
use crate::llm::GeminiChat;

// ============================================================================
// CLI Definition
// ============================================================================

#[derive(Parser)]
#[command(name = "docpage-rag")]
#[command(version, about = "문서 페이지 하이브리드 RAG 검색 엔진", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// 텍스트, 파일, 또는 폴더를 인덱스에 추가
    Ingest {
        /// 직접 입력할 텍스트
        #[arg(short, long)]
        text: Option<String>,

        /// 인덱싱할 파일 경로 (.md, .txt)
        #[arg(long)]
        file: Option<PathBuf>,

        /// 인덱싱할 폴더 경로 (재귀, .gitignore 존중)
        #[arg(short, long)]
        dir: Option<PathBuf>,

        /// 청크를 캐시 디렉토리에 Markdown으로 저장 (디버깅용)
        #[arg(long)]
        cache_chunks: bool,
    },

    /// 인덱스 검색
    Query {
        /// 검색 쿼리
        query: String,

        /// 결과 개수 제한
        #[arg(short = 'k', long, default_value = "5")]
        top_k: usize,

        /// 검색 모드 (vector | text | hybrid)
        #[arg(short, long, default_value = "hybrid")]
        mode: String,

        /// 검색 대상 문서 ID (쉼표 구분)
        #[arg(long, value_delimiter = ',')]
        scope: Vec<String>,

        /// 1차 검색에서 더 많은 후보를 가져옴 (리랭커용)
        #[arg(long)]
        extend: bool,

        /// LLM 관련성 필터 적용
        #[arg(long)]
        rerank: bool,

        /// 결과에 합성할 썸네일 수
        #[arg(long, default_value = "3")]
        thumbnails: usize,
    },

    /// 저장된 문서 목록
    List {
        /// 결과 개수 제한
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },

    /// 문서 삭제
    Delete {
        /// 삭제할 문서 ID (여러 개 가능)
        #[arg(required = true)]
        ids: Vec<String>,
    },

    /// 상태 확인
    Status,
}

// ============================================================================
// CLI Runner
// ============================================================================

/// CLI 명령어 실행
pub async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Ingest {
            text,
            file,
            dir,
            cache_chunks,
        } => cmd_ingest(text, file, dir, cache_chunks).await,
        Commands::Query {
            query,
            top_k,
            mode,
            scope,
            extend,
            rerank,
            thumbnails,
        } => cmd_query(&query, top_k, &mode, scope, extend, rerank, thumbnails).await,
        Commands::List { limit } => cmd_list(limit).await,
        Commands::Delete { ids } => cmd_delete(ids).await,
        Commands::Status => cmd_status().await,
    }
}

/// 기본 위치의 저장소/임베더 열기
async fn open_components() -> Result<(Arc<SqliteDocumentStore>, Arc<LanceVectorStore>, Arc<GeminiEmbedding>)>
{
    let data_dir = get_data_dir();

    let doc_store = SqliteDocumentStore::open_default().context("문서 저장소 열기 실패")?;

    let embedder = GeminiEmbedding::from_env().context("임베더 생성 실패")?;

    let lance_path = data_dir.join("vectors.lance");
    let vector_store = LanceVectorStore::open(&lance_path, embedder.dimension())
        .await
        .context("벡터 저장소 열기 실패")?;

    Ok((Arc::new(doc_store), Arc::new(vector_store), Arc::new(embedder)))
}

fn require_api_key() -> Result<()> {
    if !has_api_key() {
        bail!(
            "API 키가 설정되지 않았습니다.\n\n\
             설정 방법:\n  \
             export GEMINI_API_KEY=your-api-key\n  \
             또는\n  \
             export GOOGLE_AI_API_KEY=your-api-key\n\n\
             API 키 발급: https://aistudio.google.com/app/apikey"
        );
    }
    Ok(())
}

// ============================================================================
// Command Implementations
// ============================================================================

/// 인덱싱 명령어 (ingest)
async fn cmd_ingest(
    text: Option<String>,
    file: Option<PathBuf>,
    dir: Option<PathBuf>,
    cache_chunks: bool,
) -> Result<()> {
    require_api_key()?;

    let (doc_store, vector_store, embedder) = open_components().await?;
    let mut indexer = VectorIndexer::new(
        vector_store as Arc<dyn VectorStore>,
        Some(doc_store as Arc<dyn DocumentStore>),
        embedder as Arc<dyn EmbeddingProvider>,
    );
    if cache_chunks {
        indexer = indexer.with_chunk_cache_dir(get_data_dir().join("chunks"));
    }

    // 입력 수집
    let inputs: Vec<IndexInput> = if let Some(text) = text {
        vec![IndexInput::Text(text)]
    } else if let Some(ref file_path) = file {
        collect_file(file_path)?
    } else if let Some(ref dir_path) = dir {
        collect_directory(dir_path)?
    } else {
        bail!("--text, --file, --dir 중 하나를 지정해야 합니다");
    };

    if inputs.is_empty() {
        println!("[!] 인덱싱할 내용이 없습니다.");
        return Ok(());
    }

    println!("[*] {} 개 청크 임베딩 및 저장 중...", inputs.len());

    let ids = indexer.index(inputs).await.context("인덱싱 실패")?;

    println!("[OK] {} 개 청크가 인덱싱되었습니다.", ids.len());
    for id in ids.iter().take(5) {
        println!("     {}", id);
    }
    if ids.len() > 5 {
        println!("     ... 외 {} 개", ids.len() - 5);
    }

    Ok(())
}

/// 단일 파일을 청크 입력으로 변환
fn collect_file(path: &Path) -> Result<Vec<IndexInput>> {
    if !is_text_file(path) {
        println!("[!] 지원하지 않는 파일 형식: {:?}", path);
        return Ok(vec![]);
    }

    let content = std::fs::read_to_string(path)
        .with_context(|| format!("파일 읽기 실패: {:?}", path))?;

    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("unknown")
        .to_string();

    // 내용 해시 기반 ID - 같은 파일을 다시 인덱싱하면 덮어씀
    let content_hash = short_hash(&content);

    let chunker = TextChunker::with_defaults();
    let chunks = chunker.chunk(&content);

    println!("[*] {} -> {} 청크", file_name, chunks.len());

    Ok(chunks
        .into_iter()
        .enumerate()
        .map(|(i, chunk)| {
            let mut doc = Document::new(format!("{}-{:04}", content_hash, i), chunk)
                .with_metadata(metadata_keys::FILE_NAME, file_name.clone());
            if let Some(section) = leading_heading(&doc.text) {
                doc = doc.with_metadata(metadata_keys::SECTION, section);
            }
            IndexInput::Document(doc)
        })
        .collect())
}

/// 폴더를 재귀 수집 (.gitignore 존중)
fn collect_directory(dir: &Path) -> Result<Vec<IndexInput>> {
    if !dir.is_dir() {
        bail!("폴더가 아닙니다: {:?}", dir);
    }

    let mut inputs = Vec::new();

    for entry in ignore::WalkBuilder::new(dir).build() {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                tracing::warn!("Skipping unreadable entry: {}", e);
                continue;
            }
        };

        let path = entry.path();
        if path.is_file() && is_text_file(path) {
            inputs.extend(collect_file(path)?);
        }
    }

    Ok(inputs)
}

fn is_text_file(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("md") | Some("markdown") | Some("txt")
    )
}

/// SHA-256 앞 12 hex 문자
fn short_hash(content: &str) -> String {
    let digest = Sha256::digest(content.as_bytes());
    digest
        .iter()
        .take(6)
        .map(|b| format!("{:02x}", b))
        .collect()
}

/// 검색 명령어 (query)
async fn cmd_query(
    query: &str,
    top_k: usize,
    mode: &str,
    scope: Vec<String>,
    extend: bool,
    rerank: bool,
    thumbnails: usize,
) -> Result<()> {
    require_api_key()?;

    let mode = match mode {
        "vector" => RetrievalMode::Vector,
        "text" => RetrievalMode::Text,
        "hybrid" => RetrievalMode::Hybrid,
        other => bail!("알 수 없는 검색 모드: {} (vector | text | hybrid)", other),
    };

    println!("[*] 검색 중: \"{}\"", query);

    let (doc_store, vector_store, embedder) = open_components().await?;
    let mut engine = HybridRetrieval::new(
        vector_store as Arc<dyn VectorStore>,
        Some(doc_store as Arc<dyn DocumentStore>),
        embedder as Arc<dyn EmbeddingProvider>,
    )
    .with_config(RetrievalConfig::default());

    if rerank {
        let llm = GeminiChat::from_env().context("LLM 클라이언트 생성 실패")?;
        engine = engine.with_reranker(Arc::new(LlmReranker::new(Arc::new(llm))));
    }

    let mut options = RetrievalOptions::default()
        .with_mode(mode)
        .with_top_k(top_k);
    if !scope.is_empty() {
        options = options.with_scope(scope);
    }
    if extend {
        options = options.extended();
    }
    options.thumbnail_count = Some(thumbnails);

    let results = engine.retrieve(query, options).await.context("검색 실패")?;

    if results.is_empty() {
        println!("\n[!] 검색 결과가 없습니다.");
        return Ok(());
    }

    println!("\n[OK] 검색 결과 ({} 건):\n", results.len());

    for (i, result) in results.iter().enumerate() {
        if result.has_similarity() {
            println!("{}. [VEC] [점수: {:.4}] {}", i + 1, result.score, result.doc_id());
        } else {
            println!("{}. [FTS] {}", i + 1, result.doc_id());
        }

        if let Some(file_name) = result.doc.meta_str(metadata_keys::FILE_NAME) {
            match result.doc.meta_str(metadata_keys::PAGE_LABEL) {
                Some(page) => println!("   파일: {} (p.{})", file_name, page),
                None => println!("   파일: {}", file_name),
            }
        }
        if let Some(doc_type) = result.doc.doc_type() {
            println!("   타입: {}", doc_type);
        }
        if !result.doc.text.is_empty() {
            println!("   내용: {}", truncate_text(&result.doc.text, 200));
        }
        println!();
    }

    Ok(())
}

/// 목록 명령어 (list)
async fn cmd_list(limit: usize) -> Result<()> {
    let store = SqliteDocumentStore::open_default().context("문서 저장소 열기 실패")?;

    let docs = store.list(limit).context("문서 목록 조회 실패")?;

    if docs.is_empty() {
        println!("[!] 저장된 문서가 없습니다.");
        return Ok(());
    }

    println!("[OK] 저장된 문서 ({} 건):\n", docs.len());

    for doc in docs {
        let file_name = doc.meta_str(metadata_keys::FILE_NAME).unwrap_or("-");
        println!("  {} [{}]", doc.doc_id, file_name);
        println!("        {} | {} chars", truncate_text(&doc.text, 60), doc.text.len());
        println!();
    }

    Ok(())
}

/// 삭제 명령어 (delete)
async fn cmd_delete(ids: Vec<String>) -> Result<()> {
    let doc_store = SqliteDocumentStore::open_default().context("문서 저장소 열기 실패")?;

    let deleted_docs = doc_store.delete(&ids).await.context("문서 삭제 실패")?;

    // 벡터도 같이 정리 (벡터 저장소가 없으면 문서만 삭제)
    let lance_path = get_data_dir().join("vectors.lance");
    let mut deleted_vectors = 0;
    if lance_path.exists() {
        let vector_store = LanceVectorStore::open_with_defaults(&lance_path)
            .await
            .context("벡터 저장소 열기 실패")?;
        deleted_vectors = vector_store.delete(&ids).await.context("벡터 삭제 실패")?;
    }

    if deleted_docs == 0 && deleted_vectors == 0 {
        println!("[!] 삭제할 문서를 찾을 수 없습니다");
    } else {
        println!(
            "[OK] 문서 {} 건, 벡터 {} 건 삭제됨",
            deleted_docs, deleted_vectors
        );
    }

    Ok(())
}

/// 상태 명령어 (status)
async fn cmd_status() -> Result<()> {
    println!("docpage-rag v{}", env!("CARGO_PKG_VERSION"));
    println!();

    let data_dir = get_data_dir();
    println!("[*] 데이터 디렉토리: {}", data_dir.display());

    if has_api_key() {
        println!("[OK] API 키: 설정됨");
    } else {
        println!("[!] API 키: 미설정");
        println!("    설정: export GEMINI_API_KEY=your-key");
    }

    match SqliteDocumentStore::open_default() {
        Ok(store) => match store.stats() {
            Ok(stats) => {
                println!("[OK] 저장된 문서: {} 건", stats.document_count);
                println!("     총 콘텐츠: {}", format_bytes(stats.total_text_bytes));
            }
            Err(e) => {
                println!("[!] 통계 조회 실패: {}", e);
            }
        },
        Err(e) => {
            println!("[!] 문서 저장소 열기 실패: {}", e);
        }
    }

    let lance_path = data_dir.join("vectors.lance");
    if lance_path.exists() {
        match LanceVectorStore::open_with_defaults(&lance_path).await {
            Ok(store) => match store.count().await {
                Ok(count) => println!("[OK] 벡터 인덱스: {} 청크", count),
                Err(e) => tracing::debug!("벡터 통계 조회 실패: {}", e),
            },
            Err(e) => tracing::debug!("벡터 저장소 열기 실패: {}", e),
        }
    } else {
        println!("[!] 벡터 인덱스: 없음");
    }

    Ok(())
}

// ============================================================================
// Helper Functions
// ============================================================================

/// 텍스트 자르기 (UTF-8 안전)
fn truncate_text(text: &str, max_chars: usize) -> String {
    let cleaned = text.replace('\n', " ").replace('\r', "");
    let cleaned = cleaned.trim();

    if cleaned.chars().count() <= max_chars {
        cleaned.to_string()
    } else {
        let truncated: String = cleaned.chars().take(max_chars).collect();
        format!("{}...", truncated)
    }
}

/// 바이트 크기 포맷팅
fn format_bytes(bytes: usize) -> String {
    const KB: usize = 1024;
    const MB: usize = KB * 1024;

    if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_text() {
        assert_eq!(truncate_text("hello", 10), "hello");
        assert_eq!(truncate_text("hello world", 5), "hello...");
        assert_eq!(truncate_text("hello\nworld", 20), "hello world");
    }

    #[test]
    fn test_truncate_unicode() {
        let korean = "안녕하세요 세계";
        let truncated = truncate_text(korean, 5);
        assert_eq!(truncated, "안녕하세요...");
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(500), "500 B");
        assert_eq!(format_bytes(1024), "1.00 KB");
        assert_eq!(format_bytes(1536), "1.50 KB");
        assert_eq!(format_bytes(1048576), "1.00 MB");
    }

    #[test]
    fn test_short_hash_stable() {
        assert_eq!(short_hash("content"), short_hash("content"));
        assert_ne!(short_hash("content"), short_hash("other"));
        assert_eq!(short_hash("content").len(), 12);
    }

    #[test]
    fn test_is_text_file() {
        assert!(is_text_file(Path::new("notes.md")));
        assert!(is_text_file(Path::new("notes.txt")));
        assert!(!is_text_file(Path::new("image.png")));
        assert!(!is_text_file(Path::new("no_extension")));
    }
}
