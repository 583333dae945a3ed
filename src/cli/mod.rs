//! CLI 모듈
//!
//! prompt-rag CLI 명령어 정의 및 구현

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};

use crate::config::RagConfig;
use crate::embedding::{
    create_embedder, has_api_key, EmbeddingProvider, HashEmbedding, UnavailableEmbedding,
};
use crate::enhance::{EnhancementOutcome, GeminiGenerator, PromptPipeline};
use crate::error::RagError;
use crate::knowledge::{
    build_and_persist, load_persisted, staleness, ChunkConfig, ChunkStrategy, HybridSearcher,
    IndexMeta, IndexStore, KnowledgeBase, LanceVectorIndex, SearchStrategy, TechniqueCategory,
    TechniqueRecord, VectorIndex,
};

/// sliding-window 전략에서 오버랩을 지정하지 않았을 때
const DEFAULT_SLIDING_OVERLAP: usize = 50;

// ============================================================================
// CLI Definition
// ============================================================================

#[derive(Parser)]
#[command(name = "prompt-rag")]
#[command(version, about = "프롬프트 기법 하이브리드 RAG", long_about = None)]
pub struct Cli {
    /// 기법 지식베이스 JSON (기본: 내장 분류 체계)
    #[arg(long, global = true)]
    pub kb: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// 지식베이스를 청크로 나눠 인덱스 빌드
    Index {
        /// 청킹 프리셋 (rag, fast, default), 개별 옵션이 우선
        #[arg(long)]
        preset: Option<String>,

        /// 청킹 전략 (simple, sentence, sliding-window, semantic)
        #[arg(short, long)]
        strategy: Option<String>,

        /// 최대 청크 크기 (단위는 전략에 따름)
        #[arg(long)]
        max_size: Option<usize>,

        /// 오버랩 문자 수 (sliding-window 전용)
        #[arg(long)]
        overlap: Option<usize>,

        /// API 없이 해시 임베딩 사용
        #[arg(long)]
        offline: bool,
    },

    /// 인덱스 검색
    Search {
        /// 검색 쿼리
        query: String,

        /// 검색 전략 (hybrid, vector-only, keyword-only)
        #[arg(short, long)]
        strategy: Option<String>,

        /// 결과 개수
        #[arg(short = 'k', long)]
        top_k: Option<usize>,

        /// 벡터 점수 가중치
        #[arg(long)]
        vector_weight: Option<f32>,

        /// 키워드 점수 가중치
        #[arg(long)]
        keyword_weight: Option<f32>,

        /// JSON 출력
        #[arg(long)]
        json: bool,
    },

    /// 프롬프트 분류 + 개선
    Enhance {
        /// 개선할 프롬프트
        prompt: String,

        /// JSON 출력
        #[arg(long)]
        json: bool,
    },

    /// 기법 목록 조회
    Techniques {
        /// 카테고리 필터
        #[arg(short, long)]
        category: Option<String>,

        /// 키워드 필터
        #[arg(short, long)]
        keyword: Option<String>,

        /// 기법 이름 (상세 보기)
        #[arg(short, long)]
        name: Option<String>,
    },

    /// 지식베이스 JSON 내보내기
    Export {
        /// 출력 파일 (기본: 표준 출력)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// 상태 확인
    Status,
}

// ============================================================================
// CLI Runner
// ============================================================================

/// CLI 명령어 실행
pub async fn run(cli: Cli) -> Result<()> {
    let config = RagConfig::from_env().context("설정 로드 실패")?;
    let kb = load_kb(cli.kb.as_deref())?;

    match cli.command {
        Commands::Index {
            preset,
            strategy,
            max_size,
            overlap,
            offline,
        } => {
            let chunk = chunk_config_from_args(&config.chunk, preset, strategy, max_size, overlap)?;
            cmd_index(config, &kb, chunk, offline).await
        }
        Commands::Search {
            query,
            strategy,
            top_k,
            vector_weight,
            keyword_weight,
            json,
        } => {
            cmd_search(
                config,
                &query,
                strategy,
                top_k,
                vector_weight,
                keyword_weight,
                json,
            )
            .await
        }
        Commands::Enhance { prompt, json } => cmd_enhance(config, kb, &prompt, json).await,
        Commands::Techniques {
            category,
            keyword,
            name,
        } => cmd_techniques(&kb, category, keyword, name),
        Commands::Export { output } => cmd_export(&kb, output),
        Commands::Status => cmd_status(config, &kb).await,
    }
}

// ============================================================================
// Command Implementations
// ============================================================================

/// 인덱스 빌드 명령어 (index)
///
/// 기존 인덱스는 비우고 다시 만듭니다.
async fn cmd_index(
    mut config: RagConfig,
    kb: &KnowledgeBase,
    chunk: ChunkConfig,
    offline: bool,
) -> Result<()> {
    config.chunk = chunk;
    config.embedding.offline |= offline;

    if !config.embedding.offline && !has_api_key() {
        bail!("{}", missing_api_key_message());
    }

    let embedder = create_embedder(&config.embedding).context("임베딩 프로바이더 생성 실패")?;
    let store = IndexStore::open(&config.db_path()).context("IndexStore 열기 실패")?;

    // 벡터 테이블은 빌드 시작 시 통째로 다시 만들어짐
    discard_if_embedder_changed(&store, embedder.as_ref())?;

    let vectors: Arc<dyn VectorIndex> = Arc::new(
        LanceVectorIndex::open(&config.lance_path(), embedder.dimension())
            .await
            .context("벡터 인덱스 열기 실패")?,
    );

    println!(
        "[*] 인덱스 빌드 중: 기법 {} 개, 전략 {} (max {} {}, overlap {})",
        kb.len(),
        config.chunk.strategy,
        config.chunk.max_size,
        config.chunk.strategy.size_unit(),
        config.chunk.overlap
    );
    println!("    임베딩: {} ({}d)", embedder.name(), embedder.dimension());

    let (searcher, meta) = build_and_persist(kb, &config.chunk, embedder, vectors, &store)
        .await
        .context("인덱스 빌드 실패")?;

    println!(
        "[OK] 인덱스 빌드 완료: 청크 {} 개, 어휘 {} 개",
        meta.chunk_count,
        searcher.keyword_index().vocabulary_size()
    );
    println!("     저장 위치: {}", config.data_dir.display());

    Ok(())
}

/// 검색 명령어 (search)
async fn cmd_search(
    config: RagConfig,
    query: &str,
    strategy: Option<String>,
    top_k: Option<usize>,
    vector_weight: Option<f32>,
    keyword_weight: Option<f32>,
    json: bool,
) -> Result<()> {
    let mut options = config.search.to_options();
    if let Some(strategy) = strategy {
        options.strategy = strategy.parse::<SearchStrategy>()?;
    }
    if let Some(top_k) = top_k {
        options.top_k = top_k;
    }
    if vector_weight.is_some() || keyword_weight.is_some() {
        let vector_weight = vector_weight.unwrap_or(options.vector_weight);
        let keyword_weight = keyword_weight.unwrap_or(options.keyword_weight);
        options = options.with_weights(vector_weight, keyword_weight);
    }

    let searcher = open_searcher(&config).await?;

    if !json {
        println!("[*] 검색 중: \"{}\" ({})", query, options.strategy);
    }

    let response = searcher.search(query, &options).await.context("검색 실패")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&response)?);
        return Ok(());
    }

    if let Some(ref reason) = response.degraded {
        println!("[!] 키워드 검색으로 전환됨: {}", reason);
    }

    if response.results.is_empty() {
        println!("\n[!] 검색 결과가 없습니다.");
        return Ok(());
    }

    println!("\n[OK] 검색 결과 ({} 건):\n", response.results.len());

    for (i, result) in response.results.iter().enumerate() {
        let method_str = match response.strategy_used {
            SearchStrategy::Hybrid => "HYB",
            SearchStrategy::VectorOnly => "VEC",
            SearchStrategy::KeywordOnly => "KEY",
        };

        println!(
            "{}. [{}] [점수: {:.4}] Chunk #{}",
            i + 1,
            method_str,
            result.fused_score,
            result.chunk_id
        );

        if let Some(chunk) = searcher.chunk(result.chunk_id) {
            println!("   기법: {}", chunk.doc_id);
            println!("   내용: {}", truncate_text(&chunk.text, 200));
        }

        let vector = result
            .vector_score
            .map_or_else(|| "-".to_string(), |s| format!("{:.4}", s));
        let keyword = result
            .keyword_score
            .map_or_else(|| "-".to_string(), |s| format!("{:.4}", s));
        println!("   벡터: {} | BM25: {}", vector, keyword);
        println!();
    }

    Ok(())
}

/// 프롬프트 개선 명령어 (enhance)
async fn cmd_enhance(config: RagConfig, kb: KnowledgeBase, prompt: &str, json: bool) -> Result<()> {
    if !has_api_key() {
        bail!("{}", missing_api_key_message());
    }

    let searcher = Arc::new(open_searcher(&config).await?);
    let model = Arc::new(
        GeminiGenerator::from_env(&config.generation).context("생성 모델 초기화 실패")?,
    );
    let pipeline = PromptPipeline::from_config(&config, Arc::new(kb), searcher, model);

    if !json {
        println!("[*] 프롬프트 분석 중...");
    }

    let report = pipeline.process(prompt).await.context("프롬프트 개선 실패")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("[OK] 선택된 기법: {}", report.technique);
    if let Some(ref reason) = report.search_degraded {
        println!("[!] 키워드 검색으로 전환됨: {}", reason);
    }

    if !report.retrieved.is_empty() {
        println!("\n관련 기법:");
        for item in &report.retrieved {
            println!(
                "  - {} [{}] ({:.4})",
                item.technique, item.category, item.fused_score
            );
        }
    }

    println!();
    match &report.outcome {
        EnhancementOutcome::FullyEnhanced { prompt } => {
            println!("[OK] 개선된 프롬프트:\n\n{}", prompt);
        }
        EnhancementOutcome::DegradedFallback { prompt, reason } => {
            println!("[!] 모델 응답 실패 ({}), 템플릿 결과:\n\n{}", reason, prompt);
        }
        EnhancementOutcome::Failed { reason } => {
            bail!("프롬프트 개선 실패: {}", reason);
        }
    }

    Ok(())
}

/// 기법 목록 명령어 (techniques)
fn cmd_techniques(
    kb: &KnowledgeBase,
    category: Option<String>,
    keyword: Option<String>,
    name: Option<String>,
) -> Result<()> {
    if let Some(name) = name {
        let record = kb
            .get(&name)
            .or_else(|| kb.closest(&name))
            .ok_or_else(|| anyhow::anyhow!("'{}' 기법을 찾을 수 없습니다", name))?;
        print_technique_detail(record);
        return Ok(());
    }

    let category = category
        .map(|c| c.parse::<TechniqueCategory>())
        .transpose()?;

    let records: Vec<&TechniqueRecord> = match (keyword, category) {
        (Some(ref keyword), Some(category)) => kb
            .search_keyword(keyword)
            .into_iter()
            .filter(|r| r.category == category)
            .collect(),
        (Some(ref keyword), None) => kb.search_keyword(keyword),
        (None, Some(category)) => kb.by_category(category),
        (None, None) => kb.all_documents().iter().collect(),
    };

    if records.is_empty() {
        println!("[!] 조건에 맞는 기법이 없습니다.");
        return Ok(());
    }

    println!("[OK] 기법 ({} 개):\n", records.len());

    for category in TechniqueCategory::ALL {
        let in_category: Vec<_> = records.iter().filter(|r| r.category == category).collect();
        if in_category.is_empty() {
            continue;
        }
        println!("  {} ({})", category, in_category.len());
        for record in in_category {
            println!("    - {}: {}", record.name, truncate_text(&record.description, 60));
        }
        println!();
    }

    Ok(())
}

fn print_technique_detail(record: &TechniqueRecord) {
    println!("{}", record.name);
    println!("  카테고리: {}", record.category);
    if let Some(ref sub) = record.sub_category {
        println!("  하위 분류: {}", sub);
    }
    println!("\n  설명: {}", record.description);
    if !record.how_to_apply.is_empty() {
        println!("  적용 방법: {}", record.how_to_apply);
    }
    if !record.benefits.is_empty() {
        println!("  효과: {}", record.benefits);
    }
    if !record.prerequisites.is_empty() {
        println!("  전제 조건: {}", record.prerequisites);
    }
    if !record.examples.is_empty() {
        println!("  예시:");
        for example in &record.examples {
            println!("    - {}", example);
        }
    }
    if !record.related_techniques.is_empty() {
        println!("  관련 기법: {}", record.related_techniques.join(", "));
    }
}

/// 내보내기 명령어 (export)
fn cmd_export(kb: &KnowledgeBase, output: Option<PathBuf>) -> Result<()> {
    let json = kb.to_json_pretty()?;

    match output {
        Some(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent).context("출력 디렉토리 생성 실패")?;
            }
            std::fs::write(&path, json)
                .with_context(|| format!("파일 쓰기 실패: {}", path.display()))?;
            println!("[OK] 기법 {} 개를 내보냈습니다: {}", kb.len(), path.display());
        }
        None => println!("{}", json),
    }

    Ok(())
}

/// 상태 명령어 (status)
///
/// 시스템 상태를 확인합니다.
async fn cmd_status(config: RagConfig, kb: &KnowledgeBase) -> Result<()> {
    println!("prompt-rag v{}", env!("CARGO_PKG_VERSION"));
    println!();

    // 데이터 디렉토리
    println!("[*] 데이터 디렉토리: {}", config.data_dir.display());
    println!("[*] 지식베이스: 기법 {} 개", kb.len());

    // API 키 상태
    if has_api_key() {
        println!("[OK] API 키: 설정됨");
    } else if config.embedding.offline {
        println!("[*] API 키: 미설정 (오프라인 임베딩 사용)");
    } else {
        println!("[!] API 키: 미설정");
        println!("    설정: export GEMINI_API_KEY=your-key");
    }

    let store = match IndexStore::open(&config.db_path()) {
        Ok(store) => store,
        Err(e) => {
            println!("[!] IndexStore 열기 실패: {}", e);
            return Ok(());
        }
    };

    match store.stats() {
        Ok(stats) => {
            println!(
                "[OK] 저장된 청크: {} 개 (기법 {} 개)",
                stats.chunk_count, stats.document_count
            );
            println!("     총 텍스트: {}", format_bytes(stats.total_text_bytes));
        }
        Err(e) => println!("[!] 통계 조회 실패: {}", e),
    }

    let meta = match store.meta() {
        Ok(Some(meta)) => meta,
        Ok(None) => {
            println!("[!] 인덱스 없음: `prompt-rag index`를 먼저 실행하세요");
            return Ok(());
        }
        Err(e) => {
            println!("[!] 메타데이터 조회 실패: {}", e);
            return Ok(());
        }
    };

    println!(
        "[OK] 마지막 빌드: {} ({}, max {}, overlap {})",
        meta.built_at.format("%Y-%m-%d %H:%M"),
        meta.chunk_config.strategy,
        meta.chunk_config.max_size,
        meta.chunk_config.overlap
    );
    println!(
        "     임베딩: {} ({}d)",
        meta.embedding_model, meta.embedding_dimension
    );

    match LanceVectorIndex::open(&config.lance_path(), meta.embedding_dimension).await {
        Ok(vectors) => match vectors.count().await {
            Ok(count) => println!("[OK] 벡터 인덱스: {} 개", count),
            Err(e) => tracing::debug!("벡터 수 조회 실패: {}", e),
        },
        Err(e) => tracing::debug!("벡터 인덱스 열기 실패: {}", e),
    }

    match embedder_for_index(&config, Some(&meta), has_api_key()) {
        Ok(embedder) => match staleness(&meta, kb, embedder.as_ref()) {
            Some(reason) => println!("[!] 인덱스가 오래됨: {} (다시 index 실행 필요)", reason),
            None => println!("[OK] 인덱스 최신 상태"),
        },
        Err(e) => tracing::debug!("임베딩 프로바이더 생성 실패: {}", e),
    }

    Ok(())
}

// ============================================================================
// Helper Functions
// ============================================================================

/// 에러에 맞는 프로세스 종료 코드
///
/// 잘못된 인자/설정/입력은 2 (clap 사용법 오류와 같음), 나머지는 1.
pub fn exit_code(err: &anyhow::Error) -> i32 {
    let rejected = err
        .chain()
        .find_map(|cause| cause.downcast_ref::<RagError>())
        .is_some_and(RagError::is_rejection);
    if rejected {
        2
    } else {
        1
    }
}

/// index 명령어 인자로 청킹 설정 결정
///
/// 프리셋 → 전략 → 크기/오버랩 순으로 덮어씁니다. 전략만 바꾸고 오버랩을
/// 지정하지 않으면 sliding-window는 50, 나머지는 0을 씁니다.
fn chunk_config_from_args(
    base: &ChunkConfig,
    preset: Option<String>,
    strategy: Option<String>,
    max_size: Option<usize>,
    overlap: Option<usize>,
) -> Result<ChunkConfig> {
    let mut chunk = match preset {
        Some(preset) => ChunkConfig::preset(&preset)?,
        None => base.clone(),
    };

    if let Some(strategy) = strategy {
        chunk.strategy = strategy.parse::<ChunkStrategy>()?;
        chunk.overlap = match chunk.strategy {
            ChunkStrategy::SlidingWindow => DEFAULT_SLIDING_OVERLAP,
            _ => 0,
        };
    }
    if let Some(max_size) = max_size {
        chunk.max_size = max_size;
    }
    if let Some(overlap) = overlap {
        chunk.overlap = overlap;
    }

    chunk.validate()?;
    Ok(chunk)
}

fn load_kb(path: Option<&Path>) -> Result<KnowledgeBase> {
    let kb = match path {
        Some(path) => KnowledgeBase::from_json_file(path)
            .with_context(|| format!("지식베이스 로드 실패: {}", path.display()))?,
        None => KnowledgeBase::builtin().context("내장 지식베이스 로드 실패")?,
    };
    Ok(kb)
}

/// 인덱스를 만든 임베더와 같은 종류의 임베더
///
/// - 오프라인(해시)으로 빌드된 인덱스는 API 키 없이 같은 차원의 해시 임베더로 엽니다.
/// - Gemini로 빌드된 인덱스를 키 없이 열면 `UnavailableEmbedding`을 씁니다.
///   키워드 검색은 그대로 되고, 벡터가 필요한 검색은 키워드 전용으로 강등됩니다.
fn embedder_for_index(
    config: &RagConfig,
    meta: Option<&IndexMeta>,
    api_key_available: bool,
) -> Result<Arc<dyn EmbeddingProvider>> {
    let mut embedding = config.embedding.clone();

    match meta {
        Some(meta) if meta.embedding_model == HashEmbedding::NAME => {
            embedding.offline = true;
            embedding.dimension = meta.embedding_dimension;
        }
        Some(meta) if !embedding.offline && !api_key_available => {
            tracing::warn!(
                model = %meta.embedding_model,
                "API key not set, vector search disabled for this session"
            );
            return Ok(Arc::new(UnavailableEmbedding::missing_api_key(
                meta.embedding_model.clone(),
                meta.embedding_dimension,
            )));
        }
        _ => {}
    }

    create_embedder(&embedding)
}

/// 임베더가 바뀌었으면 저장된 청크/메타데이터 삭제
///
/// 빌드가 중간에 실패해도 이전 임베더의 인덱스가 남아 있지 않도록 합니다.
fn discard_if_embedder_changed(
    store: &IndexStore,
    embedder: &dyn EmbeddingProvider,
) -> Result<bool> {
    let Some(meta) = store.meta()? else {
        return Ok(false);
    };
    if meta.embedding_model == embedder.name() && meta.embedding_dimension == embedder.dimension()
    {
        return Ok(false);
    }

    tracing::info!(
        old_model = %meta.embedding_model,
        old_dimension = meta.embedding_dimension,
        new_model = embedder.name(),
        new_dimension = embedder.dimension(),
        "Embedder changed, discarding stored index"
    );
    store.clear().context("기존 인덱스 삭제 실패")?;
    Ok(true)
}

/// 저장된 인덱스 열기
async fn open_searcher(config: &RagConfig) -> Result<HybridSearcher> {
    open_searcher_with(config, has_api_key()).await
}

async fn open_searcher_with(
    config: &RagConfig,
    api_key_available: bool,
) -> Result<HybridSearcher> {
    let store = IndexStore::open(&config.db_path()).context("IndexStore 열기 실패")?;
    let meta = store.meta()?;

    let embedder = embedder_for_index(config, meta.as_ref(), api_key_available)
        .context("임베딩 프로바이더 생성 실패")?;
    let vectors: Arc<dyn VectorIndex> = Arc::new(
        LanceVectorIndex::open(&config.lance_path(), embedder.dimension())
            .await
            .context("벡터 인덱스 열기 실패")?,
    );

    let searcher = load_persisted(&store, vectors, embedder).await?;
    Ok(searcher)
}

fn missing_api_key_message() -> &'static str {
    "API 키가 설정되지 않았습니다.\n\n\
     설정 방법:\n  \
     export GEMINI_API_KEY=your-api-key\n  \
     또는\n  \
     export GOOGLE_AI_API_KEY=your-api-key\n\n\
     API 키 없이 인덱싱하려면 --offline 또는 PROMPT_RAG_OFFLINE=true\n\
     API 키 발급: https://aistudio.google.com/app/apikey"
}

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
    use crate::embedding::DEFAULT_EMBEDDING_MODEL;
    use crate::knowledge::{MemoryVectorIndex, SearchOptions};
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_search_flags() {
        let cli = Cli::try_parse_from([
            "prompt-rag",
            "search",
            "step by step",
            "--strategy",
            "keyword-only",
            "-k",
            "5",
            "--vector-weight",
            "0.5",
        ])
        .unwrap();

        match cli.command {
            Commands::Search {
                query,
                strategy,
                top_k,
                vector_weight,
                keyword_weight,
                json,
            } => {
                assert_eq!(query, "step by step");
                assert_eq!(strategy.as_deref(), Some("keyword-only"));
                assert_eq!(top_k, Some(5));
                assert_eq!(vector_weight, Some(0.5));
                assert_eq!(keyword_weight, None);
                assert!(!json);
            }
            _ => panic!("expected search command"),
        }
    }

    #[test]
    fn test_chunk_config_from_args() {
        let base = ChunkConfig::default();

        let unchanged = chunk_config_from_args(&base, None, None, None, None).unwrap();
        assert_eq!(unchanged, base);

        let fast =
            chunk_config_from_args(&base, Some("fast".to_string()), None, None, None).unwrap();
        assert_eq!(fast, ChunkConfig::for_fast());

        let rag_small =
            chunk_config_from_args(&base, Some("rag".to_string()), None, Some(256), None).unwrap();
        assert_eq!(rag_small.strategy, ChunkStrategy::SlidingWindow);
        assert_eq!((rag_small.max_size, rag_small.overlap), (256, 64));

        let sliding = chunk_config_from_args(
            &base,
            None,
            Some("sliding-window".to_string()),
            Some(400),
            None,
        )
        .unwrap();
        assert_eq!(sliding.overlap, DEFAULT_SLIDING_OVERLAP);

        assert!(chunk_config_from_args(&base, Some("huge".to_string()), None, None, None).is_err());
        assert!(chunk_config_from_args(&base, None, None, Some(10), Some(10)).is_err());
    }

    #[test]
    fn test_exit_code_for_rejections() {
        let bad_strategy = "diagonal"
            .parse::<ChunkStrategy>()
            .map_err(anyhow::Error::from)
            .context("인덱스 빌드 실패")
            .unwrap_err();
        assert_eq!(exit_code(&bad_strategy), 2);

        let outage = anyhow::Error::from(RagError::UpstreamUnavailable("503".to_string()));
        assert_eq!(exit_code(&outage), 1);
        assert_eq!(exit_code(&anyhow::anyhow!("disk full")), 1);
    }

    #[test]
    fn test_global_kb_flag() {
        let cli = Cli::try_parse_from(["prompt-rag", "status", "--kb", "custom.json"]).unwrap();
        assert_eq!(cli.kb, Some(PathBuf::from("custom.json")));
        assert!(matches!(cli.command, Commands::Status));
    }

    #[test]
    fn test_export_writes_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("out").join("techniques.json");
        let kb = KnowledgeBase::builtin().unwrap();

        cmd_export(&kb, Some(path.clone())).unwrap();

        let exported = KnowledgeBase::from_json_file(&path).unwrap();
        assert_eq!(exported.len(), kb.len());
        assert_eq!(exported.fingerprint(), kb.fingerprint());
    }

    #[test]
    fn test_unknown_category_rejected() {
        let kb = KnowledgeBase::builtin().unwrap();
        assert!(cmd_techniques(&kb, Some("astrology".to_string()), None, None).is_err());
        assert!(cmd_techniques(&kb, Some("ensembling".to_string()), None, None).is_ok());
    }

    fn meta_for(model: &str, dimension: usize) -> IndexMeta {
        IndexMeta {
            chunk_config: ChunkConfig::default(),
            embedding_model: model.to_string(),
            embedding_dimension: dimension,
            kb_fingerprint: String::new(),
            chunk_count: 0,
            built_at: chrono::Utc::now(),
        }
    }

    #[test]
    fn test_offline_index_reopens_with_hash_embedder() {
        let config = RagConfig::default();
        let meta = meta_for(HashEmbedding::NAME, 128);
        let embedder = embedder_for_index(&config, Some(&meta), false).unwrap();
        assert_eq!(embedder.name(), HashEmbedding::NAME);
        assert_eq!(embedder.dimension(), 128);
    }

    #[test]
    fn test_keyless_gemini_index_gets_unavailable_embedder() {
        let config = RagConfig::default();
        let meta = meta_for(DEFAULT_EMBEDDING_MODEL, 768);
        let embedder = embedder_for_index(&config, Some(&meta), false).unwrap();
        assert_eq!(embedder.name(), DEFAULT_EMBEDDING_MODEL);
        assert_eq!(embedder.dimension(), 768);
    }

    /// Gemini 모델 이름을 쓰는 해시 임베더 (네트워크 없이 Gemini 인덱스 흉내)
    struct GeminiNamedEmbedding(HashEmbedding);

    #[async_trait::async_trait]
    impl EmbeddingProvider for GeminiNamedEmbedding {
        async fn embed(&self, text: &str) -> anyhow::Result<Vec<f32>> {
            self.0.embed(text).await
        }
        fn dimension(&self) -> usize {
            self.0.dimension()
        }
        fn name(&self) -> &str {
            DEFAULT_EMBEDDING_MODEL
        }
    }

    #[tokio::test]
    async fn test_reopen_gemini_index_without_api_key() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut config = RagConfig::default();
        config.data_dir = dir.path().to_path_buf();
        config.embedding.offline = false;

        let kb = KnowledgeBase::builtin().unwrap();
        {
            let embedder: Arc<dyn EmbeddingProvider> = Arc::new(GeminiNamedEmbedding(
                HashEmbedding::new(config.embedding.dimension).unwrap(),
            ));
            let store = IndexStore::open(&config.db_path()).unwrap();
            let vectors: Arc<dyn VectorIndex> = Arc::new(
                LanceVectorIndex::open(&config.lance_path(), embedder.dimension())
                    .await
                    .unwrap(),
            );
            build_and_persist(&kb, &config.chunk, embedder, vectors, &store)
                .await
                .unwrap();
        }

        let searcher = open_searcher_with(&config, false).await.unwrap();
        assert_eq!(searcher.embedder().name(), DEFAULT_EMBEDDING_MODEL);

        let keyword = searcher
            .search(
                "think step by step",
                &SearchOptions::new(SearchStrategy::KeywordOnly, 3),
            )
            .await
            .unwrap();
        assert!(keyword.degraded.is_none());
        assert!(!keyword.results.is_empty());

        let hybrid = searcher
            .search("think step by step", &SearchOptions::new(SearchStrategy::Hybrid, 3))
            .await
            .unwrap();
        assert_eq!(hybrid.strategy_used, SearchStrategy::KeywordOnly);
        assert!(hybrid.degraded.unwrap().contains("API key not set"));
        assert_eq!(
            hybrid.results.iter().map(|r| r.chunk_id).collect::<Vec<_>>(),
            keyword.results.iter().map(|r| r.chunk_id).collect::<Vec<_>>()
        );
    }

    #[tokio::test]
    async fn test_embedder_change_discards_stored_index() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = IndexStore::open(&dir.path().join("index.db")).unwrap();
        let kb = KnowledgeBase::builtin().unwrap();
        let embedder = HashEmbedding::new(64).unwrap();

        assert!(!discard_if_embedder_changed(&store, &embedder).unwrap());

        build_and_persist(
            &kb,
            &ChunkConfig::for_rag(),
            Arc::new(embedder.clone()),
            Arc::new(MemoryVectorIndex::new(64)),
            &store,
        )
        .await
        .unwrap();

        assert!(!discard_if_embedder_changed(&store, &embedder).unwrap());
        assert!(store.meta().unwrap().is_some());

        let wider = HashEmbedding::new(128).unwrap();
        assert!(discard_if_embedder_changed(&store, &wider).unwrap());
        assert!(store.meta().unwrap().is_none());
        assert!(store.load_chunks().unwrap().is_empty());
    }

    #[test]
    fn test_truncate_text() {
        assert_eq!(truncate_text("hello", 10), "hello");
        assert_eq!(truncate_text("hello world", 5), "hello...");
        assert_eq!(truncate_text("hello\nworld", 20), "hello world");
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(500), "500 B");
        assert_eq!(format_bytes(1024), "1.00 KB");
        assert_eq!(format_bytes(1536), "1.50 KB");
        assert_eq!(format_bytes(1048576), "1.00 MB");
    }

    #[test]
    fn test_truncate_unicode() {
        let korean = "안녕하세요 세계";
        let truncated = truncate_text(korean, 5);
        assert_eq!(truncated, "안녕하세요...");
    }
}
