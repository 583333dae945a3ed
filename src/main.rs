//! prompt-rag CLI 진입점

use anyhow::Result;
use clap::Parser;

fn main() -> Result<()> {
    // 로깅 초기화 (PROMPT_RAG_DEBUG=true면 DEBUG)
    let level = if prompt_rag::config::debug_enabled() {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()),
        )
        .init();

    // CLI 실행
    let cli = prompt_rag::cli::Cli::parse();

    let result = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(prompt_rag::cli::run(cli));

    if let Err(e) = result {
        eprintln!("Error: {:?}", e);
        std::process::exit(prompt_rag::cli::exit_code(&e));
    }
    Ok(())
}
