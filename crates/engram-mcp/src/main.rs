//! Engram MCP Server - Cognitive Memory over the Model Context Protocol
//!
//! Tiered memory for LLM-driven agents:
//! - L0 append-only raw dialogue, L2 compressed insights with embeddings
//! - Bounded working memory with importance-aware LRU eviction
//! - Hybrid retrieval (dense + FTS5 + graph evidence, weighted RRF)
//! - Knowledge graph with IEF-weighted traversal
//! - Dual-judge relevance evaluation with Cohen's kappa
//! - Dissonance detection with nuance reviews and supersede semantics

mod protocol;
mod resources;
mod server;
mod tools;

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use tracing::{error, info, warn, Level};
use tracing_subscriber::EnvFilter;

use engram_core::{
    DissonanceEngine, DualJudgePipeline, EmbeddingClient, EngramConfig, LexicalOverlapScorer,
    RetrievalEngine, Storage,
};

use crate::protocol::stdio::StdioTransport;
use crate::server::McpServer;
use crate::tools::ToolContext;

/// Parsed command-line options.
struct CliOptions {
    data_dir: Option<PathBuf>,
    config_path: Option<PathBuf>,
}

/// Parse command-line arguments. Exits for `--help`/`--version`.
fn parse_args() -> CliOptions {
    let args: Vec<String> = std::env::args().collect();
    let mut options = CliOptions {
        data_dir: None,
        config_path: None,
    };
    let mut i = 1;

    while i < args.len() {
        match args[i].as_str() {
            "--help" | "-h" => {
                println!("Engram MCP Server v{}", env!("CARGO_PKG_VERSION"));
                println!();
                println!("Tiered cognitive memory server using the Model Context Protocol.");
                println!();
                println!("USAGE:");
                println!("    engram-mcp [OPTIONS]");
                println!();
                println!("OPTIONS:");
                println!("    -h, --help              Print help information");
                println!("    -V, --version           Print version information");
                println!("    --data-dir <PATH>       Custom data directory");
                println!("    --config <PATH>         Configuration file (TOML)");
                println!();
                println!("ENVIRONMENT:");
                println!("    RUST_LOG                      Log level filter (debug, info, ...)");
                println!("    ENGRAM_DATA_DIR               Data directory override");
                println!("    ENGRAM_WORKING_CAPACITY       Working-memory capacity override");
                println!("    ENGRAM_CRITICAL_THRESHOLD     Critical importance threshold override");
                std::process::exit(0);
            }
            "--version" | "-V" => {
                println!("engram-mcp {}", env!("CARGO_PKG_VERSION"));
                std::process::exit(0);
            }
            "--data-dir" => {
                i += 1;
                if i >= args.len() {
                    eprintln!("error: --data-dir requires a path argument");
                    std::process::exit(1);
                }
                options.data_dir = Some(PathBuf::from(&args[i]));
            }
            "--config" => {
                i += 1;
                if i >= args.len() {
                    eprintln!("error: --config requires a path argument");
                    std::process::exit(1);
                }
                options.config_path = Some(PathBuf::from(&args[i]));
            }
            arg => {
                eprintln!("error: unknown argument '{}'", arg);
                eprintln!("Try 'engram-mcp --help' for more information.");
                std::process::exit(1);
            }
        }
        i += 1;
    }

    options
}

/// Fail fast on placeholder secrets left over from `.env` templates.
fn validate_env() -> Result<(), String> {
    const PLACEHOLDER_MARKERS: [&str; 4] = ["your-", "changeme", "replace-me", "xxx"];
    const CHECKED_VARS: [&str; 3] = [
        "ENGRAM_DATA_DIR",
        "ENGRAM_EMBEDDING_API_KEY",
        "ENGRAM_SCORER_API_KEY",
    ];

    for var in CHECKED_VARS {
        if let Ok(value) = std::env::var(var) {
            let lowered = value.to_lowercase();
            if value.is_empty() || PLACEHOLDER_MARKERS.iter().any(|m| lowered.contains(m)) {
                return Err(format!(
                    "{} is set but still a placeholder; fill it in or unset it",
                    var
                ));
            }
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() {
    // Load .env before anything reads the environment
    let _ = dotenvy::dotenv();

    let options = parse_args();

    // Logging to stderr (stdout is for JSON-RPC)
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .with_writer(io::stderr)
        .with_target(false)
        .with_ansi(false)
        .init();

    info!("Engram MCP Server v{} starting...", env!("CARGO_PKG_VERSION"));

    if let Err(e) = validate_env() {
        error!("Environment validation failed: {}", e);
        std::process::exit(1);
    }

    let mut config = match EngramConfig::load(options.config_path.as_deref()) {
        Ok(c) => c,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };
    if options.data_dir.is_some() {
        config.data_dir = options.data_dir;
    }

    #[cfg(not(feature = "embeddings"))]
    {
        error!("engram-mcp was built without the 'embeddings' feature; no embedding provider is available");
        std::process::exit(1);
    }

    #[cfg(feature = "embeddings")]
    {
        use engram_core::{EmbeddingCosineScorer, LocalEmbeddingProvider};

        // The local provider dictates the stored vector dimension
        config.embedding.dimensions = engram_core::LOCAL_EMBEDDING_DIMENSIONS;

        let storage = match Storage::new(&config) {
            Ok(s) => {
                info!("Storage initialized successfully");
                Arc::new(s)
            }
            Err(e) => {
                error!("Failed to initialize storage: {}", e);
                std::process::exit(1);
            }
        };

        // Warm the embedding model early so failures surface before the
        // first tool call (downloads on first run)
        if let Err(e) = LocalEmbeddingProvider::init() {
            warn!("Embedding model not ready yet: {}", e);
            warn!("Hint: check FASTEMBED_CACHE_PATH or network access for the first download");
        } else {
            info!("Embedding model ready ({})", engram_core::LOCAL_EMBEDDING_MODEL);
        }

        let provider = Arc::new(LocalEmbeddingProvider::new());
        let costs: Arc<dyn engram_core::CostRecorder> = storage.clone();
        let embedder = EmbeddingClient::new(
            provider.clone(),
            &config.embedding,
            config.retry,
            &config.timeouts,
            Some(costs.clone()),
        );

        let judges = DualJudgePipeline::new(
            Arc::new(LexicalOverlapScorer),
            Arc::new(EmbeddingCosineScorer::new(provider)),
            config.retry,
            &config.timeouts,
            Some(costs),
        );

        let dissonance = Arc::new(DissonanceEngine::new(config.dissonance.clone()));
        let retrieval = RetrievalEngine::new(Arc::clone(&storage), embedder.clone());

        // Periodic dissonance scan keeps the pending-review set fresh.
        // Configurable via ENGRAM_DISSONANCE_SCAN_INTERVAL_MINUTES.
        {
            let scan_storage = Arc::clone(&storage);
            let scan_engine = Arc::clone(&dissonance);
            tokio::spawn(async move {
                let interval_minutes: u64 = std::env::var("ENGRAM_DISSONANCE_SCAN_INTERVAL_MINUTES")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(30);

                // Small delay so we don't block the stdio handshake
                tokio::time::sleep(std::time::Duration::from_secs(2)).await;

                loop {
                    match scan_engine.scan(&scan_storage) {
                        Ok(created) if !created.is_empty() => {
                            info!(
                                new_reviews = created.len(),
                                "Dissonance scan found contradicting edges"
                            );
                        }
                        Ok(_) => {}
                        Err(e) => warn!("Dissonance scan failed: {}", e),
                    }
                    tokio::time::sleep(std::time::Duration::from_secs(interval_minutes * 60))
                        .await;
                }
            });
        }

        let ctx = ToolContext {
            storage,
            retrieval,
            judges,
            dissonance,
            embedder,
        };

        let server = McpServer::new(ctx);
        let transport = StdioTransport::new();

        info!("Starting MCP server on stdio...");

        if let Err(e) = transport.run(server).await {
            error!("Server error: {}", e);
            std::process::exit(1);
        }

        info!("Engram MCP Server shutting down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_env_placeholder_detection() {
        // One test owns the env mutation to avoid races between tests
        assert!(validate_env().is_ok());

        unsafe {
            std::env::set_var("ENGRAM_SCORER_API_KEY", "your-key-here");
        }
        let with_placeholder = validate_env();
        unsafe {
            std::env::set_var("ENGRAM_SCORER_API_KEY", "sk-real-looking-value");
        }
        let with_real = validate_env();
        unsafe {
            std::env::remove_var("ENGRAM_SCORER_API_KEY");
        }

        assert!(with_placeholder.is_err());
        assert!(with_real.is_ok());
    }
}
