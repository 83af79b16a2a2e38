//! Runtime configuration for expert-swap.
//!
//! Configuration can be loaded from a JSON file or constructed programmatically.
//! All swapper knobs (capacity, storage root, worker count, history sizes)
//! live here.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};

/// Command-line arguments.
#[derive(Parser, Debug, Clone)]
#[command(name = "expert-swap", about = "LRU expert swapper with async disk write-back")]
pub struct Cli {
    /// Path to configuration file (JSON).
    #[arg(short, long, default_value = "config.json")]
    pub config: PathBuf,

    /// Enable verbose logging.
    #[arg(short, long)]
    pub verbose: bool,

    /// Emit logs as JSON lines.
    #[arg(long)]
    pub json_logs: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Run the synthetic expert workload once and print a report.
    Run {
        /// Override the number of rounds from the config file.
        #[arg(long)]
        rounds: Option<usize>,
    },
    /// Run the workload in the background and serve stats over HTTP.
    Serve {
        /// HTTP listen address (overrides the config file).
        #[arg(long)]
        listen: Option<String>,
    },
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Swapper configuration.
    pub swap: SwapConfig,

    /// HTTP stats server configuration.
    pub server: ServerConfig,

    /// Synthetic workload configuration.
    pub workload: WorkloadConfig,
}

/// Swapper settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SwapConfig {
    /// Directory holding one record file per expert. Created if absent.
    pub storage_dir: PathBuf,

    /// Maximum number of experts resident in RAM (LRU capacity).
    pub max_memory_experts: usize,

    /// Number of upcoming experts a prefetcher may load ahead.
    /// Accepted and exposed, but no prefetch policy consumes it yet.
    pub prefetch_window: usize,

    /// Blocking I/O worker threads in the default worker pool.
    pub io_workers: usize,

    /// Capacity of the access history ring.
    pub access_history: usize,

    /// Capacity of the background failure ring.
    pub failure_history: usize,

    /// Grace period for in-flight I/O when the worker pool shuts down.
    pub shutdown_grace_ms: u64,

    /// Record compression on disk.
    pub compression: CompressionConfig,
}

impl Default for SwapConfig {
    fn default() -> Self {
        Self {
            storage_dir: PathBuf::from("/tmp/expert-swap"),
            max_memory_experts: 8,
            prefetch_window: 2,
            io_workers: 1,
            access_history: 100,
            failure_history: 16,
            shutdown_grace_ms: 5000,
            compression: CompressionConfig::default(),
        }
    }
}

impl SwapConfig {
    /// Default settings rooted at `storage_dir`.
    pub fn with_storage_dir(storage_dir: impl Into<PathBuf>) -> Self {
        Self {
            storage_dir: storage_dir.into(),
            ..Default::default()
        }
    }
}

/// Compression settings for record files.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CompressionConfig {
    /// Apply zstd compression to the payload body.
    pub zstd_compression: bool,

    /// zstd compression level (1-22).
    pub zstd_level: i32,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            zstd_compression: false,
            zstd_level: 3,
        }
    }
}

/// HTTP server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Listen address (e.g. "0.0.0.0:8080").
    pub listen: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: "0.0.0.0:8080".to_string(),
        }
    }
}

/// Synthetic workload settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkloadConfig {
    /// Number of experts to register.
    pub experts: usize,

    /// FP16 elements per weight payload.
    pub expert_elements: usize,

    /// Number of routing rounds ("tokens") to simulate.
    pub rounds: usize,

    /// Experts activated per round.
    pub experts_per_token: usize,

    /// Prefetch the next round's experts in background mode.
    pub prefetch_next: bool,

    /// RNG seed for the routing pattern.
    pub seed: u64,
}

impl Default for WorkloadConfig {
    fn default() -> Self {
        Self {
            experts: 64,
            expert_elements: 64 * 1024,
            rounds: 200,
            experts_per_token: 2,
            prefetch_next: true,
            seed: 42,
        }
    }
}

impl WorkloadConfig {
    /// Payload bytes of one synthetic expert (three FP16 payloads).
    pub fn expert_bytes(&self) -> usize {
        self.expert_elements * 2 * 3
    }
}

impl Config {
    /// Load configuration from a JSON file, falling back to defaults for missing fields.
    pub fn load(path: &std::path::Path) -> anyhow::Result<Self> {
        if path.exists() {
            let data = std::fs::read_to_string(path)?;
            let config: Config = serde_json::from_str(&data)?;
            Ok(config)
        } else {
            tracing::warn!("Config file not found at {:?}, using defaults", path);
            Ok(Config::default())
        }
    }
}
