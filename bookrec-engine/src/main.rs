use std::sync::Arc;

use anyhow::Result;
use bookrec_engine::algorithms::{FACTORIZATION_ID, PAIRWISE_ID, SEQUENTIAL_ID};
use bookrec_engine::config::{CliArgs, EngineConfig};
use bookrec_engine::data::{load_dataset, DataPaths};
use bookrec_engine::engine::RecommendationEngine;
use bookrec_engine::server::{RecommendServer, ServerConfig};
use bookrec_engine::transport::NdjsonTransport;
use clap::Parser;

fn main() -> Result<()> {
    let args = CliArgs::parse();

    // Logging goes to stderr; stdout carries the JSON-RPC stream
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&args.log_level)),
        )
        .init();

    let device = match args.device.as_str() {
        #[cfg(feature = "cuda")]
        "cuda" => candle_core::Device::new_cuda(args.device_id)?,
        #[cfg(feature = "metal")]
        "metal" => candle_core::Device::new_metal(args.device_id)?,
        "cpu" => candle_core::Device::Cpu,
        other => {
            tracing::warn!("Unknown device '{}', falling back to CPU", other);
            candle_core::Device::Cpu
        }
    };
    tracing::info!(device = ?device, "Compute device selected");

    let mut config = match &args.tuning {
        Some(path) => {
            tracing::info!(path = %path.display(), "Loading tuning file");
            EngineConfig::from_file(path)?
        }
        None => EngineConfig::default(),
    };
    if !args.algorithms.is_empty() {
        config.algorithms = args.algorithms.clone();
    }
    for id in [PAIRWISE_ID, SEQUENTIAL_ID, FACTORIZATION_ID] {
        if !config.is_enabled(id) {
            tracing::info!(algorithm = id, "Algorithm disabled");
        }
    }

    let paths = DataPaths {
        books: args.books.clone(),
        ratings: args.ratings.clone(),
        users: args.users.clone(),
    };
    let (catalog, data) = load_dataset(&paths)?;

    let engine = RecommendationEngine::initialize(Arc::new(catalog), &data, &config, &device);
    if engine.is_empty() {
        tracing::warn!("No algorithm initialized; every recommendation will fail");
    }

    let server = RecommendServer::new(
        ServerConfig {
            server_name: args.server_name,
            server_version: args.server_version,
        },
        Arc::new(engine),
        NdjsonTransport::new(),
    );

    tracing::info!("bookrec-engine server ready");
    server.run()
}
