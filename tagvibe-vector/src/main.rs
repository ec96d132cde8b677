use std::sync::Arc;

use clap::Parser;

use tagvibe_vector::config::{init_logging, EngineArgs};
use tagvibe_vector::encoder::TextEncoder;
use tagvibe_vector::server::EngineServer;
use tagvibe_vector::store::VectorStore;
use tagvibe_vector::transport::NdjsonTransport;

fn main() {
	let args = EngineArgs::parse();
	init_logging(&args.log_level);

	let index_config = match args.index_config() {
		Ok(c) => c,
		Err(e) => {
			tracing::error!("Invalid configuration: {}", e);
			std::process::exit(2);
		}
	};
	let encoder: Option<Arc<dyn TextEncoder>> = match args.encoder() {
		Some(e) => Some(Arc::new(e)),
		None => {
			tracing::warn!("no TEI URL configured; query phrases will be ignored");
			None
		}
	};

	let mut server = EngineServer::new(NdjsonTransport::new(), index_config, encoder);
	if let Some(dir) = &args.artifacts {
		match VectorStore::open(dir, &index_config) {
			Ok(store) => server = server.with_loaded_store(store),
			Err(e) => {
				tracing::error!(dir = %dir.display(), "Failed to load artifacts: {}", e);
				std::process::exit(1);
			}
		}
	}

	tracing::info!("tagvibe-engine ready");

	if let Err(e) = server.run() {
		tracing::error!("Server error: {}", e);
		std::process::exit(1);
	}
}
