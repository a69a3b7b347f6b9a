use clap::Parser;
use mixdex_vector_engine::config::CliArgs;
use mixdex_vector_engine::engine::RecommendationEngine;
use mixdex_vector_engine::server::{MixdexServer, ServerConfig};
use mixdex_vector_engine::transport::NdjsonTransport;

fn main() {
	let args = CliArgs::parse();

	// stdout carries the protocol, logs go to stderr
	tracing_subscriber::fmt()
		.with_writer(std::io::stderr)
		.with_env_filter(
			tracing_subscriber::EnvFilter::try_from_default_env()
				.unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&args.log_level)),
		)
		.init();

	let engine = match RecommendationEngine::new(args.engine_config()) {
		Ok(engine) => engine,
		Err(e) => {
			tracing::error!("Invalid configuration: {}", e);
			std::process::exit(2);
		}
	};

	let config = ServerConfig {
		autosave: args.autosave,
		load_on_start: !args.no_load,
	};
	let mut server = MixdexServer::new(NdjsonTransport::new(), engine, config);

	tracing::info!(
		folder = %args.storage_folder.display(),
		backend = ?args.index_backend,
		factors = args.factors,
		"mixdex-vector-engine ready"
	);

	if let Err(e) = server.run() {
		tracing::error!("Server error: {}", e);
		std::process::exit(1);
	}
}
