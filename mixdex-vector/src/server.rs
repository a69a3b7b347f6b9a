// ---------------------------------------------------------------------------
// MixdexServer — JSON-RPC dispatcher
// ---------------------------------------------------------------------------
//
// Routes incoming JSON-RPC 2.0 requests (NDJSON over stdin) to
// RecommendationEngine operations: a `run()` loop, a `dispatch()` match and
// free-standing handler functions per method. Requests are handled one at a
// time; the only concurrency is the engine's background save worker.
//
// On stdin EOF or `engine/shutdown` the engine waits for any background save
// and writes whatever is still dirty before the loop returns.
// ---------------------------------------------------------------------------

use std::io::{self, BufRead};

use crate::engine::RecommendationEngine;
use crate::error::EngineError;
use crate::protocol::*;
use crate::transport::NdjsonTransport;

#[derive(Debug, Clone, Copy, Default)]
pub struct ServerConfig {
	/// Start a background save after every mutating request.
	pub autosave: bool,
	/// Load the storage folder before serving.
	pub load_on_start: bool,
}

/// JSON-RPC server owning one [`RecommendationEngine`].
pub struct MixdexServer {
	transport: NdjsonTransport,
	engine: RecommendationEngine,
	config: ServerConfig,
	shut_down: bool,
}

impl MixdexServer {
	pub fn new(transport: NdjsonTransport, engine: RecommendationEngine, config: ServerConfig) -> Self {
		Self {
			transport,
			engine,
			config,
			shut_down: false,
		}
	}

	/// Serve stdin until EOF or `engine/shutdown`.
	pub fn run(&mut self) -> Result<(), EngineError> {
		let stdin = io::stdin();
		self.run_with(stdin.lock())
	}

	pub fn run_with(&mut self, reader: impl BufRead) -> Result<(), EngineError> {
		if self.config.load_on_start {
			self.engine.load()?;
		}

		for line_result in reader.lines() {
			let line = line_result?;
			if line.trim().is_empty() {
				continue;
			}

			let request: JsonRpcRequest = match serde_json::from_str(&line) {
				Ok(r) => r,
				Err(e) => {
					tracing::error!("Failed to parse request: {}", e);
					continue;
				}
			};

			self.dispatch(request);
			if self.shut_down {
				return Ok(());
			}
		}

		tracing::info!("stdin closed, shutting down");
		self.engine.shutdown()?;
		self.shut_down = true;
		Ok(())
	}

	// ── Dispatch ──────────────────────────────────────────────────────────

	fn dispatch(&mut self, req: JsonRpcRequest) {
		let id = req.id;
		let engine = &mut self.engine;
		let (result, mutated) = match req.method.as_str() {
			// -- Lifecycle -----------------------------------------------
			"engine/load" => (
				engine.load().map(|_| stats(engine)),
				false,
			),
			"engine/save" => (
				engine
					.save()
					.map(|saved| serde_json::json!({ "saved": saved })),
				false,
			),
			"engine/saveAsync" => (
				engine
					.save_async()
					.map(|status| serde_json::json!({ "status": status })),
				false,
			),
			"engine/stats" => (Ok(stats(engine)), false),
			"engine/shutdown" => {
				let result = engine.shutdown().map(|_| serde_json::json!({}));
				self.shut_down = result.is_ok();
				(result, false)
			}

			// -- Recommendation ------------------------------------------
			"engine/process" => (handle_process(engine, req.params), true),
			"engine/processPlaylist" => (handle_process_playlist(engine, req.params), true),

			// -- Catalog -------------------------------------------------
			"engine/fit" => (handle_fit(engine, req.params), true),
			"engine/addArtists" => (handle_add_artists(engine, req.params), true),
			"engine/addPlaylist" => (handle_add_playlist(engine, req.params), true),
			"engine/reset" => (engine.reset().map(|_| stats(engine)), true),

			// -- Unknown -------------------------------------------------
			_ => {
				self.transport.write_error(
					id,
					METHOD_NOT_FOUND,
					format!("Unknown method: {}", req.method),
					None,
				);
				return;
			}
		};

		if mutated && result.is_ok() && self.config.autosave {
			match self.engine.save_async() {
				Ok(status) => tracing::debug!(?status, "Autosave"),
				Err(e) => tracing::error!("Autosave failed: {}", e),
			}
		}

		match result {
			Ok(value) => self.transport.write_response(id, value),
			Err(e) => {
				if e.is_client_error() {
					tracing::debug!(id, "Rejected request: {}", e);
				} else {
					tracing::error!(id, "Request failed: {}", e);
				}
				self.transport.write_error(
					id,
					error_code(&e),
					e.to_string(),
					Some(e.to_json_rpc_error()),
				)
			}
		}
	}
}

fn error_code(e: &EngineError) -> i32 {
	match e {
		EngineError::InvalidInput(_) => INVALID_PARAMS,
		EngineError::Invariant(_) => INTERNAL_ERROR,
		_ => ENGINE_ERROR,
	}
}

fn stats(engine: &mut RecommendationEngine) -> serde_json::Value {
	serde_json::to_value(engine.stats()).unwrap_or(serde_json::Value::Null)
}

// ---------------------------------------------------------------------------
// Free-standing handler functions
// ---------------------------------------------------------------------------

fn parse_params<T: serde::de::DeserializeOwned>(params: serde_json::Value) -> Result<T, EngineError> {
	serde_json::from_value(params).map_err(|e| EngineError::InvalidInput(format!("Invalid params: {}", e)))
}

fn recommendations_json(
	result: Option<crate::engine::Recommendations>,
) -> Result<serde_json::Value, EngineError> {
	match result {
		Some(r) => Ok(serde_json::to_value(r)?),
		None => Ok(serde_json::json!({ "unknown": true })),
	}
}

fn handle_process(
	engine: &mut RecommendationEngine,
	params: serde_json::Value,
) -> Result<serde_json::Value, EngineError> {
	let p: ProcessParams = parse_params(params)?;
	let result = engine.process(&p.artists, p.flags.id.as_deref(), &p.flags.options())?;
	recommendations_json(result)
}

fn handle_process_playlist(
	engine: &mut RecommendationEngine,
	params: serde_json::Value,
) -> Result<serde_json::Value, EngineError> {
	let p: ProcessPlaylistParams = parse_params(params)?;
	let result = engine.process_playlist(&p.tracks, p.flags.id.as_deref(), &p.flags.options())?;
	recommendations_json(result)
}

fn handle_fit(
	engine: &mut RecommendationEngine,
	params: serde_json::Value,
) -> Result<serde_json::Value, EngineError> {
	let p: FitParams = parse_params(params)?;
	engine.fit(&p.plays, &p.playlist_ids, &p.artists)?;
	Ok(stats(engine))
}

fn handle_add_artists(
	engine: &mut RecommendationEngine,
	params: serde_json::Value,
) -> Result<serde_json::Value, EngineError> {
	let p: AddArtistsParams = parse_params(params)?;
	let count = engine.add_artists(&p.factors, &p.names)?;
	Ok(serde_json::json!({ "count": count }))
}

fn handle_add_playlist(
	engine: &mut RecommendationEngine,
	params: serde_json::Value,
) -> Result<serde_json::Value, EngineError> {
	let p: AddPlaylistParams = parse_params(params)?;
	let offset = engine.add_playlist(p.vector, &p.id)?;
	Ok(serde_json::json!({ "offset": offset }))
}
