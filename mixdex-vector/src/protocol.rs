use serde::Deserialize;

use crate::engine::{Play, ProcessOptions, Track};

// ── JSON-RPC 2.0 error codes ────────────────────────────────────────────────

pub const INTERNAL_ERROR: i32 = -32603;
pub const METHOD_NOT_FOUND: i32 = -32601;
pub const INVALID_PARAMS: i32 = -32602;
pub const ENGINE_ERROR: i32 = -32000;

// ── Incoming request ────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct JsonRpcRequest {
	pub id: u64,
	pub method: String,
	#[serde(default)]
	pub params: serde_json::Value,
}

// ── Params ──────────────────────────────────────────────────────────────────

/// Options shared by `engine/process` and `engine/processPlaylist`.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessFlags {
	pub id: Option<String>,
	pub update: Option<bool>,
	pub recommend: Option<bool>,
	pub n: Option<usize>,
	pub exclude: Option<Vec<String>>,
}

impl ProcessFlags {
	pub fn options(&self) -> ProcessOptions {
		let defaults = ProcessOptions::default();
		ProcessOptions {
			update: self.update.unwrap_or(defaults.update),
			recommend: self.recommend.unwrap_or(defaults.recommend),
			n: self.n.unwrap_or(defaults.n),
			exclude: self.exclude.clone().unwrap_or_default(),
		}
	}
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessParams {
	pub artists: Vec<String>,
	#[serde(flatten)]
	pub flags: ProcessFlags,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessPlaylistParams {
	pub tracks: Vec<Track>,
	#[serde(flatten)]
	pub flags: ProcessFlags,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FitParams {
	pub plays: Vec<Play>,
	pub playlist_ids: Vec<String>,
	pub artists: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddArtistsParams {
	pub names: Vec<String>,
	pub factors: Vec<Vec<f32>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddPlaylistParams {
	pub id: String,
	pub vector: Vec<f32>,
}
