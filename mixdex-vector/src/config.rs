use std::path::PathBuf;

use clap::Parser;

use crate::engine::EngineConfig;
use crate::index::{IndexBackend, IndexFactory, IndexParams};
use crate::solver::AlsConfig;

#[derive(Parser, Debug, Clone)]
#[command(
	name = "mixdex-vector-engine",
	about = "Playlist and artist recommendation engine over JSON-RPC 2.0 / NDJSON stdio"
)]
pub struct CliArgs {
	/// Folder holding the index files and id lists
	#[arg(long, default_value = ".", env = "STORAGE_FOLDER")]
	pub storage_folder: PathBuf,

	/// Rank of artist and playlist factor vectors
	#[arg(long, default_value = "64", env = "MIXDEX_FACTORS")]
	pub factors: usize,

	/// ANN backend: "hnsw" or "exact"
	#[arg(long, value_enum, default_value = "hnsw", env = "MIXDEX_INDEX_BACKEND")]
	pub index_backend: IndexBackend,

	/// HNSW links per node
	#[arg(long, default_value = "16", env = "MIXDEX_HNSW_M")]
	pub hnsw_m: usize,

	/// HNSW candidate list size while building
	#[arg(long, default_value = "400", env = "MIXDEX_HNSW_EF_CONSTRUCTION")]
	pub ef_construction: usize,

	/// HNSW candidate list size while searching
	#[arg(long, default_value = "90", env = "MIXDEX_HNSW_EF_SEARCH")]
	pub ef_search: usize,

	/// Extra index capacity reserved whenever an index fills up
	#[arg(long, default_value = "16", env = "MIXDEX_GROW")]
	pub grow: usize,

	/// Implicit-feedback confidence per mentioned artist
	#[arg(long, default_value = "444.0", env = "MIXDEX_MENTION_WEIGHT")]
	pub mention_weight: f32,

	/// ALS sweeps per fit
	#[arg(long, default_value = "15", env = "MIXDEX_ALS_ITERATIONS")]
	pub als_iterations: usize,

	/// ALS L2 regularization
	#[arg(long, default_value = "0.01", env = "MIXDEX_ALS_REGULARIZATION")]
	pub als_regularization: f64,

	/// Seed for the initial ALS factors
	#[arg(long, default_value = "42", env = "MIXDEX_ALS_SEED")]
	pub als_seed: u64,

	/// Start a background save after every request that changes a store
	#[arg(long, env = "MIXDEX_AUTOSAVE")]
	pub autosave: bool,

	/// Start with empty stores instead of loading the storage folder
	#[arg(long)]
	pub no_load: bool,

	/// Log level (trace, debug, info, warn, error)
	#[arg(long, default_value = "info", env = "MIXDEX_LOG_LEVEL")]
	pub log_level: String,
}

impl CliArgs {
	pub fn engine_config(&self) -> EngineConfig {
		EngineConfig {
			storage_folder: self.storage_folder.clone(),
			factors: self.factors,
			index: IndexFactory::new(
				self.index_backend,
				IndexParams {
					m: self.hnsw_m,
					ef_construction: self.ef_construction,
					ef_search: self.ef_search,
				},
			),
			grow: self.grow,
			mention_weight: self.mention_weight,
			als: AlsConfig {
				factors: self.factors,
				iterations: self.als_iterations,
				regularization: self.als_regularization,
				seed: self.als_seed,
			},
		}
	}
}
