// ---------------------------------------------------------------------------
// RecommendationEngine — orchestration over the two entity stores
// ---------------------------------------------------------------------------
//
// A request names some artists (free text) and optionally a playlist id.
// The mentions are canonicalized and resolved against the artist catalog,
// folded into a playlist vector by the solver, and that vector is used to
// find similar playlists and, by inner product, new artists. Unknown playlist
// ids can be appended to the playlist store so later requests find them.
// ---------------------------------------------------------------------------

use std::collections::HashSet;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::canonical::canonicalize;
use crate::error::EngineError;
use crate::index::IndexFactory;
use crate::interactions::{bm25_weight, InteractionMatrix, SparseRow, BM25_B, BM25_K1};
use crate::matrix::FactorMatrix;
use crate::persistence::{PersistenceManager, SaveStatus, WorkerState};
use crate::solver::{AlsConfig, AlsSolver, Solver};
use crate::store::{EntityStore, StoreLayout};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct EngineConfig {
	pub storage_folder: PathBuf,
	/// Rank of every factor vector.
	pub factors: usize,
	pub index: IndexFactory,
	/// Extra capacity reserved whenever an index fills up.
	pub grow: usize,
	/// Implicit-feedback confidence assigned to each mentioned artist.
	pub mention_weight: f32,
	pub als: AlsConfig,
}

impl Default for EngineConfig {
	fn default() -> Self {
		Self {
			storage_folder: PathBuf::from("."),
			factors: 64,
			index: IndexFactory::default(),
			grow: 16,
			mention_weight: 444.0,
			als: AlsConfig::default(),
		}
	}
}

// ---------------------------------------------------------------------------
// Request / result types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct ProcessOptions {
	/// Append the playlist vector when the id is new.
	pub update: bool,
	/// Also rank artists for the playlist.
	pub recommend: bool,
	/// Results per list.
	pub n: usize,
	/// Artist names never to recommend.
	pub exclude: Vec<String>,
}

impl Default for ProcessOptions {
	fn default() -> Self {
		Self {
			update: true,
			recommend: true,
			n: 4,
			exclude: Vec::new(),
		}
	}
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Recommendations {
	/// `None` when artist recommendation was not requested.
	pub artists: Option<Vec<String>>,
	pub playlists: Vec<String>,
}

/// One track of a playlist; only its artists matter here.
#[derive(Debug, Clone, Deserialize)]
pub struct Track {
	#[serde(default)]
	pub artists: Vec<String>,
}

/// One cell of the training matrix: `count` plays of artist `artist` in
/// playlist `playlist`, both offsets into the lists handed to `fit`.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct Play {
	pub playlist: usize,
	pub artist: usize,
	pub count: f32,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineStats {
	pub factors: usize,
	pub artists: usize,
	pub playlists: usize,
	pub dirty_artists: usize,
	pub dirty_playlists: usize,
	pub artist_capacity: usize,
	pub playlist_capacity: usize,
	pub max_norm: f32,
	pub save_worker: WorkerState,
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

pub struct RecommendationEngine {
	config: EngineConfig,
	solver: Box<dyn Solver>,
	artists: EntityStore,
	playlists: EntityStore,
	persistence: PersistenceManager,
}

impl RecommendationEngine {
	/// Engine with an ALS solver configured from `config.als`.
	pub fn new(config: EngineConfig) -> Result<Self, EngineError> {
		let solver = AlsSolver::new(AlsConfig {
			factors: config.factors,
			..config.als
		})?;
		Self::with_solver(config, Box::new(solver))
	}

	pub fn with_solver(config: EngineConfig, solver: Box<dyn Solver>) -> Result<Self, EngineError> {
		if config.factors == 0 {
			return Err(EngineError::InvalidInput("factors must be positive".into()));
		}
		if solver.factors() != config.factors {
			return Err(EngineError::rank(config.factors, solver.factors()));
		}
		if !config.mention_weight.is_finite() || config.mention_weight <= 0.0 {
			return Err(EngineError::InvalidInput(format!(
				"mention weight must be positive, got {}",
				config.mention_weight
			)));
		}
		let artists = EntityStore::new(StoreLayout::ARTISTS, config.factors, config.index);
		let playlists = EntityStore::new(StoreLayout::PLAYLISTS, config.factors, config.index);
		let persistence = PersistenceManager::new(config.storage_folder.clone());
		Ok(Self {
			config,
			solver,
			artists,
			playlists,
			persistence,
		})
	}

	pub fn config(&self) -> &EngineConfig {
		&self.config
	}

	pub fn artists(&self) -> &EntityStore {
		&self.artists
	}

	pub fn playlists(&self) -> &EntityStore {
		&self.playlists
	}

	// ── Recommendation ────────────────────────────────────────────────────

	/// Recommend for a set of artist mentions. `Ok(None)` means none of the
	/// mentions is a known artist.
	pub fn process(
		&mut self,
		mentions: &[String],
		playlist_id: Option<&str>,
		options: &ProcessOptions,
	) -> Result<Option<Recommendations>, EngineError> {
		if options.n == 0 {
			return Err(EngineError::InvalidInput("n must be positive".into()));
		}
		tracing::debug!(id = ?playlist_id, mentions = mentions.len(), "Processing artists");

		let mentioned: Vec<usize> = mentions
			.iter()
			.filter_map(|name| self.artists.offset_of(&canonicalize(name)))
			.collect();
		if mentioned.is_empty() {
			tracing::warn!(artists = ?mentions, "No known artists");
			return Ok(None);
		}

		let row = SparseRow::constant(mentioned.iter().copied(), self.config.mention_weight);
		let vector = self
			.solver
			.recalculate_user(&row, self.artists.matrix(), self.artists.gram())?;

		let id = playlist_id
			.map(str::to_lowercase)
			.filter(|id| !id.is_empty());
		let known = id.as_deref().is_some_and(|id| self.playlists.contains(id));

		let similar = match self.playlists.similar(&vector, options.n + usize::from(known)) {
			Ok(hits) => hits,
			Err(e) => {
				tracing::error!("Error during similar playlist query: {}", e);
				Vec::new()
			}
		};

		let artists = if options.recommend {
			let mut exclude: HashSet<usize> = row.indices().iter().copied().collect();
			exclude.extend(
				options
					.exclude
					.iter()
					.filter_map(|name| self.artists.offset_of(&canonicalize(name))),
			);
			let hits = self.artists.recommend(&vector, options.n, &exclude)?;
			Some(
				hits.into_iter()
					.filter_map(|(offset, _)| self.artists.id_at(offset).map(str::to_string))
					.collect(),
			)
		} else {
			None
		};

		let playlists: Vec<String> = similar
			.into_iter()
			.filter_map(|(offset, _)| self.playlists.id_at(offset))
			.filter(|other| Some(*other) != id.as_deref())
			.take(options.n)
			.map(str::to_string)
			.collect();

		if options.update && !known {
			if let Some(id) = id {
				self.add_playlist(vector, &id)?;
			}
		}

		Ok(Some(Recommendations { artists, playlists }))
	}

	/// `process` over every artist of every track.
	pub fn process_playlist(
		&mut self,
		tracks: &[Track],
		playlist_id: Option<&str>,
		options: &ProcessOptions,
	) -> Result<Option<Recommendations>, EngineError> {
		tracing::debug!(id = ?playlist_id, tracks = tracks.len(), "Processing playlist");
		let mentions: Vec<String> = tracks
			.iter()
			.flat_map(|track| track.artists.iter().cloned())
			.collect();
		self.process(&mentions, playlist_id, options)
	}

	// ── Catalog changes ───────────────────────────────────────────────────

	/// Append one playlist vector. Returns its row offset.
	pub fn add_playlist(&mut self, vector: Vec<f32>, id: &str) -> Result<usize, EngineError> {
		let id = id.to_lowercase();
		if id.is_empty() {
			return Err(EngineError::InvalidInput("playlist id must not be empty".into()));
		}
		let count = self
			.playlists
			.add(FactorMatrix::from_row(vector), vec![id.clone()], self.config.grow)?;
		tracing::debug!(id = %id, offset = count - 1, "Playlist stored");
		Ok(count - 1)
	}

	/// Append artists with precomputed factors. Returns the artist count.
	pub fn add_artists(&mut self, factors: &[Vec<f32>], names: &[String]) -> Result<usize, EngineError> {
		let matrix = FactorMatrix::from_rows(self.config.factors, factors)?;
		let names: Vec<String> = names.iter().map(|n| canonicalize(n)).collect();
		let count = self.artists.add(matrix, names, self.config.grow)?;
		tracing::info!(added = factors.len(), total = count, "Artists added");
		Ok(count)
	}

	/// Drop every playlist. Artists are kept.
	pub fn reset(&mut self) -> Result<(), EngineError> {
		self.playlists.reset()
	}

	/// Train both stores from scratch. `plays` index into `playlist_ids` and
	/// `artist_names`.
	pub fn fit(
		&mut self,
		plays: &[Play],
		playlist_ids: &[String],
		artist_names: &[String],
	) -> Result<(), EngineError> {
		let artist_names: Vec<String> = artist_names.iter().map(|n| canonicalize(n)).collect();
		let playlist_ids: Vec<String> = playlist_ids.iter().map(|id| id.to_lowercase()).collect();
		check_unique(&artist_names)?;
		check_unique(&playlist_ids)?;

		let item_users = InteractionMatrix::from_triplets(
			artist_names.len(),
			playlist_ids.len(),
			plays.iter().map(|p| (p.artist, p.playlist, p.count)),
		)?;
		let user_items = bm25_weight(&item_users, BM25_K1, BM25_B).transpose();
		let factors = self.solver.fit(&user_items)?;

		if factors.items.rows() != artist_names.len() || factors.users.rows() != playlist_ids.len() {
			return Err(EngineError::Solver(format!(
				"solver returned {} item and {} user rows for {} artists and {} playlists",
				factors.items.rows(),
				factors.users.rows(),
				artist_names.len(),
				playlist_ids.len()
			)));
		}

		self.artists.set_vectors(factors.items, artist_names)?;
		self.playlists.set_vectors(factors.users, playlist_ids)?;
		tracing::info!(
			artists = self.artists.len(),
			playlists = self.playlists.len(),
			plays = plays.len(),
			"Model fitted"
		);
		Ok(())
	}

	// ── Persistence ───────────────────────────────────────────────────────

	pub fn load(&mut self) -> Result<(), EngineError> {
		tracing::info!(folder = %self.persistence.folder().display(), "Loading model");
		self.persistence
			.load(&mut [&mut self.artists, &mut self.playlists])
	}

	pub fn save(&mut self) -> Result<Vec<&'static str>, EngineError> {
		self.persistence
			.save(&mut [&mut self.artists, &mut self.playlists])
	}

	pub fn save_async(&mut self) -> Result<SaveStatus, EngineError> {
		self.persistence
			.save_async(&mut [&mut self.artists, &mut self.playlists])
	}

	/// Wait for a background save, then write whatever is still dirty.
	pub fn shutdown(&mut self) -> Result<Vec<&'static str>, EngineError> {
		let saved = self
			.persistence
			.shutdown(&mut [&mut self.artists, &mut self.playlists])?;
		tracing::info!(stores = ?saved, "Engine shut down");
		Ok(saved)
	}

	pub fn stats(&mut self) -> EngineStats {
		EngineStats {
			factors: self.config.factors,
			artists: self.artists.len(),
			playlists: self.playlists.len(),
			dirty_artists: self.artists.dirty_count(),
			dirty_playlists: self.playlists.dirty_count(),
			artist_capacity: self.artists.capacity(),
			playlist_capacity: self.playlists.capacity(),
			max_norm: self.artists.max_norm(),
			save_worker: self.persistence.state(),
		}
	}
}

fn check_unique(ids: &[String]) -> Result<(), EngineError> {
	let mut seen = HashSet::with_capacity(ids.len());
	for id in ids {
		if !seen.insert(id.as_str()) {
			return Err(EngineError::DuplicateId(id.clone()));
		}
	}
	Ok(())
}
