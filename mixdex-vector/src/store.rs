// ---------------------------------------------------------------------------
// EntityStore — factor matrix + id table + ANN indexes for one entity type
// ---------------------------------------------------------------------------
//
// Row `i` of the matrix, `ids[i]` and handle `i` of every bound index always
// describe the same entity. Every mutation validates its input before
// touching any state and finishes with `check_invariants()`.
//
// The artist store additionally keeps a MIPS-augmented "recommend" index
// (rank + 1 dimensions) used to rank artists by inner product with a
// playlist vector.
// ---------------------------------------------------------------------------

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use crate::cosine::norm;
use crate::error::EngineError;
use crate::index::{IndexFactory, IndexSnapshot, VectorIndex};
use crate::matrix::FactorMatrix;
use crate::mips;
use crate::persistence::{read_ids, StoreSnapshot};

// ---------------------------------------------------------------------------
// Layout
// ---------------------------------------------------------------------------

/// File names one store persists to. Index files carry their dimension as a
/// suffix, e.g. `similar_items_index.bin64`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreLayout {
	pub name: &'static str,
	pub similar_file: &'static str,
	pub recommend_file: Option<&'static str>,
	pub ids_file: &'static str,
}

impl StoreLayout {
	pub const ARTISTS: StoreLayout = StoreLayout {
		name: "artists",
		similar_file: "similar_items_index",
		recommend_file: Some("recommend_index"),
		ids_file: "artists.json",
	};

	pub const PLAYLISTS: StoreLayout = StoreLayout {
		name: "playlists",
		similar_file: "similar_users_index",
		recommend_file: None,
		ids_file: "playlists.json",
	};

	pub fn similar_path(&self, folder: &Path, rank: usize) -> PathBuf {
		folder.join(format!("{}.bin{}", self.similar_file, rank))
	}

	pub fn recommend_path(&self, folder: &Path, rank: usize) -> Option<PathBuf> {
		self.recommend_file
			.map(|file| folder.join(format!("{}.bin{}", file, rank + 1)))
	}

	pub fn ids_path(&self, folder: &Path) -> PathBuf {
		folder.join(self.ids_file)
	}
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

pub struct EntityStore {
	layout: StoreLayout,
	rank: usize,
	factory: IndexFactory,
	matrix: FactorMatrix,
	ids: Vec<String>,
	id_map: HashMap<String, usize>,
	similar: Option<Box<dyn VectorIndex>>,
	recommend: Option<Box<dyn VectorIndex>>,
	max_norm: f32,
	/// `matrix.gram()`, reset whenever the matrix changes.
	gram: OnceLock<Vec<f64>>,
	dirty: usize,
}

impl EntityStore {
	pub fn new(layout: StoreLayout, rank: usize, factory: IndexFactory) -> Self {
		Self {
			layout,
			rank,
			factory,
			matrix: FactorMatrix::empty(rank),
			ids: Vec::new(),
			id_map: HashMap::new(),
			similar: None,
			recommend: None,
			max_norm: 0.0,
			gram: OnceLock::new(),
			dirty: 0,
		}
	}

	// ── Mutation ──────────────────────────────────────────────────────────

	/// Replace every row and id, rebuilding the indexes from scratch.
	pub fn set_vectors(&mut self, matrix: FactorMatrix, ids: Vec<String>) -> Result<(), EngineError> {
		self.check_batch(&matrix, &ids, false)?;

		let zero_rows = matrix.iter_rows().filter(|row| norm(row) == 0.0).count();
		if zero_rows > 0 {
			tracing::warn!(
				store = self.layout.name,
				zero_rows,
				"Zero-norm factors in cosine index, they rank last"
			);
		}

		let similar = self.factory.build(self.rank, matrix.as_slice())?;
		let (recommend, max_norm) = match self.layout.recommend_file {
			Some(_) => {
				let (max_norm, augmented) = mips::augment(&matrix);
				let index = self.factory.build(self.rank + 1, augmented.as_slice())?;
				(Some(index), max_norm)
			}
			None => (None, 0.0),
		};

		let rows = matrix.rows();
		self.id_map = index_ids(&ids);
		self.ids = ids;
		self.matrix = matrix;
		self.similar = Some(similar);
		self.recommend = recommend;
		self.max_norm = max_norm;
		self.gram = OnceLock::new();
		self.dirty += rows.max(1);

		tracing::info!(store = self.layout.name, rows, max_norm, "Replaced store vectors");
		self.check_invariants()
	}

	/// Append rows. Once an index is full it grows to the new row count plus
	/// `grow_hint`.
	/// Returns the new row count.
	pub fn add(
		&mut self,
		vectors: FactorMatrix,
		ids: Vec<String>,
		grow_hint: usize,
	) -> Result<usize, EngineError> {
		self.check_batch(&vectors, &ids, true)?;
		if vectors.is_empty() {
			return Ok(self.len());
		}
		let count = self.len();
		let new_rows = vectors.rows();

		match self.similar.as_mut() {
			Some(index) => {
				grow(index.as_mut(), count, new_rows, grow_hint);
				index.insert(vectors.as_slice())?;
			}
			None => self.similar = Some(self.factory.build(self.rank, vectors.as_slice())?),
		}

		if self.layout.recommend_file.is_some() {
			let (max_norm, augmented) = mips::augment_rows(&vectors, self.max_norm);
			match self.recommend.as_mut() {
				Some(index) => {
					grow(index.as_mut(), count, new_rows, grow_hint);
					index.insert(augmented.as_slice())?;
				}
				None => {
					self.recommend = Some(self.factory.build(self.rank + 1, augmented.as_slice())?)
				}
			}
			if max_norm > self.max_norm {
				tracing::debug!(
					store = self.layout.name,
					old = self.max_norm,
					new = max_norm,
					"max_norm grew; existing augmented rows are not recomputed"
				);
			}
			self.max_norm = max_norm;
		}

		for (offset, id) in ids.iter().enumerate() {
			self.id_map.insert(id.clone(), count + offset);
		}
		self.ids.extend(ids);
		self.matrix.append(&vectors)?;
		self.gram = OnceLock::new();
		self.dirty += new_rows;

		tracing::debug!(store = self.layout.name, added = new_rows, total = self.len(), "Appended rows");
		self.check_invariants()?;
		Ok(self.len())
	}

	/// Drop every row and id.
	pub fn reset(&mut self) -> Result<(), EngineError> {
		self.matrix = FactorMatrix::empty(self.rank);
		self.ids.clear();
		self.id_map.clear();
		self.similar = Some(self.factory.create(self.rank, 0));
		self.recommend = self
			.layout
			.recommend_file
			.map(|_| self.factory.create(self.rank + 1, 0));
		self.max_norm = 0.0;
		self.gram = OnceLock::new();
		self.dirty += 1;
		tracing::info!(store = self.layout.name, "Store reset");
		self.check_invariants()
	}

	// ── Queries ───────────────────────────────────────────────────────────

	/// Up to `n` most similar rows as `(offset, similarity)`, descending.
	pub fn similar(&self, vector: &[f32], n: usize) -> Result<Vec<(usize, f32)>, EngineError> {
		self.check_query(vector)?;
		let index = match &self.similar {
			Some(index) if !self.is_empty() => index,
			_ => return Ok(Vec::new()),
		};
		let hits = index.query(vector, n)?;
		Ok(hits
			.into_iter()
			.map(|hit| (hit.handle, 1.0 - hit.distance))
			.collect())
	}

	/// Up to `n` rows with the largest inner product with `vector`, skipping
	/// `exclude`, as `(offset, score)` descending.
	pub fn recommend(
		&self,
		vector: &[f32],
		n: usize,
		exclude: &HashSet<usize>,
	) -> Result<Vec<(usize, f32)>, EngineError> {
		self.check_query(vector)?;
		let index = match &self.recommend {
			Some(index) if !self.is_empty() => index,
			_ => return Ok(Vec::new()),
		};
		let candidates = mips::query_inner_product(
			index.as_ref(),
			self.max_norm,
			vector,
			n + exclude.len(),
		)?;
		Ok(candidates
			.into_iter()
			.filter(|(offset, _)| !exclude.contains(offset))
			.take(n)
			.collect())
	}

	// ── Invariants ────────────────────────────────────────────────────────

	pub fn check_invariants(&self) -> Result<(), EngineError> {
		let rows = self.matrix.rows();
		if self.matrix.rank() != self.rank {
			return Err(EngineError::Invariant(format!(
				"{}: matrix rank {} != {}",
				self.layout.name,
				self.matrix.rank(),
				self.rank
			)));
		}
		if self.ids.len() != rows || self.id_map.len() != rows {
			return Err(EngineError::Invariant(format!(
				"{}: {} rows, {} ids, {} distinct ids",
				self.layout.name,
				rows,
				self.ids.len(),
				self.id_map.len()
			)));
		}
		let bound = [
			("similar", self.similar.as_ref(), self.rank),
			("recommend", self.recommend.as_ref(), self.rank + 1),
		];
		for (label, index, dim) in bound {
			match index {
				Some(index) => {
					if index.current_count() != rows || index.dim() != dim {
						return Err(EngineError::Invariant(format!(
							"{}: {} index holds {} rows of dim {}, matrix has {} rows of dim {}",
							self.layout.name,
							label,
							index.current_count(),
							index.dim(),
							rows,
							dim
						)));
					}
				}
				None if rows > 0 && (label == "similar" || self.layout.recommend_file.is_some()) => {
					return Err(EngineError::Invariant(format!(
						"{}: {} rows but no {} index",
						self.layout.name, rows, label
					)));
				}
				None => {}
			}
		}
		Ok(())
	}

	// ── Persistence ───────────────────────────────────────────────────────

	/// Point-in-time copy of everything this store persists.
	pub fn snapshot(&self) -> StoreSnapshot {
		let empty = |dim: usize| IndexSnapshot {
			dim,
			max_elements: 0,
			data: Vec::new(),
		};
		StoreSnapshot {
			layout: self.layout,
			rank: self.rank,
			similar: self
				.similar
				.as_ref()
				.map(|index| index.snapshot())
				.unwrap_or_else(|| empty(self.rank)),
			recommend: self.layout.recommend_file.map(|_| {
				self.recommend
					.as_ref()
					.map(|index| index.snapshot())
					.unwrap_or_else(|| empty(self.rank + 1))
			}),
			ids: self.ids.clone(),
		}
	}

	/// Replace this store's state with what `folder` holds. Missing files
	/// load as an empty store. On error the store is left untouched.
	pub fn load(&mut self, folder: &Path) -> Result<(), EngineError> {
		let ids = read_ids(&self.layout.ids_path(folder))?;
		let similar = self
			.factory
			.load(self.rank, &self.layout.similar_path(folder, self.rank), ids.len())?;
		let matrix = FactorMatrix::from_flat(self.rank, similar.vectors().to_vec())?;
		if matrix.rows() != ids.len() {
			return Err(EngineError::Corruption(format!(
				"{}: index holds {} rows but {} lists {} ids",
				self.layout.name,
				matrix.rows(),
				self.layout.ids_file,
				ids.len()
			)));
		}
		let id_map = index_ids(&ids);
		if id_map.len() != ids.len() {
			return Err(EngineError::Corruption(format!(
				"{}: {} contains duplicate ids",
				self.layout.name, self.layout.ids_file
			)));
		}

		let (recommend, max_norm) = match self.layout.recommend_path(folder, self.rank) {
			Some(path) => {
				let loaded = self.factory.load(self.rank + 1, &path, ids.len())?;
				if loaded.current_count() == matrix.rows() {
					let max_norm = mips::recover_max_norm(loaded.as_ref());
					(Some(loaded), max_norm)
				} else {
					tracing::warn!(
						store = self.layout.name,
						path = %path.display(),
						found = loaded.current_count(),
						expected = matrix.rows(),
						"Recommend index out of step with factors, rebuilding"
					);
					let (max_norm, augmented) = mips::augment(&matrix);
					let rebuilt = self.factory.build(self.rank + 1, augmented.as_slice())?;
					(Some(rebuilt), max_norm)
				}
			}
			None => (None, 0.0),
		};

		self.matrix = matrix;
		self.ids = ids;
		self.id_map = id_map;
		self.similar = Some(similar);
		self.recommend = recommend;
		self.max_norm = max_norm;
		self.gram = OnceLock::new();
		self.dirty = 0;

		tracing::info!(store = self.layout.name, rows = self.len(), "Loaded store");
		self.check_invariants()
	}

	/// Called once every file of a snapshot has been written.
	pub(crate) fn clear_dirty(&mut self) {
		self.dirty = 0;
	}

	// ── Accessors ─────────────────────────────────────────────────────────

	pub fn layout(&self) -> StoreLayout {
		self.layout
	}

	pub fn name(&self) -> &'static str {
		self.layout.name
	}

	pub fn len(&self) -> usize {
		self.ids.len()
	}

	pub fn is_empty(&self) -> bool {
		self.ids.is_empty()
	}

	pub fn rank(&self) -> usize {
		self.rank
	}

	pub fn ids(&self) -> &[String] {
		&self.ids
	}

	pub fn id_at(&self, offset: usize) -> Option<&str> {
		self.ids.get(offset).map(String::as_str)
	}

	pub fn offset_of(&self, id: &str) -> Option<usize> {
		self.id_map.get(id).copied()
	}

	pub fn contains(&self, id: &str) -> bool {
		self.id_map.contains_key(id)
	}

	pub fn matrix(&self) -> &FactorMatrix {
		&self.matrix
	}

	pub fn max_norm(&self) -> f32 {
		self.max_norm
	}

	/// `matrix().gram()`, computed at most once per change to the matrix.
	pub fn gram(&self) -> &[f64] {
		self.gram.get_or_init(|| self.matrix.gram())
	}

	pub fn is_dirty(&self) -> bool {
		self.dirty > 0
	}

	pub fn dirty_count(&self) -> usize {
		self.dirty
	}

	/// Capacity of the similarity index, 0 when none is bound.
	pub fn capacity(&self) -> usize {
		self.similar.as_ref().map_or(0, |index| index.max_elements())
	}

	// ── Validation ────────────────────────────────────────────────────────

	fn check_batch(
		&self,
		vectors: &FactorMatrix,
		ids: &[String],
		appending: bool,
	) -> Result<(), EngineError> {
		if vectors.rank() != self.rank {
			return Err(EngineError::rank(self.rank, vectors.rank()));
		}
		if vectors.rows() != ids.len() {
			return Err(EngineError::Shape {
				expected: format!("{} ids", vectors.rows()),
				actual: format!("{} ids", ids.len()),
			});
		}
		if vectors.as_slice().iter().any(|v| !v.is_finite()) {
			return Err(EngineError::InvalidInput(format!(
				"{}: factors must be finite",
				self.layout.name
			)));
		}
		let mut seen = HashSet::with_capacity(ids.len());
		for id in ids {
			if (appending && self.contains(id)) || !seen.insert(id.as_str()) {
				return Err(EngineError::DuplicateId(id.clone()));
			}
		}
		Ok(())
	}

	fn check_query(&self, vector: &[f32]) -> Result<(), EngineError> {
		if vector.len() != self.rank {
			return Err(EngineError::rank(self.rank, vector.len()));
		}
		Ok(())
	}
}

fn index_ids(ids: &[String]) -> HashMap<String, usize> {
	ids.iter()
		.enumerate()
		.map(|(offset, id)| (id.clone(), offset))
		.collect()
}

fn grow(index: &mut dyn VectorIndex, count: usize, new_rows: usize, grow_hint: usize) {
	let needed = count + new_rows;
	if index.max_elements() <= needed {
		let capacity = needed + grow_hint;
		tracing::debug!(from = index.max_elements(), to = capacity, "Growing index");
		index.resize(capacity);
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn ids(names: &[&str]) -> Vec<String> {
		names.iter().map(|s| s.to_string()).collect()
	}

	fn artists() -> EntityStore {
		let mut store = EntityStore::new(StoreLayout::ARTISTS, 3, IndexFactory::exact());
		let m = FactorMatrix::from_rows(
			3,
			&[
				vec![1.0, 0.0, 0.0],
				vec![0.0, 1.0, 0.0],
				vec![0.0, 0.0, 1.0],
				vec![0.9, 0.1, 0.0],
			],
		)
		.unwrap();
		store.set_vectors(m, ids(&["a", "b", "c", "d"])).unwrap();
		store
	}

	/// `rows` distinct, non-zero vectors of `rank` values in [0.05, 1.05).
	fn catalog(rows: usize, rank: usize, seed: u64) -> FactorMatrix {
		let mut state = seed;
		let data: Vec<f32> = (0..rows * rank)
			.map(|_| {
				state = state
					.wrapping_mul(6364136223846793005)
					.wrapping_add(1442695040888963407);
				((state >> 33) % 1000) as f32 / 1000.0 + 0.05
			})
			.collect();
		FactorMatrix::from_flat(rank, data).unwrap()
	}

	fn numbered(prefix: &str, n: usize) -> Vec<String> {
		(0..n).map(|i| format!("{}{}", prefix, i)).collect()
	}

	fn backends() -> [IndexFactory; 2] {
		[IndexFactory::exact(), IndexFactory::default()]
	}

	#[test]
	fn layout_paths_carry_dimension() {
		let folder = Path::new("/data");
		assert_eq!(
			StoreLayout::ARTISTS.similar_path(folder, 64),
			PathBuf::from("/data/similar_items_index.bin64")
		);
		assert_eq!(
			StoreLayout::ARTISTS.recommend_path(folder, 64),
			Some(PathBuf::from("/data/recommend_index.bin65"))
		);
		assert_eq!(StoreLayout::PLAYLISTS.recommend_path(folder, 64), None);
		assert_eq!(
			StoreLayout::PLAYLISTS.ids_path(folder),
			PathBuf::from("/data/playlists.json")
		);
	}

	#[test]
	fn set_vectors_builds_all_indexes() {
		let store = artists();
		assert_eq!(store.len(), 4);
		assert_eq!(store.offset_of("c"), Some(2));
		assert_eq!(store.id_at(3), Some("d"));
		assert!(store.is_dirty());
		assert!((store.max_norm() - 1.0).abs() < 0.01);
		store.check_invariants().unwrap();
	}

	#[test]
	fn similar_ranks_by_cosine() {
		let store = artists();
		let hits = store.similar(&[1.0, 0.05, 0.0], 2).unwrap();
		assert_eq!(hits.len(), 2);
		let offsets: Vec<usize> = hits.iter().map(|(o, _)| *o).collect();
		assert!(offsets.contains(&0));
		assert!(offsets.contains(&3));
		assert!(hits[0].1 >= hits[1].1);
	}

	#[test]
	fn recommend_skips_excluded() {
		let store = artists();
		let exclude: HashSet<usize> = [0].into_iter().collect();
		let hits = store.recommend(&[1.0, 0.0, 0.0], 2, &exclude).unwrap();
		assert_eq!(hits.len(), 2);
		assert_eq!(hits[0].0, 3);
		assert!(hits.iter().all(|(o, _)| *o != 0));
	}

	#[test]
	fn add_appends_rows_and_grows() {
		let mut store = EntityStore::new(StoreLayout::PLAYLISTS, 2, IndexFactory::exact());
		let n = store
			.add(FactorMatrix::from_row(vec![1.0, 0.0]), ids(&["p1"]), 16)
			.unwrap();
		assert_eq!(n, 1);
		let n = store
			.add(FactorMatrix::from_row(vec![0.0, 1.0]), ids(&["p2"]), 16)
			.unwrap();
		assert_eq!(n, 2);
		assert_eq!(store.capacity(), 18);
		assert_eq!(store.dirty_count(), 2);
		assert_eq!(store.similar(&[0.0, 1.0], 1).unwrap()[0].0, 1);
	}

	#[test]
	fn add_to_artists_extends_recommend_index() {
		let mut store = artists();
		let before = store.max_norm();
		store
			.add(FactorMatrix::from_row(vec![0.0, 2.0, 2.0]), ids(&["e"]), 4)
			.unwrap();
		assert_eq!(store.len(), 5);
		assert!(store.max_norm() > before);
		let hits = store.recommend(&[0.0, 1.0, 1.0], 1, &HashSet::new()).unwrap();
		assert_eq!(hits[0].0, 4);
		store.check_invariants().unwrap();
	}

	#[test]
	fn add_rejects_duplicates_without_mutating() {
		let mut store = artists();
		let err = store
			.add(FactorMatrix::from_row(vec![0.0, 1.0, 1.0]), ids(&["a"]), 4)
			.unwrap_err();
		assert!(matches!(err, EngineError::DuplicateId(_)));

		let two = FactorMatrix::from_rows(3, &[vec![0.0; 3], vec![1.0; 3]]).unwrap();
		let err = store.add(two, ids(&["x", "x"]), 4).unwrap_err();
		assert!(matches!(err, EngineError::DuplicateId(_)));
		assert_eq!(store.len(), 4);
		store.check_invariants().unwrap();
	}

	#[test]
	fn add_rejects_shape_errors() {
		let mut store = artists();
		let err = store
			.add(FactorMatrix::from_row(vec![1.0, 1.0]), ids(&["e"]), 4)
			.unwrap_err();
		assert!(matches!(err, EngineError::Shape { .. }));
		let err = store
			.add(FactorMatrix::from_row(vec![1.0, 1.0, 1.0]), ids(&["e", "f"]), 4)
			.unwrap_err();
		assert!(matches!(err, EngineError::Shape { .. }));
		assert_eq!(store.len(), 4);
	}

	#[test]
	fn queries_on_empty_store_are_empty() {
		let store = EntityStore::new(StoreLayout::ARTISTS, 3, IndexFactory::exact());
		assert!(store.similar(&[1.0, 0.0, 0.0], 5).unwrap().is_empty());
		assert!(store
			.recommend(&[1.0, 0.0, 0.0], 5, &HashSet::new())
			.unwrap()
			.is_empty());
		assert!(store.similar(&[1.0], 5).is_err());
	}

	#[test]
	fn reset_empties_and_marks_dirty() {
		let mut store = artists();
		store.clear_dirty();
		store.reset().unwrap();
		assert!(store.is_empty());
		assert_eq!(store.dirty_count(), 1);
		assert!(store.similar(&[1.0, 0.0, 0.0], 3).unwrap().is_empty());
		store
			.add(FactorMatrix::from_row(vec![1.0, 0.0, 0.0]), ids(&["a"]), 4)
			.unwrap();
		assert_eq!(store.offset_of("a"), Some(0));
	}

	#[test]
	fn snapshot_has_both_indexes_for_artists() {
		let snap = artists().snapshot();
		assert_eq!(snap.similar.count(), 4);
		assert_eq!(snap.recommend.as_ref().map(|s| s.dim), Some(4));
		assert_eq!(snap.ids.len(), 4);

		let playlists = EntityStore::new(StoreLayout::PLAYLISTS, 3, IndexFactory::exact());
		let snap = playlists.snapshot();
		assert!(snap.recommend.is_none());
		assert_eq!(snap.similar.count(), 0);
	}

	#[test]
	fn adding_two_artists_keeps_every_index_in_step() {
		for factory in backends() {
			let mut artists = EntityStore::new(StoreLayout::ARTISTS, 16, factory);
			artists
				.set_vectors(catalog(40, 16, 1), numbered("artist", 40))
				.unwrap();
			let mut playlists = EntityStore::new(StoreLayout::PLAYLISTS, 16, factory);
			playlists
				.set_vectors(catalog(30, 16, 2), numbered("playlist", 30))
				.unwrap();

			let count = artists
				.add(catalog(2, 16, 3), numbered("new", 2), 16)
				.unwrap();
			assert_eq!(count, 42);
			assert_eq!(artists.matrix().rows(), 42);
			let snap = artists.snapshot();
			assert_eq!(snap.similar.count(), 42);
			assert_eq!(snap.recommend.map(|r| r.count()), Some(42));
			assert_eq!(artists.offset_of("new1"), Some(41));
			assert_eq!(playlists.len(), 30);
			artists.check_invariants().unwrap();

			let hits = artists.similar(catalog(2, 16, 3).row(1), 1).unwrap();
			assert_eq!(hits[0].0, 41, "{:?}", factory.backend);
		}
	}

	#[test]
	fn reloaded_store_answers_queries_the_same() {
		let query = catalog(1, 16, 99);
		for factory in backends() {
			let dir = tempfile::tempdir().unwrap();
			let mut store = EntityStore::new(StoreLayout::ARTISTS, 16, factory);
			store
				.set_vectors(catalog(40, 16, 5), numbered("artist", 40))
				.unwrap();
			store.snapshot().write(dir.path()).unwrap();

			let mut reloaded = EntityStore::new(StoreLayout::ARTISTS, 16, factory);
			reloaded.load(dir.path()).unwrap();

			let before = store.similar(query.row(0), 5).unwrap();
			let after = reloaded.similar(query.row(0), 5).unwrap();
			assert_eq!(
				before.iter().map(|h| h.0).collect::<Vec<_>>(),
				after.iter().map(|h| h.0).collect::<Vec<_>>(),
				"{:?}",
				factory.backend
			);
			for (a, b) in before.iter().zip(&after) {
				assert!((a.1 - b.1).abs() < 1e-5);
			}

			let exclude: HashSet<usize> = [0, 1].into_iter().collect();
			let before = store.recommend(query.row(0), 5, &exclude).unwrap();
			let after = reloaded.recommend(query.row(0), 5, &exclude).unwrap();
			assert_eq!(
				before.iter().map(|h| h.0).collect::<Vec<_>>(),
				after.iter().map(|h| h.0).collect::<Vec<_>>(),
				"{:?}",
				factory.backend
			);
			assert!((store.max_norm() - reloaded.max_norm()).abs() < 1e-4);
		}
	}

	#[test]
	fn gram_follows_the_matrix() {
		let mut store = artists();
		let first = store.gram().to_vec();
		assert_eq!(first, store.matrix().gram());

		store
			.add(FactorMatrix::from_row(vec![0.0, 2.0, 2.0]), ids(&["e"]), 4)
			.unwrap();
		assert_ne!(store.gram(), first.as_slice());
		assert_eq!(store.gram(), store.matrix().gram().as_slice());

		store.reset().unwrap();
		assert!(store.gram().iter().all(|v| *v == 0.0));
	}

	#[test]
	fn zero_rows_rank_last_on_every_backend() {
		for factory in backends() {
			let mut store = EntityStore::new(StoreLayout::PLAYLISTS, 3, factory);
			let m = FactorMatrix::from_rows(
				3,
				&[vec![1.0, 0.0, 0.0], vec![0.0, 0.0, 0.0], vec![0.2, 1.0, 0.0]],
			)
			.unwrap();
			store.set_vectors(m, ids(&["match", "empty", "other"])).unwrap();
			let hits = store.similar(&[1.0, 0.0, 0.0], 3).unwrap();
			let order: Vec<&str> = hits.iter().filter_map(|(o, _)| store.id_at(*o)).collect();
			assert_eq!(order, vec!["match", "other", "empty"], "{:?}", factory.backend);
			assert!((hits[0].1 - 1.0).abs() < 1e-5);
			assert_eq!(hits[2].1, 0.0);
		}
	}

	#[test]
	fn load_from_empty_folder() {
		let dir = tempfile::tempdir().unwrap();
		let mut store = artists();
		store.load(dir.path()).unwrap();
		assert!(store.is_empty());
		assert!(!store.is_dirty());
	}
}
