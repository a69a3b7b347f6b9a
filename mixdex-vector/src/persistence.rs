// ---------------------------------------------------------------------------
// Persistence — atomic file writes, store snapshots, background saves
// ---------------------------------------------------------------------------
//
// Every file is written to a temp file in the destination directory and then
// renamed over the target, so a reader (or a crash) only ever sees the old or
// the new content.
//
// Asynchronous saves hand a point-in-time `StoreSnapshot` to a single worker
// thread. The worker never sees the live stores and nothing is merged back:
// dirty counters are cleared when the job is handed off.
// ---------------------------------------------------------------------------

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};
use std::thread::JoinHandle;

use serde::Serialize;
use tempfile::NamedTempFile;

use crate::error::EngineError;
use crate::index::IndexSnapshot;
use crate::store::{EntityStore, StoreLayout};

// ---------------------------------------------------------------------------
// Files
// ---------------------------------------------------------------------------

/// Write `bytes` to `path` via a sibling temp file and rename.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
	let dir = match path.parent() {
		Some(parent) if !parent.as_os_str().is_empty() => parent,
		_ => Path::new("."),
	};
	fs::create_dir_all(dir)?;
	let mut tmp = NamedTempFile::new_in(dir)?;
	tmp.write_all(bytes)?;
	tmp.as_file().sync_all()?;
	tmp.persist(path).map_err(|e| e.error)?;
	Ok(())
}

/// Id list stored next to the indexes. Missing file → no ids.
pub fn read_ids(path: &Path) -> Result<Vec<String>, EngineError> {
	match fs::read(path) {
		Ok(bytes) => serde_json::from_slice(&bytes).map_err(|e| {
			EngineError::Corruption(format!("{}: {}", path.display(), e))
		}),
		Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Vec::new()),
		Err(e) => Err(e.into()),
	}
}

// ---------------------------------------------------------------------------
// Snapshot
// ---------------------------------------------------------------------------

/// Everything one store persists, detached from the live store.
#[derive(Debug, Clone)]
pub struct StoreSnapshot {
	pub layout: StoreLayout,
	pub rank: usize,
	pub similar: IndexSnapshot,
	pub recommend: Option<IndexSnapshot>,
	pub ids: Vec<String>,
}

impl StoreSnapshot {
	/// Write every file of this store into `folder`. The id list goes last.
	pub fn write(&self, folder: &Path) -> Result<(), EngineError> {
		write_atomic(
			&self.layout.similar_path(folder, self.rank),
			&self.similar.encode()?,
		)?;
		if let (Some(path), Some(recommend)) =
			(self.layout.recommend_path(folder, self.rank), &self.recommend)
		{
			write_atomic(&path, &recommend.encode()?)?;
		}
		write_atomic(&self.layout.ids_path(folder), &serde_json::to_vec(&self.ids)?)?;
		tracing::debug!(store = self.layout.name, rows = self.ids.len(), "Wrote store files");
		Ok(())
	}
}

// ---------------------------------------------------------------------------
// Save worker
// ---------------------------------------------------------------------------

/// Outcome of `save_async`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum SaveStatus {
	/// No store was dirty.
	NothingToDo,
	/// A previous background save has not finished.
	Busy,
	/// Snapshots were handed to the worker.
	Started,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum WorkerState {
	Idle,
	Saving,
	Stopped,
}

struct SaveJob {
	folder: PathBuf,
	snapshots: Vec<StoreSnapshot>,
}

type SaveOutcome = Result<Vec<&'static str>, String>;

struct SaveWorker {
	jobs: Sender<SaveJob>,
	done: Receiver<SaveOutcome>,
	handle: JoinHandle<()>,
	in_flight: bool,
}

impl SaveWorker {
	fn spawn() -> io::Result<Self> {
		let (jobs, job_rx) = mpsc::channel::<SaveJob>();
		let (done_tx, done) = mpsc::channel::<SaveOutcome>();
		let handle = std::thread::Builder::new()
			.name("mixdex-save".into())
			.spawn(move || {
				for job in job_rx {
					let outcome = write_snapshots(&job.folder, &job.snapshots)
						.map_err(|e| e.to_string());
					match &outcome {
						Ok(saved) => tracing::info!(stores = ?saved, "Background save finished"),
						Err(e) => tracing::error!("Background save failed: {}", e),
					}
					if done_tx.send(outcome).is_err() {
						break;
					}
				}
			})?;
		Ok(Self {
			jobs,
			done,
			handle,
			in_flight: false,
		})
	}

	/// Collect a finished job, if any. Returns true while a job is running.
	fn poll(&mut self) -> bool {
		if !self.in_flight {
			return false;
		}
		match self.done.try_recv() {
			Ok(_) => {
				self.in_flight = false;
				false
			}
			Err(TryRecvError::Empty) => true,
			Err(TryRecvError::Disconnected) => {
				tracing::error!("Save worker exited unexpectedly");
				self.in_flight = false;
				false
			}
		}
	}

	/// Block until the running job (if any) reports back.
	fn wait(&mut self) {
		if self.in_flight {
			if self.done.recv().is_err() {
				tracing::error!("Save worker exited unexpectedly");
			}
			self.in_flight = false;
		}
	}
}

fn write_snapshots(
	folder: &Path,
	snapshots: &[StoreSnapshot],
) -> Result<Vec<&'static str>, EngineError> {
	let mut saved = Vec::with_capacity(snapshots.len());
	for snapshot in snapshots {
		snapshot.write(folder)?;
		saved.push(snapshot.layout.name);
	}
	Ok(saved)
}

// ---------------------------------------------------------------------------
// Manager
// ---------------------------------------------------------------------------

/// Owns the storage folder and the background save worker.
pub struct PersistenceManager {
	folder: PathBuf,
	worker: Option<SaveWorker>,
	stopped: bool,
}

impl PersistenceManager {
	pub fn new(folder: impl Into<PathBuf>) -> Self {
		Self {
			folder: folder.into(),
			worker: None,
			stopped: false,
		}
	}

	pub fn folder(&self) -> &Path {
		&self.folder
	}

	/// Load every store from the storage folder.
	pub fn load(&mut self, stores: &mut [&mut EntityStore]) -> Result<(), EngineError> {
		self.wait();
		for store in stores.iter_mut() {
			store.load(&self.folder)?;
		}
		Ok(())
	}

	/// Synchronously write every dirty store. Returns the names written.
	pub fn save(&mut self, stores: &mut [&mut EntityStore]) -> Result<Vec<&'static str>, EngineError> {
		// An older background snapshot must not land after this one.
		self.wait();
		let mut saved = Vec::new();
		for store in stores.iter_mut() {
			if !store.is_dirty() {
				continue;
			}
			store.snapshot().write(&self.folder)?;
			store.clear_dirty();
			saved.push(store.name());
		}
		if !saved.is_empty() {
			tracing::info!(stores = ?saved, folder = %self.folder.display(), "Saved");
		}
		Ok(saved)
	}

	/// Hand snapshots of the dirty stores to the background worker.
	pub fn save_async(&mut self, stores: &mut [&mut EntityStore]) -> Result<SaveStatus, EngineError> {
		if !stores.iter().any(|s| s.is_dirty()) {
			return Ok(SaveStatus::NothingToDo);
		}
		if self.is_busy() {
			return Ok(SaveStatus::Busy);
		}
		if self.stopped {
			return Err(EngineError::InvalidInput("persistence has been shut down".into()));
		}

		if self.worker.is_none() {
			self.worker = Some(SaveWorker::spawn()?);
		}
		let worker = match self.worker.as_mut() {
			Some(worker) => worker,
			None => return Err(EngineError::Invariant("save worker missing".into())),
		};

		let snapshots: Vec<StoreSnapshot> = stores
			.iter()
			.filter(|s| s.is_dirty())
			.map(|s| s.snapshot())
			.collect();
		let job = SaveJob {
			folder: self.folder.clone(),
			snapshots,
		};
		if worker.jobs.send(job).is_err() {
			self.worker = None;
			return Err(EngineError::Io(io::Error::new(
				io::ErrorKind::BrokenPipe,
				"save worker is gone",
			)));
		}
		worker.in_flight = true;

		for store in stores.iter_mut().filter(|s| s.is_dirty()) {
			store.clear_dirty();
		}
		tracing::debug!(folder = %self.folder.display(), "Background save started");
		Ok(SaveStatus::Started)
	}

	pub fn is_busy(&mut self) -> bool {
		self.worker.as_mut().is_some_and(SaveWorker::poll)
	}

	/// Block until an in-flight background save has finished.
	pub fn wait(&mut self) {
		if let Some(worker) = self.worker.as_mut() {
			worker.wait();
		}
	}

	pub fn state(&mut self) -> WorkerState {
		if self.stopped {
			WorkerState::Stopped
		} else if self.is_busy() {
			WorkerState::Saving
		} else {
			WorkerState::Idle
		}
	}

	/// Wait for the worker, stop it, then write whatever is still dirty.
	pub fn shutdown(&mut self, stores: &mut [&mut EntityStore]) -> Result<Vec<&'static str>, EngineError> {
		if let Some(mut worker) = self.worker.take() {
			worker.wait();
			drop(worker.jobs);
			if worker.handle.join().is_err() {
				tracing::error!("Save worker panicked");
			}
		}
		let saved = self.save(stores)?;
		self.stopped = true;
		Ok(saved)
	}
}

impl Drop for PersistenceManager {
	fn drop(&mut self) {
		self.wait();
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::index::IndexFactory;
	use crate::matrix::FactorMatrix;

	fn ids(names: &[&str]) -> Vec<String> {
		names.iter().map(|s| s.to_string()).collect()
	}

	fn artists() -> EntityStore {
		let mut store = EntityStore::new(StoreLayout::ARTISTS, 2, IndexFactory::exact());
		let m = FactorMatrix::from_rows(2, &[vec![1.0, 0.0], vec![0.5, 0.5], vec![0.0, 2.0]]).unwrap();
		store.set_vectors(m, ids(&["a", "b", "c"])).unwrap();
		store
	}

	fn playlists() -> EntityStore {
		let mut store = EntityStore::new(StoreLayout::PLAYLISTS, 2, IndexFactory::exact());
		store
			.add(FactorMatrix::from_row(vec![0.3, 0.7]), ids(&["p1"]), 16)
			.unwrap();
		store
	}

	#[test]
	fn write_atomic_creates_and_replaces() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("nested").join("file.json");
		write_atomic(&path, b"one").unwrap();
		write_atomic(&path, b"two").unwrap();
		assert_eq!(fs::read(&path).unwrap(), b"two");
		let leftovers = fs::read_dir(path.parent().unwrap()).unwrap().count();
		assert_eq!(leftovers, 1);
	}

	#[test]
	fn failed_write_keeps_previous_file() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("target");
		write_atomic(&path, b"committed").unwrap();
		// A regular file where the parent directory should be.
		let bad = path.join("child");
		assert!(write_atomic(&bad, b"new").is_err());
		assert_eq!(fs::read(&path).unwrap(), b"committed");
	}

	#[test]
	fn read_ids_missing_and_corrupt() {
		let dir = tempfile::tempdir().unwrap();
		assert!(read_ids(&dir.path().join("none.json")).unwrap().is_empty());
		let bad = dir.path().join("bad.json");
		fs::write(&bad, b"{not json").unwrap();
		assert!(matches!(read_ids(&bad), Err(EngineError::Corruption(_))));
	}

	#[test]
	fn save_writes_named_files_and_clears_dirty() {
		let dir = tempfile::tempdir().unwrap();
		let mut manager = PersistenceManager::new(dir.path());
		let mut a = artists();
		let mut p = playlists();

		let saved = manager.save(&mut [&mut a, &mut p]).unwrap();
		assert_eq!(saved, vec!["artists", "playlists"]);
		assert!(!a.is_dirty());
		assert!(!p.is_dirty());
		for name in [
			"similar_items_index.bin2",
			"recommend_index.bin3",
			"artists.json",
			"similar_users_index.bin2",
			"playlists.json",
		] {
			assert!(dir.path().join(name).exists(), "{} missing", name);
		}

		assert!(manager.save(&mut [&mut a, &mut p]).unwrap().is_empty());
	}

	#[test]
	fn save_then_load_round_trip() {
		let dir = tempfile::tempdir().unwrap();
		let mut manager = PersistenceManager::new(dir.path());
		let mut a = artists();
		let mut p = playlists();
		manager.save(&mut [&mut a, &mut p]).unwrap();

		let mut a2 = EntityStore::new(StoreLayout::ARTISTS, 2, IndexFactory::exact());
		let mut p2 = EntityStore::new(StoreLayout::PLAYLISTS, 2, IndexFactory::exact());
		manager.load(&mut [&mut a2, &mut p2]).unwrap();

		assert_eq!(a2.ids(), a.ids());
		assert_eq!(a2.matrix(), a.matrix());
		assert_eq!(p2.ids(), p.ids());
		assert!((a2.max_norm() - a.max_norm()).abs() < 1e-4);
		assert!(!a2.is_dirty());
		a2.check_invariants().unwrap();
	}

	#[test]
	fn load_rebuilds_missing_recommend_index() {
		let dir = tempfile::tempdir().unwrap();
		let mut manager = PersistenceManager::new(dir.path());
		let mut a = artists();
		manager.save(&mut [&mut a]).unwrap();
		fs::remove_file(dir.path().join("recommend_index.bin3")).unwrap();

		let mut loaded = EntityStore::new(StoreLayout::ARTISTS, 2, IndexFactory::exact());
		loaded.load(dir.path()).unwrap();
		assert_eq!(loaded.len(), 3);
		assert!((loaded.max_norm() - 2.0).abs() < 1e-6);
		let top = loaded
			.recommend(&[0.0, 1.0], 1, &std::collections::HashSet::new())
			.unwrap();
		assert_eq!(top[0].0, 2);
	}

	#[test]
	fn load_detects_id_count_mismatch() {
		let dir = tempfile::tempdir().unwrap();
		let mut manager = PersistenceManager::new(dir.path());
		let mut a = artists();
		manager.save(&mut [&mut a]).unwrap();
		fs::write(dir.path().join("artists.json"), br#"["a","b"]"#).unwrap();

		let mut loaded = EntityStore::new(StoreLayout::ARTISTS, 2, IndexFactory::exact());
		let err = loaded.load(dir.path()).unwrap_err();
		assert!(matches!(err, EngineError::Corruption(_)));
		assert!(loaded.is_empty());
	}

	#[test]
	fn save_async_statuses() {
		let dir = tempfile::tempdir().unwrap();
		let mut manager = PersistenceManager::new(dir.path());
		let mut a = artists();
		let mut p = playlists();

		let status = manager.save_async(&mut [&mut a, &mut p]).unwrap();
		assert_eq!(status, SaveStatus::Started);
		assert!(!a.is_dirty());
		assert!(!p.is_dirty());

		p.add(FactorMatrix::from_row(vec![1.0, 1.0]), ids(&["p2"]), 16)
			.unwrap();
		let status = manager.save_async(&mut [&mut a, &mut p]).unwrap();
		assert!(matches!(status, SaveStatus::Started | SaveStatus::Busy));

		manager.wait();
		if p.is_dirty() {
			assert_eq!(
				manager.save_async(&mut [&mut a, &mut p]).unwrap(),
				SaveStatus::Started
			);
			manager.wait();
		}
		assert_eq!(
			manager.save_async(&mut [&mut a, &mut p]).unwrap(),
			SaveStatus::NothingToDo
		);
		assert_eq!(manager.state(), WorkerState::Idle);
		assert_eq!(read_ids(&dir.path().join("playlists.json")).unwrap(), ids(&["p1", "p2"]));
	}

	#[test]
	fn shutdown_flushes_dirty_stores() {
		let dir = tempfile::tempdir().unwrap();
		let mut manager = PersistenceManager::new(dir.path());
		let mut p = playlists();
		manager.save_async(&mut [&mut p]).unwrap();
		p.add(FactorMatrix::from_row(vec![1.0, 0.0]), ids(&["p2"]), 16)
			.unwrap();

		let saved = manager.shutdown(&mut [&mut p]).unwrap();
		assert_eq!(saved, vec!["playlists"]);
		assert_eq!(manager.state(), WorkerState::Stopped);
		assert_eq!(read_ids(&dir.path().join("playlists.json")).unwrap(), ids(&["p1", "p2"]));
	}
}
