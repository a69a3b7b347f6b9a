// ---------------------------------------------------------------------------
// Binary index file format + gzip compression
// ---------------------------------------------------------------------------
//
// Layout before compression:
//   [4B magic "MXIX"][4B version BE]
//   [4B dim BE][4B count BE][4B max_elements BE]
//   [count * dim f32 LE]
// ---------------------------------------------------------------------------

use std::io::Read;
use std::path::Path;

use flate2::read::{GzDecoder, GzEncoder};
use flate2::Compression;

use super::IndexError;

const MAGIC: &[u8; 4] = b"MXIX";
const VERSION: u32 = 1;
const HEADER_LEN: usize = 20;

/// Raw contents of an index, detached from any live backend.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexSnapshot {
	pub dim: usize,
	pub max_elements: usize,
	pub data: Vec<f32>,
}

impl IndexSnapshot {
	pub fn count(&self) -> usize {
		if self.dim == 0 {
			0
		} else {
			self.data.len() / self.dim
		}
	}

	/// Serialize and gzip.
	pub fn encode(&self) -> Result<Vec<u8>, IndexError> {
		let mut raw = Vec::with_capacity(HEADER_LEN + self.data.len() * 4);
		raw.extend_from_slice(MAGIC);
		raw.extend_from_slice(&VERSION.to_be_bytes());
		raw.extend_from_slice(&to_u32(self.dim)?.to_be_bytes());
		raw.extend_from_slice(&to_u32(self.count())?.to_be_bytes());
		raw.extend_from_slice(&to_u32(self.max_elements)?.to_be_bytes());
		for f in &self.data {
			raw.extend_from_slice(&f.to_le_bytes());
		}

		let mut encoder = GzEncoder::new(raw.as_slice(), Compression::new(6));
		let mut compressed = Vec::new();
		encoder.read_to_end(&mut compressed)?;
		Ok(compressed)
	}

	/// Gunzip and parse.
	pub fn decode(bytes: &[u8]) -> Result<Self, IndexError> {
		if !is_gzipped(bytes) {
			return Err(IndexError::Corruption("not a gzip stream".into()));
		}
		let mut raw = Vec::new();
		GzDecoder::new(bytes)
			.read_to_end(&mut raw)
			.map_err(|e| IndexError::Corruption(format!("gzip: {}", e)))?;

		if raw.len() < HEADER_LEN || &raw[0..4] != MAGIC {
			return Err(IndexError::Corruption("bad header".into()));
		}
		let version = read_u32_be(&raw, 4);
		if version != VERSION {
			return Err(IndexError::Corruption(format!(
				"unsupported index version: {}",
				version
			)));
		}
		let dim = read_u32_be(&raw, 8) as usize;
		let count = read_u32_be(&raw, 12) as usize;
		let max_elements = read_u32_be(&raw, 16) as usize;

		let body = &raw[HEADER_LEN..];
		if body.len() != dim * count * 4 {
			return Err(IndexError::Corruption(format!(
				"truncated: expected {} bytes of vectors, found {}",
				dim * count * 4,
				body.len()
			)));
		}
		let data = body
			.chunks_exact(4)
			.map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
			.collect();

		Ok(Self {
			dim,
			max_elements,
			data,
		})
	}
}

/// Read an index file written for dimension `dim`.
///
/// A missing file is `None`. So is a file that fails to decode: a partial
/// write is treated as an empty index, not as corruption. A well-formed file
/// of another dimension is an error.
pub fn read_file(path: &Path, dim: usize) -> Result<Option<IndexSnapshot>, IndexError> {
	let bytes = match std::fs::read(path) {
		Ok(b) => b,
		Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
			tracing::warn!(path = %path.display(), "index file missing, starting empty");
			return Ok(None);
		}
		Err(e) => return Err(IndexError::Io(e)),
	};

	let snapshot = match IndexSnapshot::decode(&bytes) {
		Ok(s) => s,
		Err(e) => {
			tracing::warn!(path = %path.display(), error = %e, "unreadable index file, starting empty");
			return Ok(None);
		}
	};

	if snapshot.dim != dim {
		return Err(IndexError::Corruption(format!(
			"{} holds {}-dimensional vectors, expected {}",
			path.display(),
			snapshot.dim,
			dim
		)));
	}
	Ok(Some(snapshot))
}

fn is_gzipped(data: &[u8]) -> bool {
	data.len() >= 2 && data[0] == 0x1f && data[1] == 0x8b
}

fn read_u32_be(data: &[u8], offset: usize) -> u32 {
	u32::from_be_bytes([
		data[offset],
		data[offset + 1],
		data[offset + 2],
		data[offset + 3],
	])
}

fn to_u32(n: usize) -> Result<u32, IndexError> {
	u32::try_from(n).map_err(|_| IndexError::Corruption(format!("{} does not fit in u32", n)))
}

#[cfg(test)]
mod tests {
	use super::*;

	fn snapshot() -> IndexSnapshot {
		IndexSnapshot {
			dim: 2,
			max_elements: 16,
			data: vec![1.0, -0.5, 3.25, 1e-7],
		}
	}

	#[test]
	fn encode_decode_roundtrip() {
		let s = snapshot();
		let bytes = s.encode().unwrap();
		assert!(is_gzipped(&bytes));
		assert_eq!(IndexSnapshot::decode(&bytes).unwrap(), s);
	}

	#[test]
	fn empty_snapshot_roundtrip() {
		let s = IndexSnapshot {
			dim: 64,
			max_elements: 0,
			data: vec![],
		};
		let decoded = IndexSnapshot::decode(&s.encode().unwrap()).unwrap();
		assert_eq!(decoded.count(), 0);
		assert_eq!(decoded.dim, 64);
	}

	#[test]
	fn decode_rejects_plain_bytes() {
		assert!(IndexSnapshot::decode(b"not an index").is_err());
		assert!(IndexSnapshot::decode(&[]).is_err());
	}

	#[test]
	fn truncated_file_reads_as_empty() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("idx.bin2");
		let bytes = snapshot().encode().unwrap();
		std::fs::write(&path, &bytes[..bytes.len() / 2]).unwrap();
		assert!(read_file(&path, 2).unwrap().is_none());
	}

	#[test]
	fn missing_file_reads_as_none() {
		let dir = tempfile::tempdir().unwrap();
		assert!(read_file(&dir.path().join("missing"), 2).unwrap().is_none());
	}

	#[test]
	fn dimension_mismatch_is_error() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("idx");
		std::fs::write(&path, snapshot().encode().unwrap()).unwrap();
		assert!(matches!(read_file(&path, 3), Err(IndexError::Corruption(_))));
	}
}
