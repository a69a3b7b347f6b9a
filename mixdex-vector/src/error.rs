use thiserror::Error;

use crate::index::IndexError;

#[derive(Debug, Error)]
pub enum EngineError {
	#[error("Shape mismatch: expected {expected}, got {actual}")]
	Shape { expected: String, actual: String },
	#[error("Duplicate id: {0}")]
	DuplicateId(String),
	#[error("Invalid input: {0}")]
	InvalidInput(String),
	#[error("Index error: {0}")]
	Index(#[from] IndexError),
	#[error("Solver error: {0}")]
	Solver(String),
	#[error("IO error: {0}")]
	Io(#[from] std::io::Error),
	#[error("Serialization error: {0}")]
	Serialization(String),
	#[error("Storage corruption: {0}")]
	Corruption(String),
	#[error("Invariant violated: {0}")]
	Invariant(String),
}

impl EngineError {
	/// Shape error for a row that does not have `expected` columns.
	pub fn rank(expected: usize, actual: usize) -> Self {
		Self::Shape {
			expected: format!("{} factors", expected),
			actual: format!("{} factors", actual),
		}
	}

	pub fn code(&self) -> &str {
		match self {
			Self::Shape { .. } => "MIXDEX_SHAPE",
			Self::DuplicateId(_) => "MIXDEX_DUPLICATE_ID",
			Self::InvalidInput(_) => "MIXDEX_INVALID_INPUT",
			Self::Index(_) => "MIXDEX_INDEX",
			Self::Solver(_) => "MIXDEX_SOLVER",
			Self::Io(_) => "MIXDEX_IO",
			Self::Serialization(_) => "MIXDEX_SERIALIZATION",
			Self::Corruption(_) => "MIXDEX_CORRUPT",
			Self::Invariant(_) => "MIXDEX_INVARIANT",
		}
	}

	/// Client errors are the caller's fault and must not be retried.
	pub fn is_client_error(&self) -> bool {
		matches!(self, Self::InvalidInput(_) | Self::DuplicateId(_))
	}

	pub fn to_json_rpc_error(&self) -> serde_json::Value {
		serde_json::json!({
			"engineCode": self.code(),
			"message": self.to_string(),
		})
	}
}

impl From<serde_json::Error> for EngineError {
	fn from(e: serde_json::Error) -> Self {
		Self::Serialization(e.to_string())
	}
}
