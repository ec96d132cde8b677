use thiserror::Error;

use crate::persistence::PersistenceError;

#[derive(Debug, Error)]
pub enum EngineError {
	#[error("Artifacts not loaded: call store/load first")]
	NotLoaded,
	#[error("Missing artifact: {0}")]
	MissingArtifact(String),
	#[error("Dimension mismatch in {context}: expected {expected}, found {actual}")]
	DimensionMismatch {
		context: String,
		expected: usize,
		actual: usize,
	},
	#[error("No seed items: none of the requested games are in the catalog")]
	NoSeedItems,
	#[error("No valid signal: the query resolves to a zero vector")]
	NoSignal,
	#[error("Unknown query mode: {0}")]
	UnknownMode(String),
	#[error("Invalid query: {0}")]
	InvalidQuery(String),
	#[error("Invalid parameter: {0}")]
	InvalidParameter(String),
	#[error("Missing required columns: {}", .0.join(", "))]
	MissingColumns(Vec<String>),
	#[error("Empty input: {0}")]
	EmptyInput(String),
	#[error("Numerical failure: {0}")]
	Numerical(String),
	#[error("Text encoder error: {0}")]
	Encoder(String),
	#[error("IO error: {0}")]
	Io(#[from] std::io::Error),
	#[error("Serialization error: {0}")]
	Serialization(String),
	#[error("Artifact corruption: {0}")]
	Corruption(String),
}

impl EngineError {
	pub fn code(&self) -> &str {
		match self {
			Self::NotLoaded => "TAGVIBE_NOT_LOADED",
			Self::MissingArtifact(_) => "TAGVIBE_MISSING_ARTIFACT",
			Self::DimensionMismatch { .. } => "TAGVIBE_DIMENSION_MISMATCH",
			Self::NoSeedItems => "TAGVIBE_NO_SEED_ITEMS",
			Self::NoSignal => "TAGVIBE_NO_SIGNAL",
			Self::UnknownMode(_) => "TAGVIBE_UNKNOWN_MODE",
			Self::InvalidQuery(_) => "TAGVIBE_INVALID_QUERY",
			Self::InvalidParameter(_) => "TAGVIBE_INVALID_PARAMETER",
			Self::MissingColumns(_) => "TAGVIBE_MISSING_COLUMNS",
			Self::EmptyInput(_) => "TAGVIBE_EMPTY_INPUT",
			Self::Numerical(_) => "TAGVIBE_NUMERICAL",
			Self::Encoder(_) => "TAGVIBE_ENCODER",
			Self::Io(_) => "TAGVIBE_IO",
			Self::Serialization(_) => "TAGVIBE_SERIALIZATION",
			Self::Corruption(_) => "TAGVIBE_CORRUPT",
		}
	}

	pub fn to_json_rpc_error(&self) -> serde_json::Value {
		serde_json::json!({
			"engineCode": self.code(),
			"message": self.to_string(),
		})
	}

	pub(crate) fn dimension(context: impl Into<String>, expected: usize, actual: usize) -> Self {
		Self::DimensionMismatch {
			context: context.into(),
			expected,
			actual,
		}
	}
}

impl From<PersistenceError> for EngineError {
	fn from(e: PersistenceError) -> Self {
		match e {
			PersistenceError::Io(io) => Self::Io(io),
			PersistenceError::Corruption(msg) => Self::Corruption(msg),
			PersistenceError::Serialization(msg) => Self::Serialization(msg),
			PersistenceError::Missing(name) => Self::MissingArtifact(name),
		}
	}
}
