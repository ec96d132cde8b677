// ---------------------------------------------------------------------------
// Artifact persistence
// ---------------------------------------------------------------------------
//
// An artifact directory holds one file per published artifact:
//
//   manifest.json          generation id, creation time, shapes, config
//   vocab.json             tag names in column order + alias map
//   catalog.json.gz        item ids, tag indices, titles, attributes, weights
//   tag_vectors.bin.gz     matrix record
//   item_vectors.bin.gz    matrix record
//   tag_effects.bin.gz     matrix record (1 x tags)
//   alignment.bin.gz       optional matrix record (text-dim x D)
//   report.json            build diagnostics
//
// Matrix record: gzipped JSON `{ "version", "rows", "cols", "data" }` where
// `data` is base64 of f32 little-endian bytes in row-major order.
// ---------------------------------------------------------------------------

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use flate2::read::{GzDecoder, GzEncoder};
use flate2::Compression;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::Read;
use std::path::Path;
use thiserror::Error;

use crate::alignment::TextAlignment;
use crate::error::EngineError;
use crate::pipeline::{Artifacts, Manifest};
use crate::sparse::CsrMatrix;
use crate::types::{ItemAttributes, ItemId};
use crate::vectors::EmbeddingMatrix;
use crate::vocab::{Catalog, TagVocabulary};

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum PersistenceError {
	#[error("IO error: {0}")]
	Io(#[from] std::io::Error),
	#[error("Corruption: {0}")]
	Corruption(String),
	#[error("Serialization: {0}")]
	Serialization(String),
	#[error("Missing artifact: {0}")]
	Missing(String),
}

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

pub const FORMAT_VERSION: u32 = 1;

pub const MANIFEST_FILE: &str = "manifest.json";
pub const VOCAB_FILE: &str = "vocab.json";
pub const CATALOG_FILE: &str = "catalog.json.gz";
pub const TAG_VECTORS_FILE: &str = "tag_vectors.bin.gz";
pub const ITEM_VECTORS_FILE: &str = "item_vectors.bin.gz";
pub const TAG_EFFECTS_FILE: &str = "tag_effects.bin.gz";
pub const ALIGNMENT_FILE: &str = "alignment.bin.gz";
pub const REPORT_FILE: &str = "report.json";

// ---------------------------------------------------------------------------
// Embedding encode / decode
// ---------------------------------------------------------------------------

/// Encode a f32 slice as base64 of Float32 little-endian bytes.
pub fn encode_embedding(embedding: &[f32]) -> String {
	let bytes: Vec<u8> = embedding.iter().flat_map(|f| f.to_le_bytes()).collect();
	STANDARD.encode(&bytes)
}

/// Decode a base64-encoded Float32 LE byte string back to `Vec<f32>`.
pub fn decode_embedding(encoded: &str) -> Result<Vec<f32>, PersistenceError> {
	let bytes = STANDARD
		.decode(encoded)
		.map_err(|e| PersistenceError::Corruption(format!("Invalid base64: {}", e)))?;
	if bytes.len() % 4 != 0 {
		return Err(PersistenceError::Corruption(
			"Invalid embedding length".into(),
		));
	}
	let mut result = Vec::with_capacity(bytes.len() / 4);
	for chunk in bytes.chunks_exact(4) {
		result.push(f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]));
	}
	Ok(result)
}

// ---------------------------------------------------------------------------
// Gzip compress / decompress
// ---------------------------------------------------------------------------

pub fn compress(data: &[u8]) -> Result<Vec<u8>, PersistenceError> {
	let mut encoder = GzEncoder::new(data, Compression::new(6));
	let mut compressed = Vec::new();
	encoder
		.read_to_end(&mut compressed)
		.map_err(PersistenceError::Io)?;
	Ok(compressed)
}

pub fn decompress(data: &[u8]) -> Result<Vec<u8>, PersistenceError> {
	let mut decoder = GzDecoder::new(data);
	let mut decompressed = Vec::new();
	decoder
		.read_to_end(&mut decompressed)
		.map_err(|e| PersistenceError::Corruption(format!("Invalid gzip data: {}", e)))?;
	Ok(decompressed)
}

/// Check if data starts with gzip magic bytes (0x1f, 0x8b).
pub fn is_gzipped(data: &[u8]) -> bool {
	data.len() >= 2 && data[0] == 0x1f && data[1] == 0x8b
}

// ---------------------------------------------------------------------------
// Matrix records
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, Deserialize)]
struct MatrixRecord {
	version: u32,
	rows: usize,
	cols: usize,
	data: String,
}

pub fn encode_matrix(m: &EmbeddingMatrix) -> Result<Vec<u8>, PersistenceError> {
	let record = MatrixRecord {
		version: FORMAT_VERSION,
		rows: m.rows(),
		cols: m.cols(),
		data: encode_embedding(m.as_flat()),
	};
	let json = serde_json::to_vec(&record)
		.map_err(|e| PersistenceError::Serialization(e.to_string()))?;
	compress(&json)
}

pub fn decode_matrix(bytes: &[u8]) -> Result<EmbeddingMatrix, PersistenceError> {
	if !is_gzipped(bytes) {
		return Err(PersistenceError::Corruption("matrix record is not gzipped".into()));
	}
	let json = decompress(bytes)?;
	let record: MatrixRecord = serde_json::from_slice(&json)
		.map_err(|e| PersistenceError::Corruption(format!("Invalid matrix record: {}", e)))?;
	if record.version != FORMAT_VERSION {
		return Err(PersistenceError::Corruption(format!(
			"unsupported matrix record version {}",
			record.version
		)));
	}
	let data = decode_embedding(&record.data)?;
	let expected = record.rows * record.cols;
	let len = data.len();
	EmbeddingMatrix::from_flat(record.rows, record.cols, data).ok_or_else(|| {
		PersistenceError::Corruption(format!(
			"matrix record holds {len} values, shape needs {expected}"
		))
	})
}

// ---------------------------------------------------------------------------
// File helpers
// ---------------------------------------------------------------------------

fn read_artifact(dir: &Path, name: &str) -> Result<Vec<u8>, PersistenceError> {
	match std::fs::read(dir.join(name)) {
		Ok(bytes) => Ok(bytes),
		Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
			Err(PersistenceError::Missing(name.to_string()))
		}
		Err(e) => Err(PersistenceError::Io(e)),
	}
}

fn read_json<T: DeserializeOwned>(dir: &Path, name: &str) -> Result<T, PersistenceError> {
	let bytes = read_artifact(dir, name)?;
	serde_json::from_slice(&bytes)
		.map_err(|e| PersistenceError::Corruption(format!("{name}: {e}")))
}

fn read_gz_json<T: DeserializeOwned>(dir: &Path, name: &str) -> Result<T, PersistenceError> {
	let bytes = decompress(&read_artifact(dir, name)?)?;
	serde_json::from_slice(&bytes)
		.map_err(|e| PersistenceError::Corruption(format!("{name}: {e}")))
}

fn read_matrix(dir: &Path, name: &str) -> Result<EmbeddingMatrix, PersistenceError> {
	decode_matrix(&read_artifact(dir, name)?)
		.map_err(|e| match e {
			PersistenceError::Corruption(msg) => PersistenceError::Corruption(format!("{name}: {msg}")),
			other => other,
		})
}

fn write_json<T: Serialize>(dir: &Path, name: &str, value: &T) -> Result<(), PersistenceError> {
	let json = serde_json::to_vec_pretty(value)
		.map_err(|e| PersistenceError::Serialization(e.to_string()))?;
	std::fs::write(dir.join(name), json)?;
	Ok(())
}

fn write_gz_json<T: Serialize>(dir: &Path, name: &str, value: &T) -> Result<(), PersistenceError> {
	let json = serde_json::to_vec(value)
		.map_err(|e| PersistenceError::Serialization(e.to_string()))?;
	std::fs::write(dir.join(name), compress(&json)?)?;
	Ok(())
}

// ---------------------------------------------------------------------------
// On-disk shapes
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, Deserialize)]
struct VocabFile {
	names: Vec<String>,
	aliases: BTreeMap<String, String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct CatalogFile {
	item_ids: Vec<ItemId>,
	/// Tag column indices per row.
	tags: Vec<Vec<usize>>,
	titles: Vec<Option<String>>,
	attributes: Vec<ItemAttributes>,
	weights: Vec<f64>,
}

// ---------------------------------------------------------------------------
// Save / load
// ---------------------------------------------------------------------------

/// Write every artifact into `dir`, creating it if needed.
pub fn save_artifacts(dir: &Path, artifacts: &Artifacts) -> Result<(), PersistenceError> {
	std::fs::create_dir_all(dir)?;

	write_json(dir, MANIFEST_FILE, &artifacts.manifest)?;
	write_json(
		dir,
		VOCAB_FILE,
		&VocabFile {
			names: artifacts.vocab.names().to_vec(),
			aliases: artifacts.vocab.aliases().clone(),
		},
	)?;

	let catalog = &artifacts.catalog;
	write_gz_json(
		dir,
		CATALOG_FILE,
		&CatalogFile {
			item_ids: catalog.item_ids().to_vec(),
			tags: (0..catalog.len()).map(|r| catalog.tags_of(r).to_vec()).collect(),
			titles: catalog.titles().to_vec(),
			attributes: catalog.all_attributes().to_vec(),
			weights: artifacts.item_weights.clone(),
		},
	)?;

	std::fs::write(dir.join(TAG_VECTORS_FILE), encode_matrix(&artifacts.tag_vectors)?)?;
	std::fs::write(dir.join(ITEM_VECTORS_FILE), encode_matrix(&artifacts.item_vectors)?)?;

	let mut effects = EmbeddingMatrix::zeros(1, artifacts.tag_effects.len());
	effects.set_row(0, &artifacts.tag_effects);
	std::fs::write(dir.join(TAG_EFFECTS_FILE), encode_matrix(&effects)?)?;

	let alignment_path = dir.join(ALIGNMENT_FILE);
	match &artifacts.alignment {
		Some(alignment) => std::fs::write(&alignment_path, encode_matrix(alignment.matrix())?)?,
		None if alignment_path.exists() => std::fs::remove_file(&alignment_path)?,
		None => {}
	}

	tracing::info!(
		dir = %dir.display(),
		generation = %artifacts.manifest.generation_id,
		"artifacts saved"
	);
	Ok(())
}

pub fn save_report<T: Serialize>(dir: &Path, report: &T) -> Result<(), PersistenceError> {
	std::fs::create_dir_all(dir)?;
	write_json(dir, REPORT_FILE, report)
}

/// Load and cross-check every artifact in `dir`.
pub fn load_artifacts(dir: &Path) -> Result<Artifacts, EngineError> {
	let manifest: Manifest = read_json(dir, MANIFEST_FILE)?;
	if manifest.format_version != FORMAT_VERSION {
		return Err(EngineError::Corruption(format!(
			"unsupported artifact format version {}",
			manifest.format_version
		)));
	}

	let vocab_file: VocabFile = read_json(dir, VOCAB_FILE)?;
	let vocab = TagVocabulary::from_parts(vocab_file.names, vocab_file.aliases);
	let n_tags = vocab.len();

	let catalog_file: CatalogFile = read_gz_json(dir, CATALOG_FILE)?;
	let n_items = catalog_file.item_ids.len();
	if catalog_file.tags.len() != n_items {
		return Err(EngineError::dimension("catalog tag rows", n_items, catalog_file.tags.len()));
	}
	if catalog_file.weights.len() != n_items {
		return Err(EngineError::dimension("item weights", n_items, catalog_file.weights.len()));
	}
	if let Some(bad) = catalog_file.tags.iter().flatten().find(|&&t| t >= n_tags) {
		return Err(EngineError::Corruption(format!(
			"catalog references tag column {bad} but vocabulary has {n_tags} tags"
		)));
	}
	let incidence = CsrMatrix::from_rows(
		n_tags,
		catalog_file
			.tags
			.iter()
			.map(|row| row.iter().map(|&c| (c, 1.0)).collect())
			.collect(),
	);
	let catalog = Catalog::from_parts(
		catalog_file.item_ids,
		incidence,
		catalog_file.titles,
		catalog_file.attributes,
	)?;

	let tag_vectors = read_matrix(dir, TAG_VECTORS_FILE)?;
	if tag_vectors.rows() != n_tags {
		return Err(EngineError::dimension("tag vectors vs vocabulary", n_tags, tag_vectors.rows()));
	}
	if tag_vectors.cols() != manifest.dim {
		return Err(EngineError::dimension("tag vector width", manifest.dim, tag_vectors.cols()));
	}

	let item_vectors = read_matrix(dir, ITEM_VECTORS_FILE)?;
	if item_vectors.rows() != n_items {
		return Err(EngineError::dimension("item vectors vs catalog", n_items, item_vectors.rows()));
	}
	if item_vectors.cols() != manifest.dim {
		return Err(EngineError::dimension("item vector width", manifest.dim, item_vectors.cols()));
	}

	let effects = read_matrix(dir, TAG_EFFECTS_FILE)?;
	if effects.rows() != 1 || effects.cols() != n_tags {
		return Err(EngineError::dimension("tag effects vs vocabulary", n_tags, effects.cols()));
	}
	let tag_effects: Vec<f64> = effects.row(0).iter().map(|&b| b as f64).collect();

	let alignment = match read_matrix(dir, ALIGNMENT_FILE) {
		Ok(w) => {
			if w.cols() != manifest.dim {
				return Err(EngineError::dimension("alignment width", manifest.dim, w.cols()));
			}
			Some(TextAlignment::from_matrix(w))
		}
		Err(PersistenceError::Missing(_)) => None,
		Err(e) => return Err(e.into()),
	};

	tracing::info!(
		dir = %dir.display(),
		generation = %manifest.generation_id,
		items = n_items,
		tags = n_tags,
		dim = manifest.dim,
		aligned = alignment.is_some(),
		"artifacts loaded"
	);

	Ok(Artifacts {
		manifest,
		vocab,
		catalog,
		item_weights: catalog_file.weights,
		tag_vectors,
		item_vectors,
		tag_effects,
		alignment,
	})
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
	use super::*;
	use crate::pipeline::{build_artifacts, PipelineConfig, PipelineInputs};
	use crate::types::{CatalogItem, EngagementRecord};

	fn sample_artifacts() -> Artifacts {
		let items: Vec<CatalogItem> = [
			(1, vec!["puzzle", "casual"]),
			(2, vec!["puzzle", "indie"]),
			(3, vec!["horror", "indie"]),
			(4, vec!["horror", "survival"]),
		]
		.into_iter()
		.map(|(id, tags)| CatalogItem {
			id,
			title: Some(format!("Game {id}")),
			tags: tags.into_iter().map(String::from).collect(),
			attributes: ItemAttributes {
				price: Some(id as f64 * 5.0),
				..Default::default()
			},
		})
		.collect();
		let engagement: Vec<EngagementRecord> = (1..=4)
			.flat_map(|id| {
				(0..3).map(move |u| EngagementRecord {
					item_id: id,
					user_id: format!("u{u}"),
					recommended: u != 0,
					duration: (u as f64 + 1.0) * id as f64,
				})
			})
			.collect();
		let config = PipelineConfig {
			dim: 3,
			..Default::default()
		};
		let (artifacts, _) = build_artifacts(
			&PipelineInputs {
				items: &items,
				engagement: &engagement,
				aliases: &BTreeMap::new(),
			},
			&config,
			None,
		)
		.unwrap();
		artifacts
	}

	#[test]
	fn encode_decode_embedding_roundtrip() {
		let original = vec![1.0f32, -2.5, 0.0, f32::MIN_POSITIVE];
		let decoded = decode_embedding(&encode_embedding(&original)).unwrap();
		assert_eq!(original, decoded);
	}

	#[test]
	fn decode_embedding_wrong_length() {
		let encoded = STANDARD.encode([1u8, 2, 3]);
		assert!(matches!(
			decode_embedding(&encoded),
			Err(PersistenceError::Corruption(_))
		));
	}

	#[test]
	fn matrix_record_roundtrip() {
		let mut m = EmbeddingMatrix::zeros(2, 3);
		m.set_row(0, &[1.0, 2.0, 3.0]);
		m.set_row(1, &[-1.0, 0.5, 0.25]);
		let bytes = encode_matrix(&m).unwrap();
		assert!(is_gzipped(&bytes));
		assert_eq!(decode_matrix(&bytes).unwrap(), m);
	}

	#[test]
	fn matrix_record_with_wrong_shape_is_corrupt() {
		let record = MatrixRecord {
			version: FORMAT_VERSION,
			rows: 2,
			cols: 2,
			data: encode_embedding(&[1.0, 2.0, 3.0]),
		};
		let bytes = compress(&serde_json::to_vec(&record).unwrap()).unwrap();
		assert!(matches!(
			decode_matrix(&bytes),
			Err(PersistenceError::Corruption(_))
		));
	}

	#[test]
	fn plain_bytes_are_not_a_matrix() {
		assert!(decode_matrix(b"not gzip").is_err());
	}

	#[test]
	fn save_load_directory_roundtrip() {
		let tmp = tempfile::tempdir().unwrap();
		let artifacts = sample_artifacts();
		save_artifacts(tmp.path(), &artifacts).unwrap();

		let loaded = load_artifacts(tmp.path()).unwrap();
		assert_eq!(loaded.manifest.generation_id, artifacts.manifest.generation_id);
		assert_eq!(loaded.vocab.names(), artifacts.vocab.names());
		assert_eq!(loaded.catalog.item_ids(), artifacts.catalog.item_ids());
		assert_eq!(loaded.catalog.title(0), Some("Game 1"));
		assert_eq!(loaded.catalog.attributes(1).price, Some(10.0));
		assert_eq!(loaded.catalog.tags_of(2), artifacts.catalog.tags_of(2));
		assert_eq!(loaded.tag_vectors, artifacts.tag_vectors);
		assert_eq!(loaded.item_vectors, artifacts.item_vectors);
		assert_eq!(loaded.item_weights, artifacts.item_weights);
		assert!(loaded.alignment.is_none());
		// lookups work after the index map is rebuilt
		assert!(loaded.vocab.lookup("Horror").is_some());
	}

	#[test]
	fn missing_manifest_is_missing_artifact() {
		let tmp = tempfile::tempdir().unwrap();
		let err = load_artifacts(tmp.path()).unwrap_err();
		assert_eq!(err.code(), "TAGVIBE_MISSING_ARTIFACT");
	}

	#[test]
	fn missing_item_vectors_is_reported_by_name() {
		let tmp = tempfile::tempdir().unwrap();
		save_artifacts(tmp.path(), &sample_artifacts()).unwrap();
		std::fs::remove_file(tmp.path().join(ITEM_VECTORS_FILE)).unwrap();
		match load_artifacts(tmp.path()) {
			Err(EngineError::MissingArtifact(name)) => assert_eq!(name, ITEM_VECTORS_FILE),
			other => panic!("unexpected result {other:?}"),
		}
	}

	#[test]
	fn shape_disagreement_is_dimension_mismatch() {
		let tmp = tempfile::tempdir().unwrap();
		save_artifacts(tmp.path(), &sample_artifacts()).unwrap();
		let wrong = EmbeddingMatrix::zeros(2, 3);
		std::fs::write(tmp.path().join(ITEM_VECTORS_FILE), encode_matrix(&wrong).unwrap()).unwrap();
		assert!(matches!(
			load_artifacts(tmp.path()),
			Err(EngineError::DimensionMismatch { .. })
		));
	}

	#[test]
	fn corrupt_tag_vectors_are_reported() {
		let tmp = tempfile::tempdir().unwrap();
		save_artifacts(tmp.path(), &sample_artifacts()).unwrap();
		std::fs::write(tmp.path().join(TAG_VECTORS_FILE), b"garbage").unwrap();
		assert_eq!(load_artifacts(tmp.path()).unwrap_err().code(), "TAGVIBE_CORRUPT");
	}
}
