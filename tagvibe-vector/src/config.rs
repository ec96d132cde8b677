use std::path::PathBuf;

use clap::Parser;

use crate::encoder::{TeiConfig, TeiEncoder};
use crate::error::EngineError;
use crate::index::{IndexConfig, IndexKind};
use crate::pipeline::PipelineConfig;
use crate::quality::{PenaltyMode, QualityConfig};
use crate::synthesis::SynthesisParams;

// ---------------------------------------------------------------------------
// Serving
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(name = "tagvibe-engine", about = "Tag-space game recommendation server (JSON-RPC over stdio)")]
pub struct EngineArgs {
	/// Artifact directory to load at startup. Can also be loaded later with
	/// `store/load`.
	#[arg(long, env = "TAGVIBE_ARTIFACTS")]
	pub artifacts: Option<PathBuf>,

	/// Retrieval index: "hnsw" or "exact"
	#[arg(long, default_value = "hnsw", env = "TAGVIBE_INDEX")]
	pub index: String,

	/// HNSW links per node
	#[arg(long, default_value = "32")]
	pub hnsw_m: usize,

	/// HNSW candidate list size while building
	#[arg(long, default_value = "200")]
	pub ef_construction: usize,

	/// HNSW candidate list size while searching
	#[arg(long, default_value = "100", env = "TAGVIBE_EF_SEARCH")]
	pub ef_search: usize,

	/// Seed for HNSW level sampling
	#[arg(long, default_value = "42")]
	pub index_seed: u64,

	/// TEI server URL used to embed query phrases (e.g., http://localhost:8080)
	#[arg(long, env = "TAGVIBE_TEI_URL")]
	pub tei_url: Option<String>,

	/// TEI request timeout in seconds
	#[arg(long, default_value = "30")]
	pub tei_timeout: u64,

	/// Log level (trace, debug, info, warn, error)
	#[arg(long, default_value = "info", env = "TAGVIBE_LOG_LEVEL")]
	pub log_level: String,
}

impl EngineArgs {
	pub fn index_config(&self) -> Result<IndexConfig, EngineError> {
		Ok(IndexConfig {
			kind: self.index.parse::<IndexKind>()?,
			m: self.hnsw_m,
			ef_construction: self.ef_construction,
			ef_search: self.ef_search,
			seed: self.index_seed,
		})
	}

	pub fn encoder(&self) -> Option<TeiEncoder> {
		tei_encoder(self.tei_url.as_deref(), self.tei_timeout)
	}
}

// ---------------------------------------------------------------------------
// Offline build
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(name = "tagvibe-build", about = "Build tag and item vector artifacts from a catalog and engagement log")]
pub struct BuildArgs {
	/// Catalog JSON: array of {id, title?, tags[], attributes?}
	#[arg(long)]
	pub catalog: PathBuf,

	/// Engagement JSON: array of {item_id, user_id, recommended, duration}
	#[arg(long)]
	pub engagement: PathBuf,

	/// Extra tag aliases JSON: {"variant": "canonical", ...}
	#[arg(long)]
	pub aliases: Option<PathBuf>,

	/// Output artifact directory
	#[arg(long, env = "TAGVIBE_ARTIFACTS")]
	pub out: PathBuf,

	/// Embedding dimension
	#[arg(long, default_value = "128", env = "TAGVIBE_DIM")]
	pub dim: usize,

	/// Bonus share for recommending users
	#[arg(long, default_value = "0.3")]
	pub alpha_pos: f64,

	/// Penalty share for non-recommending users
	#[arg(long, default_value = "0.5")]
	pub alpha_neg: f64,

	/// Penalty mode: "linear" or "fixed"
	#[arg(long, default_value = "linear")]
	pub penalty_mode: String,

	/// Min-max + gamma normalization of item weights (off when absent)
	#[arg(long)]
	pub weight_gamma: Option<f64>,

	/// Weight for items without engagement
	#[arg(long, default_value = "0.5", env = "TAGVIBE_DEFAULT_WEIGHT")]
	pub default_weight: f64,

	/// Ridge alpha for tag effects
	#[arg(long, default_value = "1.0")]
	pub effect_alpha: f64,

	/// Ridge lambda for text alignment
	#[arg(long, default_value = "0.01")]
	pub alignment_lambda: f64,

	/// Synthesis softmax temperature (smaller is sharper)
	#[arg(long, default_value = "1.0", env = "TAGVIBE_KAPPA")]
	pub kappa: f64,

	/// Tag-count dampening exponent
	#[arg(long, default_value = "0.5")]
	pub count_alpha: f64,

	/// Steering strength along the quality axis
	#[arg(long, default_value = "0.2", env = "TAGVIBE_ETA")]
	pub eta: f64,

	/// Neighbors per vector in the hubness report
	#[arg(long, default_value = "10")]
	pub hubness_k: usize,

	/// TEI server URL used to embed tag sentences; alignment is skipped without it
	#[arg(long, env = "TAGVIBE_TEI_URL")]
	pub tei_url: Option<String>,

	/// TEI request timeout in seconds
	#[arg(long, default_value = "30")]
	pub tei_timeout: u64,

	/// Log level (trace, debug, info, warn, error)
	#[arg(long, default_value = "info", env = "TAGVIBE_LOG_LEVEL")]
	pub log_level: String,
}

impl BuildArgs {
	pub fn pipeline_config(&self) -> Result<PipelineConfig, EngineError> {
		let penalty_mode = match self.penalty_mode.to_ascii_lowercase().as_str() {
			"linear" => PenaltyMode::Linear,
			"fixed" => PenaltyMode::Fixed,
			other => {
				return Err(EngineError::InvalidParameter(format!(
					"unknown penalty mode: {other}"
				)))
			}
		};
		let config = PipelineConfig {
			dim: self.dim,
			quality: QualityConfig {
				alpha_pos: self.alpha_pos,
				alpha_neg: self.alpha_neg,
				penalty_mode,
			},
			effect_alpha: self.effect_alpha,
			alignment_lambda: self.alignment_lambda,
			default_weight: self.default_weight,
			weight_gamma: self.weight_gamma,
			synthesis: SynthesisParams {
				kappa: self.kappa,
				count_alpha: self.count_alpha,
				eta: self.eta,
			},
			hubness_k: self.hubness_k,
			..PipelineConfig::default()
		};
		config.validate()?;
		Ok(config)
	}

	pub fn encoder(&self) -> Option<TeiEncoder> {
		tei_encoder(self.tei_url.as_deref(), self.tei_timeout)
	}
}

fn tei_encoder(url: Option<&str>, timeout_secs: u64) -> Option<TeiEncoder> {
	url.map(|base_url| {
		TeiEncoder::new(TeiConfig {
			base_url: base_url.to_string(),
			timeout_secs,
			..Default::default()
		})
	})
}

/// Logs go to stderr; `RUST_LOG` wins over the `--log-level` flag.
pub fn init_logging(level: &str) {
	tracing_subscriber::fmt()
		.with_writer(std::io::stderr)
		.with_env_filter(
			tracing_subscriber::EnvFilter::try_from_default_env()
				.unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level)),
		)
		.init();
}
