//! Text encoders.
//!
//! Tag sentences and free-text query phrases are embedded by an external
//! sentence encoder. The engine only needs the [`TextEncoder`] trait; the
//! bundled implementation proxies to a Hugging Face Text Embeddings Inference
//! server over HTTP.

use serde::Serialize;
use ureq::Agent;

use crate::error::EngineError;

/// Maps texts to fixed-width embeddings. Implementations must be usable from
/// concurrent query handlers.
pub trait TextEncoder: Send + Sync {
	fn encode(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EngineError>;
}

/// Configuration for the TEI HTTP bridge.
#[derive(Debug, Clone)]
pub struct TeiConfig {
	/// Base URL of the TEI server (e.g., `http://localhost:8080`).
	pub base_url: String,
	/// Request timeout in seconds.
	pub timeout_secs: u64,
	/// Whether to request normalized embeddings.
	pub normalize: bool,
	/// Whether to truncate inputs exceeding the model's max length.
	pub truncate: bool,
	/// Texts per request.
	pub batch_size: usize,
}

impl Default for TeiConfig {
	fn default() -> Self {
		Self {
			base_url: "http://localhost:8080".to_string(),
			timeout_secs: 30,
			normalize: true,
			truncate: true,
			batch_size: 64,
		}
	}
}

#[derive(Serialize)]
struct TeiEmbedRequest<'a> {
	inputs: &'a [String],
	normalize: bool,
	truncate: bool,
}

pub struct TeiEncoder {
	url: String,
	agent: Agent,
	config: TeiConfig,
}

impl TeiEncoder {
	pub fn new(config: TeiConfig) -> Self {
		let url = format!("{}/embed", config.base_url.trim_end_matches('/'));
		let agent_config = Agent::config_builder()
			.timeout_global(Some(std::time::Duration::from_secs(config.timeout_secs)))
			.build();
		let agent = Agent::new_with_config(agent_config);
		Self { url, agent, config }
	}

	fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EngineError> {
		tracing::debug!(batch_size = texts.len(), url = %self.url, "sending embedding request");

		let body = TeiEmbedRequest {
			inputs: texts,
			normalize: self.config.normalize,
			truncate: self.config.truncate,
		};

		let embeddings: Vec<Vec<f32>> = self
			.agent
			.post(&self.url)
			.send_json(&body)
			.map_err(|e| EngineError::Encoder(format!("TEI request failed: {}", e)))?
			.body_mut()
			.read_json()
			.map_err(|e| EngineError::Encoder(format!("TEI response parse error: {}", e)))?;

		if embeddings.len() != texts.len() {
			return Err(EngineError::Encoder(format!(
				"TEI returned {} embeddings for {} inputs",
				embeddings.len(),
				texts.len()
			)));
		}
		Ok(embeddings)
	}
}

impl TextEncoder for TeiEncoder {
	fn encode(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EngineError> {
		let mut out = Vec::with_capacity(texts.len());
		for chunk in texts.chunks(self.config.batch_size.max(1)) {
			out.extend(self.embed_batch(chunk)?);
		}
		if let Some(first) = out.first() {
			let dim = first.len();
			if let Some(bad) = out.iter().find(|e| e.len() != dim) {
				return Err(EngineError::dimension("text embedding", dim, bad.len()));
			}
		}
		tracing::debug!(
			texts = texts.len(),
			embedding_dim = out.first().map_or(0, |e| e.len()),
			"text embeddings received"
		);
		Ok(out)
	}
}
