// ---------------------------------------------------------------------------
// EngineServer — JSON-RPC dispatcher
// ---------------------------------------------------------------------------
//
// Routes JSON-RPC 2.0 requests (NDJSON over stdin) to the loaded
// `VectorStore`: a `run()` loop, a `dispatch()` match, a `with_store`
// helper, and free-standing handler functions for each method.
//
// The store is immutable once built. `store/load` swaps in a new `Arc`;
// queries only ever see a fully constructed generation.
// ---------------------------------------------------------------------------

use std::io::{self, BufRead};
use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::encoder::TextEncoder;
use crate::error::EngineError;
use crate::index::{IndexConfig, IndexKind};
use crate::protocol::*;
use crate::query::{Constraints, Query, QueryOptionsRequest, QueryRequest, QueryWeights};
use crate::store::VectorStore;
use crate::transport::NdjsonTransport;
use crate::types::ItemId;

const DEFAULT_NEIGHBORS: usize = 10;

// ---------------------------------------------------------------------------
// Server
// ---------------------------------------------------------------------------

pub struct EngineServer {
	transport: NdjsonTransport,
	store: Option<Arc<VectorStore>>,
	encoder: Option<Arc<dyn TextEncoder>>,
	index_config: IndexConfig,
}

impl EngineServer {
	pub fn new(
		transport: NdjsonTransport,
		index_config: IndexConfig,
		encoder: Option<Arc<dyn TextEncoder>>,
	) -> Self {
		Self {
			transport,
			store: None,
			encoder,
			index_config,
		}
	}

	/// Install an already built store (e.g. loaded at startup).
	pub fn with_loaded_store(mut self, store: VectorStore) -> Self {
		self.store = Some(Arc::new(store));
		self
	}

	/// Main loop: read JSON-RPC messages from stdin, dispatch to handlers.
	pub fn run(&mut self) -> Result<(), EngineError> {
		let stdin = io::stdin();
		let reader = stdin.lock();

		for line_result in reader.lines() {
			let line = line_result?;
			if line.trim().is_empty() {
				continue;
			}

			let request: JsonRpcRequest = match serde_json::from_str(&line) {
				Ok(r) => r,
				Err(e) => {
					tracing::error!("Failed to parse request: {}", e);
					continue;
				}
			};

			self.dispatch(request);
		}

		Ok(())
	}

	// ── Dispatch ──────────────────────────────────────────────────────────

	fn dispatch(&mut self, req: JsonRpcRequest) {
		let id = req.id;
		tracing::debug!(id, method = %req.method, "request");
		let encoder = self.encoder.clone();
		let result = match req.method.as_str() {
			// -- Lifecycle -----------------------------------------------
			"store/load" => self.handle_load(req.params),
			"store/info" => self.with_store(|s| to_value(&s.info())),

			// -- Recommendation ------------------------------------------
			"recommend/query" => {
				self.with_store(|s| handle_query(s, encoder.as_deref(), req.params))
			}
			"recommend/queryVector" => self.with_store(|s| handle_query_vector(s, req.params)),

			// -- Spot checks ---------------------------------------------
			"tags/neighbors" => self.with_store(|s| handle_tag_neighbors(s, req.params)),
			"items/neighbors" => self.with_store(|s| handle_item_neighbors(s, req.params)),

			// -- Unknown -------------------------------------------------
			_ => {
				self.transport.write_error(
					id,
					METHOD_NOT_FOUND,
					format!("Unknown method: {}", req.method),
					None,
				);
				return;
			}
		};

		match result {
			Ok(value) => self.transport.write_response(id, value),
			Err(e) => {
				tracing::debug!(id, code = e.code(), "request failed: {}", e);
				let code = match e {
					EngineError::Serialization(_) => INVALID_PARAMS,
					_ => ENGINE_ERROR,
				};
				self.transport
					.write_error(id, code, e.to_string(), Some(e.to_json_rpc_error()))
			}
		}
	}

	// ── Store accessors ───────────────────────────────────────────────────

	fn with_store<F>(&self, f: F) -> Result<serde_json::Value, EngineError>
	where
		F: FnOnce(&VectorStore) -> Result<serde_json::Value, EngineError>,
	{
		match &self.store {
			Some(s) => f(s),
			None => Err(EngineError::NotLoaded),
		}
	}

	// ── Load ──────────────────────────────────────────────────────────────

	fn handle_load(&mut self, params: serde_json::Value) -> Result<serde_json::Value, EngineError> {
		let p: LoadParams = parse_params(params)?;

		let mut config = self.index_config;
		if let Some(kind) = p.index.as_deref() {
			config.kind = kind.parse::<IndexKind>()?;
		}
		if let Some(ef) = p.ef_search {
			config.ef_search = ef;
		}

		let store = VectorStore::open(&p.dir, &config)?;
		let info = to_value(&store.info())?;
		self.store = Some(Arc::new(store));
		self.transport.write_notification("store/loaded", info.clone());
		Ok(info)
	}
}

// ---------------------------------------------------------------------------
// Param types
// ---------------------------------------------------------------------------

fn parse_params<T: serde::de::DeserializeOwned>(
	params: serde_json::Value,
) -> Result<T, EngineError> {
	serde_json::from_value(params)
		.map_err(|e| EngineError::Serialization(format!("Invalid params: {}", e)))
}

fn to_value<T: Serialize>(value: &T) -> Result<serde_json::Value, EngineError> {
	serde_json::to_value(value).map_err(|e| EngineError::Serialization(e.to_string()))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct LoadParams {
	dir: PathBuf,
	index: Option<String>,
	ef_search: Option<usize>,
}

#[derive(Deserialize)]
struct QueryVectorParams {
	vector: Vec<f32>,
	#[serde(default)]
	constraints: Constraints,
	#[serde(default)]
	weights: QueryWeights,
	#[serde(default)]
	options: QueryOptionsRequest,
}

#[derive(Deserialize)]
struct TagNeighborsParams {
	tag: String,
	k: Option<usize>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ItemNeighborsParams {
	item_id: ItemId,
	k: Option<usize>,
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

fn handle_query(
	store: &VectorStore,
	encoder: Option<&dyn TextEncoder>,
	params: serde_json::Value,
) -> Result<serde_json::Value, EngineError> {
	let request: QueryRequest = parse_params(params)?;
	let query = Query::try_from(request)?;
	let response = store.recommend(&query, encoder)?;
	to_value(&response)
}

fn handle_query_vector(
	store: &VectorStore,
	params: serde_json::Value,
) -> Result<serde_json::Value, EngineError> {
	let p: QueryVectorParams = parse_params(params)?;
	let weights = p.weights.scoring()?;
	let options = p.options.resolve()?;
	let response = store.recommend_vector(&p.vector, &p.constraints, &weights, &options)?;
	to_value(&response)
}

fn handle_tag_neighbors(
	store: &VectorStore,
	params: serde_json::Value,
) -> Result<serde_json::Value, EngineError> {
	let p: TagNeighborsParams = parse_params(params)?;
	let neighbors = store.tag_neighbors(&p.tag, p.k.unwrap_or(DEFAULT_NEIGHBORS))?;
	Ok(serde_json::json!({ "neighbors": neighbors }))
}

fn handle_item_neighbors(
	store: &VectorStore,
	params: serde_json::Value,
) -> Result<serde_json::Value, EngineError> {
	let p: ItemNeighborsParams = parse_params(params)?;
	let neighbors = store.item_neighbors(p.item_id, p.k.unwrap_or(DEFAULT_NEIGHBORS))?;
	Ok(serde_json::json!({ "neighbors": neighbors }))
}
