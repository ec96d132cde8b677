use std::collections::BTreeMap;
use std::path::Path;

use clap::Parser;

use tagvibe_vector::config::{init_logging, BuildArgs};
use tagvibe_vector::encoder::TextEncoder;
use tagvibe_vector::error::EngineError;
use tagvibe_vector::persistence::{save_artifacts, save_report};
use tagvibe_vector::pipeline::{build_artifacts, PipelineInputs};
use tagvibe_vector::quality::parse_engagement_rows;
use tagvibe_vector::types::CatalogItem;

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, EngineError> {
	let bytes = std::fs::read(path)?;
	serde_json::from_slice(&bytes)
		.map_err(|e| EngineError::Serialization(format!("{}: {}", path.display(), e)))
}

fn run(args: &BuildArgs) -> Result<(), EngineError> {
	let config = args.pipeline_config()?;

	let items: Vec<CatalogItem> = read_json(&args.catalog)?;
	let rows: Vec<serde_json::Map<String, serde_json::Value>> = read_json(&args.engagement)?;
	let engagement = parse_engagement_rows(&rows)?;
	let aliases: BTreeMap<String, String> = match &args.aliases {
		Some(path) => read_json(path)?,
		None => BTreeMap::new(),
	};
	tracing::info!(
		items = items.len(),
		engagement = engagement.len(),
		aliases = aliases.len(),
		"inputs read"
	);

	let encoder = args.encoder();
	let (artifacts, report) = build_artifacts(
		&PipelineInputs {
			items: &items,
			engagement: &engagement,
			aliases: &aliases,
		},
		&config,
		encoder.as_ref().map(|e| e as &dyn TextEncoder),
	)?;

	save_artifacts(&args.out, &artifacts)?;
	save_report(&args.out, &report)?;

	for warning in &report.warnings {
		tracing::warn!("{}", warning);
	}
	tracing::info!(
		out = %args.out.display(),
		generation = %report.generation_id,
		explained_variance = report.embedding.total_explained_variance,
		effect_r2 = report.effects.r2,
		"build complete"
	);
	Ok(())
}

fn main() {
	let args = BuildArgs::parse();
	init_logging(&args.log_level);

	if let Err(e) = run(&args) {
		tracing::error!(code = e.code(), "Build failed: {}", e);
		std::process::exit(1);
	}
}
