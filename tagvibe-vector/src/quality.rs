// ---------------------------------------------------------------------------
// Quality weights from engagement
// ---------------------------------------------------------------------------
//
// Each (item, user) record is scored by where the user's engagement duration
// falls among all users of the same item, adjusted by whether the user
// recommended the item. An item's weight is the mean of its record scores.
// ---------------------------------------------------------------------------

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use crate::error::EngineError;
use crate::types::{EngagementRecord, ItemId};

/// Column names every engagement row must carry.
pub const REQUIRED_COLUMNS: [&str; 4] = ["item_id", "user_id", "recommended", "duration"];

/// Upper bound of a record score.
pub const MAX_SCORE: f64 = 10.0;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PenaltyMode {
	/// Non-recommending users lose a flat `αneg` share of their score.
	Fixed,
	/// The penalty grows with the percentile score: heavy users who still
	/// did not recommend are penalized most.
	#[default]
	Linear,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QualityConfig {
	pub alpha_pos: f64,
	pub alpha_neg: f64,
	pub penalty_mode: PenaltyMode,
}

impl Default for QualityConfig {
	fn default() -> Self {
		Self {
			alpha_pos: 0.3,
			alpha_neg: 0.5,
			penalty_mode: PenaltyMode::Linear,
		}
	}
}

// ---------------------------------------------------------------------------
// Record scoring
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordScore {
	pub item_id: ItemId,
	pub user_id: String,
	pub percentile: f64,
	pub base_score: f64,
	pub vote_factor: f64,
	pub score: f64,
}

/// Percentile of each value among its peers, ties sharing their average
/// rank: `(rank - 1) / (n - 1)`. A single value is at the top (1.0).
pub fn percentile_ranks(values: &[f64]) -> Vec<f64> {
	let n = values.len();
	if n == 0 {
		return Vec::new();
	}
	if n == 1 {
		return vec![1.0];
	}

	let mut order: Vec<usize> = (0..n).collect();
	order.sort_by(|&a, &b| values[a].total_cmp(&values[b]));

	let mut ranks = vec![0.0; n];
	let mut start = 0;
	while start < n {
		let mut end = start + 1;
		while end < n && values[order[end]] == values[order[start]] {
			end += 1;
		}
		// 1-based ranks start+1 ..= end share their mean
		let avg_rank = (start + 1 + end) as f64 / 2.0;
		for &idx in &order[start..end] {
			ranks[idx] = avg_rank;
		}
		start = end;
	}

	let denom = (n - 1) as f64;
	ranks.into_iter().map(|r| (r - 1.0) / denom).collect()
}

/// `round(ptile * 10)` clipped to [0, 10], ties to even.
pub fn base_score(percentile: f64) -> f64 {
	(percentile * MAX_SCORE).round_ties_even().clamp(0.0, MAX_SCORE)
}

/// Multiplier applied to the base score, floored at zero.
pub fn vote_factor(recommended: bool, base: f64, config: &QualityConfig) -> f64 {
	let factor = if recommended {
		1.0 + config.alpha_pos
	} else {
		match config.penalty_mode {
			PenaltyMode::Fixed => 1.0 - config.alpha_neg,
			PenaltyMode::Linear => 1.0 - config.alpha_neg * (base / MAX_SCORE),
		}
	};
	factor.max(0.0)
}

/// Score every record. Output order follows the input order.
pub fn score_records(records: &[EngagementRecord], config: &QualityConfig) -> Vec<RecordScore> {
	let mut by_item: HashMap<ItemId, Vec<usize>> = HashMap::new();
	for (i, r) in records.iter().enumerate() {
		by_item.entry(r.item_id).or_default().push(i);
	}

	let mut percentiles = vec![0.0; records.len()];
	for members in by_item.values() {
		let durations: Vec<f64> = members.iter().map(|&i| records[i].duration).collect();
		for (&i, p) in members.iter().zip(percentile_ranks(&durations)) {
			percentiles[i] = p;
		}
	}

	records
		.iter()
		.zip(percentiles)
		.map(|(r, percentile)| {
			let base = base_score(percentile);
			let factor = vote_factor(r.recommended, base, config);
			RecordScore {
				item_id: r.item_id,
				user_id: r.user_id.clone(),
				percentile,
				base_score: base,
				vote_factor: factor,
				score: (base * factor).clamp(0.0, MAX_SCORE),
			}
		})
		.collect()
}

/// Mean record score per item.
pub fn item_weights(scores: &[RecordScore]) -> BTreeMap<ItemId, f64> {
	let mut sums: BTreeMap<ItemId, (f64, usize)> = BTreeMap::new();
	for s in scores {
		let entry = sums.entry(s.item_id).or_insert((0.0, 0));
		entry.0 += s.score;
		entry.1 += 1;
	}
	sums.into_iter()
		.map(|(id, (sum, n))| (id, sum / n as f64))
		.collect()
}

// ---------------------------------------------------------------------------
// Weight alignment and normalization
// ---------------------------------------------------------------------------

/// Item weights in catalog row order.
#[derive(Debug, Clone, PartialEq)]
pub struct AlignedWeights {
	pub values: Vec<f64>,
	/// `true` where the weight came from engagement rather than the default.
	pub observed: Vec<bool>,
}

impl AlignedWeights {
	pub fn observed_rows(&self) -> Vec<usize> {
		self.observed
			.iter()
			.enumerate()
			.filter_map(|(i, &o)| o.then_some(i))
			.collect()
	}
}

/// Line weights up with catalog rows. Rows without engagement get
/// `default_weight`; engagement for unknown items is dropped.
pub fn align_weights(
	item_ids: &[ItemId],
	weights: &BTreeMap<ItemId, f64>,
	default_weight: f64,
) -> AlignedWeights {
	let mut values = Vec::with_capacity(item_ids.len());
	let mut observed = Vec::with_capacity(item_ids.len());
	for id in item_ids {
		match weights.get(id) {
			Some(&w) => {
				values.push(w);
				observed.push(true);
			}
			None => {
				values.push(default_weight);
				observed.push(false);
			}
		}
	}

	let unmatched_rows = observed.iter().filter(|o| !**o).count();
	let matched = item_ids.len() - unmatched_rows;
	let orphaned = weights.len().saturating_sub(matched);
	if unmatched_rows > 0 || orphaned > 0 {
		tracing::warn!(
			unmatched_rows,
			orphaned,
			default_weight,
			"engagement and catalog items differ; unmatched rows use the default weight"
		);
	}

	AlignedWeights { values, observed }
}

/// Min-max normalize to [0, 1], then apply `x^gamma`. A constant input maps
/// to all ones.
pub fn gamma_normalize(values: &[f64], gamma: f64) -> Vec<f64> {
	let min = values.iter().copied().fold(f64::INFINITY, f64::min);
	let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
	let range = max - min;
	values
		.iter()
		.map(|&v| {
			let scaled = if range > 0.0 { (v - min) / range } else { 1.0 };
			scaled.powf(gamma)
		})
		.collect()
}

// ---------------------------------------------------------------------------
// Engagement row parsing
// ---------------------------------------------------------------------------

/// Convert loosely typed rows into records. Every row must carry all of
/// [`REQUIRED_COLUMNS`]; missing ones are reported together.
pub fn parse_engagement_rows(
	rows: &[serde_json::Map<String, serde_json::Value>],
) -> Result<Vec<EngagementRecord>, EngineError> {
	let mut missing: Vec<String> = REQUIRED_COLUMNS
		.iter()
		.filter(|col| rows.iter().any(|row| !row.contains_key(**col)))
		.map(|col| col.to_string())
		.collect();
	if rows.is_empty() {
		missing.clear();
	}
	if !missing.is_empty() {
		return Err(EngineError::MissingColumns(missing));
	}

	rows.iter()
		.enumerate()
		.map(|(line, row)| parse_row(line, row))
		.collect()
}

fn parse_row(
	line: usize,
	row: &serde_json::Map<String, serde_json::Value>,
) -> Result<EngagementRecord, EngineError> {
	let bad = |col: &str| EngineError::InvalidParameter(format!("row {line}: invalid {col}"));

	let item_id = match &row["item_id"] {
		serde_json::Value::Number(n) => n.as_u64(),
		serde_json::Value::String(s) => s.trim().parse().ok(),
		_ => None,
	}
	.ok_or_else(|| bad("item_id"))?;

	let user_id = match &row["user_id"] {
		serde_json::Value::String(s) => s.clone(),
		serde_json::Value::Number(n) => n.to_string(),
		_ => return Err(bad("user_id")),
	};

	let duration = match &row["duration"] {
		serde_json::Value::Number(n) => n.as_f64(),
		serde_json::Value::String(s) => s.trim().parse().ok(),
		serde_json::Value::Null => Some(0.0),
		_ => None,
	}
	.filter(|d: &f64| d.is_finite())
	.ok_or_else(|| bad("duration"))?;

	Ok(EngagementRecord {
		item_id,
		user_id,
		recommended: coerce_recommended(&row["recommended"]),
		duration,
	})
}

/// Truthy strings are "1", "true", "t", "y", "yes"; anything unrecognized is
/// `false`.
pub fn coerce_recommended(value: &serde_json::Value) -> bool {
	match value {
		serde_json::Value::Bool(b) => *b,
		serde_json::Value::Number(n) => n.as_f64().is_some_and(|v| v != 0.0),
		serde_json::Value::String(s) => {
			matches!(s.trim().to_lowercase().as_str(), "1" | "true" | "t" | "y" | "yes")
		}
		_ => false,
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use serde_json::json;

	fn record(item: ItemId, user: &str, recommended: bool, duration: f64) -> EngagementRecord {
		EngagementRecord {
			item_id: item,
			user_id: user.into(),
			recommended,
			duration,
		}
	}

	// -- percentile tests ---------------------------------------------------

	#[test]
	fn percentiles_of_three_users() {
		let p = percentile_ranks(&[10.0, 20.0, 30.0]);
		assert_eq!(p, vec![0.0, 0.5, 1.0]);
		let s: Vec<f64> = p.iter().map(|&x| base_score(x)).collect();
		assert_eq!(s, vec![0.0, 5.0, 10.0]);
	}

	#[test]
	fn single_user_is_top_percentile() {
		assert_eq!(percentile_ranks(&[42.0]), vec![1.0]);
	}

	#[test]
	fn ties_share_average_rank() {
		let p = percentile_ranks(&[5.0, 5.0, 9.0]);
		// ranks 1.5, 1.5, 3 over n - 1 = 2
		assert_eq!(p, vec![0.25, 0.25, 1.0]);
	}

	#[test]
	fn base_score_rounds_half_to_even() {
		assert_eq!(base_score(0.25), 2.0);
		assert_eq!(base_score(0.75), 8.0);
		assert_eq!(base_score(1.0), 10.0);
	}

	// -- vote factor tests --------------------------------------------------

	#[test]
	fn linear_penalty_scales_with_score() {
		let cfg = QualityConfig::default();
		assert!((vote_factor(false, 10.0, &cfg) - 0.5).abs() < 1e-12);
		assert!((vote_factor(false, 0.0, &cfg) - 1.0).abs() < 1e-12);
		assert!((vote_factor(true, 5.0, &cfg) - 1.3).abs() < 1e-12);
	}

	#[test]
	fn fixed_penalty_is_flat_and_floored() {
		let cfg = QualityConfig {
			alpha_neg: 1.5,
			penalty_mode: PenaltyMode::Fixed,
			..Default::default()
		};
		assert_eq!(vote_factor(false, 3.0, &cfg), 0.0);
	}

	#[test]
	fn scores_are_clipped_to_ten() {
		let records = vec![
			record(1, "a", true, 10.0),
			record(1, "b", true, 20.0),
			record(1, "c", false, 30.0),
		];
		let scores = score_records(&records, &QualityConfig::default());
		assert_eq!(scores[0].score, 0.0);
		assert!((scores[1].score - 6.5).abs() < 1e-12);
		// 10 * (1 - 0.5 * 1.0)
		assert!((scores[2].score - 5.0).abs() < 1e-12);

		let recommended_top = score_records(&[record(2, "x", true, 1.0)], &QualityConfig::default());
		assert_eq!(recommended_top[0].score, MAX_SCORE);
	}

	#[test]
	fn item_weight_is_mean_of_scores() {
		let records = vec![
			record(7, "a", true, 1.0),
			record(7, "b", true, 2.0),
			record(8, "a", false, 5.0),
		];
		let weights = item_weights(&score_records(&records, &QualityConfig::default()));
		// item 7: scores 0 and 10 (13 clipped)
		assert!((weights[&7] - 5.0).abs() < 1e-12);
		// item 8: single user, 10 * 0.5
		assert!((weights[&8] - 5.0).abs() < 1e-12);
	}

	// -- alignment tests ----------------------------------------------------

	#[test]
	fn align_uses_default_for_unmatched_rows() {
		let mut weights = BTreeMap::new();
		weights.insert(2, 8.0);
		weights.insert(99, 1.0);
		let aligned = align_weights(&[1, 2], &weights, 0.5);
		assert_eq!(aligned.values, vec![0.5, 8.0]);
		assert_eq!(aligned.observed, vec![false, true]);
		assert_eq!(aligned.observed_rows(), vec![1]);
	}

	#[test]
	fn gamma_normalize_maps_into_unit_range() {
		let out = gamma_normalize(&[2.0, 6.0, 10.0], 0.5);
		assert_eq!(out[0], 0.0);
		assert!((out[1] - 0.5f64.sqrt()).abs() < 1e-12);
		assert_eq!(out[2], 1.0);
		assert_eq!(gamma_normalize(&[3.0, 3.0], 0.5), vec![1.0, 1.0]);
	}

	// -- parsing tests ------------------------------------------------------

	#[test]
	fn missing_columns_are_reported_together() {
		let rows = vec![json!({"item_id": 1, "recommended": true})
			.as_object()
			.cloned()
			.unwrap()];
		let err = parse_engagement_rows(&rows).unwrap_err();
		match err {
			EngineError::MissingColumns(cols) => {
				assert_eq!(cols, vec!["user_id".to_string(), "duration".to_string()])
			}
			other => panic!("unexpected error: {other}"),
		}
	}

	#[test]
	fn rows_coerce_loose_types() {
		let rows = vec![
			json!({"item_id": "12", "user_id": 5, "recommended": "Yes", "duration": "3.5"}),
			json!({"item_id": 13, "user_id": "u", "recommended": 0, "duration": 1}),
		]
		.into_iter()
		.map(|v| v.as_object().cloned().unwrap())
		.collect::<Vec<_>>();
		let records = parse_engagement_rows(&rows).unwrap();
		assert_eq!(records[0], record(12, "5", true, 3.5));
		assert_eq!(records[1], record(13, "u", false, 1.0));
	}

	#[test]
	fn coerce_recommended_strings() {
		for s in ["1", "true", "T", "y", "YES"] {
			assert!(coerce_recommended(&json!(s)), "{s}");
		}
		for s in ["0", "false", "no", ""] {
			assert!(!coerce_recommended(&json!(s)), "{s}");
		}
	}
}
