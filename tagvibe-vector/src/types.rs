use serde::{Deserialize, Serialize};

pub type ItemId = u64;

// ---------------------------------------------------------------------------
// Catalog inputs
// ---------------------------------------------------------------------------

/// Attributes consulted by hard constraints.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ItemAttributes {
	#[serde(default)]
	pub price: Option<f64>,
	#[serde(default)]
	pub platforms: Vec<String>,
	#[serde(default)]
	pub languages: Vec<String>,
	#[serde(default, rename = "ageRating")]
	pub age_rating: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogItem {
	pub id: ItemId,
	#[serde(default)]
	pub title: Option<String>,
	#[serde(default)]
	pub tags: Vec<String>,
	#[serde(default)]
	pub attributes: ItemAttributes,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngagementRecord {
	pub item_id: ItemId,
	pub user_id: String,
	pub recommended: bool,
	pub duration: f64,
}

// ---------------------------------------------------------------------------
// Query outputs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ScoreBreakdown {
	#[serde(rename = "tagMatch")]
	pub tag_match: f64,
	pub novelty: f64,
	pub recency: f64,
	pub popularity: f64,
	#[serde(rename = "final")]
	pub final_score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
	pub item_id: ItemId,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub title: Option<String>,
	pub scores: ScoreBreakdown,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct DiversityMetrics {
	#[serde(rename = "intraListSimilarity")]
	pub intra_list_similarity: f64,
	#[serde(rename = "diversityScore")]
	pub diversity_score: f64,
	#[serde(rename = "meanNovelty")]
	pub mean_novelty: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecommendResponse {
	pub recommendations: Vec<Recommendation>,
	pub metrics: DiversityMetrics,
	#[serde(rename = "candidateCount")]
	pub candidate_count: usize,
	#[serde(default, skip_serializing_if = "Vec::is_empty")]
	pub warnings: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TagNeighbor {
	pub tag: String,
	pub similarity: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemNeighbor {
	pub item_id: ItemId,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub title: Option<String>,
	pub similarity: f64,
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn recommendation_serializes_response_contract() {
		let rec = Recommendation {
			item_id: 620,
			title: None,
			scores: ScoreBreakdown {
				tag_match: 0.9,
				novelty: 0.1,
				recency: 0.5,
				popularity: 0.2,
				final_score: 1.0,
			},
		};
		let v = serde_json::to_value(&rec).unwrap();
		assert_eq!(v["item_id"], 620);
		assert!(v.get("title").is_none());
		assert_eq!(v["scores"]["tagMatch"], 0.9);
		assert_eq!(v["scores"]["final"], 1.0);
	}

	#[test]
	fn catalog_item_defaults_missing_fields() {
		let item: CatalogItem = serde_json::from_str(r#"{"id": 10, "tags": ["Indie"]}"#).unwrap();
		assert_eq!(item.id, 10);
		assert!(item.title.is_none());
		assert_eq!(item.attributes, ItemAttributes::default());
	}
}
