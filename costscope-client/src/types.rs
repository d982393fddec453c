//! Typed models for the cost-API payloads and request parameters.

use serde::{Deserialize, Serialize};

fn default_currency() -> String {
    "USD".to_string()
}

/// One point of the daily cost series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostPoint {
    pub date: String,
    pub amount: f64,
    #[serde(default = "default_currency")]
    pub currency: String,
}

/// One row of a grouped cost breakdown.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BreakdownRow {
    pub key: String,
    pub amount: f64,
    #[serde(default = "default_currency")]
    pub currency: String,
}

/// An actionable cost alert surfaced by the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionItem {
    pub id: String,
    #[serde(default)]
    pub severity: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub amount: Option<f64>,
}

/// Aggregate spend for a period.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostSummary {
    pub total: f64,
    #[serde(default = "default_currency")]
    pub currency: String,
    #[serde(default)]
    pub period: Option<String>,
    #[serde(default)]
    pub delta_pct: Option<f64>,
}

/// A connected cloud or billing provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Provider {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub kind: Option<String>,
}

/// A queryable cost dataset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dataset {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub provider: Option<String>,
    #[serde(default)]
    pub updated_at: Option<String>,
}

/// Backend health probe response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthStatus {
    pub status: String,
    #[serde(default)]
    pub version: Option<String>,
}

/// Parameters for the daily cost series.
#[derive(Debug, Clone, Default)]
pub struct OverviewParams {
    /// ISO-8601 duration, e.g. `P7D` or `P30D`.
    pub period: String,
    pub granularity: Option<String>,
}

impl OverviewParams {
    pub fn query(&self) -> Vec<(&'static str, String)> {
        let mut pairs = vec![("period", self.period.clone())];
        if let Some(granularity) = &self.granularity {
            pairs.push(("granularity", granularity.clone()));
        }
        pairs
    }
}

/// Parameters for a grouped breakdown.
#[derive(Debug, Clone, Default)]
pub struct BreakdownParams {
    pub period: String,
    /// Grouping dimension, e.g. `service` or `provider`.
    pub by: String,
}

impl BreakdownParams {
    pub fn query(&self) -> Vec<(&'static str, String)> {
        vec![("period", self.period.clone()), ("by", self.by.clone())]
    }
}

/// Parameters for the summary endpoint.
#[derive(Debug, Clone, Default)]
pub struct SummaryParams {
    pub period: String,
}

impl SummaryParams {
    pub fn query(&self) -> Vec<(&'static str, String)> {
        vec![("period", self.period.clone())]
    }
}

/// Parameters for dataset search.
#[derive(Debug, Clone, Default)]
pub struct SearchParams {
    pub query: String,
    pub limit: Option<u32>,
}

impl SearchParams {
    pub fn query(&self) -> Vec<(&'static str, String)> {
        let mut pairs = vec![("query", self.query.clone())];
        if let Some(limit) = self.limit {
            pairs.push(("limit", limit.to_string()));
        }
        pairs
    }
}

/// Parameters for the warm-up prefetch.
#[derive(Debug, Clone)]
pub struct PrefetchParams {
    pub period: String,
    pub group_by: String,
    pub include_datasets: bool,
}

impl Default for PrefetchParams {
    fn default() -> Self {
        Self {
            period: "P30D".to_string(),
            group_by: "service".to_string(),
            include_datasets: false,
        }
    }
}

/// Everything `prefetch_all` managed to warm. Secondary fetches are
/// best-effort and arrive as `None` when they failed.
#[derive(Debug, Clone, Default)]
pub struct PrefetchResult {
    pub overview: Vec<CostPoint>,
    pub breakdown: Vec<BreakdownRow>,
    pub action_items: Vec<ActionItem>,
    pub summary: Option<CostSummary>,
    pub providers: Option<Vec<Provider>>,
    pub datasets: Option<Vec<Dataset>>,
    /// Correlation id shared by every request in the batch.
    pub correlation_id: String,
    pub duration_ms: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_cost_point_defaults_currency() {
        let point: CostPoint =
            serde_json::from_value(json!({"date": "2026-08-01", "amount": 3.5})).unwrap();
        assert_eq!(point.currency, "USD");
    }

    #[test]
    fn test_optional_fields_tolerate_absence() {
        let item: ActionItem = serde_json::from_value(json!({"id": "a-1"})).unwrap();
        assert!(item.severity.is_none());
        let dataset: Dataset = serde_json::from_value(json!({"id": "d-1"})).unwrap();
        assert!(dataset.provider.is_none());
    }

    #[test]
    fn test_params_build_expected_pairs() {
        let params = OverviewParams {
            period: "P7D".to_string(),
            granularity: None,
        };
        assert_eq!(params.query(), vec![("period", "P7D".to_string())]);

        let params = SearchParams {
            query: "gpu".to_string(),
            limit: Some(10),
        };
        assert_eq!(
            params.query(),
            vec![
                ("query", "gpu".to_string()),
                ("limit", "10".to_string())
            ]
        );
    }
}
