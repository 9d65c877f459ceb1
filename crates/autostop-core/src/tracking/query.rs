//! Run search request bodies

use serde::Serialize;

/// Filter selecting runs whose status is running
pub const RUNNING_FILTER: &str = "attributes.status = 'RUNNING'";

/// Which lifecycle stages a search covers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunViewType {
    /// Runs that are not deleted
    ActiveOnly,
    /// Deleted runs only
    DeletedOnly,
    /// Everything
    All,
}

/// Body of a `runs/search` request
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SearchQuery {
    /// Experiments to search, empty for the server default
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub experiment_ids: Vec<String>,
    /// Filter expression
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filter: Option<String>,
    /// Lifecycle stages to include
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_view_type: Option<RunViewType>,
    /// Page size
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_results: Option<u32>,
}

impl SearchQuery {
    /// Running runs of one experiment
    pub fn running_in_experiment(experiment_id: impl Into<String>) -> Self {
        Self {
            experiment_ids: vec![experiment_id.into()],
            filter: Some(RUNNING_FILTER.to_string()),
            ..Self::default()
        }
    }

    /// Runs matching a filter expression
    pub fn filtered(filter: impl Into<String>) -> Self {
        Self {
            filter: Some(filter.into()),
            ..Self::default()
        }
    }

    /// Runs in a lifecycle stage
    pub fn view(run_view_type: RunViewType) -> Self {
        Self {
            run_view_type: Some(run_view_type),
            ..Self::default()
        }
    }

    /// Unfiltered page of runs
    pub fn any(max_results: u32) -> Self {
        Self {
            max_results: Some(max_results),
            ..Self::default()
        }
    }

    /// Ways of asking for every running run, tried in order.
    ///
    /// Tracking backends disagree on how the running status is expressed, so
    /// the first formulation that returns anything is used.
    pub fn running_everywhere() -> [Self; 3] {
        [
            Self::filtered(RUNNING_FILTER),
            Self::filtered("status = 'RUNNING'"),
            Self::view(RunViewType::ActiveOnly),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_experiment_query_body() {
        let body = serde_json::to_value(SearchQuery::running_in_experiment("7")).unwrap();

        assert_eq!(
            body,
            json!({
                "experiment_ids": ["7"],
                "filter": "attributes.status = 'RUNNING'",
            })
        );
    }

    #[test]
    fn test_global_formulations_in_order() {
        let bodies: Vec<serde_json::Value> = SearchQuery::running_everywhere()
            .iter()
            .map(|q| serde_json::to_value(q).unwrap())
            .collect();

        assert_eq!(
            bodies,
            vec![
                json!({ "filter": "attributes.status = 'RUNNING'" }),
                json!({ "filter": "status = 'RUNNING'" }),
                json!({ "run_view_type": "ACTIVE_ONLY" }),
            ]
        );
    }

    #[test]
    fn test_any_query_body() {
        let body = serde_json::to_value(SearchQuery::any(100)).unwrap();
        assert_eq!(body, json!({ "max_results": 100 }));
    }
}
