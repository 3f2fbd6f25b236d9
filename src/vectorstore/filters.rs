//! Filter helpers for vector-store queries: scope results to a session and,
//! optionally, a set of source ids.

use serde_json::{Value, json};

use super::types::SearchFilterArgs;

/// Compose the standard filter payload from optional search arguments.
pub fn build_search_filter(args: &SearchFilterArgs) -> Option<Value> {
    let mut must: Vec<Value> = Vec::new();

    if let Some(session_id) = args.session_id.as_ref().and_then(|value| non_empty(value)) {
        must.push(json!({
            "key": "session_id",
            "match": { "value": session_id }
        }));
    }

    if let Some(source_ids) = args.source_ids.as_ref() {
        if !source_ids.is_empty() {
            must.push(json!({
                "key": "source_id",
                "match": { "any": source_ids }
            }));
        }
    }

    if must.is_empty() {
        None
    } else {
        Some(json!({ "must": must }))
    }
}

fn non_empty(input: &str) -> Option<&str> {
    let trimmed = input.trim();
    if trimmed.is_empty() { None } else { Some(trimmed) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_search_filter_returns_none_when_unscoped() {
        assert!(build_search_filter(&SearchFilterArgs::default()).is_none());
    }

    #[test]
    fn build_search_filter_combines_session_and_source_ids() {
        let filter = build_search_filter(&SearchFilterArgs {
            session_id: Some("s1".into()),
            source_ids: Some(vec![1, 2, 3]),
        })
        .expect("filter value");
        let must = filter["must"].as_array().expect("must array");
        assert_eq!(must.len(), 2);
    }

    #[test]
    fn build_search_filter_ignores_empty_source_id_list() {
        let filter = build_search_filter(&SearchFilterArgs {
            session_id: Some("s1".into()),
            source_ids: Some(vec![]),
        })
        .expect("filter value");
        let must = filter["must"].as_array().expect("must array");
        assert_eq!(must.len(), 1);
    }
}
