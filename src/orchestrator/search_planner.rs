//! Search query planning: turns knowledge-gap keywords and the original
//! question into a deduplicated, length- and count-capped list of search
//! queries, with distinct budgets for simple vs. non-simple questions.

use super::reasoning::KnowledgeGap;

/// Query/word-count budget applied by [`SearchPlanner::plan_search_queries`].
#[derive(Debug, Clone, Copy)]
pub struct SearchPlanConfig {
    pub max_queries: usize,
    pub max_words_per_query: usize,
    pub max_keywords_per_gap: usize,
}

impl SearchPlanConfig {
    pub fn non_simple(max_queries: usize, max_words_per_query: usize, max_keywords_per_gap: usize) -> Self {
        Self { max_queries, max_words_per_query, max_keywords_per_gap }
    }

    pub fn simple(max_queries: usize, max_words_per_query: usize, max_keywords_per_gap: usize) -> Self {
        Self { max_queries, max_words_per_query, max_keywords_per_gap }
    }
}

/// Plans the final set of search queries for one orchestration run.
pub struct SearchPlanner;

impl SearchPlanner {
    /// Gap keywords (capped per gap) plus a normalized original-query
    /// keyword, word-capped per query, deduped case-insensitively, capped to
    /// `config.max_queries`; the original query is always present even if it
    /// was trimmed out of the keyword pool.
    pub fn plan_search_queries(original_query: &str, knowledge_gaps: &[KnowledgeGap], config: SearchPlanConfig) -> Vec<String> {
        let mut all_keywords = Vec::new();
        all_keywords.extend(Self::extract_keywords_from_gaps(knowledge_gaps, config.max_keywords_per_gap));
        all_keywords.extend(Self::generate_practical_keywords(original_query));

        let optimized = Self::optimize_search_keywords(&all_keywords, config.max_words_per_query);
        let mut final_queries = Self::clean_and_validate_queries(&optimized, original_query);
        final_queries.truncate(config.max_queries);
        final_queries
    }

    fn extract_keywords_from_gaps(knowledge_gaps: &[KnowledgeGap], max_keywords_per_gap: usize) -> Vec<String> {
        let mut keywords = Vec::new();
        for gap in knowledge_gaps {
            keywords.extend(gap.search_keywords.iter().take(max_keywords_per_gap).cloned());
        }
        keywords
    }

    /// Strips trailing question marks/filler and returns the cleaned question
    /// as a single keyword (the original falls back to itself if cleaning
    /// empties it out).
    fn generate_practical_keywords(question: &str) -> Vec<String> {
        let cleaned: String = question.chars().filter(|c| *c != '?' && *c != '\u{ff1f}').collect();
        let cleaned = cleaned.trim().to_string();
        if cleaned.is_empty() { vec![question.to_string()] } else { vec![cleaned] }
    }

    /// Word-count-caps each keyword (truncating rather than dropping an
    /// over-long one) and deduplicates case-insensitively.
    fn optimize_search_keywords(keywords: &[String], max_words_per_query: usize) -> Vec<String> {
        let mut optimized = Vec::new();
        let mut seen = std::collections::HashSet::new();

        for keyword in keywords {
            let keyword = keyword.trim();
            if keyword.is_empty() {
                continue;
            }
            let words: Vec<&str> = keyword.split_whitespace().collect();
            let candidate = if words.len() <= max_words_per_query {
                keyword.to_string()
            } else {
                words[..max_words_per_query].join(" ")
            };
            let normalized = candidate.to_lowercase();
            if seen.insert(normalized) {
                optimized.push(candidate);
            }
        }
        optimized
    }

    /// Dedupes case-insensitively and guarantees the original topic is
    /// present, inserting it at the front if missing.
    fn clean_and_validate_queries(queries: &[String], original_topic: &str) -> Vec<String> {
        let mut cleaned = Vec::new();
        let mut seen = std::collections::HashSet::new();

        for query in queries {
            let query = query.trim();
            if query.is_empty() {
                continue;
            }
            let normalized = query.to_lowercase();
            if seen.insert(normalized) {
                cleaned.push(query.to_string());
            }
        }

        if cleaned.is_empty() {
            cleaned.push(original_topic.to_string());
        } else if !seen.contains(&original_topic.to_lowercase()) {
            cleaned.insert(0, original_topic.to_string());
        }
        cleaned
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gap(description: &str, keywords: &[&str]) -> KnowledgeGap {
        KnowledgeGap {
            gap_description: description.to_string(),
            importance: "high".to_string(),
            search_keywords: keywords.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn plan_caps_query_count_and_includes_original_query() {
        let gaps = vec![
            gap("g1", &["rust async runtimes", "tokio vs async-std"]),
            gap("g2", &["rust ownership model"]),
        ];
        let config = SearchPlanConfig::non_simple(3, 8, 3);
        let queries = SearchPlanner::plan_search_queries("what is rust?", &gaps, config);

        assert!(queries.len() <= 3);
        assert!(queries.iter().any(|q| q.to_lowercase().starts_with("what is rust")));
    }

    #[test]
    fn plan_dedupes_case_insensitively() {
        let gaps = vec![gap("g1", &["Rust Async"])];
        let config = SearchPlanConfig::non_simple(5, 8, 3);
        let queries = SearchPlanner::plan_search_queries("rust async", &gaps, config);

        let normalized: std::collections::HashSet<String> = queries.iter().map(|q| q.to_lowercase()).collect();
        assert_eq!(normalized.len(), queries.len());
    }

    #[test]
    fn simple_config_caps_to_one_query() {
        let gaps = vec![gap("g1", &["rust async runtimes overview in depth"])];
        let config = SearchPlanConfig::simple(1, 6, 3);
        let queries = SearchPlanner::plan_search_queries("what is rust?", &gaps, config);
        assert_eq!(queries.len(), 1);
    }

    #[test]
    fn overlong_keyword_is_truncated_to_word_cap() {
        let gaps = vec![gap("g1", &["one two three four five six seven eight nine ten"])];
        let config = SearchPlanConfig::non_simple(5, 4, 3);
        let queries = SearchPlanner::plan_search_queries("topic", &gaps, config);
        assert!(queries.iter().any(|q| q.split_whitespace().count() <= 4));
    }

    #[test]
    fn no_keywords_falls_back_to_original_query_alone() {
        let config = SearchPlanConfig::non_simple(3, 8, 3);
        let queries = SearchPlanner::plan_search_queries("topic", &[], config);
        assert_eq!(queries, vec!["topic".to_string()]);
    }
}
