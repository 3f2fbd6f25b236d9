//! Query decomposition: classify a question's complexity and, unless it is
//! simple enough for the fast route, ask the LLM to break it into
//! sub-questions with importance and verification hints.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::llm::{ChatMessage, LlmClient};

use super::json_repair;

/// Heuristic complexity bucket, driving both the decomposition prompt and
/// whether a sub-question even needs an LLM call at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryComplexity {
    Simple,
    Medium,
    Complex,
}

impl QueryComplexity {
    fn as_label(self) -> &'static str {
        match self {
            QueryComplexity::Simple => "simple",
            QueryComplexity::Medium => "medium",
            QueryComplexity::Complex => "complex",
        }
    }
}

/// One sub-question produced by decomposition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubQuery {
    pub id: u32,
    pub question: String,
    pub importance: String,
    #[serde(default)]
    pub requires_external_info: bool,
    #[serde(default)]
    pub reasoning: String,
}

/// The full decomposition of one question.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Decomposition {
    pub original_query: String,
    pub query_type: String,
    pub complexity_level: String,
    pub sub_queries: Vec<SubQuery>,
    #[serde(default)]
    pub key_entities: Vec<String>,
    #[serde(default)]
    pub verification_points: Vec<String>,
}

impl Decomposition {
    pub fn is_simple(&self) -> bool {
        self.sub_queries.len() <= 1
    }
}

/// The outcome of routing a question before full decomposition: whether it
/// qualifies for the fast (non-decomposed) path, and whether that path still
/// needs external tools.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteDecision {
    pub use_fast_route: bool,
    pub needs_tools: bool,
    #[serde(default)]
    pub reason: String,
}

/// Breaks a complex question into sub-questions, or short-circuits a simple
/// one into a single sub-question without calling the LLM at all.
#[derive(Clone)]
pub struct QueryDecomposer {
    llm: LlmClient,
}

impl QueryDecomposer {
    pub fn new(llm: LlmClient) -> Self {
        Self { llm }
    }

    /// Heuristic complexity classification: word count and question-mark
    /// count only, no LLM call. Simple if `word_count <= 8` and at most one
    /// question mark; complex if `word_count > 25` or more than one question
    /// mark; otherwise medium.
    pub fn analyze_query_complexity(query: &str) -> QueryComplexity {
        let word_count = query.split_whitespace().count();
        let question_marks = query.chars().filter(|c| *c == '?' || *c == '\u{ff1f}').count();

        if word_count <= 8 && question_marks <= 1 {
            QueryComplexity::Simple
        } else if word_count > 25 || question_marks > 1 {
            QueryComplexity::Complex
        } else {
            QueryComplexity::Medium
        }
    }

    /// Only simple questions use the fast route (skip full decompose+think).
    pub fn should_use_fast_route(query: &str) -> bool {
        Self::analyze_query_complexity(query) == QueryComplexity::Simple
    }

    /// Quoted substrings and capitalized words, deduplicated — a coarse
    /// entity extraction, not real NER.
    pub fn extract_key_entities(query: &str) -> Vec<String> {
        let mut entities = Vec::new();
        let mut chars = query.chars().peekable();
        let mut in_quotes = false;
        let mut current = String::new();
        while let Some(c) = chars.next() {
            if c == '"' {
                if in_quotes && !current.is_empty() {
                    entities.push(std::mem::take(&mut current));
                }
                in_quotes = !in_quotes;
                continue;
            }
            if in_quotes {
                current.push(c);
            }
        }

        for word in query.split_whitespace() {
            let trimmed: String = word.chars().filter(|c| c.is_alphabetic()).collect();
            if trimmed.len() > 1 && trimmed.chars().next().is_some_and(|c| c.is_ascii_uppercase()) {
                entities.push(trimmed);
            }
        }

        let mut seen = std::collections::HashSet::new();
        entities.retain(|e| seen.insert(e.clone()));
        entities
    }

    fn fallback_decomposition(query: &str) -> Decomposition {
        Decomposition {
            original_query: query.to_string(),
            query_type: "mixed".to_string(),
            complexity_level: "medium".to_string(),
            sub_queries: vec![SubQuery {
                id: 1,
                question: query.to_string(),
                importance: "high".to_string(),
                requires_external_info: true,
                reasoning: "original question, needs external support".to_string(),
            }],
            key_entities: Vec::new(),
            verification_points: vec!["needs verification of the question's relevant details".to_string()],
        }
    }

    fn simple_decomposition(&self, query: &str) -> Decomposition {
        Decomposition {
            original_query: query.to_string(),
            query_type: "factual".to_string(),
            complexity_level: "simple".to_string(),
            sub_queries: vec![SubQuery {
                id: 1,
                question: query.to_string(),
                importance: "high".to_string(),
                requires_external_info: true,
                reasoning: "simple direct query, needs current information".to_string(),
            }],
            key_entities: Self::extract_key_entities(query),
            verification_points: Vec::new(),
        }
    }

    /// Decompose `query` into sub-questions. Simple questions short-circuit
    /// to a single sub-question without an LLM call; everything else calls
    /// the LLM, falling back to a one-question decomposition on any
    /// parse/request failure.
    pub async fn decompose(&self, query: &str, model: &str) -> Decomposition {
        let complexity = Self::analyze_query_complexity(query);
        if complexity == QueryComplexity::Simple {
            return self.simple_decomposition(query);
        }

        let prompt = decomposition_prompt(query, complexity.as_label());
        let messages = vec![
            ChatMessage::system(
                "You are an expert question analyst skilled at decomposing complex questions \
                 into simple sub-questions. Always return valid JSON.",
            ),
            ChatMessage::user(prompt),
        ];

        let Ok(content) = self.llm.generate_answer(model, &messages).await else {
            return Self::fallback_decomposition(query);
        };

        match json_repair::parse_lenient(&content).and_then(|value| parse_decomposition(value)) {
            Some(decomposition) => decomposition,
            None => Self::fallback_decomposition(query),
        }
    }

    /// Route a question before committing to the full decompose-and-think
    /// path: the heuristic complexity check decides `use_fast_route`
    /// immediately (no LLM call needed for that half); a non-simple query
    /// never takes the fast route, so only a simple query is worth asking
    /// the LLM whether it can skip tools entirely. On any LLM/parse failure,
    /// defaults to `needs_tools: true` so a fast-routed query never silently
    /// skips a search it might have needed.
    pub async fn route(&self, query: &str, model: &str) -> RouteDecision {
        let use_fast_route = Self::should_use_fast_route(query);
        if !use_fast_route {
            return RouteDecision {
                use_fast_route: false,
                needs_tools: true,
                reason: "question is complex enough to require decomposition".to_string(),
            };
        }

        let prompt = format!(
            "You are a routing classifier. The user asked a short, simple-looking question. \
             Decide whether answering it needs current/external information (e.g. weather, \
             prices, news, live status) or can be answered from general knowledge alone.\n\n\
             Question: {query}\n\n\
             Return exactly this JSON shape:\n\
             {{ \"needs_tools\": true, \"reason\": \"short reason\" }}\n\n\
             Return only valid JSON."
        );
        let messages = vec![
            ChatMessage::system("You are a terse routing classifier. Always return valid JSON."),
            ChatMessage::user(prompt),
        ];

        let Ok(content) = self.llm.generate_answer(model, &messages).await else {
            return RouteDecision {
                use_fast_route: true,
                needs_tools: true,
                reason: "routing classification failed; defaulting to needs_tools".to_string(),
            };
        };

        match json_repair::parse_lenient(&content).and_then(|value| serde_json::from_value::<RouteDecision>(value).ok())
        {
            Some(mut decision) => {
                decision.use_fast_route = true;
                decision
            }
            None => RouteDecision {
                use_fast_route: true,
                needs_tools: true,
                reason: "routing response was unparseable; defaulting to needs_tools".to_string(),
            },
        }
    }
}

fn parse_decomposition(value: Value) -> Option<Decomposition> {
    let decomposition: Decomposition = serde_json::from_value(value).ok()?;
    if decomposition.sub_queries.is_empty() {
        return None;
    }
    Some(decomposition)
}

fn decomposition_prompt(query: &str, complexity: &str) -> String {
    format!(
        "You are an expert question analyst. Decompose the user's question into an \
         appropriate number of independent sub-questions.\n\n\
         User question: {query}\n\
         Question complexity: {complexity}\n\n\
         Decomposition rules:\n\
         1. Judge complexity and sub-question count intelligently: simple factual \
         questions (weather, price, definitions) stay as a single question; medium \
         questions (multiple concepts or reasoning) decompose into at most 3 core \
         sub-questions; complex questions (multiple dimensions, deep analysis, or \
         conjunctions like \"and\"/\"also\") decompose into at most 5 core sub-questions. \
         Real-time queries (current time, weather, price, news) should be flagged as \
         requiring external information.\n\
         2. Each sub-question should be independent and complete, avoiding duplication.\n\
         3. Identify key information points and parts that may need external verification.\n\
         4. Assess the importance of each sub-question.\n\n\
         Return exactly this JSON shape:\n\
         {{\n\
         \"original_query\": \"{query}\",\n\
         \"query_type\": \"factual|reasoning|operational|mixed\",\n\
         \"complexity_level\": \"{complexity}\",\n\
         \"sub_queries\": [\n\
         {{ \"id\": 1, \"question\": \"sub-question 1\", \"importance\": \"high|medium|low\", \
         \"requires_external_info\": true, \"reasoning\": \"why this sub-question matters\" }}\n\
         ],\n\
         \"key_entities\": [\"entity1\", \"entity2\"],\n\
         \"verification_points\": [\"point needing verification 1\"]\n\
         }}\n\n\
         Return only valid JSON.",
        query = query,
        complexity = complexity,
    )
}
