//! Independent reasoning over each sub-question: ask the LLM what it already
//! knows, a preliminary answer, a confidence level, and any knowledge gaps
//! that would need external search to close.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::llm::{ChatMessage, LlmClient};

use super::decomposer::Decomposition;
use super::json_repair;

/// One knowledge gap identified while thinking about a sub-question.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeGap {
    pub gap_description: String,
    pub importance: String,
    #[serde(default)]
    pub search_keywords: Vec<String>,
}

/// The result of thinking independently about one (sub-)question.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Thought {
    pub question: String,
    pub thought_process: String,
    pub preliminary_answer: String,
    pub confidence_level: String,
    #[serde(default)]
    pub knowledge_gaps: Vec<KnowledgeGap>,
    #[serde(default)]
    pub reasoning_steps: Vec<String>,
    #[serde(default)]
    pub assumptions: Vec<String>,
    #[serde(default)]
    pub needs_verification: bool,
    #[serde(default)]
    pub sub_query_id: Option<u32>,
}

/// Overall confidence across every sub-question's thought.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverallConfidence {
    High,
    Medium,
    Low,
}

/// Thinks independently about each sub-question in a [`Decomposition`],
/// then aggregates confidence and knowledge gaps across all of them.
#[derive(Clone)]
pub struct ReasoningEngine {
    llm: LlmClient,
}

impl ReasoningEngine {
    pub fn new(llm: LlmClient) -> Self {
        Self { llm }
    }

    fn fallback_thought(question: &str, context: &[String]) -> Thought {
        let _ = context;
        Thought {
            question: question.to_string(),
            thought_process: format!(
                "additional information may be needed to fully answer '{question}'"
            ),
            preliminary_answer: "can be partially answered from existing knowledge, but details need verification".to_string(),
            confidence_level: "medium".to_string(),
            knowledge_gaps: vec![KnowledgeGap {
                gap_description: format!("detailed information about '{question}'"),
                importance: "medium".to_string(),
                search_keywords: vec![question.to_string()],
            }],
            reasoning_steps: vec![
                "analyze question type".to_string(),
                "assess information needs".to_string(),
                "determine importance of required external information".to_string(),
            ],
            assumptions: Vec::new(),
            needs_verification: false,
            sub_query_id: None,
        }
    }

    /// Think independently about a single question, given retrieved context.
    pub async fn think_independently(&self, question: &str, context: &[String], model: &str) -> Thought {
        let context_str = if context.is_empty() { "no specific context".to_string() } else { context.join("\n") };
        let prompt = reasoning_prompt(question, &context_str);
        let messages = vec![
            ChatMessage::system(
                "You are an expert question analyst skilled at thinking deeply about questions \
                 and identifying knowledge gaps. Always return valid JSON.",
            ),
            ChatMessage::user(prompt),
        ];

        let Ok(content) = self.llm.generate_answer(model, &messages).await else {
            return Self::fallback_thought(question, context);
        };

        match json_repair::parse_lenient(&content).and_then(parse_thought) {
            Some(thought) => thought,
            None => Self::fallback_thought(question, context),
        }
    }

    /// Think about every sub-question of a decomposition, tagging each
    /// resulting thought with its `sub_query_id`.
    pub async fn think_about_decomposition(
        &self,
        decomposition: &Decomposition,
        context: &[String],
        model: &str,
    ) -> Vec<Thought> {
        let mut thoughts = Vec::with_capacity(decomposition.sub_queries.len());
        for sub_query in &decomposition.sub_queries {
            if sub_query.question.is_empty() {
                continue;
            }
            let mut thought = self.think_independently(&sub_query.question, context, model).await;
            thought.sub_query_id = Some(sub_query.id);
            thoughts.push(thought);
        }
        thoughts
    }

    /// High if ≥70% of thoughts are high-confidence; medium if ≥60% are
    /// high-or-medium; else low.
    pub fn assess_overall_confidence(thoughts: &[Thought]) -> OverallConfidence {
        if thoughts.is_empty() {
            return OverallConfidence::Low;
        }
        let total = thoughts.len() as f64;
        let high = thoughts.iter().filter(|t| t.confidence_level == "high").count() as f64;
        let medium = thoughts.iter().filter(|t| t.confidence_level == "medium").count() as f64;

        if high / total >= 0.7 {
            OverallConfidence::High
        } else if (high + medium) / total >= 0.6 {
            OverallConfidence::Medium
        } else {
            OverallConfidence::Low
        }
    }

    /// All knowledge gaps across every thought, deduplicated by description
    /// and sorted by importance (high, then medium, then low).
    pub fn extract_all_knowledge_gaps(thoughts: &[Thought]) -> Vec<KnowledgeGap> {
        let mut seen = std::collections::HashSet::new();
        let mut gaps: Vec<KnowledgeGap> = Vec::new();
        for thought in thoughts {
            for gap in &thought.knowledge_gaps {
                if !gap.gap_description.is_empty() && seen.insert(gap.gap_description.clone()) {
                    gaps.push(gap.clone());
                }
            }
        }
        gaps.sort_by_key(|gap| std::cmp::Reverse(importance_rank(&gap.importance)));
        gaps
    }

    /// Joins each thought's preliminary answer into one numbered summary.
    pub fn generate_preliminary_answer(thoughts: &[Thought]) -> String {
        if thoughts.is_empty() {
            return "unable to provide an answer from current information.".to_string();
        }
        let answers: Vec<String> = thoughts
            .iter()
            .enumerate()
            .filter(|(_, t)| !t.preliminary_answer.is_empty())
            .map(|(i, t)| format!("{}. {}", i + 1, t.preliminary_answer))
            .collect();
        if answers.is_empty() {
            "more external information is needed to provide a complete answer.".to_string()
        } else {
            answers.join("\n")
        }
    }
}

fn importance_rank(importance: &str) -> u8 {
    match importance {
        "high" => 3,
        "medium" => 2,
        _ => 1,
    }
}

fn parse_thought(value: Value) -> Option<Thought> {
    let thought: Thought = serde_json::from_value(value).ok()?;
    if thought.thought_process.is_empty() {
        return None;
    }
    Some(thought)
}

fn reasoning_prompt(question: &str, context: &str) -> String {
    format!(
        "You are an expert question analyst. Think independently about the following \
         question based on your existing knowledge, and rationally assess whether \
         external information is needed.\n\n\
         Question: {question}\n\
         Context: {context}\n\n\
         Guidance: simple factual queries (weather, time, prices) usually need current \
         external information; complex analytical questions may need broader knowledge \
         support; only mark a gap as high importance when real-time, accurate, specific \
         data is genuinely required. Search keywords should be plain, natural-language \
         terms an ordinary user would search for.\n\n\
         Return exactly this JSON shape:\n\
         {{\n\
         \"question\": \"{question}\",\n\
         \"thought_process\": \"your detailed reasoning, including what you already know\",\n\
         \"preliminary_answer\": \"a preliminary answer from existing knowledge\",\n\
         \"confidence_level\": \"high|medium|low\",\n\
         \"knowledge_gaps\": [\n\
         {{ \"gap_description\": \"specific gap\", \"importance\": \"high|medium|low\", \
         \"search_keywords\": [\"plain natural-language search term\"] }}\n\
         ],\n\
         \"reasoning_steps\": [\"step 1\", \"step 2\"],\n\
         \"assumptions\": [\"assumption 1\"],\n\
         \"needs_verification\": true\n\
         }}\n\n\
         Return only valid JSON.",
        question = question,
        context = context,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::{Method::POST, MockServer};
    use serde_json::json;

    fn thought(confidence: &str) -> Thought {
        Thought {
            question: "q".to_string(),
            thought_process: "p".to_string(),
            preliminary_answer: "a".to_string(),
            confidence_level: confidence.to_string(),
            knowledge_gaps: Vec::new(),
            reasoning_steps: Vec::new(),
            assumptions: Vec::new(),
            needs_verification: false,
            sub_query_id: None,
        }
    }

    #[test]
    fn overall_confidence_high_when_most_thoughts_are_high() {
        let thoughts = vec![thought("high"), thought("high"), thought("high"), thought("medium")];
        assert_eq!(ReasoningEngine::assess_overall_confidence(&thoughts), OverallConfidence::High);
    }

    #[test]
    fn overall_confidence_medium_when_high_plus_medium_meets_threshold() {
        let thoughts = vec![thought("high"), thought("medium"), thought("low"), thought("low")];
        assert_eq!(ReasoningEngine::assess_overall_confidence(&thoughts), OverallConfidence::Medium);
    }

    #[test]
    fn overall_confidence_low_when_mostly_low() {
        let thoughts = vec![thought("low"), thought("low"), thought("medium")];
        assert_eq!(ReasoningEngine::assess_overall_confidence(&thoughts), OverallConfidence::Low);
    }

    #[test]
    fn overall_confidence_low_for_empty_thoughts() {
        assert_eq!(ReasoningEngine::assess_overall_confidence(&[]), OverallConfidence::Low);
    }

    #[test]
    fn extract_all_knowledge_gaps_dedupes_and_sorts_by_importance() {
        let mut low = thought("low");
        low.knowledge_gaps = vec![KnowledgeGap {
            gap_description: "gap-a".to_string(),
            importance: "low".to_string(),
            search_keywords: Vec::new(),
        }];
        let mut high = thought("high");
        high.knowledge_gaps = vec![
            KnowledgeGap { gap_description: "gap-b".to_string(), importance: "high".to_string(), search_keywords: Vec::new() },
            KnowledgeGap { gap_description: "gap-a".to_string(), importance: "low".to_string(), search_keywords: Vec::new() },
        ];

        let gaps = ReasoningEngine::extract_all_knowledge_gaps(&[low, high]);
        assert_eq!(gaps.len(), 2);
        assert_eq!(gaps[0].gap_description, "gap-b");
    }

    #[tokio::test]
    async fn think_independently_parses_llm_json() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/chat/completions");
                then.status(200).json_body(json!({
                    "choices": [{ "message": { "content": "{\"question\":\"q\",\"thought_process\":\"thinking\",\"preliminary_answer\":\"a\",\"confidence_level\":\"high\",\"knowledge_gaps\":[],\"reasoning_steps\":[],\"assumptions\":[],\"needs_verification\":false}" } }]
                }));
            })
            .await;

        let engine = ReasoningEngine::new(LlmClient::new(reqwest::Client::new(), server.base_url()));
        let thought = engine.think_independently("q", &[], "model").await;
        assert_eq!(thought.confidence_level, "high");
    }

    #[tokio::test]
    async fn think_independently_falls_back_on_llm_failure() {
        let server = MockServer::start_async().await;
        let engine = ReasoningEngine::new(LlmClient::new(reqwest::Client::new(), server.base_url()));
        let thought = engine.think_independently("q", &[], "model").await;
        assert!(!thought.knowledge_gaps.is_empty());
    }
}
