//! Intelligent orchestrator (C11): routes a question through either a fast
//! single-shot path or the full decompose → think → gap-decide → plan
//! search → recall → synthesize path, streaming progress as it goes.
//!
//! The heavy lifting for each stage lives in its own module:
//! [`decomposer`] (query classification and breakdown), [`reasoning`]
//! (independent per-sub-question thinking and gap extraction),
//! [`search_planner`] (turning gaps into a bounded query list), and
//! [`json_repair`] (the lenient LLM-JSON parsing shared by the first two).

pub mod decomposer;
pub mod json_repair;
pub mod reasoning;
pub mod search_planner;

use std::sync::Arc;

use futures_core::stream::Stream;
use futures_util::{StreamExt, future::join_all};

use crate::llm::{ChatDelta, ChatMessage, LlmClient};
use crate::streaming::SseEvent;
use crate::tools::strategies::Strategy;
use crate::tools::web_search::WebSearchTool;
use crate::tools::{RunConfig, StepType, ToolExecutionContext, ToolMode, ToolRegistry};

use decomposer::{Decomposition, QueryDecomposer};
use reasoning::{KnowledgeGap, OverallConfidence, ReasoningEngine, Thought};
use search_planner::{SearchPlanConfig, SearchPlanner};

/// Search-planning and gap-recall budgets, loaded from configuration.
#[derive(Debug, Clone, Copy)]
pub struct OrchestratorConfig {
    pub gap_recall_top_k: usize,
    pub web_search_max_queries: usize,
    pub max_words_per_query: usize,
    pub simple_query_max_queries: usize,
    pub simple_query_max_words_per_query: usize,
    pub max_keywords_per_gap: usize,
}

impl OrchestratorConfig {
    fn non_simple_plan(&self) -> SearchPlanConfig {
        SearchPlanConfig::non_simple(self.web_search_max_queries, self.max_words_per_query, self.max_keywords_per_gap)
    }

    fn simple_plan(&self) -> SearchPlanConfig {
        SearchPlanConfig::simple(self.simple_query_max_queries, self.simple_query_max_words_per_query, self.max_keywords_per_gap)
    }
}

/// The outcome of one orchestration run.
#[derive(Debug, Clone)]
pub struct OrchestratorAnswer {
    pub answer: String,
    pub used_tools: bool,
    pub decomposition: Option<Decomposition>,
    pub reasoning: Vec<Thought>,
    pub knowledge_gaps: Vec<KnowledgeGap>,
}

/// One knowledge gap paired with whatever was recalled for it.
struct GapSearchResult {
    gap: KnowledgeGap,
    recalled: Vec<(String, f32)>,
}

/// Routes a question, decomposes and reasons about it when it isn't simple
/// enough for the fast path, decides whether external search is warranted,
/// and synthesizes a final answer — non-streaming or SSE.
pub struct IntelligentOrchestrator {
    llm: LlmClient,
    decomposer: QueryDecomposer,
    reasoning_engine: ReasoningEngine,
    web_search: Arc<WebSearchTool>,
    tool_registry: Arc<ToolRegistry>,
    strategy: Arc<dyn Strategy>,
    config: OrchestratorConfig,
}

impl IntelligentOrchestrator {
    pub fn new(
        llm: LlmClient,
        web_search: Arc<WebSearchTool>,
        tool_registry: Arc<ToolRegistry>,
        strategy: Arc<dyn Strategy>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            decomposer: QueryDecomposer::new(llm.clone()),
            reasoning_engine: ReasoningEngine::new(llm.clone()),
            llm,
            web_search,
            tool_registry,
            strategy,
            config,
        }
    }

    async fn tools_available(&self, run_config: &RunConfig) -> bool {
        run_config.tool_mode != ToolMode::Off && !self.tool_registry.schemas().await.is_empty()
    }

    /// Non-streaming entry point.
    pub async fn process_query(&self, question: &str, contexts: Vec<String>, run_config: RunConfig) -> OrchestratorAnswer {
        let mut events = Vec::new();
        let (outcome, messages) = self.decide(question, &contexts, &run_config, &mut events).await;

        let answer = match messages {
            Outcome::Answer(answer) => answer,
            Outcome::Synthesize(messages) => {
                self.llm.generate_answer(&run_config.model, &messages).await.unwrap_or_else(|_| {
                    ReasoningEngine::generate_preliminary_answer(&outcome.reasoning)
                })
            }
        };

        OrchestratorAnswer {
            answer,
            used_tools: outcome.used_tools,
            decomposition: outcome.decomposition,
            reasoning: outcome.reasoning,
            knowledge_gaps: outcome.knowledge_gaps,
        }
    }

    /// Streaming entry point: emits `reasoning`/`tool_call`/`tool_result`
    /// progress events, then either `delta`s followed by `final_answer`, or
    /// just `final_answer` for paths with no further LLM call, and `error`
    /// on failure.
    pub fn process_query_stream(
        &self,
        question: String,
        contexts: Vec<String>,
        run_config: RunConfig,
    ) -> impl Stream<Item = SseEvent> + Send + 'static {
        let llm = self.llm.clone();
        let decomposer = self.decomposer.clone();
        let reasoning_engine = self.reasoning_engine.clone();
        let web_search = Arc::clone(&self.web_search);
        let tool_registry = Arc::clone(&self.tool_registry);
        let strategy = Arc::clone(&self.strategy);
        let config = self.config;

        async_stream::stream! {
            let orchestrator = IntelligentOrchestrator {
                llm: llm.clone(),
                decomposer,
                reasoning_engine,
                web_search,
                tool_registry,
                strategy,
                config,
            };

            let mut events = Vec::new();
            let (outcome, messages) = orchestrator.decide(&question, &contexts, &run_config, &mut events).await;
            for event in events.drain(..) {
                yield event;
            }

            match messages {
                Outcome::Answer(answer) => {
                    yield SseEvent::FinalAnswer { answer };
                }
                Outcome::Synthesize(messages) => {
                    let mut deltas = llm.stream_answer(run_config.model.clone(), messages);
                    let mut full_answer = String::new();
                    let mut failed = false;
                    while let Some(delta) = deltas.next().await {
                        match delta {
                            Ok(ChatDelta::Content(text)) => {
                                full_answer.push_str(&text);
                                yield SseEvent::Delta { content: text };
                            }
                            Ok(ChatDelta::Reasoning(text)) => yield SseEvent::Reasoning { content: text },
                            Err(error) => {
                                yield SseEvent::Error { message: error.to_string() };
                                failed = true;
                                break;
                            }
                        }
                    }
                    if failed {
                        full_answer = ReasoningEngine::generate_preliminary_answer(&outcome.reasoning);
                    }
                    yield SseEvent::FinalAnswer { answer: full_answer };
                }
            }
        }
    }

    /// Runs every decision stage shared by both entry points, pushing any
    /// progress events into `events` and returning the accumulated decision
    /// state plus how to produce the final answer: either a ready-made
    /// string, or messages still needing one more LLM call.
    async fn decide(
        &self,
        question: &str,
        contexts: &[String],
        run_config: &RunConfig,
        events: &mut Vec<SseEvent>,
    ) -> (DecisionOutcome, Outcome) {
        let mut outcome = DecisionOutcome::default();

        if !self.tools_available(run_config).await {
            events.push(reasoning_event("tools are disabled; answering from existing knowledge and context only."));
            return (outcome, Outcome::Synthesize(context_only_messages(question, contexts)));
        }

        let route = self.decomposer.route(question, &run_config.model).await;
        if route.use_fast_route {
            if route.needs_tools {
                events.push(reasoning_event(&format!(
                    "classified as a simple query that needs external tools ({}).",
                    route.reason
                )));
                outcome.used_tools = true;
                let context = ToolExecutionContext::new(question.to_string(), contexts.to_vec(), run_config.clone());
                let step = self.strategy.execute_step(&context, &self.tool_registry).await;
                return match step.step_type {
                    StepType::FinalAnswer => (outcome, Outcome::Answer(step.content)),
                    _ => {
                        if let Some(call) = &step.tool_call {
                            events.push(SseEvent::ToolCall { name: call.name.clone(), arguments: call.arguments.clone() });
                        }
                        if let Some(result) = &step.tool_result {
                            events.push(SseEvent::ToolResult { name: result.name.clone(), result: result.result.clone() });
                        }
                        let mut synth_contexts = contexts.to_vec();
                        synth_contexts.push(step.content);
                        (outcome, Outcome::Synthesize(context_only_messages(question, &synth_contexts)))
                    }
                };
            }

            events.push(reasoning_event(&format!(
                "classified as a simple question answerable from existing knowledge ({}).",
                route.reason
            )));
            return (outcome, Outcome::Synthesize(context_only_messages(question, contexts)));
        }

        events.push(reasoning_event("analyzing and decomposing the question..."));
        let decomposition = self.decomposer.decompose(question, &run_config.model).await;
        events.push(reasoning_event(&format!(
            "decomposition complete: identified {} sub-question(s).",
            decomposition.sub_queries.len()
        )));

        events.push(reasoning_event("thinking independently about each sub-question..."));
        let thoughts = self.reasoning_engine.think_about_decomposition(&decomposition, contexts, &run_config.model).await;
        let overall_confidence = ReasoningEngine::assess_overall_confidence(&thoughts);
        events.push(reasoning_event(&format!(
            "independent reasoning complete; overall confidence is {}.",
            confidence_label(overall_confidence)
        )));

        let all_gaps = ReasoningEngine::extract_all_knowledge_gaps(&thoughts);
        let high_importance = all_gaps.iter().any(|gap| gap.importance == "high");
        let needs_verification = thoughts.iter().any(|t| t.needs_verification);
        let need_tools = high_importance || overall_confidence == OverallConfidence::Low || needs_verification;

        outcome.decomposition = Some(decomposition.clone());
        outcome.reasoning = thoughts.clone();
        outcome.knowledge_gaps = all_gaps.clone();

        if !need_tools {
            events.push(reasoning_event("existing knowledge is sufficient; no external search needed."));
            let reasoning_summary = reasoning_summary_text(&thoughts);
            return (outcome, Outcome::Synthesize(synthesis_messages(question, &reasoning_summary, "no external search was performed.", contexts)));
        }

        if !self.tools_available(run_config).await {
            events.push(reasoning_event("tools are disabled; producing an answer that lists the knowledge gaps instead of searching."));
            return (outcome, Outcome::Synthesize(gap_aware_without_tools_messages(question, &all_gaps, contexts)));
        }

        events.push(reasoning_event(&format!("detected {} knowledge gap(s); searching for external information...", all_gaps.len())));
        outcome.used_tools = true;

        let plan_config = if decomposition.is_simple() { self.config.simple_plan() } else { self.config.non_simple_plan() };
        let queries = SearchPlanner::plan_search_queries(question, &all_gaps, plan_config);

        events.push(SseEvent::ToolCall {
            name: "web_search_and_recall".to_string(),
            arguments: serde_json::json!({ "query": question, "planned_queries": queries, "gap_count": all_gaps.len() }),
        });

        let session_id = format!("orchestrator_{}", uuid::Uuid::new_v4());
        let source_ids = match self.web_search.search_and_index(&queries, &session_id, &run_config.model).await {
            Ok(ids) => ids,
            Err(error) => {
                events.push(SseEvent::ToolResult {
                    name: "web_search_and_recall".to_string(),
                    result: serde_json::json!({ "success": false, "message": error }),
                });
                let reasoning_summary = reasoning_summary_text(&thoughts);
                return (outcome, Outcome::Synthesize(synthesis_messages(question, &reasoning_summary, "the external search failed; proceeding without it.", contexts)));
            }
        };

        let gap_results = if source_ids.is_empty() {
            Vec::new()
        } else {
            let recalls = all_gaps.iter().map(|gap| {
                let web_search = Arc::clone(&self.web_search);
                let session_id = session_id.clone();
                let source_ids = source_ids.clone();
                let model = run_config.model.clone();
                let gap = gap.clone();
                let top_k = self.config.gap_recall_top_k;
                async move {
                    let recalled = web_search
                        .recall(&gap.gap_description, &session_id, &source_ids, top_k, &model)
                        .await
                        .unwrap_or_default();
                    GapSearchResult { gap, recalled }
                }
            });
            join_all(recalls).await
        };

        let total_recalled: usize = gap_results.iter().map(|r| r.recalled.len()).sum();
        events.push(SseEvent::ToolResult {
            name: "web_search_and_recall".to_string(),
            result: serde_json::json!({
                "success": true,
                "source_count": source_ids.len(),
                "total_recalled": total_recalled,
            }),
        });
        events.push(SseEvent::SearchResults { results: serde_json::json!({ "queries": queries }) });

        let reasoning_summary = reasoning_summary_text(&thoughts);
        let gap_summary = gap_results_summary(&gap_results);
        (outcome, Outcome::Synthesize(synthesis_messages(question, &reasoning_summary, &gap_summary, contexts)))
    }
}

/// Either a final answer already in hand, or messages for one more LLM call.
enum Outcome {
    Answer(String),
    Synthesize(Vec<ChatMessage>),
}

/// Accumulated decision-phase state surfaced back to the caller alongside
/// the final answer.
#[derive(Default)]
struct DecisionOutcome {
    used_tools: bool,
    decomposition: Option<Decomposition>,
    reasoning: Vec<Thought>,
    knowledge_gaps: Vec<KnowledgeGap>,
}

fn confidence_label(confidence: OverallConfidence) -> &'static str {
    match confidence {
        OverallConfidence::High => "high",
        OverallConfidence::Medium => "medium",
        OverallConfidence::Low => "low",
    }
}

fn reasoning_event(content: &str) -> SseEvent {
    SseEvent::Reasoning { content: content.to_string() }
}

fn reasoning_summary_text(thoughts: &[Thought]) -> String {
    if thoughts.is_empty() {
        return "no independent reasoning was performed.".to_string();
    }
    thoughts
        .iter()
        .enumerate()
        .map(|(i, t)| {
            format!(
                "{}. Q: {}\n   Thinking: {}\n   Preliminary answer: {} (confidence: {})",
                i + 1,
                t.question,
                t.thought_process,
                t.preliminary_answer,
                t.confidence_level
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn gap_results_summary(results: &[GapSearchResult]) -> String {
    if results.is_empty() {
        return "no external search was performed.".to_string();
    }
    results
        .iter()
        .enumerate()
        .map(|(i, r)| {
            let passages = if r.recalled.is_empty() {
                "  no relevant passages were found.".to_string()
            } else {
                r.recalled.iter().map(|(content, score)| format!("  - ({score:.2}) {content}")).collect::<Vec<_>>().join("\n")
            };
            format!("{}. Gap: {}\n{}", i + 1, r.gap.gap_description, passages)
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn context_only_messages(question: &str, contexts: &[String]) -> Vec<ChatMessage> {
    let context_str = if contexts.is_empty() { "no specific context".to_string() } else { contexts.join("\n") };
    vec![
        ChatMessage::system(
            "You are a knowledgeable assistant. Answer the user's question using your own \
             knowledge and the provided context. Do not mention needing to search for more \
             information; give a direct, accurate answer.",
        ),
        ChatMessage::user(format!("Context:\n{context_str}\n\nQuestion: {question}\n\nAnswer directly.")),
    ]
}

fn gap_aware_without_tools_messages(question: &str, gaps: &[KnowledgeGap], contexts: &[String]) -> Vec<ChatMessage> {
    let context_str = if contexts.is_empty() { "no specific context".to_string() } else { contexts.join("\n") };
    let gaps_text = if gaps.is_empty() {
        "none".to_string()
    } else {
        gaps.iter().map(|g| g.gap_description.as_str()).collect::<Vec<_>>().join("\n")
    };
    vec![
        ChatMessage::system(
            "External search tools are unavailable right now; do not suggest searching. Use \
             existing knowledge and the provided context to answer as well as possible. If \
             information is insufficient, explicitly list what is missing and what would be \
             needed next, without fabricating.",
        ),
        ChatMessage::user(format!(
            "Context:\n{context_str}\n\nQuestion: {question}\n\nIdentified knowledge gaps:\n{gaps_text}\n\n\
             Give a best-effort answer without external search, explicitly noting missing \
             information and a reasonable next step."
        )),
    ]
}

fn synthesis_messages(question: &str, reasoning_summary: &str, gap_summary: &str, contexts: &[String]) -> Vec<ChatMessage> {
    let context_str = if contexts.is_empty() { "no specific context".to_string() } else { contexts.join("\n") };
    vec![
        ChatMessage::system(
            "You are a rigorous assistant. Read the reasoning summary and any recalled search \
             passages, then give a direct, natural-language answer grounded in them and your \
             own knowledge. Do not say \"according to the search results\" and do not hedge \
             with \"might\"/\"possibly\"; answer plainly.",
        ),
        ChatMessage::user(format!(
            "Context:\n{context_str}\n\nOriginal question: {question}\n\nReasoning summary:\n{reasoning_summary}\n\n\
             Recalled search results:\n{gap_summary}\n\nAnswer the original question directly."
        )),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::{EmbeddingClient, EmbeddingClientError};
    use crate::fetch::{FetchError, Fetcher};
    use crate::tools::strategies::ReActStrategy;
    use crate::tools::web_search::{SearchHit, SearchProvider};
    use crate::vectorstore::VectorStoreClient;
    use async_trait::async_trait;
    use httpmock::{Method::POST, MockServer};
    use serde_json::json;

    struct EmptySearch;
    #[async_trait]
    impl SearchProvider for EmptySearch {
        async fn search(&self, _query: &str, _language: &str, _categories: &str) -> Result<Vec<SearchHit>, String> {
            Ok(Vec::new())
        }
    }

    struct StubFetcher;
    #[async_trait]
    impl Fetcher for StubFetcher {
        async fn fetch_html(&self, _url: &str) -> Result<String, FetchError> {
            Ok(String::new())
        }
        async fn fetch_then_extract(&self, _url: &str, _selector: &str) -> Result<String, FetchError> {
            Ok(String::new())
        }
    }

    struct StubEmbedding;
    #[async_trait]
    impl EmbeddingClient for StubEmbedding {
        async fn embed_texts(
            &self,
            texts: &[String],
            _model: &str,
            _batch_size: usize,
            _dimensions: Option<usize>,
            _max_concurrency: usize,
        ) -> Result<Vec<Vec<f32>>, EmbeddingClientError> {
            Ok(texts.iter().map(|_| vec![0.1, 0.2]).collect())
        }
    }

    fn test_config() -> OrchestratorConfig {
        OrchestratorConfig {
            gap_recall_top_k: 5,
            web_search_max_queries: 3,
            max_words_per_query: 8,
            simple_query_max_queries: 1,
            simple_query_max_words_per_query: 6,
            max_keywords_per_gap: 3,
        }
    }

    async fn orchestrator_with(server: &MockServer) -> IntelligentOrchestrator {
        let vector_store = Arc::new(VectorStoreClient::new(reqwest::Client::new(), &server.base_url(), None).unwrap());
        let web_search = Arc::new(WebSearchTool::new(
            Arc::new(EmptySearch),
            Arc::new(StubFetcher),
            Arc::new(StubEmbedding),
            vector_store,
            "orchestrator_scratch".to_string(),
            2,
            "embed-model".to_string(),
            4,
            5,
        ));
        let llm = LlmClient::new(reqwest::Client::new(), server.base_url());
        let registry = ToolRegistry::new();
        registry
            .register(crate::tools::web_search::web_search_schema(), Arc::clone(&web_search), crate::tools::web_search::web_search_metadata())
            .await;
        IntelligentOrchestrator::new(
            llm.clone(),
            web_search,
            Arc::new(registry),
            Arc::new(ReActStrategy::new(llm)),
            test_config(),
        )
    }

    #[tokio::test]
    async fn tools_off_answers_directly_from_context() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/chat/completions");
                then.status(200).json_body(json!({ "choices": [{ "message": { "content": "a direct answer" } }] }));
            })
            .await;

        let orchestrator = orchestrator_with(&server).await;
        let mut run_config = RunConfig::new("model");
        run_config.tool_mode = ToolMode::Off;

        let result = orchestrator.process_query("what is rust?", vec!["rust is a language".to_string()], run_config).await;
        assert_eq!(result.answer, "a direct answer");
        assert!(!result.used_tools);
    }

    #[tokio::test]
    async fn simple_query_with_no_tools_needed_skips_decomposition() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/chat/completions");
                then.status(200).json_body(json!({
                    "choices": [{ "message": { "content": "{\"needs_tools\": false, \"reason\": \"definitional\"}" } }]
                }));
            })
            .await;

        let orchestrator = orchestrator_with(&server).await;
        let run_config = RunConfig::new("model");
        let result = orchestrator.process_query("what is rust?", Vec::new(), run_config).await;
        assert!(!result.used_tools);
        assert!(result.decomposition.is_none());
    }

    #[tokio::test]
    async fn fast_route_needing_tools_runs_one_strategy_step_then_synthesizes() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/chat/completions");
                then.status(200).json_body(json!({
                    "choices": [{ "message": { "content": "{\"needs_tools\": true, \"reason\": \"needs current data\"}" } }]
                }));
            })
            .await;

        let orchestrator = orchestrator_with(&server).await;
        let run_config = RunConfig::new("model");
        let result = orchestrator.process_query("what is rust?", Vec::new(), run_config).await;
        assert!(result.used_tools);
        assert!(!result.answer.is_empty());
    }
}
