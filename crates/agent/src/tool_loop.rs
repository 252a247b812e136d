//! Tool-selection loop: drives one turn from routing to a grounded answer.
//!
//! ```text
//! Routing ──► DirectAnswer / Conversational ─────────────────► Answered
//!    │
//!    └──► Retrieving ──► Synthesizing ──► answered ──────────► Answered
//!             ▲               │
//!             └─ insufficient ┤
//!                             └─ ambiguous (≥2 candidates) ──► Clarifying
//!
//! budget spent ──► Exhausted (fallback explanation)
//! token cancelled ──► Cancelled (evidence discarded)
//! ```
//!
//! Each retrieval iteration runs exactly one tool. Pre-selection strategies
//! get the first say; otherwise the model picks from the registry's schemas.
//! Missing arguments are derived from the classification and attachments,
//! and anything still unusable falls back to a plain `search`. Tool failures
//! and timeouts are logged and the loop moves on; only gateway failures end
//! the turn with an error.
//!
//! Answer deltas concatenate to the final answer. A synthesis reply streams
//! only once it has declared itself answered; anything not yet sent goes out
//! when the turn ends `Answered`.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use sift_core::error::{Error, ProviderError, ToolError};
use sift_core::message::{Conversation, Message, Utterance};
use sift_core::provider::{ChunkReceiver, Provider, ProviderRequest, ToolDefinition};
use sift_core::query::{Intent, QueryClassification, Route};
use sift_core::record::RetrievedRecord;
use sift_core::tool::{ToolCall, ToolContext, ToolRegistry};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::context::{
    AssemblyOptions, Citation, CitationTable, ContextAssembler, ContextFragment, SectionOrder, estimate_messages_tokens,
    estimate_tools_tokens,
};
use crate::fallback::{FailureExplanation, FallbackReasoner};
use crate::json::JsonAssembler;
use crate::prompts;
use crate::router::QueryRouter;
use crate::stream_event::LoopEvent;
use crate::trace::{CallStatus, ReasoningTrace, ToolCallRecord};

/// Tool every unusable plan falls back to.
pub const SAFE_DEFAULT_TOOL: &str = "search";
const FETCH_TOOL: &str = "fetch_documents";
const LISTING_TOOL: &str = "get_items";

/// Prior turns sent along with synthesis and conversational replies.
const HISTORY_TURNS: usize = 6;

// ── Configuration ─────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct LoopConfig {
    pub model: String,
    pub temperature: f32,
    pub max_tokens: Option<u32>,
    /// Retrieval iterations before the turn is declared exhausted
    pub max_iterations: usize,
    pub model_timeout: Duration,
    pub tool_timeout: Duration,
    pub max_chunks: usize,
    pub search_limit: usize,
    pub section_order: SectionOrder,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            model: "anthropic/claude-sonnet-4".into(),
            temperature: 0.2,
            max_tokens: None,
            max_iterations: 5,
            model_timeout: Duration::from_secs(60),
            tool_timeout: Duration::from_secs(20),
            max_chunks: 5,
            search_limit: 10,
            section_order: SectionOrder::Input,
        }
    }
}

impl LoopConfig {
    pub fn from_app_config(config: &sift_config::AppConfig) -> Self {
        let orchestrator = &config.orchestrator;
        Self {
            model: config.default_model.clone(),
            temperature: config.default_temperature,
            max_tokens: Some(config.default_max_tokens),
            max_iterations: orchestrator.max_iterations,
            model_timeout: Duration::from_secs(orchestrator.model_timeout_secs),
            tool_timeout: Duration::from_secs(orchestrator.tool_timeout_secs),
            max_chunks: orchestrator.max_chunks_per_record,
            search_limit: orchestrator.search_limit,
            section_order: SectionOrder::Input,
        }
    }
}

// ── Plans ─────────────────────────────────────────────────────────────────

/// Who decided on a tool invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanSource {
    PreSelection,
    Model,
    SafeDefault,
}

/// The single tool call an iteration will make.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolInvocationPlan {
    pub tool: String,
    pub arguments: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rewritten_query: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
    pub source: PlanSource,
}

impl ToolInvocationPlan {
    fn pre_selected(tool: &str, arguments: Value, reasoning: String) -> Self {
        Self {
            tool: tool.to_string(),
            arguments,
            rewritten_query: None,
            reasoning: Some(reasoning),
            source: PlanSource::PreSelection,
        }
    }
}

/// Plans a tool call from obvious structured evidence, ahead of the model.
pub trait PreSelectionStrategy: Send + Sync {
    fn name(&self) -> &str;

    /// A plan for this iteration, or `None` to defer.
    fn plan(&self, state: &LoopState, tools: &ToolRegistry) -> Option<ToolInvocationPlan>;
}

/// Fetches attached documents the turn has not read yet.
pub struct LinkedEvidenceStrategy;

impl PreSelectionStrategy for LinkedEvidenceStrategy {
    fn name(&self) -> &str {
        "linked_evidence"
    }

    fn plan(&self, state: &LoopState, tools: &ToolRegistry) -> Option<ToolInvocationPlan> {
        tools.get(FETCH_TOOL)?;
        let pending: Vec<String> = state
            .utterance
            .references()
            .into_iter()
            .filter(|r| !state.fetched_references.contains(r))
            .collect();
        if pending.is_empty() {
            return None;
        }
        let reasoning = format!("Reading {} attached item(s) first", pending.len());
        Some(ToolInvocationPlan::pre_selected(FETCH_TOOL, json!({ "ids": pending }), reasoning))
    }
}

/// Lists items directly when the router classified a plain listing.
pub struct MetadataListingStrategy;

impl PreSelectionStrategy for MetadataListingStrategy {
    fn name(&self) -> &str {
        "metadata_listing"
    }

    fn plan(&self, state: &LoopState, tools: &ToolRegistry) -> Option<ToolInvocationPlan> {
        tools.get(LISTING_TOOL)?;
        let classification = state.classification.as_ref()?;
        if classification.intent != Intent::GetItems
            || state.trace.tool_calls.iter().any(|c| c.tool == LISTING_TOOL)
        {
            return None;
        }
        Some(ToolInvocationPlan::pre_selected(
            LISTING_TOOL,
            json!({}),
            "The request lists items of one kind".into(),
        ))
    }
}

/// A plan as the model writes it in plain JSON.
#[derive(Debug, Deserialize)]
struct ModelPlan {
    tool: String,
    #[serde(default)]
    arguments: Value,
    #[serde(default)]
    rewritten_query: Option<String>,
    #[serde(default)]
    reasoning: Option<String>,
}

// ── Synthesis ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
enum AnswerStatus {
    Insufficient,
    Ambiguous,
    #[default]
    #[serde(other)]
    Answered,
}

#[derive(Debug, Deserialize)]
struct SynthesisReply {
    #[serde(default)]
    answer: Option<String>,
    #[serde(default)]
    status: AnswerStatus,
    #[serde(default)]
    candidates: Vec<Value>,
}

impl SynthesisReply {
    fn answer(&self) -> &str {
        self.answer.as_deref().map(str::trim).unwrap_or("")
    }

    /// Candidate indices that point at gathered records, de-duplicated.
    fn valid_candidates(&self, records: usize) -> Vec<usize> {
        let mut seen = HashSet::new();
        self.candidates
            .iter()
            .filter_map(|v| match v {
                Value::Number(n) => n.as_u64().map(|n| n as usize),
                Value::String(s) => s.trim().trim_matches(|c| c == '[' || c == ']').parse().ok(),
                _ => None,
            })
            .filter(|&i| i < records && seen.insert(i))
            .collect()
    }
}

/// One choice offered while a turn waits for clarification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClarificationOption {
    /// Citation index of the record
    pub index: usize,
    pub id: String,
    pub label: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Clarification {
    pub question: String,
    pub options: Vec<ClarificationOption>,
}

// ── State & outcome ───────────────────────────────────────────────────────

/// How a turn ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Termination {
    Answered,
    /// Suspended; continue with [`ToolSelectionLoop::resume`].
    Clarifying,
    Exhausted,
    Cancelled,
}

/// Everything the loop knows about the turn so far.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoopState {
    pub utterance: Utterance,
    #[serde(default)]
    pub classification: Option<QueryClassification>,
    /// Query rewrite proposed during tool selection
    #[serde(default)]
    pub rewritten_query: Option<String>,
    pub iteration: usize,
    pub records: Vec<RetrievedRecord>,
    pub fragments: Vec<ContextFragment>,
    pub citations: CitationTable,
    pub trace: ReasoningTrace,
    /// Records rendered in full during synthesis
    pub focused_ids: Vec<String>,
    /// Attachment references already handed to a fetch
    pub fetched_references: Vec<String>,
    #[serde(default)]
    pub termination: Option<Termination>,
    #[serde(default)]
    pub clarification: Option<Clarification>,
}

impl LoopState {
    pub fn new(utterance: Utterance) -> Self {
        Self {
            utterance,
            classification: None,
            rewritten_query: None,
            iteration: 0,
            records: Vec::new(),
            fragments: Vec::new(),
            citations: CitationTable::default(),
            trace: ReasoningTrace::new(),
            focused_ids: Vec::new(),
            fetched_references: Vec::new(),
            termination: None,
            clarification: None,
        }
    }

    /// The text retrieval and synthesis work from.
    pub fn query(&self) -> &str {
        if let Some(rewrite) = self.rewritten_query.as_deref().filter(|q| !q.trim().is_empty()) {
            return rewrite;
        }
        match &self.classification {
            Some(c) => c.effective_query(&self.utterance.text),
            None => &self.utterance.text,
        }
    }

    pub fn record_ids(&self) -> Vec<String> {
        self.records.iter().map(|r| r.id().to_string()).collect()
    }

    /// Append records not gathered yet. Returns the ids that were new.
    fn merge(&mut self, records: Vec<RetrievedRecord>) -> Vec<String> {
        let mut known: HashSet<String> = self.records.iter().map(|r| r.id().to_string()).collect();
        let mut added = Vec::new();
        for record in records {
            if known.insert(record.id().to_string()) {
                added.push(record.id().to_string());
                self.records.push(record);
            }
        }
        added
    }

    fn discard_evidence(&mut self) {
        self.records.clear();
        self.fragments.clear();
        self.citations = CitationTable::default();
        self.focused_ids.clear();
    }
}

/// The result of a turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoopOutcome {
    pub termination: Termination,
    #[serde(default)]
    pub answer: Option<String>,
    /// Citations referenced by the answer, in order of first mention
    #[serde(default)]
    pub citations: Vec<Citation>,
    #[serde(default)]
    pub failure: Option<FailureExplanation>,
    pub state: LoopState,
}

impl LoopOutcome {
    pub fn clarification(&self) -> Option<&Clarification> {
        self.state.clarification.as_ref()
    }
}

// ── Loop ──────────────────────────────────────────────────────────────────

/// Per-call plumbing shared by every step of one turn.
struct Turn<'a> {
    conversation: &'a Conversation,
    events: Option<&'a mpsc::Sender<LoopEvent>>,
    cancel: &'a CancellationToken,
}

impl Turn<'_> {
    async fn emit(&self, event: LoopEvent) {
        if let Some(tx) = self.events {
            let _ = tx.send(event).await;
        }
    }
}

enum Invocation {
    Gathered(usize),
    Failed,
    Cancelled,
}

/// How streamed text is surfaced as answer deltas.
#[derive(Clone, Copy)]
enum DeltaMode {
    /// Every content chunk is answer text.
    Raw,
    /// Only the growing `answer` field of a JSON reply.
    AnswerField,
}

pub struct ToolSelectionLoop {
    provider: Arc<dyn Provider>,
    tools: Arc<ToolRegistry>,
    router: Arc<dyn QueryRouter>,
    strategies: Vec<Box<dyn PreSelectionStrategy>>,
    assembler: ContextAssembler,
    config: LoopConfig,
    principal: String,
}

impl ToolSelectionLoop {
    pub fn new(provider: Arc<dyn Provider>, tools: Arc<ToolRegistry>, router: Arc<dyn QueryRouter>) -> Self {
        Self {
            provider,
            tools,
            router,
            strategies: vec![Box::new(LinkedEvidenceStrategy), Box::new(MetadataListingStrategy)],
            assembler: ContextAssembler::new(),
            config: LoopConfig::default(),
            principal: String::new(),
        }
    }

    pub fn with_config(mut self, config: LoopConfig) -> Self {
        self.config = config;
        self
    }

    /// Identity the retrieval tools scope results to.
    pub fn with_principal(mut self, principal: impl Into<String>) -> Self {
        self.principal = principal.into();
        self
    }

    /// Replace the pre-selection strategies. They run in order.
    pub fn with_strategies(mut self, strategies: Vec<Box<dyn PreSelectionStrategy>>) -> Self {
        self.strategies = strategies;
        self
    }

    pub fn config(&self) -> &LoopConfig {
        &self.config
    }

    /// Run one turn.
    ///
    /// Returns an error only when the model gateway fails; every other
    /// ending is a [`Termination`].
    pub async fn run(
        &self,
        utterance: &Utterance,
        conversation: &Conversation,
        events: Option<&mpsc::Sender<LoopEvent>>,
        cancel: &CancellationToken,
    ) -> sift_core::Result<LoopOutcome> {
        let turn = Turn {
            conversation,
            events,
            cancel,
        };
        let result = self.start(LoopState::new(utterance.clone()), &turn).await;
        report_error(&result, &turn).await;
        result
    }

    /// Continue a turn suspended in [`Termination::Clarifying`] with the
    /// option at position `choice`.
    pub async fn resume(
        &self,
        mut state: LoopState,
        choice: usize,
        conversation: &Conversation,
        events: Option<&mpsc::Sender<LoopEvent>>,
        cancel: &CancellationToken,
    ) -> sift_core::Result<LoopOutcome> {
        if state.termination != Some(Termination::Clarifying) {
            return Err(Error::Internal("turn is not awaiting a clarification".into()));
        }
        let option = state
            .clarification
            .as_ref()
            .and_then(|c| c.options.get(choice))
            .cloned()
            .ok_or_else(|| Error::Internal(format!("no clarification option {choice}")))?;

        info!(record = %option.id, "Resuming turn with clarified choice");
        state.trace.add_observation(&format!("User chose [{}] {}", option.index, option.label));
        state.focused_ids = vec![option.id];
        state.clarification = None;
        state.termination = None;

        let turn = Turn {
            conversation,
            events,
            cancel,
        };
        let result = self.retrieve(state, &turn, true).await;
        report_error(&result, &turn).await;
        result
    }

    async fn start(&self, mut state: LoopState, turn: &Turn<'_>) -> sift_core::Result<LoopOutcome> {
        if turn.cancel.is_cancelled() {
            return Ok(self.cancelled(state, turn).await);
        }

        let route = tokio::select! {
            biased;
            _ = turn.cancel.cancelled() => return Ok(self.cancelled(state, turn).await),
            route = self.router.route(&state.utterance, turn.conversation) => route?,
        };
        info!(router = self.router.name(), route = route_name(&route), "Utterance routed");
        turn.emit(LoopEvent::Routed { route: route.clone() }).await;

        match route {
            Route::DirectAnswer(text) => Ok(self.answered(state, text, "", turn).await),
            Route::Conversational => {
                let request = self
                    .request(self.history(turn.conversation, Message::user(&state.utterance.text)))
                    .with_system_prompt(prompts::CONVERSATIONAL);
                let mut streamed = String::new();
                match self.stream_reply(request, DeltaMode::Raw, &mut streamed, turn).await? {
                    Some(text) => Ok(self.answered(state, text.trim().to_string(), &streamed, turn).await),
                    None => Ok(self.cancelled(state, turn).await),
                }
            }
            Route::Retrieve(classification) => {
                state.classification = Some(classification);
                self.retrieve(state, turn, false).await
            }
        }
    }

    /// Retrieve and synthesize until answered, suspended or out of budget.
    async fn retrieve(
        &self,
        mut state: LoopState,
        turn: &Turn<'_>,
        mut synthesize_first: bool,
    ) -> sift_core::Result<LoopOutcome> {
        loop {
            if turn.cancel.is_cancelled() {
                return Ok(self.cancelled(state, turn).await);
            }

            if !synthesize_first {
                if state.iteration >= self.config.max_iterations {
                    return Ok(self.exhausted(state, turn).await);
                }
                state.iteration += 1;
                debug!(iteration = state.iteration, "Retrieval iteration");

                let Some(plan) = self.select_tool(&state, turn).await? else {
                    return Ok(self.cancelled(state, turn).await);
                };
                match self.invoke(plan, &mut state, turn).await {
                    Invocation::Cancelled => return Ok(self.cancelled(state, turn).await),
                    Invocation::Failed | Invocation::Gathered(0) => continue,
                    Invocation::Gathered(_) => {}
                }
            }
            synthesize_first = false;

            let Some((reply, streamed)) = self.synthesize(&mut state, turn).await? else {
                return Ok(self.cancelled(state, turn).await);
            };

            let candidates = reply.valid_candidates(state.records.len());
            match reply.status {
                AnswerStatus::Ambiguous if candidates.len() >= 2 && state.focused_ids.is_empty() => {
                    return Ok(self.clarifying(state, reply.answer(), &candidates, turn).await);
                }
                AnswerStatus::Insufficient => {}
                _ if !reply.answer().is_empty() => {
                    let answer = reply.answer().to_string();
                    return Ok(self.answered(state, answer, &streamed, turn).await);
                }
                _ => {}
            }

            let note = "The gathered evidence does not answer the question yet";
            state.trace.add_thought(note);
            turn.emit(LoopEvent::Thought { content: note.into() }).await;
        }
    }

    // ── Tool selection ──

    /// Pick this iteration's tool. `None` when cancelled mid-call.
    async fn select_tool(&self, state: &LoopState, turn: &Turn<'_>) -> sift_core::Result<Option<ToolInvocationPlan>> {
        for strategy in &self.strategies {
            if let Some(plan) = strategy.plan(state, &self.tools) {
                debug!(strategy = strategy.name(), tool = %plan.tool, "Pre-selected tool");
                return Ok(Some(self.complete_plan(plan, state)));
            }
        }

        let definitions = self.tools.definitions();
        let request = self
            .request(vec![Message::user(planning_message(state, self.config.max_iterations))])
            .with_system_prompt(prompts::tool_selection(&describe_tools(&definitions)))
            .with_tools(definitions);
        debug!(
            prompt_tokens = estimate_messages_tokens(&request.messages) + estimate_tools_tokens(&request.tools),
            "Asking the model to pick a tool"
        );

        let response = tokio::select! {
            biased;
            _ = turn.cancel.cancelled() => return Ok(None),
            response = tokio::time::timeout(self.config.model_timeout, self.provider.complete(request)) => {
                response.map_err(|_| timeout_error(self.config.model_timeout))??
            }
        };

        let message = response.message;
        let thought = message.content.trim();
        let plan = if let Some(call) = message.tool_calls.first() {
            ToolInvocationPlan {
                tool: call.name.clone(),
                arguments: serde_json::from_str(&call.arguments).unwrap_or_else(|_| json!({})),
                rewritten_query: None,
                reasoning: (!thought.is_empty()).then(|| thought.to_string()),
                source: PlanSource::Model,
            }
        } else {
            match JsonAssembler::new().assemble_as::<ModelPlan>(thought) {
                Ok(plan) => ToolInvocationPlan {
                    tool: plan.tool,
                    arguments: plan.arguments,
                    rewritten_query: plan.rewritten_query.filter(|q| !q.trim().is_empty()),
                    reasoning: plan.reasoning,
                    source: PlanSource::Model,
                },
                Err(e) => {
                    debug!(error = %e, "No usable plan in model reply");
                    return Ok(Some(self.safe_default(state, "The model did not choose a tool")));
                }
            }
        };

        if let Some(reasoning) = &plan.reasoning {
            turn.emit(LoopEvent::Thought { content: reasoning.clone() }).await;
        }
        Ok(Some(self.complete_plan(plan, state)))
    }

    /// Fill in missing arguments, or swap in the safe default.
    fn complete_plan(&self, mut plan: ToolInvocationPlan, state: &LoopState) -> ToolInvocationPlan {
        let Some(tool) = self.tools.get(&plan.tool) else {
            warn!(tool = %plan.tool, "Model chose an unknown tool");
            return self.safe_default(state, &format!("Unknown tool '{}'", plan.tool));
        };
        let definition = tool.to_definition();
        let query = plan
            .rewritten_query
            .clone()
            .unwrap_or_else(|| state.query().to_string());

        let mut arguments = match plan.arguments {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        for name in definition.required_arguments() {
            if is_missing(arguments.get(name))
                && let Some(value) = derive_argument(name, &query, state)
            {
                debug!(tool = %plan.tool, argument = name, "Derived missing argument");
                arguments.insert(name.to_string(), value);
            }
        }
        apply_classification(&definition, &mut arguments, state.classification.as_ref());

        if let Some(missing) = definition
            .required_arguments()
            .into_iter()
            .find(|name| is_missing(arguments.get(*name)))
        {
            warn!(tool = %plan.tool, argument = missing, "Required argument unavailable");
            return self.safe_default(state, &format!("'{}' needs '{missing}'", plan.tool));
        }

        plan.arguments = Value::Object(arguments);
        plan
    }

    fn safe_default(&self, state: &LoopState, reason: &str) -> ToolInvocationPlan {
        let mut arguments = Map::new();
        arguments.insert("query".into(), Value::String(state.query().to_string()));
        if let Some(tool) = self.tools.get(SAFE_DEFAULT_TOOL) {
            apply_classification(&tool.to_definition(), &mut arguments, state.classification.as_ref());
        }
        ToolInvocationPlan {
            tool: SAFE_DEFAULT_TOOL.into(),
            arguments: Value::Object(arguments),
            rewritten_query: None,
            reasoning: Some(format!("{reason}; falling back to {SAFE_DEFAULT_TOOL}")),
            source: PlanSource::SafeDefault,
        }
    }

    // ── Tool invocation ──

    async fn invoke(&self, plan: ToolInvocationPlan, state: &mut LoopState, turn: &Turn<'_>) -> Invocation {
        if plan.rewritten_query.is_some() {
            state.rewritten_query = plan.rewritten_query.clone();
        }
        if let Some(reasoning) = &plan.reasoning {
            state.trace.add_thought(reasoning);
        }

        let call = ToolCall {
            id: format!("call_{}", state.trace.tool_calls.len() + 1),
            name: plan.tool.clone(),
            arguments: plan.arguments.clone(),
        };
        state.trace.add_action(&format!("{}({})", call.name, call.arguments));
        info!(iteration = state.iteration, tool = %call.name, source = ?plan.source, "Invoking tool");
        turn.emit(LoopEvent::ToolCall {
            id: call.id.clone(),
            name: call.name.clone(),
            input: call.arguments.clone(),
            source: plan.source,
        })
        .await;

        let linked = plan.source == PlanSource::PreSelection && call.name == FETCH_TOOL;
        if linked {
            state.fetched_references.extend(string_list(&call.arguments["ids"]));
        }

        let ctx = ToolContext::new(&self.principal)
            .with_excluded_ids(state.record_ids())
            .with_default_limit(self.config.search_limit);
        let started = Instant::now();
        let result = tokio::select! {
            biased;
            _ = turn.cancel.cancelled() => return Invocation::Cancelled,
            result = tokio::time::timeout(self.config.tool_timeout, self.tools.execute(&call, &ctx)) => result,
        };
        let duration_ms = started.elapsed().as_millis() as u64;

        let (status, records, error) = match result {
            Ok(Ok(result)) => (CallStatus::Succeeded, result.records, None),
            Ok(Err(e)) => (CallStatus::Failed, Vec::new(), Some(e.to_string())),
            Err(_) => {
                let e = ToolError::Timeout {
                    tool_name: call.name.clone(),
                    timeout_secs: self.config.tool_timeout.as_secs(),
                };
                (CallStatus::TimedOut, Vec::new(), Some(e.to_string()))
            }
        };

        let returned = records.len();
        let added = state.merge(records);
        if linked {
            state.focused_ids.extend(added.iter().cloned());
        }

        let output = match &error {
            Some(e) => {
                warn!(tool = %call.name, error = %e, "Tool invocation failed");
                e.clone()
            }
            None => format!("{returned} records ({} new)", added.len()),
        };
        state.trace.add_observation(&output);
        state.trace.record_call(ToolCallRecord {
            iteration: state.iteration,
            tool: call.name.clone(),
            arguments: call.arguments,
            status,
            records: returned,
            new_records: added.len(),
            error,
            duration_ms,
            timestamp: chrono::Utc::now(),
        });
        turn.emit(LoopEvent::ToolResult {
            id: call.id,
            name: call.name,
            output,
            success: status == CallStatus::Succeeded,
            records: added.len(),
        })
        .await;

        match status {
            CallStatus::Succeeded => Invocation::Gathered(added.len()),
            _ => Invocation::Failed,
        }
    }

    // ── Synthesis ──

    /// Ask for an answer over the gathered evidence, along with the answer
    /// text already streamed. `None` when cancelled.
    async fn synthesize(
        &self,
        state: &mut LoopState,
        turn: &Turn<'_>,
    ) -> sift_core::Result<Option<(SynthesisReply, String)>> {
        let options = AssemblyOptions::default()
            .with_max_chunks(self.config.max_chunks)
            .with_focused_ids(state.focused_ids.clone())
            .with_order(self.config.section_order);
        let context = self.assembler.assemble(&state.records, &options);
        debug!(
            fragments = context.fragments.len(),
            tokens = context.estimated_tokens,
            "Context assembled"
        );
        state.fragments = context.fragments;
        state.citations = context.citations;

        let question = format!("Context:\n{}\n\nQuestion: {}", context.text, state.query());
        let request = self
            .request(self.history(turn.conversation, Message::user(question)))
            .with_system_prompt(prompts::SYNTHESIS)
            .with_json_output();

        let mut streamed = String::new();
        let Some(buffer) = self
            .stream_reply(request, DeltaMode::AnswerField, &mut streamed, turn)
            .await?
        else {
            return Ok(None);
        };

        let reply = JsonAssembler::new()
            .with_expected_key("answer")
            .assemble_as::<SynthesisReply>(&buffer)
            .unwrap_or_else(|e| {
                warn!(error = %e, "Unreadable synthesis reply");
                SynthesisReply {
                    answer: None,
                    status: AnswerStatus::Insufficient,
                    candidates: Vec::new(),
                }
            });
        Ok(Some((reply, streamed)))
    }

    /// Stream a reply, forwarding answer deltas and appending them to
    /// `emitted`. `None` when cancelled.
    ///
    /// In [`DeltaMode::AnswerField`] nothing is forwarded until the reply has
    /// declared `"status": "answered"`, so text from a rejected synthesis
    /// never reaches the caller.
    async fn stream_reply(
        &self,
        mut request: ProviderRequest,
        mode: DeltaMode,
        emitted: &mut String,
        turn: &Turn<'_>,
    ) -> sift_core::Result<Option<String>> {
        request.stream = true;
        let timeout = self.config.model_timeout;

        let mut rx: ChunkReceiver = tokio::select! {
            biased;
            _ = turn.cancel.cancelled() => return Ok(None),
            rx = tokio::time::timeout(timeout, self.provider.stream(request)) => {
                rx.map_err(|_| timeout_error(timeout))??
            }
        };

        let partial = JsonAssembler::new().with_expected_key("answer").allow_partial_strings();
        let mut buffer = String::new();

        loop {
            let next = tokio::select! {
                biased;
                _ = turn.cancel.cancelled() => return Ok(None),
                next = tokio::time::timeout(timeout, rx.recv()) => next.map_err(|_| timeout_error(timeout))?,
            };
            let Some(chunk) = next else { break };
            let chunk = chunk?;

            if let Some(text) = chunk.content.as_deref().filter(|t| !t.is_empty()) {
                buffer.push_str(text);
                let delta = match mode {
                    DeltaMode::Raw => answer_delta(emitted, buffer.trim()),
                    DeltaMode::AnswerField => partial
                        .assemble(&buffer)
                        .ok()
                        .filter(|map| map.get("status").and_then(Value::as_str) == Some("answered"))
                        .and_then(|map| map.get("answer").and_then(Value::as_str).map(str::to_string))
                        .and_then(|answer| answer_delta(emitted, answer.trim())),
                };
                if let Some(content) = delta {
                    turn.emit(LoopEvent::AnswerDelta { content }).await;
                }
            }
            if chunk.done {
                break;
            }
        }

        Ok(Some(buffer))
    }

    // ── Terminal states ──

    /// `streamed` is the answer text already sent as deltas; the rest is sent now.
    async fn answered(&self, mut state: LoopState, answer: String, streamed: &str, turn: &Turn<'_>) -> LoopOutcome {
        let mut emitted = streamed.to_string();
        if let Some(content) = answer_delta(&mut emitted, &answer) {
            turn.emit(LoopEvent::AnswerDelta { content }).await;
        } else if emitted != answer {
            warn!(streamed = emitted.len(), "Streamed text diverged from the final answer");
        }
        let citations: Vec<Citation> = state.citations.resolve(&answer).into_iter().cloned().collect();
        info!(iterations = state.iteration, cited = citations.len(), "Turn answered");
        state.termination = Some(Termination::Answered);
        self.finish(state, Some(answer), citations, None, turn).await
    }

    async fn clarifying(&self, mut state: LoopState, question: &str, candidates: &[usize], turn: &Turn<'_>) -> LoopOutcome {
        let options: Vec<ClarificationOption> = candidates
            .iter()
            .map(|&index| ClarificationOption {
                index,
                id: state.records[index].id().to_string(),
                label: option_label(&state.records[index]),
            })
            .collect();
        let question = if question.is_empty() {
            "I found several matches. Which one did you mean?".to_string()
        } else {
            question.to_string()
        };
        info!(options = options.len(), "Turn suspended for clarification");
        turn.emit(LoopEvent::Clarification {
            question: question.clone(),
            options: options.clone(),
        })
        .await;
        state.clarification = Some(Clarification { question, options });
        state.termination = Some(Termination::Clarifying);
        self.finish(state, None, Vec::new(), None, turn).await
    }

    async fn exhausted(&self, mut state: LoopState, turn: &Turn<'_>) -> LoopOutcome {
        warn!(iterations = state.iteration, "Retrieval budget exhausted");
        let reasoner = FallbackReasoner::new(self.provider.clone(), &self.config.model)
            .with_timeout(self.config.model_timeout);
        let failure = tokio::select! {
            biased;
            _ = turn.cancel.cancelled() => None,
            failure = reasoner.explain(state.query(), &state.trace, &state.fragments) => Some(failure),
        };
        let Some(failure) = failure else {
            return self.cancelled(state, turn).await;
        };
        state.termination = Some(Termination::Exhausted);
        self.finish(state, None, Vec::new(), Some(failure), turn).await
    }

    async fn cancelled(&self, mut state: LoopState, turn: &Turn<'_>) -> LoopOutcome {
        info!(iterations = state.iteration, "Turn cancelled");
        state.discard_evidence();
        state.termination = Some(Termination::Cancelled);
        self.finish(state, None, Vec::new(), None, turn).await
    }

    async fn finish(
        &self,
        state: LoopState,
        answer: Option<String>,
        citations: Vec<Citation>,
        failure: Option<FailureExplanation>,
        turn: &Turn<'_>,
    ) -> LoopOutcome {
        let termination = state.termination.unwrap_or(Termination::Answered);
        turn.emit(LoopEvent::Done {
            termination,
            iterations: state.iteration,
            tool_calls_made: state.trace.tool_calls.len(),
        })
        .await;
        LoopOutcome {
            termination,
            answer,
            citations,
            failure,
            state,
        }
    }

    // ── Requests ──

    fn request(&self, messages: Vec<Message>) -> ProviderRequest {
        ProviderRequest::new(&self.config.model, messages)
            .with_temperature(self.config.temperature)
            .with_max_tokens(self.config.max_tokens)
    }

    /// Recent turns followed by `last`.
    fn history(&self, conversation: &Conversation, last: Message) -> Vec<Message> {
        let turns: Vec<&Message> = conversation.turns().collect();
        let start = turns.len().saturating_sub(HISTORY_TURNS);
        let mut messages: Vec<Message> = turns[start..].iter().map(|m| (*m).clone()).collect();
        messages.push(last);
        messages
    }
}

// ── Helpers ───────────────────────────────────────────────────────────────

async fn report_error(result: &sift_core::Result<LoopOutcome>, turn: &Turn<'_>) {
    if let Err(e) = result {
        warn!(error = %e, "Turn failed");
        let message = match e {
            Error::Provider(_) => "The model gateway is unavailable. Please try again.".to_string(),
            other => other.to_string(),
        };
        turn.emit(LoopEvent::Error { message }).await;
    }
}

fn timeout_error(timeout: Duration) -> ProviderError {
    ProviderError::Timeout(format!("no response within {}s", timeout.as_secs()))
}

fn route_name(route: &Route) -> &'static str {
    match route {
        Route::DirectAnswer(_) => "direct_answer",
        Route::Retrieve(_) => "retrieve",
        Route::Conversational => "conversational",
    }
}

/// The new suffix of `answer`, if it extends what was already emitted.
fn answer_delta(emitted: &mut String, answer: &str) -> Option<String> {
    let delta = answer.strip_prefix(emitted.as_str())?;
    if delta.is_empty() {
        return None;
    }
    let delta = delta.to_string();
    emitted.push_str(&delta);
    Some(delta)
}

fn is_missing(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => true,
        Some(Value::String(s)) => s.trim().is_empty(),
        Some(Value::Array(items)) => items.is_empty(),
        Some(_) => false,
    }
}

fn string_list(value: &Value) -> Vec<String> {
    match value {
        Value::String(s) => vec![s.clone()],
        Value::Array(items) => items.iter().filter_map(|v| v.as_str().map(String::from)).collect(),
        _ => Vec::new(),
    }
}

/// A value for a required argument the plan left out.
fn derive_argument(name: &str, query: &str, state: &LoopState) -> Option<Value> {
    let filters = state.classification.as_ref().map(|c| &c.filters);
    match name {
        "query" => (!query.trim().is_empty()).then(|| Value::String(query.to_string())),
        "ids" => {
            let references = state.utterance.references();
            (!references.is_empty()).then(|| json!(references))
        }
        "app" => filters?.single_app().map(|a| Value::String(a.as_str().into())),
        "entity" => filters?.single_entity().map(|e| Value::String(e.as_str().into())),
        "filter_query" => filters?.filter_query.clone().map(Value::String),
        "count" | "limit" => filters?.count.map(|n| json!(n)),
        _ => None,
    }
}

/// Copy classification filters into arguments the tool accepts and the plan
/// left unset.
fn apply_classification(definition: &ToolDefinition, arguments: &mut Map<String, Value>, classification: Option<&QueryClassification>) {
    let Some(filters) = classification.map(|c| &c.filters) else {
        return;
    };
    let participants = &filters.participants;
    let time_range = filters.time_range.unwrap_or_default();

    let candidates: [(&str, Option<Value>); 13] = [
        ("app", filters.single_app().map(|a| json!(a.as_str()))),
        ("entity", filters.single_entity().map(|e| json!(e.as_str()))),
        ("filter_query", filters.filter_query.clone().map(Value::String)),
        ("from", (!participants.from.is_empty()).then(|| json!(participants.from))),
        ("to", (!participants.to.is_empty()).then(|| json!(participants.to))),
        ("cc", (!participants.cc.is_empty()).then(|| json!(participants.cc))),
        ("bcc", (!participants.bcc.is_empty()).then(|| json!(participants.bcc))),
        ("start", time_range.start.map(|t| json!(t.to_rfc3339()))),
        ("end", time_range.end.map(|t| json!(t.to_rfc3339()))),
        ("sort", filters.sort_direction.and_then(|s| serde_json::to_value(s).ok())),
        ("count", filters.count.map(|n| json!(n))),
        ("limit", filters.count.map(|n| json!(n))),
        ("offset", filters.offset.map(|n| json!(n))),
    ];
    for (name, value) in candidates {
        if let Some(value) = value
            && definition.accepts(name)
            && is_missing(arguments.get(name))
        {
            arguments.insert(name.to_string(), value);
        }
    }
}

fn describe_tools(definitions: &[ToolDefinition]) -> String {
    definitions
        .iter()
        .map(|d| {
            let required = d.required_arguments();
            if required.is_empty() {
                format!("- {}: {}", d.name, d.description)
            } else {
                format!("- {}: {} (required: {})", d.name, d.description, required.join(", "))
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn planning_message(state: &LoopState, max_iterations: usize) -> String {
    let mut out = format!("Question: {}\n", state.query());
    if let Some(classification) = &state.classification
        && let Ok(json) = serde_json::to_string(classification)
    {
        out.push_str(&format!("Classification: {json}\n"));
    }
    if !state.records.is_empty() {
        out.push_str("\nGathered so far:\n");
        for (i, record) in state.records.iter().enumerate() {
            out.push_str(&format!("- [{i}] {} ({})\n", record.title(), record.entity()));
        }
    }
    let calls = state.trace.summarize_calls();
    if !calls.is_empty() {
        out.push_str("\nPrevious calls:\n");
        for line in calls {
            out.push_str(&format!("- {line}\n"));
        }
    }
    out.push_str(&format!("\nIteration {} of {max_iterations}.", state.iteration));
    out
}

fn option_label(record: &RetrievedRecord) -> String {
    match record.timestamp() {
        Some(at) => format!("{} ({}, {})", record.title(), record.entity(), at.format("%Y-%m-%d")),
        None => format!("{} ({})", record.title(), record.entity()),
    }
}
