//! AI-assisted suggestions
//!
//! An assistance request runs in three steps: a prompt is built from the current state
//! under the session lock, the text-generation service is awaited without the lock, and
//! the returned text is folded back into whatever the state is at completion time,
//! addressed by node id.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::context::{format_forest, format_path};
use crate::models::{
    Action, Analysis, AnalysisError, AnalysisResponse, AnalysisUpdate, Core, NodeUpdate, Session,
};
use crate::tree;

/// What kind of suggestion to ask for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum AssistKind {
    /// Rewrite a problem statement to be specific and measurable
    ProblemRefine,
    /// Suggest the text of a why step from its path
    Why,
    /// Identify the root cause at the end of a chain
    RootCause,
    /// Append a practical solution to a leaf
    Solution,
    /// Synthesize one systemic cause from the whole forest
    UltimateCause,
    /// Append strategic solutions for the ultimate cause
    UltimateSolutions,
    /// Append executive actions parsed from a JSON reply
    UltimateActions,
    /// Produce the HTML report
    Report,
}

impl AssistKind {
    /// Returns true for kinds that target a single node
    pub fn is_node_scoped(&self) -> bool {
        matches!(
            self,
            AssistKind::ProblemRefine | AssistKind::Why | AssistKind::RootCause | AssistKind::Solution
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AssistKind::ProblemRefine => "problem_refine",
            AssistKind::Why => "why",
            AssistKind::RootCause => "root_cause",
            AssistKind::Solution => "solution",
            AssistKind::UltimateCause => "ultimate_cause",
            AssistKind::UltimateSolutions => "ultimate_solutions",
            AssistKind::UltimateActions => "ultimate_actions",
            AssistKind::Report => "report",
        }
    }
}

impl std::fmt::Display for AssistKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssistRequest {
    pub kind: AssistKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_id: Option<String>,
}

impl AssistRequest {
    pub fn node(kind: AssistKind, node_id: impl Into<String>) -> Self {
        Self {
            kind,
            node_id: Some(node_id.into()),
        }
    }

    pub fn analysis(kind: AssistKind) -> Self {
        Self {
            kind,
            node_id: None,
        }
    }
}

/// Generated text and whether it could be folded into the state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssistOutcome {
    pub kind: AssistKind,
    pub node_id: Option<String>,
    pub text: String,
    /// False when the target node disappeared while the request was in flight
    pub applied: bool,
}

/// A prompt ready to hand to the text-generation service
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedPrompt {
    pub prompt: String,
    pub system_instruction: String,
}

/// Result of interpreting a reply that should be a JSON array of actions
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionSuggestion {
    Parsed(Vec<Action>),
    Unparsed(String),
}

impl ActionSuggestion {
    /// Actions to append: the parsed list, or one review action carrying the raw reply
    pub fn into_actions(self) -> Vec<Action> {
        match self {
            ActionSuggestion::Parsed(actions) => actions,
            ActionSuggestion::Unparsed(raw) => {
                vec![Action::new(format!("Review AI suggestion: {}", raw), "", "")]
            }
        }
    }
}

/// Strips markdown code fences and parses the remainder as a JSON array of actions
///
/// Any JSON array is accepted. Each element becomes one action; null or missing fields
/// are empty and other scalars keep their JSON text.
pub fn parse_action_suggestion(raw: &str) -> ActionSuggestion {
    let cleaned = raw.replace("```json", "").replace("```", "");
    match serde_json::from_str::<Value>(cleaned.trim()) {
        Ok(Value::Array(items)) => {
            ActionSuggestion::Parsed(items.iter().map(action_from_value).collect())
        }
        _ => ActionSuggestion::Unparsed(raw.to_string()),
    }
}

fn action_from_value(item: &Value) -> Action {
    match item {
        Value::Object(fields) => {
            let field = |name: &str| fields.get(name).map(value_text).unwrap_or_default();
            Action::new(field("description"), field("assignee"), field("deadline"))
        }
        other => Action::new(value_text(other), "", ""),
    }
}

fn value_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

/// System instruction shared by every request, with the analysis purpose folded in
pub fn system_instruction(context_description: &str) -> String {
    let mut lines = vec!["You are an expert root cause analysis assistant.".to_string()];
    if !context_description.is_empty() {
        lines.push(format!(
            "Analysis Purpose & Context: \"{}\".",
            context_description
        ));
    }
    lines.extend(
        [
            "",
            "Instructions:",
            "- Provide objective, concise, and practical analysis based strictly on the text inputs provided.",
            "- Do not assume any specific persona unless explicitly asked in the user text.",
            "- Focus on logical consistency and evidence-based reasoning.",
        ]
        .iter()
        .map(|s| s.to_string()),
    );
    lines.join("\n")
}

/// Builds the prompt for `request` from the given state
///
/// Returns `Ok(None)` when a node-scoped request names a node that does not exist.
pub fn prepare(analysis: &Analysis, request: &AssistRequest) -> Result<Option<PreparedPrompt>, AnalysisError> {
    let prompt = if request.kind.is_node_scoped() {
        let node_id = request
            .node_id
            .as_deref()
            .ok_or_else(|| AnalysisError::MissingNodeId(request.kind.to_string()))?;
        let Some(node) = tree::find_by_id(analysis.problem_trees(), node_id) else {
            return Ok(None);
        };
        let path_text = tree::path_to(analysis.problem_trees(), node_id)
            .map(|path| format_path(&path))
            .unwrap_or_default();
        node_prompt(request.kind, node.text(), &path_text)
    } else {
        analysis_prompt(request.kind, analysis)
    };

    Ok(Some(PreparedPrompt {
        prompt,
        system_instruction: system_instruction(analysis.context_description()),
    }))
}

fn node_prompt(kind: AssistKind, node_text: &str, path_text: &str) -> String {
    match kind {
        AssistKind::ProblemRefine => format!(
            "Analyze this problem statement: \"{}\". Improve it to be more specific, measurable, and objective.",
            node_text
        ),
        AssistKind::Why => format!(
            "Based on the analysis path: \"{}\", suggest a logical next 'Why' or cause for the last item. Keep it short.",
            path_text
        ),
        AssistKind::RootCause => format!(
            "Analyze this branch: \"{}\". Identify the specific Root Cause for this specific chain of events.",
            path_text
        ),
        _ => format!(
            "Given the analysis chain \"{}\", suggest a practical solution.",
            path_text
        ),
    }
}

fn analysis_prompt(kind: AssistKind, analysis: &Analysis) -> String {
    let forest = format_forest(analysis.problem_trees());
    match kind {
        AssistKind::UltimateCause => format!(
            "Analyze the entire 5-Why Analysis Tree below.\n\
             Look at all branches, from the initial Problem statements down to the various 'Why' levels and identified Root Causes.\n\
             \n\
             FULL ANALYSIS TREE:\n\
             {}\n\
             \n\
             Task:\n\
             Synthesize all these findings into a single \"Ultimate Cause\".\n\
             This should be the deep systemic issue that connects the different branches or explains the primary failure mode.\n\
             Be comprehensive but concise.",
            forest
        ),
        AssistKind::UltimateSolutions => {
            let problems = analysis
                .problem_trees()
                .iter()
                .map(|root| format!("\"{}\"", root.text()))
                .collect::<Vec<_>>()
                .join(", ");
            format!(
                "Context:\n\
                 Original Problems: {}\n\
                 Identified Ultimate Root Cause: \"{}\"\n\
                 \n\
                 Task:\n\
                 Suggest 2-3 strategic, high-level solutions that address the Ultimate Root Cause and would effectively resolve the Original Problems.",
                problems,
                analysis.ultimate_cause()
            )
        }
        AssistKind::UltimateActions => format!(
            "Given the Ultimate Cause: \"{}\" and Strategic Solutions: \"{}\",\n\
             Suggest 3 concrete executive actions.\n\
             Return ONLY a valid JSON array of objects. Do not wrap in markdown or code blocks.\n\
             Format: [{{\"description\": \"Action details\", \"assignee\": \"Role\", \"deadline\": \"Duration/Date\"}}]",
            analysis.ultimate_cause(),
            analysis.ultimate_solutions_text()
        ),
        _ => {
            let actions = serde_json::to_string(analysis.ultimate_actions())
                .unwrap_or_else(|_| "[]".to_string());
            format!(
                "Generate a formal \"5 Why Analysis Report\" as semantic HTML.\n\
                 \n\
                 You must strictly distinguish between the \"Brainstorming/Analysis Data\" (which is the input provided by users/AI previously) and the \"Report Synthesis\" (your formatted output).\n\
                 \n\
                 --- INPUT DATA START ---\n\
                 CONTEXT/PURPOSE: {}\n\
                 \n\
                 FULL ANALYSIS TREE (Brainstorming Data):\n\
                 {}\n\
                 \n\
                 CONSOLIDATED ULTIMATE CAUSE: {}\n\
                 STRATEGIC SOLUTIONS: {}\n\
                 EXECUTIVE ACTIONS: {}\n\
                 --- INPUT DATA END ---\n\
                 \n\
                 Requirements:\n\
                 1. Use standard HTML tags (<h3>, <p>, <ul>, <li>, <strong>, <table>, <hr>).\n\
                 2. Do NOT use markdown syntax.\n\
                 3. Structure the report clearly:\n\
                 \x20  - **Executive Summary**: Briefly summarize the findings, referencing the Context/Purpose.\n\
                 \x20  - **Detailed Analysis Breakdown**: Present the 'Analysis Tree' data in a readable format.\n\
                 \x20  - **Systemic Root Cause**: The consolidated ultimate cause.\n\
                 \x20  - **Strategic Plan**: The solutions and actions.",
                analysis.context_description(),
                forest,
                analysis.ultimate_cause(),
                analysis.ultimate_solutions_text(),
                actions
            )
        }
    }
}

/// Folds generated text into the session as it is now. Returns false if the target is gone.
pub(crate) fn fold(session: &mut Session, request: &AssistRequest, text: &str) -> bool {
    let node_id = request.node_id.as_deref().unwrap_or_default();
    match request.kind {
        AssistKind::ProblemRefine | AssistKind::Why => {
            session.apply_node_update(node_id, &NodeUpdate::text(text))
        }
        AssistKind::RootCause => session.apply_node_update(node_id, &NodeUpdate::root_cause(text)),
        AssistKind::Solution => {
            let Some(node) = tree::find_by_id(session.analysis().problem_trees(), node_id) else {
                return false;
            };
            let solutions = format!("{}\n• {}", node.solutions_text(), text);
            session.apply_node_update(node_id, &NodeUpdate::solutions_text(solutions))
        }
        AssistKind::UltimateCause => {
            session.update_analysis(AnalysisUpdate {
                ultimate_cause: Some(text.to_string()),
                ..AnalysisUpdate::default()
            });
            true
        }
        AssistKind::UltimateSolutions => {
            let existing = session.analysis().ultimate_solutions_text();
            let combined = if existing.is_empty() {
                text.to_string()
            } else {
                format!("{}\n{}", existing, text)
            };
            session.update_analysis(AnalysisUpdate {
                ultimate_solutions_text: Some(combined),
                ..AnalysisUpdate::default()
            });
            true
        }
        AssistKind::UltimateActions => {
            let suggestion = parse_action_suggestion(text);
            if let ActionSuggestion::Unparsed(_) = &suggestion {
                tracing::warn!("action suggestion was not a JSON array, keeping it for review");
            }
            session.append_ultimate_actions(suggestion.into_actions());
            true
        }
        AssistKind::Report => {
            session.set_last_report(text.to_string());
            true
        }
    }
}

/// Releases the outstanding-request slot if the assist future is dropped mid-flight
struct PendingRequest<'a> {
    core: &'a Core,
    kind: AssistKind,
    armed: bool,
}

impl Drop for PendingRequest<'_> {
    fn drop(&mut self) {
        if self.armed {
            let kind = self.kind;
            self.core
                .with_session(|session| session.finish_request(kind.as_str()));
        }
    }
}

impl Core {
    /// Asks the text-generation service for a suggestion and folds the reply into the state
    ///
    /// Returns `None` when a node-scoped request names an unknown node. A report is
    /// refused while any other request is outstanding.
    pub async fn assist(
        &self,
        request: AssistRequest,
    ) -> Result<AnalysisResponse<Option<AssistOutcome>>, AnalysisError> {
        let kind = request.kind;

        let prepared = self.with_session(|session| -> Result<Option<PreparedPrompt>, AnalysisError> {
            if kind == AssistKind::Report && session.is_generating() {
                return Err(AnalysisError::AlreadyGenerating);
            }
            let prepared = prepare(session.analysis(), &request)?;
            if prepared.is_some() {
                session.begin_request(kind.as_str());
            }
            Ok(prepared)
        })?;

        let Some(prepared) = prepared else {
            tracing::debug!(kind = %kind, node_id = ?request.node_id, "assist target not found");
            return Ok(AnalysisResponse::new(None, self.distilled_context()));
        };

        let mut pending = PendingRequest {
            core: self,
            kind,
            armed: true,
        };

        tracing::info!(kind = %kind, node_id = ?request.node_id, "requesting suggestion");
        let text = self
            .generator()
            .generate(&prepared.prompt, Some(&prepared.system_instruction))
            .await;

        pending.armed = false;
        let response = self.with_session(|session| {
            session.finish_request(kind.as_str());
            let applied = fold(session, &request, &text);
            if !applied {
                tracing::info!(kind = %kind, node_id = ?request.node_id, "target removed before suggestion arrived");
            }
            AnalysisResponse::new(
                Some(AssistOutcome {
                    kind,
                    node_id: request.node_id.clone(),
                    text,
                    applied,
                }),
                session.distilled_context(),
            )
        });

        Ok(response)
    }
}
