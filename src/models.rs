//! Core models for the deepdive library
//!
//! This module contains the analysis data types and the session state machine that
//! mediates every mutation of a root cause analysis forest.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::context;
use crate::generate::TextGenerator;
use crate::ids::{IdSupplier, UuidIds};
use crate::tree;

/// Target id that stands for "the forest itself" when adding a sibling root
pub const ROOT_SENTINEL: &str = "root";

const DEFAULT_ANALYSIS_TITLE: &str = "5 Why Analysis";
const DEFAULT_PROBLEM_TITLE: &str = "Problem Statement 1";

/// The role a node plays in its tree
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    /// A problem statement; only found at the root of a tree
    Problem,
    /// One "why" step below a problem
    Why,
}

impl NodeKind {
    /// Human readable label, e.g. `Problem`
    pub fn label(&self) -> &'static str {
        match self {
            NodeKind::Problem => "Problem",
            NodeKind::Why => "Why",
        }
    }

    /// Upper-case tag used in forest serialization, e.g. `PROBLEM`
    pub fn tag(&self) -> &'static str {
        match self {
            NodeKind::Problem => "PROBLEM",
            NodeKind::Why => "WHY",
        }
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A follow-up task attached to a leaf node or to the whole analysis
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Action {
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub assignee: String,
    #[serde(default)]
    pub deadline: String,
}

/// Names one of the three free-form fields of an [`Action`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ActionField {
    Description,
    Assignee,
    Deadline,
}

impl Action {
    pub fn new(
        description: impl Into<String>,
        assignee: impl Into<String>,
        deadline: impl Into<String>,
    ) -> Self {
        Self {
            description: description.into(),
            assignee: assignee.into(),
            deadline: deadline.into(),
        }
    }

    /// Replaces a single field with the given value
    pub fn set(&mut self, field: ActionField, value: String) {
        match field {
            ActionField::Description => self.description = value,
            ActionField::Assignee => self.assignee = value,
            ActionField::Deadline => self.deadline = value,
        }
    }
}

/// One step of the analysis chain
///
/// `root_cause`, `solutions_text` and `actions` are only meaningful on leaves. They are
/// kept, not cleared, when a leaf gains children.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    pub(crate) id: String,
    pub(crate) kind: NodeKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) title: Option<String>,
    pub(crate) text: String,
    pub(crate) children: Vec<Node>,
    #[serde(default)]
    pub(crate) root_cause: String,
    #[serde(default)]
    pub(crate) solutions_text: String,
    #[serde(default)]
    pub(crate) actions: Vec<Action>,
}

impl Node {
    /// Creates an empty node of the given kind
    pub fn new(kind: NodeKind, id: String) -> Self {
        Self {
            id,
            kind,
            title: None,
            text: String::new(),
            children: Vec::new(),
            root_cause: String::new(),
            solutions_text: String::new(),
            actions: Vec::new(),
        }
    }

    /// Creates a titled problem root holding a single empty why step
    pub fn problem(ids: &dyn IdSupplier, title: impl Into<String>) -> Self {
        let mut root = Self::new(NodeKind::Problem, ids.new_id());
        root.title = Some(title.into());
        root.children.push(Self::new(NodeKind::Why, ids.new_id()));
        root
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn kind(&self) -> NodeKind {
        self.kind
    }

    pub fn title(&self) -> Option<&str> {
        self.title.as_deref()
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn children(&self) -> &[Node] {
        &self.children
    }

    pub fn root_cause(&self) -> &str {
        &self.root_cause
    }

    pub fn solutions_text(&self) -> &str {
        &self.solutions_text
    }

    pub fn actions(&self) -> &[Action] {
        &self.actions
    }

    /// Returns true if this node has no children
    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }

    /// Replaces every field named in `update`, leaving the rest untouched
    pub(crate) fn apply(&mut self, update: &NodeUpdate) {
        if let Some(title) = &update.title {
            self.title = Some(title.clone());
        }
        if let Some(text) = &update.text {
            self.text = text.clone();
        }
        if let Some(root_cause) = &update.root_cause {
            self.root_cause = root_cause.clone();
        }
        if let Some(solutions_text) = &update.solutions_text {
            self.solutions_text = solutions_text.clone();
        }
        if let Some(actions) = &update.actions {
            self.actions = actions.clone();
        }
    }

    /// Copies every field but `children`, which is replaced by the given list
    pub(crate) fn with_children(&self, children: Vec<Node>) -> Self {
        Self {
            id: self.id.clone(),
            kind: self.kind,
            title: self.title.clone(),
            text: self.text.clone(),
            children,
            root_cause: self.root_cause.clone(),
            solutions_text: self.solutions_text.clone(),
            actions: self.actions.clone(),
        }
    }
}

/// Partial set of node field replacements
///
/// Id, kind and children are deliberately absent: they only change through the tree
/// algorithms.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root_cause: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub solutions_text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actions: Option<Vec<Action>>,
}

impl NodeUpdate {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Self::default()
        }
    }

    pub fn root_cause(root_cause: impl Into<String>) -> Self {
        Self {
            root_cause: Some(root_cause.into()),
            ..Self::default()
        }
    }

    pub fn solutions_text(solutions_text: impl Into<String>) -> Self {
        Self {
            solutions_text: Some(solutions_text.into()),
            ..Self::default()
        }
    }

    pub fn actions(actions: Vec<Action>) -> Self {
        Self {
            actions: Some(actions),
            ..Self::default()
        }
    }

    /// Returns true if the update names no field at all
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }
}

/// Where a newly inserted node lands relative to its target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Relation {
    /// Appended as the last child of the target
    Child,
    /// Inserted right after the target among its parent's children
    Sibling,
}

impl fmt::Display for Relation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Relation::Child => f.write_str("child"),
            Relation::Sibling => f.write_str("sibling"),
        }
    }
}

/// One entry of a root-to-node chain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathItem {
    pub text: String,
    pub kind: NodeKind,
}

impl From<&Node> for PathItem {
    fn from(node: &Node) -> Self {
        Self {
            text: node.text.clone(),
            kind: node.kind,
        }
    }
}

/// The whole analysis: the problem forest plus the consolidated findings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Analysis {
    pub(crate) title: String,
    pub(crate) context_description: String,
    pub(crate) problem_trees: Vec<Node>,
    pub(crate) ultimate_cause: String,
    pub(crate) ultimate_solutions_text: String,
    pub(crate) ultimate_actions: Vec<Action>,
}

impl Analysis {
    /// Creates the default analysis: one titled problem with one empty why step
    pub fn new(ids: &dyn IdSupplier) -> Self {
        Self {
            title: DEFAULT_ANALYSIS_TITLE.to_string(),
            context_description: String::new(),
            problem_trees: vec![Node::problem(ids, DEFAULT_PROBLEM_TITLE)],
            ultimate_cause: String::new(),
            ultimate_solutions_text: String::new(),
            ultimate_actions: Vec::new(),
        }
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn context_description(&self) -> &str {
        &self.context_description
    }

    pub fn problem_trees(&self) -> &[Node] {
        &self.problem_trees
    }

    pub fn ultimate_cause(&self) -> &str {
        &self.ultimate_cause
    }

    pub fn ultimate_solutions_text(&self) -> &str {
        &self.ultimate_solutions_text
    }

    pub fn ultimate_actions(&self) -> &[Action] {
        &self.ultimate_actions
    }

    pub(crate) fn apply(&mut self, update: AnalysisUpdate) {
        if let Some(title) = update.title {
            self.title = title;
        }
        if let Some(context_description) = update.context_description {
            self.context_description = context_description;
        }
        if let Some(ultimate_cause) = update.ultimate_cause {
            self.ultimate_cause = ultimate_cause;
        }
        if let Some(ultimate_solutions_text) = update.ultimate_solutions_text {
            self.ultimate_solutions_text = ultimate_solutions_text;
        }
        if let Some(ultimate_actions) = update.ultimate_actions {
            self.ultimate_actions = ultimate_actions;
        }
    }
}

/// Partial set of analysis-wide field replacements
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ultimate_cause: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ultimate_solutions_text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ultimate_actions: Option<Vec<Action>>,
}

/// Represents a single state transition event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransitionLogEntry {
    pub timestamp: DateTime<Utc>,
    pub action: String,
    pub details: Option<String>,
}

impl TransitionLogEntry {
    pub fn new(action: String, details: Option<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            action,
            details,
        }
    }
}

/// Errors surfaced by the analysis core
///
/// Requests against unknown ids are not errors; they leave the state unchanged.
#[derive(Debug, thiserror::Error)]
pub enum AnalysisError {
    #[error("a report is already being generated")]
    AlreadyGenerating,

    #[error("'{0}' assistance needs a target node id")]
    MissingNodeId(String),
}

/// What a delete request did
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeleteOutcome {
    /// The node and its subtree were removed
    Deleted,
    /// The node is the only remaining root and was kept
    LastProblem,
    /// No node has the given id
    NotFound,
}

impl DeleteOutcome {
    pub fn is_deleted(&self) -> bool {
        *self == DeleteOutcome::Deleted
    }
}

// Define the maximum size for the history buffer
const MAX_HISTORY_SIZE: usize = 20;

/// Owns one analysis and mediates every mutation of it
pub struct Session {
    analysis: Analysis,
    ids: Arc<dyn IdSupplier>,
    history: VecDeque<TransitionLogEntry>,
    last_report: Option<String>,
    pending_requests: usize,
}

impl Session {
    /// Creates a session holding the default analysis with random ids
    pub fn new() -> Self {
        Self::with_ids(Arc::new(UuidIds))
    }

    /// Creates a session holding the default analysis, drawing ids from `ids`
    pub fn with_ids(ids: Arc<dyn IdSupplier>) -> Self {
        let analysis = Analysis::new(ids.as_ref());
        Self::from_analysis(analysis, ids)
    }

    pub fn from_analysis(analysis: Analysis, ids: Arc<dyn IdSupplier>) -> Self {
        Self {
            analysis,
            ids,
            history: VecDeque::with_capacity(MAX_HISTORY_SIZE),
            last_report: None,
            pending_requests: 0,
        }
    }

    /// Logs a state transition, maintaining the history buffer size.
    fn log_transition(&mut self, action: &str, details: Option<String>) {
        tracing::debug!(action, details = details.as_deref().unwrap_or(""), "transition");
        if self.history.len() == MAX_HISTORY_SIZE {
            self.history.pop_front();
        }
        self.history
            .push_back(TransitionLogEntry::new(action.to_string(), details));
    }

    fn respond<T>(&self, res: T) -> AnalysisResponse<T> {
        AnalysisResponse::new(res, self.distilled_context())
    }

    pub(crate) fn analysis(&self) -> &Analysis {
        &self.analysis
    }

    /// Adds a node next to or below `target_id`
    ///
    /// A sibling of [`ROOT_SENTINEL`] or of any root starts a new problem tree. Returns the
    /// id of the new node, or `None` if no node matched.
    pub fn add_node(&mut self, target_id: &str, relation: Relation) -> AnalysisResponse<Option<String>> {
        self.log_transition(
            "add_node",
            Some(format!("Adding {} of '{}'", relation, target_id)),
        );

        let targets_root = target_id == ROOT_SENTINEL
            || self
                .analysis
                .problem_trees
                .iter()
                .any(|root| root.id == target_id);

        if relation == Relation::Sibling && targets_root {
            let title = format!("Problem {}", self.analysis.problem_trees.len() + 1);
            let root = Node::problem(self.ids.as_ref(), title);
            let new_id = root.id.clone();
            self.analysis.problem_trees.push(root);
            tracing::info!(node_id = %new_id, "added problem root");
            return self.respond(Some(new_id));
        }

        let (new_id, trees) = match relation {
            Relation::Child => {
                tree::insert_child(&self.analysis.problem_trees, target_id, self.ids.as_ref())
            }
            Relation::Sibling => {
                tree::insert_sibling(&self.analysis.problem_trees, target_id, self.ids.as_ref())
            }
        };

        match &new_id {
            Some(id) => {
                self.analysis.problem_trees = trees;
                tracing::info!(node_id = %id, target_id, %relation, "added why node");
            }
            None => self.log_transition(
                "add_node_ignored",
                Some(format!("No node '{}' to add a {} to", target_id, relation)),
            ),
        }

        self.respond(new_id)
    }

    /// Deletes a node and its whole subtree. The last remaining root is never deleted.
    pub fn delete_node(&mut self, id: &str) -> AnalysisResponse<DeleteOutcome> {
        self.log_transition("delete_node", Some(format!("Deleting node '{}'", id)));

        let trees = &self.analysis.problem_trees;
        if trees.len() == 1 && trees[0].id == id {
            self.log_transition(
                "delete_node_ignored",
                Some("Cannot delete the last problem".to_string()),
            );
            return self.respond(DeleteOutcome::LastProblem);
        }

        if !tree::contains_id(trees, id) {
            return self.respond(DeleteOutcome::NotFound);
        }
        self.analysis.problem_trees = tree::delete(trees, id);
        tracing::info!(node_id = id, "deleted subtree");
        self.respond(DeleteOutcome::Deleted)
    }

    /// Replaces the named fields of the node with the given id
    pub fn update_node(&mut self, id: &str, update: NodeUpdate) -> AnalysisResponse<bool> {
        self.log_transition("update_node", Some(format!("Updating node '{}'", id)));
        let changed = self.apply_node_update(id, &update);
        self.respond(changed)
    }

    pub(crate) fn apply_node_update(&mut self, id: &str, update: &NodeUpdate) -> bool {
        if !tree::contains_id(&self.analysis.problem_trees, id) {
            return false;
        }
        self.analysis.problem_trees = tree::update(&self.analysis.problem_trees, id, update);
        true
    }

    /// Rewrites the action list of a node through `edit`, routed via a whole-list update
    fn edit_node_actions<F>(&mut self, node_id: &str, edit: F) -> bool
    where
        F: FnOnce(&mut Vec<Action>) -> bool,
    {
        let Some(node) = tree::find_by_id(&self.analysis.problem_trees, node_id) else {
            return false;
        };
        let mut actions = node.actions.clone();
        if !edit(&mut actions) {
            return false;
        }
        self.apply_node_update(node_id, &NodeUpdate::actions(actions))
    }

    /// Appends an empty action to a node
    pub fn add_action(&mut self, node_id: &str) -> AnalysisResponse<bool> {
        self.log_transition("add_action", Some(format!("Node '{}'", node_id)));
        let changed = self.edit_node_actions(node_id, |actions| {
            actions.push(Action::default());
            true
        });
        self.respond(changed)
    }

    /// Replaces one field of the action at `index` on a node
    pub fn update_action(
        &mut self,
        node_id: &str,
        index: usize,
        field: ActionField,
        value: String,
    ) -> AnalysisResponse<bool> {
        self.log_transition(
            "update_action",
            Some(format!("Node '{}' action {} {:?}", node_id, index, field)),
        );
        let changed = self.edit_node_actions(node_id, |actions| match actions.get_mut(index) {
            Some(action) => {
                action.set(field, value);
                true
            }
            None => false,
        });
        self.respond(changed)
    }

    /// Removes the action at `index` from a node
    pub fn remove_action(&mut self, node_id: &str, index: usize) -> AnalysisResponse<bool> {
        self.log_transition(
            "remove_action",
            Some(format!("Node '{}' action {}", node_id, index)),
        );
        let changed = self.edit_node_actions(node_id, |actions| {
            if index < actions.len() {
                actions.remove(index);
                true
            } else {
                false
            }
        });
        self.respond(changed)
    }

    pub fn add_ultimate_action(&mut self) -> AnalysisResponse<bool> {
        self.log_transition("add_ultimate_action", None);
        let mut actions = self.analysis.ultimate_actions.clone();
        actions.push(Action::default());
        self.analysis.ultimate_actions = actions;
        self.respond(true)
    }

    pub fn update_ultimate_action(
        &mut self,
        index: usize,
        field: ActionField,
        value: String,
    ) -> AnalysisResponse<bool> {
        self.log_transition(
            "update_ultimate_action",
            Some(format!("Action {} {:?}", index, field)),
        );
        if index >= self.analysis.ultimate_actions.len() {
            return self.respond(false);
        }
        let mut actions = self.analysis.ultimate_actions.clone();
        actions[index].set(field, value);
        self.analysis.ultimate_actions = actions;
        self.respond(true)
    }

    pub fn remove_ultimate_action(&mut self, index: usize) -> AnalysisResponse<bool> {
        self.log_transition("remove_ultimate_action", Some(format!("Action {}", index)));
        if index >= self.analysis.ultimate_actions.len() {
            return self.respond(false);
        }
        let actions = self
            .analysis
            .ultimate_actions
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != index)
            .map(|(_, action)| action.clone())
            .collect();
        self.analysis.ultimate_actions = actions;
        self.respond(true)
    }

    /// Appends actions to the analysis-wide list
    pub(crate) fn append_ultimate_actions(&mut self, new_actions: Vec<Action>) {
        self.log_transition(
            "append_ultimate_actions",
            Some(format!("{} action(s)", new_actions.len())),
        );
        self.analysis.ultimate_actions.extend(new_actions);
    }

    /// Replaces the named analysis-wide fields
    pub fn update_analysis(&mut self, update: AnalysisUpdate) -> AnalysisResponse<()> {
        self.log_transition("update_analysis", None);
        self.analysis.apply(update);
        self.respond(())
    }

    pub fn get_analysis(&self) -> AnalysisResponse<Analysis> {
        self.respond(self.analysis.clone())
    }

    pub fn find_node(&self, id: &str) -> AnalysisResponse<Option<Node>> {
        self.respond(tree::find_by_id(&self.analysis.problem_trees, id).cloned())
    }

    /// Root-to-node chain for the node with the given id
    pub fn path_to(&self, id: &str) -> AnalysisResponse<Option<Vec<PathItem>>> {
        self.respond(tree::path_to(&self.analysis.problem_trees, id))
    }

    /// Full-forest serialization handed to the text-generation service
    pub fn forest_context(&self) -> AnalysisResponse<String> {
        self.respond(context::format_forest(&self.analysis.problem_trees))
    }

    pub fn last_report(&self) -> AnalysisResponse<Option<String>> {
        self.respond(self.last_report.clone())
    }

    pub(crate) fn set_last_report(&mut self, report: String) {
        self.log_transition("report_generated", Some(format!("{} bytes", report.len())));
        self.last_report = Some(report);
    }

    /// Returns true while at least one generation request is outstanding
    pub fn is_generating(&self) -> bool {
        self.pending_requests > 0
    }

    pub(crate) fn begin_request(&mut self, kind: &str) {
        self.pending_requests += 1;
        self.log_transition("assist_started", Some(kind.to_string()));
    }

    pub(crate) fn finish_request(&mut self, kind: &str) {
        self.pending_requests = self.pending_requests.saturating_sub(1);
        self.log_transition("assist_finished", Some(kind.to_string()));
    }

    /// Creates a distilled summary of the current analysis state
    pub fn distilled_context(&self) -> DistilledContext {
        DistilledContext {
            title: self.analysis.title.clone(),
            problem_count: self.analysis.problem_trees.len(),
            node_count: tree::node_count(&self.analysis.problem_trees),
            is_generating: self.is_generating(),
            transition_history: self.history.iter().cloned().collect(),
        }
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

/// Result of a core operation together with a summary of the state it left behind
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisResponse<T> {
    pub res: T,
    pub distilled_context: DistilledContext,
}

impl<T> AnalysisResponse<T> {
    pub fn new(res: T, distilled_context: DistilledContext) -> Self {
        Self {
            res,
            distilled_context,
        }
    }

    pub fn inner(&self) -> &T {
        &self.res
    }

    pub fn into_inner(self) -> T {
        self.res
    }

    pub fn replace<B>(self, res: B) -> AnalysisResponse<B> {
        AnalysisResponse {
            res,
            distilled_context: self.distilled_context,
        }
    }
}

/// Distilled summary of the analysis state
#[derive(Clone, Serialize, Deserialize, Debug)]
pub struct DistilledContext {
    /// Title of the analysis
    pub title: String,
    /// Number of problem trees in the forest
    pub problem_count: usize,
    /// Number of nodes across all trees
    pub node_count: usize,
    /// Whether a generation request is outstanding
    pub is_generating: bool,
    /// Recent state transition history
    pub transition_history: Vec<TransitionLogEntry>,
}

/// Cloneable handle to a shared session
///
/// Every call is one atomic transition; observers are notified through [`Core::subscribe`].
#[derive(Clone)]
pub struct Core {
    inner: Arc<Mutex<Session>>,
    update_tx: Arc<tokio::sync::broadcast::Sender<()>>,
    generator: Arc<dyn TextGenerator>,
}

impl Core {
    pub fn new(session: Session, generator: Arc<dyn TextGenerator>) -> Self {
        // Create a broadcast channel with capacity for 100 messages
        let (tx, _rx) = tokio::sync::broadcast::channel(100);

        Self {
            inner: Arc::new(Mutex::new(session)),
            update_tx: Arc::new(tx),
            generator,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Session> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Applies a mutation to the session and notifies observers
    pub(crate) fn with_session<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&mut Session) -> R,
    {
        let result = f(&mut self.lock());
        let _ = self.update_tx.send(());
        result
    }

    /// Reads from the session without notifying observers
    pub(crate) fn read<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&Session) -> R,
    {
        f(&self.lock())
    }

    pub(crate) fn generator(&self) -> Arc<dyn TextGenerator> {
        Arc::clone(&self.generator)
    }

    pub fn get_analysis(&self) -> AnalysisResponse<Analysis> {
        self.read(|session| session.get_analysis())
    }

    pub fn find_node(&self, id: &str) -> AnalysisResponse<Option<Node>> {
        self.read(|session| session.find_node(id))
    }

    pub fn path_to(&self, id: &str) -> AnalysisResponse<Option<Vec<PathItem>>> {
        self.read(|session| session.path_to(id))
    }

    pub fn forest_context(&self) -> AnalysisResponse<String> {
        self.read(|session| session.forest_context())
    }

    pub fn last_report(&self) -> AnalysisResponse<Option<String>> {
        self.read(|session| session.last_report())
    }

    pub fn distilled_context(&self) -> DistilledContext {
        self.read(|session| session.distilled_context())
    }

    pub fn add_node(&self, target_id: &str, relation: Relation) -> AnalysisResponse<Option<String>> {
        self.with_session(|session| session.add_node(target_id, relation))
    }

    pub fn delete_node(&self, id: &str) -> AnalysisResponse<DeleteOutcome> {
        self.with_session(|session| session.delete_node(id))
    }

    pub fn update_node(&self, id: &str, update: NodeUpdate) -> AnalysisResponse<bool> {
        self.with_session(|session| session.update_node(id, update))
    }

    pub fn add_action(&self, node_id: &str) -> AnalysisResponse<bool> {
        self.with_session(|session| session.add_action(node_id))
    }

    pub fn update_action(
        &self,
        node_id: &str,
        index: usize,
        field: ActionField,
        value: String,
    ) -> AnalysisResponse<bool> {
        self.with_session(|session| session.update_action(node_id, index, field, value))
    }

    pub fn remove_action(&self, node_id: &str, index: usize) -> AnalysisResponse<bool> {
        self.with_session(|session| session.remove_action(node_id, index))
    }

    pub fn add_ultimate_action(&self) -> AnalysisResponse<bool> {
        self.with_session(|session| session.add_ultimate_action())
    }

    pub fn update_ultimate_action(
        &self,
        index: usize,
        field: ActionField,
        value: String,
    ) -> AnalysisResponse<bool> {
        self.with_session(|session| session.update_ultimate_action(index, field, value))
    }

    pub fn remove_ultimate_action(&self, index: usize) -> AnalysisResponse<bool> {
        self.with_session(|session| session.remove_ultimate_action(index))
    }

    pub fn update_analysis(&self, update: AnalysisUpdate) -> AnalysisResponse<()> {
        self.with_session(|session| session.update_analysis(update))
    }

    // Subscribe to state updates
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<()> {
        self.update_tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::SequentialIds;
    use pretty_assertions::assert_eq;

    fn session() -> Session {
        Session::with_ids(Arc::new(SequentialIds::new("n")))
    }

    fn root_id(session: &Session) -> String {
        session.analysis().problem_trees()[0].id().to_string()
    }

    #[test]
    fn test_default_analysis_shape() {
        let session = session();
        let analysis = session.analysis();

        assert_eq!(analysis.title(), "5 Why Analysis");
        assert_eq!(analysis.problem_trees().len(), 1);

        let root = &analysis.problem_trees()[0];
        assert_eq!(root.kind(), NodeKind::Problem);
        assert_eq!(root.title(), Some("Problem Statement 1"));
        assert_eq!(root.children().len(), 1);
        assert_eq!(root.children()[0].kind(), NodeKind::Why);
        assert!(root.children()[0].is_leaf());
        assert!(analysis.ultimate_actions().is_empty());
    }

    #[test]
    fn test_add_child_and_sibling() {
        let mut session = session();
        let root = root_id(&session);
        let first_why = session.analysis().problem_trees()[0].children()[0]
            .id()
            .to_string();

        let child = session
            .add_node(&first_why, Relation::Child)
            .into_inner()
            .unwrap();
        let sibling = session
            .add_node(&first_why, Relation::Sibling)
            .into_inner()
            .unwrap();

        let root_node = session.find_node(&root).into_inner().unwrap();
        let ids: Vec<&str> = root_node.children().iter().map(|n| n.id()).collect();
        assert_eq!(ids, vec![first_why.as_str(), sibling.as_str()]);
        assert_eq!(root_node.children()[0].children()[0].id(), child);
    }

    #[test]
    fn test_sibling_of_root_starts_new_problem() {
        let mut session = session();
        let root = root_id(&session);

        let via_sentinel = session
            .add_node(ROOT_SENTINEL, Relation::Sibling)
            .into_inner()
            .unwrap();
        let via_root_id = session
            .add_node(&root, Relation::Sibling)
            .into_inner()
            .unwrap();

        let trees = session.analysis().problem_trees();
        assert_eq!(trees.len(), 3);
        assert_eq!(trees[1].id(), via_sentinel);
        assert_eq!(trees[1].title(), Some("Problem 2"));
        assert_eq!(trees[2].id(), via_root_id);
        assert_eq!(trees[2].title(), Some("Problem 3"));
        assert_eq!(trees[2].children().len(), 1);
        assert_eq!(trees[2].children()[0].kind(), NodeKind::Why);
    }

    #[test]
    fn test_add_node_unknown_target_is_noop() {
        let mut session = session();
        let before = session.analysis().clone();

        assert_eq!(
            session.add_node("missing", Relation::Child).into_inner(),
            None
        );
        assert_eq!(
            session.add_node("missing", Relation::Sibling).into_inner(),
            None
        );
        assert_eq!(session.analysis(), &before);
    }

    #[test]
    fn test_last_root_is_protected() {
        let mut session = session();
        let root = root_id(&session);

        assert_eq!(
            session.delete_node(&root).into_inner(),
            DeleteOutcome::LastProblem
        );
        assert_eq!(session.analysis().problem_trees().len(), 1);
        assert_eq!(
            session.delete_node("missing").into_inner(),
            DeleteOutcome::NotFound
        );

        let second = session
            .add_node(ROOT_SENTINEL, Relation::Sibling)
            .into_inner()
            .unwrap();
        assert!(session.delete_node(&root).into_inner().is_deleted());
        assert_eq!(session.analysis().problem_trees()[0].id(), second);
        assert_eq!(
            session.delete_node(&second).into_inner(),
            DeleteOutcome::LastProblem
        );
    }

    #[test]
    fn test_update_node_replaces_fields() {
        let mut session = session();
        let root = root_id(&session);

        let changed = session
            .update_node(
                &root,
                NodeUpdate {
                    text: Some("Line stopped".to_string()),
                    title: Some("Outage".to_string()),
                    ..NodeUpdate::default()
                },
            )
            .into_inner();
        assert!(changed);

        let node = session.find_node(&root).into_inner().unwrap();
        assert_eq!(node.text(), "Line stopped");
        assert_eq!(node.title(), Some("Outage"));
        assert_eq!(node.children().len(), 1);

        assert!(!session
            .update_node("missing", NodeUpdate::text("x"))
            .into_inner());
    }

    #[test]
    fn test_node_action_list_editing() {
        let mut session = session();
        let leaf = session.analysis().problem_trees()[0].children()[0]
            .id()
            .to_string();

        assert!(session.add_action(&leaf).into_inner());
        assert!(session.add_action(&leaf).into_inner());
        assert!(session
            .update_action(&leaf, 1, ActionField::Assignee, "Ops".to_string())
            .into_inner());
        assert!(!session
            .update_action(&leaf, 5, ActionField::Assignee, "Nobody".to_string())
            .into_inner());
        assert!(session.remove_action(&leaf, 0).into_inner());
        assert!(!session.remove_action(&leaf, 3).into_inner());

        let node = session.find_node(&leaf).into_inner().unwrap();
        assert_eq!(node.actions(), &[Action::new("", "Ops", "")]);
    }

    #[test]
    fn test_ultimate_action_list_editing() {
        let mut session = session();

        session.add_ultimate_action();
        session.add_ultimate_action();
        assert!(session
            .update_ultimate_action(0, ActionField::Description, "Audit".to_string())
            .into_inner());
        assert!(session
            .update_ultimate_action(1, ActionField::Deadline, "Q3".to_string())
            .into_inner());
        assert!(session.remove_ultimate_action(0).into_inner());
        assert!(!session.remove_ultimate_action(4).into_inner());

        assert_eq!(
            session.analysis().ultimate_actions(),
            &[Action::new("", "", "Q3")]
        );
    }

    #[test]
    fn test_update_analysis_fields() {
        let mut session = session();
        session.update_analysis(AnalysisUpdate {
            context_description: Some("Plant 4 incident review".to_string()),
            ultimate_cause: Some("No preventive maintenance".to_string()),
            ..AnalysisUpdate::default()
        });

        let analysis = session.analysis();
        assert_eq!(analysis.title(), "5 Why Analysis");
        assert_eq!(analysis.context_description(), "Plant 4 incident review");
        assert_eq!(analysis.ultimate_cause(), "No preventive maintenance");
    }

    #[test]
    fn test_dormant_leaf_fields_survive_demotion() {
        let mut session = session();
        let leaf = session.analysis().problem_trees()[0].children()[0]
            .id()
            .to_string();
        session.update_node(&leaf, NodeUpdate::root_cause("Worn bearing"));
        session.add_node(&leaf, Relation::Child);

        let node = session.find_node(&leaf).into_inner().unwrap();
        assert!(!node.is_leaf());
        assert_eq!(node.root_cause(), "Worn bearing");
    }

    #[test]
    fn test_transition_history_is_bounded() {
        let mut session = session();
        for _ in 0..MAX_HISTORY_SIZE + 5 {
            session.add_ultimate_action();
        }
        let context = session.distilled_context();
        assert_eq!(context.transition_history.len(), MAX_HISTORY_SIZE);
        assert_eq!(
            context.transition_history.last().unwrap().action,
            "add_ultimate_action"
        );
    }

    #[test]
    fn test_distilled_context_counts_nodes() {
        let mut session = session();
        session.add_node(ROOT_SENTINEL, Relation::Sibling);

        let context = session.distilled_context();
        assert_eq!(context.problem_count, 2);
        assert_eq!(context.node_count, 4);
        assert!(!context.is_generating);
    }

    #[test]
    fn test_pending_requests_drive_generating_flag() {
        let mut session = session();
        session.begin_request("why");
        session.begin_request("report");
        session.finish_request("why");
        assert!(session.is_generating());
        session.finish_request("report");
        assert!(!session.is_generating());
    }

    #[test]
    fn test_action_deserializes_with_missing_fields() {
        let action: Action = serde_json::from_str(r#"{"description":"Retrain staff"}"#).unwrap();
        assert_eq!(action, Action::new("Retrain staff", "", ""));
    }
}
