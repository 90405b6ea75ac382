//! Client trait definition
//!
//! This module defines the `Client` trait that abstracts over the in-process and HTTP
//! clients.

use super::ClientError;
use crate::assist::{AssistOutcome, AssistRequest};
use crate::models::{
    ActionField, Analysis, AnalysisResponse, AnalysisUpdate, DistilledContext, Node, NodeUpdate,
    PathItem, Relation,
};

/// Trait defining the API client interface for the deepdive service
///
/// Requests against unknown nodes or action indices fail with [`ClientError::NotFound`].
#[async_trait::async_trait]
pub trait Client {
    /// Get the full analysis
    async fn get_analysis(&self) -> Result<AnalysisResponse<Analysis>, ClientError>;

    /// Get the distilled context
    async fn get_distilled_context(&self) -> Result<DistilledContext, ClientError>;

    /// Get the forest serialized the way the text-generation service sees it
    async fn get_forest_context(&self) -> Result<AnalysisResponse<String>, ClientError>;

    /// Update analysis-wide fields
    async fn update_analysis(
        &self,
        update: AnalysisUpdate,
    ) -> Result<AnalysisResponse<()>, ClientError>;

    /// Add a node next to or below a target, returning the new node's id
    async fn add_node(
        &self,
        target_id: String,
        relation: Relation,
    ) -> Result<AnalysisResponse<String>, ClientError>;

    async fn get_node(&self, id: String) -> Result<AnalysisResponse<Node>, ClientError>;

    async fn update_node(
        &self,
        id: String,
        update: NodeUpdate,
    ) -> Result<AnalysisResponse<bool>, ClientError>;

    /// Delete a node and its subtree. Deleting the last problem is a conflict.
    async fn delete_node(&self, id: String) -> Result<AnalysisResponse<bool>, ClientError>;

    /// Get the root-to-node chain
    async fn get_path(&self, id: String) -> Result<AnalysisResponse<Vec<PathItem>>, ClientError>;

    async fn add_action(&self, node_id: String) -> Result<AnalysisResponse<bool>, ClientError>;

    async fn update_action(
        &self,
        node_id: String,
        index: usize,
        field: ActionField,
        value: String,
    ) -> Result<AnalysisResponse<bool>, ClientError>;

    async fn remove_action(
        &self,
        node_id: String,
        index: usize,
    ) -> Result<AnalysisResponse<bool>, ClientError>;

    async fn add_ultimate_action(&self) -> Result<AnalysisResponse<bool>, ClientError>;

    async fn update_ultimate_action(
        &self,
        index: usize,
        field: ActionField,
        value: String,
    ) -> Result<AnalysisResponse<bool>, ClientError>;

    async fn remove_ultimate_action(
        &self,
        index: usize,
    ) -> Result<AnalysisResponse<bool>, ClientError>;

    /// Ask for a suggestion and fold it into the analysis
    async fn assist(
        &self,
        request: AssistRequest,
    ) -> Result<AnalysisResponse<AssistOutcome>, ClientError>;

    /// Get the most recently generated report
    async fn get_report(&self) -> Result<AnalysisResponse<String>, ClientError>;
}
