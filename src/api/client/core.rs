//! Core client implementation
//!
//! This module provides a client implementation that wraps Core directly,
//! providing the same interface as HttpClientImpl but without HTTP overhead.

use super::{Client, ClientError};
use crate::assist::{AssistOutcome, AssistRequest};
use crate::models::{
    ActionField, Analysis, AnalysisError, AnalysisResponse, AnalysisUpdate, DeleteOutcome,
    DistilledContext, Node, NodeUpdate, PathItem, Relation,
};
use crate::Core;

/// A client implementation that wraps Core directly
#[derive(Clone)]
pub struct CoreClient {
    core: Core,
}

impl CoreClient {
    /// Create a new CoreClient with the given Core instance
    pub fn new(core: Core) -> Self {
        Self { core }
    }
}

/// Convert AnalysisError to ClientError for interface compatibility
impl From<AnalysisError> for ClientError {
    fn from(error: AnalysisError) -> Self {
        match error {
            AnalysisError::AlreadyGenerating => ClientError::Conflict(error.to_string()),
            AnalysisError::MissingNodeId(_) => ClientError::Api(error.to_string()),
        }
    }
}

fn require<T>(response: AnalysisResponse<Option<T>>, what: String) -> Result<AnalysisResponse<T>, ClientError> {
    let context = response.distilled_context;
    match response.res {
        Some(res) => Ok(AnalysisResponse::new(res, context)),
        None => Err(ClientError::NotFound(what)),
    }
}

fn require_changed(response: AnalysisResponse<bool>, what: String) -> Result<AnalysisResponse<bool>, ClientError> {
    if *response.inner() {
        Ok(response)
    } else {
        Err(ClientError::NotFound(what))
    }
}

#[async_trait::async_trait]
impl Client for CoreClient {
    async fn get_analysis(&self) -> Result<AnalysisResponse<Analysis>, ClientError> {
        Ok(self.core.get_analysis())
    }

    async fn get_distilled_context(&self) -> Result<DistilledContext, ClientError> {
        Ok(self.core.distilled_context())
    }

    async fn get_forest_context(&self) -> Result<AnalysisResponse<String>, ClientError> {
        Ok(self.core.forest_context())
    }

    async fn update_analysis(
        &self,
        update: AnalysisUpdate,
    ) -> Result<AnalysisResponse<()>, ClientError> {
        Ok(self.core.update_analysis(update))
    }

    async fn add_node(
        &self,
        target_id: String,
        relation: Relation,
    ) -> Result<AnalysisResponse<String>, ClientError> {
        require(
            self.core.add_node(&target_id, relation),
            format!("Node '{}' not found", target_id),
        )
    }

    async fn get_node(&self, id: String) -> Result<AnalysisResponse<Node>, ClientError> {
        require(self.core.find_node(&id), format!("Node '{}' not found", id))
    }

    async fn update_node(
        &self,
        id: String,
        update: NodeUpdate,
    ) -> Result<AnalysisResponse<bool>, ClientError> {
        require_changed(
            self.core.update_node(&id, update),
            format!("Node '{}' not found", id),
        )
    }

    async fn delete_node(&self, id: String) -> Result<AnalysisResponse<bool>, ClientError> {
        let response = self.core.delete_node(&id);
        match *response.inner() {
            DeleteOutcome::Deleted => Ok(response.replace(true)),
            DeleteOutcome::LastProblem => Err(ClientError::Conflict(
                "Cannot delete the last problem".to_string(),
            )),
            DeleteOutcome::NotFound => {
                Err(ClientError::NotFound(format!("Node '{}' not found", id)))
            }
        }
    }

    async fn get_path(&self, id: String) -> Result<AnalysisResponse<Vec<PathItem>>, ClientError> {
        require(self.core.path_to(&id), format!("Node '{}' not found", id))
    }

    async fn add_action(&self, node_id: String) -> Result<AnalysisResponse<bool>, ClientError> {
        require_changed(
            self.core.add_action(&node_id),
            format!("Node '{}' not found", node_id),
        )
    }

    async fn update_action(
        &self,
        node_id: String,
        index: usize,
        field: ActionField,
        value: String,
    ) -> Result<AnalysisResponse<bool>, ClientError> {
        require_changed(
            self.core.update_action(&node_id, index, field, value),
            format!("Action {} on node '{}' not found", index, node_id),
        )
    }

    async fn remove_action(
        &self,
        node_id: String,
        index: usize,
    ) -> Result<AnalysisResponse<bool>, ClientError> {
        require_changed(
            self.core.remove_action(&node_id, index),
            format!("Action {} on node '{}' not found", index, node_id),
        )
    }

    async fn add_ultimate_action(&self) -> Result<AnalysisResponse<bool>, ClientError> {
        Ok(self.core.add_ultimate_action())
    }

    async fn update_ultimate_action(
        &self,
        index: usize,
        field: ActionField,
        value: String,
    ) -> Result<AnalysisResponse<bool>, ClientError> {
        require_changed(
            self.core.update_ultimate_action(index, field, value),
            format!("Action {} not found", index),
        )
    }

    async fn remove_ultimate_action(
        &self,
        index: usize,
    ) -> Result<AnalysisResponse<bool>, ClientError> {
        require_changed(
            self.core.remove_ultimate_action(index),
            format!("Action {} not found", index),
        )
    }

    async fn assist(
        &self,
        request: AssistRequest,
    ) -> Result<AnalysisResponse<AssistOutcome>, ClientError> {
        let target = request.node_id.clone().unwrap_or_default();
        let response = self.core.assist(request).await?;
        require(response, format!("Node '{}' not found", target))
    }

    async fn get_report(&self) -> Result<AnalysisResponse<String>, ClientError> {
        require(self.core.last_report(), "Report not found".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generate::{GeminiConfig, GeminiGenerator};
    use crate::ids::SequentialIds;
    use crate::models::Session;
    use std::sync::Arc;

    fn client() -> CoreClient {
        let generator = GeminiGenerator::new(GeminiConfig::default()).unwrap();
        let session = Session::with_ids(Arc::new(SequentialIds::new("n")));
        CoreClient::new(Core::new(session, Arc::new(generator)))
    }

    #[tokio::test]
    async fn test_not_found_and_conflict_mapping() {
        let client = client();

        let missing = client.get_node("zzz".to_string()).await;
        assert!(matches!(missing, Err(ClientError::NotFound(_))));

        let last_root = client.delete_node("n-1".to_string()).await;
        assert!(matches!(last_root, Err(ClientError::Conflict(_))));

        let unknown = client.delete_node("zzz".to_string()).await;
        assert!(matches!(unknown, Err(ClientError::NotFound(_))));

        let report = client.get_report().await;
        assert!(matches!(report, Err(ClientError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_add_and_read_back() {
        let client = client();

        let new_id = client
            .add_node("n-2".to_string(), Relation::Sibling)
            .await
            .unwrap()
            .into_inner();
        client
            .update_node(new_id.clone(), NodeUpdate::text("Operator absent"))
            .await
            .unwrap();

        let node = client.get_node(new_id).await.unwrap().into_inner();
        assert_eq!(node.text(), "Operator absent");
    }

    #[tokio::test]
    async fn test_assist_without_key_folds_error_text() {
        let client = client();
        let outcome = client
            .assist(AssistRequest::node(crate::assist::AssistKind::Why, "n-2"))
            .await
            .unwrap()
            .into_inner();

        assert!(outcome.applied);
        assert_eq!(outcome.text, crate::generate::MISSING_KEY_MESSAGE);
    }
}
