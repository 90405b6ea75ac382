//! HTTP client implementation
//!
//! Talks to a running deepdive server through its JSON API.

use reqwest::{Client as ReqwestClient, Error as ReqwestError, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::Client;
use crate::assist::{AssistOutcome, AssistRequest};
use crate::models::{
    ActionField, Analysis, AnalysisResponse, AnalysisUpdate, DistilledContext, Node, NodeUpdate,
    PathItem, Relation,
};

/// API client configuration
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub base_url: String,
}

/// Generic API response structure
#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    success: bool,
    data: Option<T>,
    error: Option<String>,
}

/// Client errors
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("HTTP error: {0}")]
    Http(#[from] ReqwestError),

    #[error("API error: {0}")]
    Api(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("Missing data in response")]
    MissingData,
}

#[derive(Serialize)]
struct AddNodeBody<'a> {
    target_id: &'a str,
    relation: Relation,
}

#[derive(Serialize)]
struct SetActionFieldBody {
    field: ActionField,
    value: String,
}

/// API client for the deepdive service
#[derive(Debug, Clone)]
pub struct HttpClientImpl {
    http_client: ReqwestClient,
    config: ClientConfig,
}

impl HttpClientImpl {
    /// Create a new client with custom configuration
    pub fn with_config(mut config: ClientConfig) -> Self {
        config.base_url = config.base_url.trim_end_matches('/').to_string();
        Self {
            http_client: ReqwestClient::new(),
            config,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url, path)
    }

    /// Sends a request and unwraps the `{success, data, error}` envelope
    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, ClientError> {
        let response = request.send().await?;
        let status = response.status();
        let api_response: ApiResponse<T> = response.json().await?;

        if api_response.success {
            return api_response.data.ok_or(ClientError::MissingData);
        }

        let message = api_response
            .error
            .unwrap_or_else(|| "Unknown API error".to_string());
        Err(match status {
            StatusCode::NOT_FOUND => ClientError::NotFound(message),
            StatusCode::CONFLICT => ClientError::Conflict(message),
            _ => ClientError::Api(message),
        })
    }

    /// Like [`Self::send`] for routes whose payload is an `Option` that is always present on success
    async fn send_required<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
    ) -> Result<AnalysisResponse<T>, ClientError> {
        let response: AnalysisResponse<Option<T>> = self.send(request).await?;
        let context = response.distilled_context;
        match response.res {
            Some(res) => Ok(AnalysisResponse::new(res, context)),
            None => Err(ClientError::MissingData),
        }
    }
}

#[async_trait::async_trait]
impl Client for HttpClientImpl {
    async fn get_analysis(&self) -> Result<AnalysisResponse<Analysis>, ClientError> {
        self.send(self.http_client.get(self.url("/api/analysis")))
            .await
    }

    async fn get_distilled_context(&self) -> Result<DistilledContext, ClientError> {
        self.send(self.http_client.get(self.url("/api/distilled")))
            .await
    }

    async fn get_forest_context(&self) -> Result<AnalysisResponse<String>, ClientError> {
        self.send(self.http_client.get(self.url("/api/context")))
            .await
    }

    async fn update_analysis(
        &self,
        update: AnalysisUpdate,
    ) -> Result<AnalysisResponse<()>, ClientError> {
        self.send(
            self.http_client
                .patch(self.url("/api/analysis"))
                .json(&update),
        )
        .await
    }

    async fn add_node(
        &self,
        target_id: String,
        relation: Relation,
    ) -> Result<AnalysisResponse<String>, ClientError> {
        let body = AddNodeBody {
            target_id: &target_id,
            relation,
        };
        self.send_required(self.http_client.post(self.url("/api/nodes")).json(&body))
            .await
    }

    async fn get_node(&self, id: String) -> Result<AnalysisResponse<Node>, ClientError> {
        self.send_required(
            self.http_client
                .get(self.url(&format!("/api/nodes/{}", id))),
        )
        .await
    }

    async fn update_node(
        &self,
        id: String,
        update: NodeUpdate,
    ) -> Result<AnalysisResponse<bool>, ClientError> {
        self.send(
            self.http_client
                .patch(self.url(&format!("/api/nodes/{}", id)))
                .json(&update),
        )
        .await
    }

    async fn delete_node(&self, id: String) -> Result<AnalysisResponse<bool>, ClientError> {
        self.send(
            self.http_client
                .delete(self.url(&format!("/api/nodes/{}", id))),
        )
        .await
    }

    async fn get_path(&self, id: String) -> Result<AnalysisResponse<Vec<PathItem>>, ClientError> {
        self.send_required(
            self.http_client
                .get(self.url(&format!("/api/nodes/{}/path", id))),
        )
        .await
    }

    async fn add_action(&self, node_id: String) -> Result<AnalysisResponse<bool>, ClientError> {
        self.send(
            self.http_client
                .post(self.url(&format!("/api/nodes/{}/actions", node_id))),
        )
        .await
    }

    async fn update_action(
        &self,
        node_id: String,
        index: usize,
        field: ActionField,
        value: String,
    ) -> Result<AnalysisResponse<bool>, ClientError> {
        self.send(
            self.http_client
                .patch(self.url(&format!("/api/nodes/{}/actions/{}", node_id, index)))
                .json(&SetActionFieldBody { field, value }),
        )
        .await
    }

    async fn remove_action(
        &self,
        node_id: String,
        index: usize,
    ) -> Result<AnalysisResponse<bool>, ClientError> {
        self.send(
            self.http_client
                .delete(self.url(&format!("/api/nodes/{}/actions/{}", node_id, index))),
        )
        .await
    }

    async fn add_ultimate_action(&self) -> Result<AnalysisResponse<bool>, ClientError> {
        self.send(self.http_client.post(self.url("/api/ultimate/actions")))
            .await
    }

    async fn update_ultimate_action(
        &self,
        index: usize,
        field: ActionField,
        value: String,
    ) -> Result<AnalysisResponse<bool>, ClientError> {
        self.send(
            self.http_client
                .patch(self.url(&format!("/api/ultimate/actions/{}", index)))
                .json(&SetActionFieldBody { field, value }),
        )
        .await
    }

    async fn remove_ultimate_action(
        &self,
        index: usize,
    ) -> Result<AnalysisResponse<bool>, ClientError> {
        self.send(
            self.http_client
                .delete(self.url(&format!("/api/ultimate/actions/{}", index))),
        )
        .await
    }

    async fn assist(
        &self,
        request: AssistRequest,
    ) -> Result<AnalysisResponse<AssistOutcome>, ClientError> {
        self.send_required(self.http_client.post(self.url("/api/assist")).json(&request))
            .await
    }

    async fn get_report(&self) -> Result<AnalysisResponse<String>, ClientError> {
        self.send_required(self.http_client.get(self.url("/api/report")))
            .await
    }
}
