use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{multipart, Method};

use super::ApiClient;
use crate::documents::{DocumentPage, DocumentsApi};
use crate::errors::ApiError;
use crate::models::document::{
    DocumentFilters, DocumentListItem, DocumentStatus, DocumentStatusResponse, UploadResponse,
};
use crate::models::graph::GraphData;
use crate::poller::{StatusReport, StatusSource};

pub const DOCUMENTS_BASE: &str = "/documents";
pub const USER_GRAPH_BASE: &str = "/user/graph";

/// Optional filters for graph endpoints.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GraphQuery {
    pub types: Vec<String>,
    pub max_nodes: Option<u32>,
    pub max_depth: Option<u32>,
}

impl GraphQuery {
    fn query_string(&self, with_depth: bool) -> String {
        let mut params = Vec::new();
        if !self.types.is_empty() {
            params.push(format!("types={}", self.types.join(",")));
        }
        if let Some(n) = self.max_nodes {
            params.push(format!("max_nodes={n}"));
        }
        if with_depth {
            if let Some(d) = self.max_depth {
                params.push(format!("max_depth={d}"));
            }
        }
        if params.is_empty() {
            String::new()
        } else {
            format!("?{}", params.join("&"))
        }
    }
}

/// GET /documents/{id}/graph. Depth only applies to the user-level graph.
pub fn document_graph_path(document_id: &str, query: &GraphQuery) -> String {
    format!(
        "{DOCUMENTS_BASE}/{document_id}/graph{}",
        query.query_string(false)
    )
}

/// GET /user/graph, aggregated across every document of the caller.
pub fn user_graph_path(query: &GraphQuery) -> String {
    format!("{USER_GRAPH_BASE}{}", query.query_string(true))
}

pub fn document_status_path(document_id: &str) -> String {
    format!("{DOCUMENTS_BASE}/{document_id}/status")
}

impl ApiClient {
    pub async fn list_documents(
        &self,
        filters: &DocumentFilters,
    ) -> Result<Vec<DocumentListItem>, ApiError> {
        let items: Option<Vec<DocumentListItem>> = self.get_json(&filters.to_path()).await?;
        Ok(items.unwrap_or_default())
    }

    pub async fn get_document_status(
        &self,
        document_id: &str,
    ) -> Result<DocumentStatusResponse, ApiError> {
        self.get_json(&document_status_path(document_id)).await
    }

    /// Knowledge graph extracted from one document. The same path works as a cache key.
    pub async fn get_document_graph(
        &self,
        document_id: &str,
        query: &GraphQuery,
    ) -> Result<GraphData, ApiError> {
        self.get_json(&document_graph_path(document_id, query)).await
    }

    /// Knowledge graph aggregated across every document of the caller.
    pub async fn get_user_graph(&self, query: &GraphQuery) -> Result<GraphData, ApiError> {
        self.get_json(&user_graph_path(query)).await
    }

    pub async fn delete_document(&self, document_id: &str) -> Result<(), ApiError> {
        self.delete(&format!("{DOCUMENTS_BASE}/{document_id}")).await
    }

    /// POST /documents/upload as multipart with a single `file` field.
    pub async fn upload_document(
        &self,
        filename: &str,
        contents: Bytes,
    ) -> Result<UploadResponse, ApiError> {
        let part = multipart::Part::bytes(contents.to_vec()).file_name(filename.to_string());
        let form = multipart::Form::new().part("file", part);
        let path = format!("{DOCUMENTS_BASE}/upload");
        let builder = self.request(Method::POST, &path).multipart(form);
        self.send(Method::POST, &path, builder).await
    }
}

#[async_trait]
impl DocumentsApi for ApiClient {
    async fn list(&self, filters: &DocumentFilters) -> Result<DocumentPage, ApiError> {
        self.list_documents(filters).await
    }

    async fn upload(&self, filename: &str, contents: Bytes) -> Result<UploadResponse, ApiError> {
        self.upload_document(filename, contents).await
    }

    async fn delete(&self, document_id: &str) -> Result<(), ApiError> {
        self.delete_document(document_id).await
    }
}

#[async_trait]
impl StatusSource<DocumentStatus> for ApiClient {
    async fn check(&self, entity_id: &str) -> Result<StatusReport<DocumentStatus>, ApiError> {
        let resp = self.get_document_status(entity_id).await?;
        Ok(StatusReport {
            status: resp.status,
            progress_message: resp.progress_message,
            error_message: resp.error_message,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::api_client::test_server::serve_once;
    use crate::cache::{CacheOptions, Fetcher, ResourceCache};
    use crate::models::graph::NodeType;

    #[test]
    fn test_document_graph_path_without_query() {
        assert_eq!(
            document_graph_path("abc", &GraphQuery::default()),
            "/documents/abc/graph"
        );
    }

    #[test]
    fn test_document_graph_path_ignores_depth() {
        let query = GraphQuery {
            types: vec!["Skill".into(), "Company".into()],
            max_nodes: Some(50),
            max_depth: Some(3),
        };
        assert_eq!(
            document_graph_path("abc", &query),
            "/documents/abc/graph?types=Skill,Company&max_nodes=50"
        );
    }

    #[test]
    fn test_user_graph_path_with_depth() {
        let query = GraphQuery {
            types: vec![],
            max_nodes: Some(50),
            max_depth: Some(3),
        };
        assert_eq!(user_graph_path(&query), "/user/graph?max_nodes=50&max_depth=3");
        assert_eq!(user_graph_path(&GraphQuery::default()), "/user/graph");
    }

    struct GraphByKey;

    #[async_trait]
    impl Fetcher<GraphData> for GraphByKey {
        async fn fetch(&self, key: &str) -> Result<GraphData, ApiError> {
            assert_eq!(key, "/documents/abc/graph?max_nodes=50");
            crate::api_client::decode_response(
                200,
                r##"{"nodes": [{"id": 1, "color": "#3b82f6",
                    "data": {"name": "Rust", "type": "skill"}}], "links": []}"##,
            )
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_document_graph_through_cache() {
        let cache: ResourceCache<GraphData> = ResourceCache::new(Arc::new(GraphByKey));
        let query = GraphQuery {
            max_nodes: Some(50),
            ..GraphQuery::default()
        };

        let mut sub = cache.get(Some(&document_graph_path("abc", &query)), CacheOptions::default());
        let graph = sub.settled().await.data.unwrap();
        assert_eq!(graph.nodes.len(), 1);
        assert_eq!(graph.nodes[0].data.node_type, NodeType::Skill);
    }

    #[tokio::test]
    async fn test_graph_requests() {
        let body = r##"{"nodes": [], "links": []}"##;
        let query = GraphQuery {
            types: vec!["Skill".into()],
            max_nodes: Some(10),
            max_depth: Some(2),
        };

        let (base, request) = serve_once(200, body).await;
        let client = ApiClient::new(base, None).unwrap();
        let graph = client.get_document_graph("abc", &query).await.unwrap();
        assert_eq!(graph, GraphData::default());
        assert!(request
            .await
            .unwrap()
            .starts_with("GET /documents/abc/graph?types=Skill&max_nodes=10 HTTP/1.1"));

        let (base, request) = serve_once(200, body).await;
        let client = ApiClient::new(base, None).unwrap();
        client.get_user_graph(&query).await.unwrap();
        assert!(request
            .await
            .unwrap()
            .starts_with("GET /user/graph?types=Skill&max_nodes=10&max_depth=2 HTTP/1.1"));
    }

    #[test]
    fn test_status_path() {
        assert_eq!(document_status_path("d1"), "/documents/d1/status");
    }
}
