//! HTTP/JSON platform client.

use async_trait::async_trait;
use edgealloc_id::AppReqId;
use reqwest::StatusCode;
use tracing::{debug, error, instrument};

use super::{ClusterPlatform, PlatformError};
use crate::config::PlatformConfig;
use crate::model::{ApplicationRequirement, Cluster};

/// Client for the platform's read API.
#[derive(Debug, Clone)]
pub struct HttpPlatformClient {
    client: reqwest::Client,
    base_url: String,
}

impl HttpPlatformClient {
    /// Create a new platform client.
    pub fn new(config: &PlatformConfig) -> Result<Self, PlatformError> {
        let client = reqwest::Client::builder().timeout(config.timeout).build()?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn fail(response: reqwest::Response, what: &str) -> PlatformError {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        error!(status = %status, body = %body, "Failed to {}", what);
        PlatformError::Status {
            status: status.as_u16(),
            body,
        }
    }
}

#[async_trait]
impl ClusterPlatform for HttpPlatformClient {
    #[instrument(skip(self))]
    async fn list_clusters(&self) -> Result<Vec<Cluster>, PlatformError> {
        let url = format!("{}/v1/clusters", self.base_url);
        debug!(url = %url, "Fetching cluster inventory");

        let response = self.client.get(&url).send().await?;

        if !response.status().is_success() {
            return Err(Self::fail(response, "fetch clusters").await);
        }

        let clusters: Vec<Cluster> = response.json().await?;
        debug!(count = clusters.len(), "Fetched cluster inventory");
        Ok(clusters)
    }

    #[instrument(skip(self), fields(app_req_id = %id))]
    async fn get_requirement(
        &self,
        id: AppReqId,
    ) -> Result<Option<ApplicationRequirement>, PlatformError> {
        let url = format!("{}/v1/app-requirements/{}", self.base_url, id);

        let response = self.client.get(&url).send().await?;

        if response.status() == StatusCode::NOT_FOUND {
            debug!("Application requirement not found");
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(Self::fail(response, "fetch application requirement").await);
        }

        let requirement: ApplicationRequirement = response.json().await?;
        Ok(Some(requirement))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer) -> HttpPlatformClient {
        HttpPlatformClient::new(&PlatformConfig {
            base_url: format!("{}/", server.uri()),
            timeout: Duration::from_secs(5),
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_list_clusters() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/clusters"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                { "id": 1, "flavour": "A", "provider": "ovh", "headroom": 10.0,
                  "energy_coefficient": 1.0, "carbon_coefficient": 2.0,
                  "scaling_endpoint": "http://c1" }
            ])))
            .mount(&server)
            .await;

        let clusters = client(&server).list_clusters().await.unwrap();
        assert_eq!(clusters.len(), 1);
        assert_eq!(clusters[0].carbon_coefficient, Some(2.0));
        assert_eq!(clusters[0].scaling_endpoint.as_deref(), Some("http://c1"));
    }

    #[tokio::test]
    async fn test_missing_requirement_is_none() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/app-requirements/42"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let requirement = client(&server)
            .get_requirement(AppReqId::new(42))
            .await
            .unwrap();
        assert!(requirement.is_none());
    }

    #[tokio::test]
    async fn test_requirement_is_decoded() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/app-requirements/7"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": 7, "flavour": "A", "confidentiality": "restricted",
                "providers": ["ovh"]
            })))
            .mount(&server)
            .await;

        let requirement = client(&server)
            .get_requirement(AppReqId::new(7))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(requirement.flavour, "A");
        assert!(requirement.providers.contains("ovh"));
    }

    #[tokio::test]
    async fn test_server_error_is_reported() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/clusters"))
            .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
            .mount(&server)
            .await;

        let err = client(&server).list_clusters().await.unwrap_err();
        assert!(matches!(
            err,
            PlatformError::Status { status: 503, ref body } if body == "maintenance"
        ));
    }
}
