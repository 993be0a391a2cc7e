//! HTTP transport for cluster scaling frontends.

use async_trait::async_trait;
use edgealloc_id::ClusterId;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use super::{ScaleAck, ScaleError, ScalingClient, ScalingRequest};
use crate::config::ScalingConfig;

#[derive(Debug, Serialize)]
struct ScaleBody {
    cluster_id: ClusterId,
    target_cardinality: u32,
    target_load: f64,
}

#[derive(Debug, Deserialize)]
struct ScaleResponse {
    #[serde(default)]
    cardinality: Option<u32>,
}

/// Posts resize requests to `{endpoint}/{flavour}/v1/scale`.
#[derive(Debug, Clone)]
pub struct HttpScalingClient {
    client: reqwest::Client,
}

impl HttpScalingClient {
    pub fn new(config: &ScalingConfig) -> Result<Self, ScaleError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .danger_accept_invalid_certs(config.accept_invalid_certs)
            .build()?;

        Ok(Self { client })
    }
}

#[async_trait]
impl ScalingClient for HttpScalingClient {
    #[instrument(
        skip(self, request),
        fields(cluster_id = %request.cluster_id, target = request.target_cardinality)
    )]
    async fn scale(&self, request: &ScalingRequest) -> Result<ScaleAck, ScaleError> {
        let endpoint = request
            .endpoint
            .as_deref()
            .ok_or_else(|| ScaleError::InvalidRequest("cluster has no scaling endpoint".to_string()))?;
        let url = format!(
            "{}/{}/v1/scale",
            endpoint.trim_end_matches('/'),
            request.flavour
        );
        debug!(url = %url, "Sending scaling request");

        let body = ScaleBody {
            cluster_id: request.cluster_id,
            target_cardinality: request.target_cardinality,
            target_load: request.target_load,
        };
        let response = self
            .client
            .post(&url)
            .query(&[("target_cardinality", request.target_cardinality)])
            .json(&body)
            .send()
            .await?;

        let status = response.status().as_u16();
        let text = response.text().await.unwrap_or_default();

        if !matches!(status, 200 | 201 | 202) {
            warn!(status, body = %text, "Scaling request refused");
            return Err(ScaleError::Status { status, body: text });
        }

        let achieved_capacity = serde_json::from_str::<ScaleResponse>(&text)
            .ok()
            .and_then(|r| r.cardinality)
            .unwrap_or(request.target_cardinality);

        debug!(status, achieved_capacity, "Cluster scaled");
        Ok(ScaleAck { achieved_capacity })
    }
}
