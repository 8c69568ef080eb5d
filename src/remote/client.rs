use serde_json::Value;

use super::{DispatchContext, RemoteError, RemoteErrorKind};

/// One page of a server-side collection.
#[derive(Debug, Clone, Default)]
pub struct ServerPage {
    pub items: Vec<Value>,
    pub total: i64,
}

/// REST client for the upstream club platform, scoped to one tenant.
pub struct ClubApiClient {
    http: reqwest::Client,
    base_url: String,
    api_token: String,
    tenant_id: String,
}

impl ClubApiClient {
    pub fn new(base_url: &str, api_token: &str, tenant_id: &str) -> Result<Self, RemoteError> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("cellarsync/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| RemoteError::network(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_token: api_token.to_string(),
            tenant_id: tenant_id.to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    pub async fn post(
        &self,
        path: &str,
        body: &Value,
        ctx: &DispatchContext,
    ) -> Result<Value, RemoteError> {
        let mut req = self
            .http
            .post(self.url(path))
            .bearer_auth(&self.api_token)
            .header("X-Tenant-Id", &self.tenant_id)
            .json(body);

        if let Some(key) = ctx.idempotency_key {
            req = req.header("Idempotency-Key", key.to_string());
        }

        let resp = req.send().await?;
        decode(resp).await
    }

    pub async fn get(&self, path: &str) -> Result<Value, RemoteError> {
        let resp = self
            .http
            .get(self.url(path))
            .bearer_auth(&self.api_token)
            .header("X-Tenant-Id", &self.tenant_id)
            .send()
            .await?;
        decode(resp).await
    }

    /// `GET /api/v1/{collection}?page=..&per_page=..`, reading the items from
    /// the field named after the collection.
    pub async fn list(
        &self,
        collection: &str,
        page: i64,
        per_page: i64,
    ) -> Result<ServerPage, RemoteError> {
        let body = self
            .get(&format!("/api/v1/{collection}?page={page}&per_page={per_page}"))
            .await?;

        let items = body
            .get(collection)
            .and_then(|v| v.as_array())
            .cloned()
            .unwrap_or_default();
        let total = body
            .get("total")
            .and_then(|v| v.as_i64())
            .unwrap_or(items.len() as i64);

        Ok(ServerPage { items, total })
    }

    pub async fn send_campaign(
        &self,
        ctx: &DispatchContext,
        campaign_id: &str,
    ) -> Result<Value, RemoteError> {
        self.post(
            &format!("/api/v1/campaigns/{campaign_id}/send"),
            &Value::Object(Default::default()),
            ctx,
        )
        .await
    }

    /// Reachability probe used for connectivity detection.
    pub async fn health(&self) -> bool {
        match self.http.get(self.url("/health")).send().await {
            Ok(resp) => resp.status().is_success(),
            Err(e) => {
                tracing::debug!("Upstream health probe failed: {e}");
                false
            }
        }
    }
}

async fn decode(resp: reqwest::Response) -> Result<Value, RemoteError> {
    let status = resp.status();
    let body: Value = resp.json().await.unwrap_or(Value::Null);

    if status.is_success() {
        return Ok(body);
    }

    let message = body
        .get("error")
        .and_then(|e| e.as_str())
        .map(|s| s.to_string())
        .unwrap_or_else(|| format!("Upstream returned {status}"));

    let kind = match status.as_u16() {
        409 => RemoteErrorKind::Conflict,
        400 | 422 => RemoteErrorKind::Validation,
        _ => RemoteErrorKind::Server,
    };

    Err(RemoteError::new(kind, message))
}
