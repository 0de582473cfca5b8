use anyhow::{Context, Result, anyhow, bail};
use async_trait::async_trait;
use serde_json::Value;

use nourish_core::queue::RemoteStore;

use crate::config::RemoteConfig;

/// PostgREST-style table API (`/rest/v1/<table>`).
pub struct RestRemoteStore {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    ping_table: String,
}

impl RestRemoteStore {
    pub fn new(config: &RemoteConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(format!("nourish-cli/{}", env!("CARGO_PKG_VERSION")))
            .timeout(std::time::Duration::from_secs(15))
            .connect_timeout(std::time::Duration::from_secs(5))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            client,
            base_url: config.url.clone(),
            api_key: config.api_key.clone(),
            ping_table: config.ping_table.clone(),
        })
    }

    fn table_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{table}", self.base_url)
    }

    fn request(&self, method: reqwest::Method, table: &str) -> reqwest::RequestBuilder {
        self.client
            .request(method, self.table_url(table))
            .header("apikey", &self.api_key)
            .bearer_auth(&self.api_key)
    }

    async fn execute(&self, req: reqwest::RequestBuilder, what: &str) -> Result<()> {
        let resp = req
            .header("Prefer", "return=minimal")
            .send()
            .await
            .with_context(|| format!("Failed to reach remote store ({what})"))?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            bail!("Remote store rejected {what} with {status}: {}", body.trim());
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteStore for RestRemoteStore {
    async fn insert(&self, target: &str, record: &Value) -> Result<()> {
        let req = self.request(reqwest::Method::POST, target).json(record);
        self.execute(req, &format!("insert into {target}")).await
    }

    async fn update(&self, target: &str, id: &str, partial_update: &Value) -> Result<()> {
        let req = self
            .request(reqwest::Method::PATCH, target)
            .query(&[("id", format!("eq.{id}"))])
            .json(partial_update);
        self.execute(req, &format!("update of {target}/{id}")).await
    }

    async fn delete(&self, target: &str, id: &str) -> Result<()> {
        let req = self
            .request(reqwest::Method::DELETE, target)
            .query(&[("id", format!("eq.{id}"))]);
        self.execute(req, &format!("delete of {target}/{id}")).await
    }

    async fn is_online(&self) -> bool {
        let ping = self
            .request(reqwest::Method::GET, &self.ping_table)
            .query(&[("select", "id"), ("limit", "1")])
            .send()
            .await;
        match ping {
            Ok(resp) if resp.status().is_success() => true,
            Ok(resp) => {
                tracing::debug!(status = %resp.status(), "connectivity check rejected");
                false
            }
            Err(e) => {
                tracing::debug!(error = %e, "connectivity check failed");
                false
            }
        }
    }
}

/// Stand-in used when no remote store is configured: always offline.
pub struct OfflineRemote;

#[async_trait]
impl RemoteStore for OfflineRemote {
    async fn insert(&self, _target: &str, _record: &Value) -> Result<()> {
        Err(anyhow!("No remote store configured"))
    }

    async fn update(&self, _target: &str, _id: &str, _partial_update: &Value) -> Result<()> {
        Err(anyhow!("No remote store configured"))
    }

    async fn delete(&self, _target: &str, _id: &str) -> Result<()> {
        Err(anyhow!("No remote store configured"))
    }

    async fn is_online(&self) -> bool {
        false
    }
}
