use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::DashboardConfig;
use crate::errors::{StreamError, transport_from_reqwest};

/// One managed container service.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceStatus {
    pub name: String,
    pub running: bool,
    pub status: String,
    pub ports: String,
    pub image: String,
}

/// Hardware summary of the host.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SystemResources {
    pub cpu_model: String,
    pub cpu_cores: u32,
    pub ram_total_mb: u64,
    pub disk_total_gb: f64,
    pub disk_free_gb: f64,
    pub gpu_type: String,
    pub gpu_name: String,
    pub gpu_memory_mb: u64,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppInfo {
    pub name: String,
    pub display_name: String,
    pub description: String,
    pub category: String,
    pub version: String,
    pub installed: bool,
}

/// An installed model file.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AiModel {
    pub name: String,
    pub size: u64,
    pub modified_at: String,
}

/// State of the inference engine.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AiStatus {
    pub running: bool,
    pub host: String,
    pub mode: String,
    pub model: String,
    pub gpu_tier: String,
    pub recommended: String,
    pub engine: String,
    pub models_dir: String,
}

/// A downloadable model from the catalog.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogEntry {
    pub name: String,
    pub display_name: String,
    pub filename: String,
    pub size_gb: f64,
    pub min_ram_mb: u64,
    pub tier: String,
    pub architecture: String,
    pub description: String,
    pub url: String,
    pub installed: bool,
}

/// Reply of an install/remove/delete/switch action.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ActionReply {
    pub ok: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

#[derive(Deserialize)]
struct ServicesBody {
    #[serde(default)]
    services: Vec<ServiceStatus>,
}

#[derive(Deserialize)]
struct AppsBody {
    #[serde(default)]
    apps: Vec<AppInfo>,
}

#[derive(Deserialize)]
struct ModelsBody {
    #[serde(default)]
    models: Vec<AiModel>,
}

#[derive(Deserialize)]
struct CatalogBody {
    #[serde(default)]
    catalog: Vec<CatalogEntry>,
}

/// Plain request/response JSON client for the non-streaming dashboard
/// endpoints. Failures are returned as-is; there is no retry.
#[derive(Clone)]
pub struct CollaboratorClient {
    client: reqwest::Client,
    base_url: String,
}

impl CollaboratorClient {
    pub fn new(config: &DashboardConfig) -> Result<Self, StreamError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| StreamError::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self::with_client(client, &config.base_url))
    }

    pub fn with_client(client: reqwest::Client, base_url: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub async fn status(&self) -> Result<Vec<ServiceStatus>, StreamError> {
        let body: ServicesBody = self.get("/api/status").await?;
        Ok(body.services)
    }

    pub async fn resources(&self) -> Result<SystemResources, StreamError> {
        self.get("/api/resources").await
    }

    pub async fn apps(&self) -> Result<Vec<AppInfo>, StreamError> {
        let body: AppsBody = self.get("/api/apps").await?;
        Ok(body.apps)
    }

    pub async fn models(&self) -> Result<Vec<AiModel>, StreamError> {
        let body: ModelsBody = self.get("/api/ai/models").await?;
        Ok(body.models)
    }

    pub async fn catalog(&self) -> Result<Vec<CatalogEntry>, StreamError> {
        let body: CatalogBody = self.get("/api/ai/catalog").await?;
        Ok(body.catalog)
    }

    pub async fn ai_status(&self) -> Result<AiStatus, StreamError> {
        self.get("/api/ai/status").await
    }

    pub async fn install_app(&self, name: &str) -> Result<ActionReply, StreamError> {
        self.post("/api/apps/install", serde_json::json!({ "name": name }))
            .await
    }

    pub async fn remove_app(&self, name: &str) -> Result<ActionReply, StreamError> {
        self.post("/api/apps/remove", serde_json::json!({ "name": name }))
            .await
    }

    pub async fn delete_model(&self, model: &str) -> Result<ActionReply, StreamError> {
        self.post("/api/ai/delete", serde_json::json!({ "model": model }))
            .await
    }

    pub async fn switch_model(&self, model: &str) -> Result<ActionReply, StreamError> {
        self.post("/api/ai/switch", serde_json::json!({ "model": model }))
            .await
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, StreamError> {
        let url = format!("{}{path}", self.base_url);
        debug!(%url, "collaborator GET");
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| transport_from_reqwest(&e, false))?;
        read_reply(path, response).await
    }

    async fn post<T: DeserializeOwned>(
        &self,
        path: &str,
        body: serde_json::Value,
    ) -> Result<T, StreamError> {
        let url = format!("{}{path}", self.base_url);
        debug!(%url, "collaborator POST");
        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| transport_from_reqwest(&e, false))?;
        read_reply(path, response).await
    }
}

async fn read_reply<T: DeserializeOwned>(
    endpoint: &str,
    response: reqwest::Response,
) -> Result<T, StreamError> {
    let status = response.status();
    let text = response
        .text()
        .await
        .map_err(|e| transport_from_reqwest(&e, true))?;
    if !status.is_success() {
        warn!(endpoint, status = status.as_u16(), "collaborator call rejected");
        return Err(StreamError::collaborator(
            endpoint,
            format!("status {}: {}", status.as_u16(), text.trim()),
        ));
    }
    decode_reply(endpoint, &text)
}

/// Parses a JSON reply, turning an explicit `error` field into a
/// `StreamError::Collaborator` even when the rest of the payload is present.
fn decode_reply<T: DeserializeOwned>(endpoint: &str, text: &str) -> Result<T, StreamError> {
    let value: serde_json::Value = serde_json::from_str(text)
        .map_err(|e| StreamError::collaborator(endpoint, format!("invalid JSON reply: {e}")))?;
    if let Some(message) = value
        .get("error")
        .and_then(|e| e.as_str())
        .filter(|e| !e.is_empty())
    {
        warn!(endpoint, error = message, "collaborator reported error");
        return Err(StreamError::collaborator(endpoint, message));
    }
    serde_json::from_value(value)
        .map_err(|e| StreamError::collaborator(endpoint, format!("unexpected reply shape: {e}")))
}
