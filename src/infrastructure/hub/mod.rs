//! Hub client - the remote module registry over HTTP
//!
//! The hub publishes an endpoint table at `<url><meta>`; every other call is
//! resolved against it. A bearer token from `authorize` is attached to all
//! calls after registration.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::RwLock;
use crate::application::errors::HubError;
use crate::domain::entities::{ModuleDescriptor, SearchCriteria};
use crate::domain::traits::{HubClient, OfflineBot, PresenceEvent};
use crate::infrastructure::config::Config;

const CONNECT_ATTEMPTS: u32 = 3;
const RETRY_DELAY: Duration = Duration::from_secs(2);

/// Endpoint table served at the hub's meta path
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct HubEndpoints {
    pub register_bot: String,
    pub authorize: String,
    pub heartbeat: String,
    pub notified_missing: String,
    pub online_event: String,
    pub offline_event: String,
    pub search_module: String,
    pub download_module: String,
}

/// How this bot introduces itself to the hub
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct BotRegistration {
    id: String,
    name: String,
    num: Option<i64>,
    dev_group: Vec<String>,
    owners: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct RegistrationResponse {
    num: i64,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

/// Query parameters of a module search; `name = "*"` asks for everything
pub fn search_params(criteria: &SearchCriteria) -> Vec<(&'static str, String)> {
    if criteria.name.as_deref() == Some("*") {
        return vec![("all", "True".to_string())];
    }

    let mut params = Vec::new();
    let text = [
        ("name", &criteria.name),
        ("pack", &criteria.pack),
        ("version", &criteria.version),
        ("author", &criteria.author),
        ("dependency", &criteria.dependency),
    ];
    for (key, value) in text {
        if let Some(value) = value.as_ref().filter(|v| !v.is_empty()) {
            params.push((key, value.clone()));
        }
    }
    if let Some(category) = criteria.category {
        params.push(("category", category.as_str().to_string()));
    }
    if let Some(remote) = criteria.has_remote_dependencies {
        params.push(("pypi", if remote { "True" } else { "False" }.to_string()));
    }
    params
}

/// Hub-side spelling of a module name
pub fn download_name(name: &str) -> String {
    name.replace('-', "_")
}

pub struct HttpHubClient {
    client: Client,
    base_url: String,
    meta_path: String,
    account: String,
    secret: String,
    registration: RwLock<BotRegistration>,
    endpoints: RwLock<Option<HubEndpoints>>,
    token: RwLock<Option<String>>,
}

impl HttpHubClient {
    pub fn new(config: &Config) -> Result<Self, HubError> {
        let secret = config.hub.secret.clone().ok_or(HubError::Unauthorized)?;
        Ok(Self {
            client: Client::new(),
            base_url: config.hub.url.trim_end_matches('/').to_string(),
            meta_path: config.hub.meta.clone(),
            account: config.bot.account.clone(),
            secret,
            registration: RwLock::new(BotRegistration {
                id: config.bot.account.clone(),
                name: config.bot.name.clone(),
                num: config.bot.num,
                dev_group: config.bot.dev_group.clone(),
                owners: config.bot.owners.clone(),
            }),
            endpoints: RwLock::new(None),
            token: RwLock::new(None),
        })
    }

    /// Fetch endpoints, register and authorize, retrying each step
    pub async fn connect(&self) -> Result<(), HubError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let result = async {
                self.update_metadata().await?;
                self.register_bot().await?;
                self.authorize().await.map(|_| ())
            }
            .await;

            match result {
                Ok(()) => {
                    tracing::info!("Connected to hub at {}", self.base_url);
                    return Ok(());
                }
                Err(e) if attempt < CONNECT_ATTEMPTS => {
                    tracing::warn!("Hub connection attempt {} failed: {}", attempt, e);
                    tokio::time::sleep(RETRY_DELAY).await;
                }
                Err(e) => {
                    tracing::error!("Giving up on hub after {} attempts: {}", attempt, e);
                    return Err(e);
                }
            }
        }
    }

    /// Number assigned by the hub, once registered
    pub async fn num(&self) -> Option<i64> {
        self.registration.read().await.num
    }

    pub async fn update_metadata(&self) -> Result<HubEndpoints, HubError> {
        let url = format!("{}{}", self.base_url, self.meta_path);
        let response = self.client.get(url).send().await?;
        if !response.status().is_success() {
            return Err(HubError::Status(response.status().as_u16()));
        }
        let endpoints: HubEndpoints = response
            .json()
            .await
            .map_err(|e| HubError::Protocol(format!("Bad endpoint table: {}", e)))?;
        *self.endpoints.write().await = Some(endpoints.clone());
        Ok(endpoints)
    }

    async fn url(&self, pick: impl Fn(&HubEndpoints) -> &String) -> Result<String, HubError> {
        let endpoints = self.endpoints.read().await;
        let endpoints = endpoints
            .as_ref()
            .ok_or_else(|| HubError::Protocol("Endpoint table not loaded".to_string()))?;
        Ok(format!("{}{}", self.base_url, pick(endpoints)))
    }

    async fn bearer(&self) -> Result<String, HubError> {
        self.token
            .read()
            .await
            .as_ref()
            .map(|t| format!("Bearer {}", t))
            .ok_or(HubError::Unauthorized)
    }

    async fn post_authorized(&self, url: String) -> Result<reqwest::Response, HubError> {
        let response = self
            .client
            .post(url)
            .header("Authorization", self.bearer().await?)
            .send()
            .await?;
        match response.status() {
            StatusCode::UNAUTHORIZED => Err(HubError::Unauthorized),
            status if !status.is_success() => Err(HubError::Status(status.as_u16())),
            _ => Ok(response),
        }
    }
}

#[async_trait]
impl HubClient for HttpHubClient {
    async fn search(&self, criteria: &SearchCriteria) -> Result<Vec<ModuleDescriptor>, HubError> {
        if criteria.is_empty() {
            return Ok(Vec::new());
        }
        let url = self.url(|e| &e.search_module).await?;
        let response = self
            .client
            .get(url)
            .query(&search_params(criteria))
            .header("Authorization", self.bearer().await?)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(HubError::Status(response.status().as_u16()));
        }
        let found: Option<Vec<ModuleDescriptor>> = response
            .json()
            .await
            .map_err(|e| HubError::Protocol(format!("Bad search result: {}", e)))?;
        Ok(found.unwrap_or_default())
    }

    async fn download(&self, name: &str, version: &str) -> Result<Option<Vec<u8>>, HubError> {
        let url = self.url(|e| &e.download_module).await?;
        let mut params = vec![("name", download_name(name))];
        if !version.is_empty() {
            params.push(("version", version.to_string()));
        }

        let response = self
            .client
            .get(url)
            .query(&params)
            .header("Authorization", self.bearer().await?)
            .send()
            .await?;
        if response.status() != StatusCode::OK {
            tracing::debug!("Hub has no archive for {} ({})", name, response.status());
            return Ok(None);
        }
        let bytes = response.bytes().await?;
        tracing::debug!("Downloaded {} bytes for {}", bytes.len(), name);
        Ok(Some(bytes.to_vec()))
    }

    async fn authorize(&self) -> Result<String, HubError> {
        let url = self.url(|e| &e.authorize).await?;
        let response = self
            .client
            .post(url)
            .form(&[("username", self.account.as_str()), ("password", self.secret.as_str())])
            .send()
            .await?;
        if response.status() != StatusCode::OK {
            return Err(HubError::Unauthorized);
        }
        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| HubError::Protocol(format!("Bad token response: {}", e)))?;
        *self.token.write().await = Some(token.access_token.clone());
        Ok(token.access_token)
    }

    async fn register_bot(&self) -> Result<(), HubError> {
        let url = self.url(|e| &e.register_bot).await?;
        let body = self.registration.read().await.clone();
        let response = self
            .client
            .post(url)
            .query(&[("secret", self.secret.as_str())])
            .json(&body)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(HubError::Status(response.status().as_u16()));
        }
        let registered: RegistrationResponse = response
            .json()
            .await
            .map_err(|e| HubError::Protocol(format!("Bad registration response: {}", e)))?;
        self.registration.write().await.num = Some(registered.num);
        tracing::info!("Registered with hub as #{}", registered.num);
        Ok(())
    }

    async fn heartbeat(&self) -> Result<Vec<OfflineBot>, HubError> {
        let url = self.url(|e| &e.heartbeat).await?;
        let response = self.post_authorized(url).await?;
        let offline: Option<Vec<OfflineBot>> = response
            .json()
            .await
            .map_err(|e| HubError::Protocol(format!("Bad heartbeat response: {}", e)))?;
        Ok(offline.unwrap_or_default())
    }

    async fn notified_missing(&self, bot_id: i64) -> Result<(), HubError> {
        let url = self.url(|e| &e.notified_missing).await?;
        self.post_authorized(format!("{}?bot_id={}", url, bot_id)).await?;
        Ok(())
    }

    async fn report_presence(&self, event: PresenceEvent) -> Result<(), HubError> {
        let url = match event {
            PresenceEvent::Online => self.url(|e| &e.online_event).await?,
            PresenceEvent::Offline => self.url(|e| &e.offline_event).await?,
        };
        self.post_authorized(url).await?;
        Ok(())
    }
}

/// Stand-in used while the hub is turned off
pub struct DisabledHub;

#[async_trait]
impl HubClient for DisabledHub {
    async fn search(&self, _criteria: &SearchCriteria) -> Result<Vec<ModuleDescriptor>, HubError> {
        Err(HubError::NotEnabled)
    }

    async fn download(&self, _name: &str, _version: &str) -> Result<Option<Vec<u8>>, HubError> {
        Err(HubError::NotEnabled)
    }

    async fn authorize(&self) -> Result<String, HubError> {
        Err(HubError::NotEnabled)
    }

    async fn register_bot(&self) -> Result<(), HubError> {
        Err(HubError::NotEnabled)
    }

    async fn heartbeat(&self) -> Result<Vec<OfflineBot>, HubError> {
        Err(HubError::NotEnabled)
    }
}
