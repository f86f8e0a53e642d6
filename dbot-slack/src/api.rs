//! Slack Web API calls used by the RTM connection: `rtm.start` for the bootstrap snapshot and
//! `im.open` for lazy direct-message lookups.

use async_trait::async_trait;
use dbot_core::{mask_token, DbotError, Result, RobotIdentity, Room, ToCoreRoom, ToCoreUser, User};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::{debug, info, instrument};

use crate::adapters::{SlackChannel, SlackChannelWrapper, SlackIm, SlackUser, SlackUserWrapper};
use crate::config::SlackConfig;

/// `im.open` errors that mean "this user has no DM channel for us" rather than a failure.
const IM_NOT_FOUND_ERRORS: &[&str] = &["user_not_found", "user_disabled", "cannot_dm_bot"];

/// Initial session data fetched once before the websocket is opened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TeamSnapshot {
    pub websocket_url: String,
    pub robot: RobotIdentity,
    pub users: Vec<User>,
    pub channels: Vec<Room>,
    pub ims: Vec<SlackIm>,
}

#[derive(Debug, Deserialize)]
struct RtmStartResponse {
    ok: bool,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    url: Option<String>,
    #[serde(rename = "self", default)]
    robot: Option<RobotIdentity>,
    #[serde(default)]
    users: Vec<SlackUser>,
    #[serde(default)]
    channels: Vec<SlackChannel>,
    #[serde(default)]
    ims: Vec<SlackIm>,
}

#[derive(Debug, Deserialize)]
struct ImOpenResponse {
    ok: bool,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    channel: Option<ImChannel>,
}

#[derive(Debug, Deserialize)]
struct ImChannel {
    id: String,
}

impl TeamSnapshot {
    fn from_response(response: RtmStartResponse) -> Result<Self> {
        if !response.ok {
            return Err(DbotError::Bootstrap(
                response.error.unwrap_or_else(|| "unknown_error".to_string()),
            ));
        }
        let websocket_url = response
            .url
            .filter(|url| !url.is_empty())
            .ok_or_else(|| DbotError::Bootstrap("rtm.start response has no url".to_string()))?;
        let robot = response
            .robot
            .ok_or_else(|| DbotError::Bootstrap("rtm.start response has no self".to_string()))?;

        Ok(Self {
            websocket_url,
            robot,
            users: response.users.iter().map(|u| SlackUserWrapper(u).to_core()).collect(),
            channels: response
                .channels
                .iter()
                .map(|c| SlackChannelWrapper(c).to_core())
                .collect(),
            ims: response.ims,
        })
    }
}

/// Resolves a user id to a direct-message channel id on a cache miss.
#[async_trait]
pub trait Directory: Send + Sync {
    /// Returns `None` when the platform has no DM channel for the user.
    async fn open_im(&self, user_id: &str) -> Result<Option<String>>;
}

/// Minimal Slack Web API client (form-encoded POST, JSON responses).
#[derive(Clone)]
pub struct SlackApi {
    client: reqwest::Client,
    token: String,
    base_url: reqwest::Url,
}

impl std::fmt::Debug for SlackApi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SlackApi")
            .field("token", &mask_token(&self.token))
            .field("base_url", &self.base_url.as_str())
            .finish()
    }
}

impl SlackApi {
    pub fn new(token: impl Into<String>, base_url: &str) -> Result<Self> {
        Self::with_client(reqwest::Client::new(), token, base_url)
    }

    /// Builds a client for the config's API URL, routed through its proxy when set.
    pub fn from_config(config: &SlackConfig) -> Result<Self> {
        let mut builder = reqwest::Client::builder();
        if let Some(ref proxy) = config.proxy {
            let proxy = reqwest::Proxy::all(proxy.as_str())
                .map_err(|e| DbotError::Config(format!("invalid proxy {}: {}", proxy, e)))?;
            builder = builder.proxy(proxy);
        }
        let client = builder
            .build()
            .map_err(|e| DbotError::Config(format!("failed to build HTTP client: {}", e)))?;
        Self::with_client(client, config.token.clone(), &config.api_url)
    }

    fn with_client(client: reqwest::Client, token: impl Into<String>, base_url: &str) -> Result<Self> {
        let mut base = base_url.to_string();
        if !base.ends_with('/') {
            base.push('/');
        }
        let base_url = reqwest::Url::parse(&base)
            .map_err(|e| DbotError::Config(format!("invalid API URL {}: {}", base_url, e)))?;
        Ok(Self {
            client,
            token: token.into(),
            base_url,
        })
    }

    async fn call<T: DeserializeOwned>(&self, method: &str, params: &[(&str, &str)]) -> Result<T> {
        let url = self
            .base_url
            .join(method)
            .map_err(|e| DbotError::Api(format!("invalid method {}: {}", method, e)))?;
        let mut form: Vec<(&str, &str)> = vec![("token", self.token.as_str())];
        form.extend_from_slice(params);

        debug!(method = %method, token = %mask_token(&self.token), "Slack API request");
        let response = self
            .client
            .post(url)
            .form(&form)
            .send()
            .await
            .map_err(|e| DbotError::Api(format!("{} request failed: {}", method, e)))?
            .error_for_status()
            .map_err(|e| DbotError::Api(format!("{} returned error status: {}", method, e)))?;

        response
            .json::<T>()
            .await
            .map_err(|e| DbotError::Api(format!("{} returned malformed body: {}", method, e)))
    }

    /// Calls `rtm.start`. Every failure, including `ok: false`, is a [`DbotError::Bootstrap`].
    #[instrument(skip(self))]
    pub async fn rtm_start(&self) -> Result<TeamSnapshot> {
        let response: RtmStartResponse = self.call("rtm.start", &[]).await.map_err(|e| match e {
            DbotError::Api(msg) => DbotError::Bootstrap(msg),
            other => other,
        })?;
        let snapshot = TeamSnapshot::from_response(response)?;
        info!(
            robot_id = %snapshot.robot.id,
            users = snapshot.users.len(),
            channels = snapshot.channels.len(),
            ims = snapshot.ims.len(),
            "rtm.start succeeded"
        );
        Ok(snapshot)
    }

    /// Calls `im.open` for `user_id`.
    pub async fn im_open(&self, user_id: &str) -> Result<Option<String>> {
        let response: ImOpenResponse = self.call("im.open", &[("user", user_id)]).await?;
        if response.ok {
            return response
                .channel
                .map(|c| Some(c.id))
                .ok_or_else(|| DbotError::Api("im.open response has no channel".to_string()));
        }
        match response.error.as_deref() {
            Some(error) if IM_NOT_FOUND_ERRORS.contains(&error) => {
                debug!(user_id = %user_id, error = %error, "im.open: no DM channel");
                Ok(None)
            }
            error => Err(DbotError::Api(format!(
                "im.open failed: {}",
                error.unwrap_or("unknown_error")
            ))),
        }
    }
}

#[async_trait]
impl Directory for SlackApi {
    async fn open_im(&self, user_id: &str) -> Result<Option<String>> {
        self.im_open(user_id).await
    }
}
