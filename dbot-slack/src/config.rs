//! 会话配置：token、代理、Web API 地址、传输选项、错误策略。
//! 与外部交互：从环境变量 SLACK_TOKEN、SLACK_PROXY、SLACK_API_URL、SLACK_ERROR_POLICY、
//! SLACK_SHUTDOWN_GRACE_SECS、LOG_FILE 加载。

use std::env;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use dbot_core::{mask_token, DbotError, DEFAULT_SHUTDOWN_GRACE};

pub const DEFAULT_API_URL: &str = "https://slack.com/api/";

/// 传输层报错但未随之关闭时，连接的处理方式。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ErrorPolicy {
    /// 保持连接（可能已降级），等待传输层自己的关闭事件。
    #[default]
    Ignore,
    /// 若在给定时间内未收到关闭事件，则主动关闭会话。
    CloseAfter(Duration),
}

impl FromStr for ErrorPolicy {
    type Err = DbotError;

    /// 接受 `ignore` 或 `close-after:<secs>`。
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("ignore") {
            return Ok(Self::Ignore);
        }
        if let Some(secs) = s.strip_prefix("close-after:") {
            let secs: u64 = secs
                .trim()
                .parse()
                .map_err(|_| DbotError::Config(format!("invalid error policy seconds: {}", s)))?;
            return Ok(Self::CloseAfter(Duration::from_secs(secs)));
        }
        Err(DbotError::Config(format!("unknown error policy: {}", s)))
    }
}

/// 打开 websocket 时的额外选项。建立连接时会合并 [`SlackConfig`] 中的代理设置。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransportOptions {
    /// 握手时附加的请求头。
    pub headers: Vec<(String, String)>,
    pub proxy: Option<String>,
    pub connect_timeout: Option<Duration>,
}

/// 单次连接所用配置；连接构建后不可变。
#[derive(Clone)]
pub struct SlackConfig {
    pub token: String,
    /// REST 调用与 websocket 共用的 HTTP 代理（`http://host:port`）。
    pub proxy: Option<String>,
    /// Web API 基础地址，以斜杠结尾。
    pub api_url: String,
    pub transport: TransportOptions,
    pub error_policy: ErrorPolicy,
    /// 关闭时等待进行中 handler 任务的最长时间。
    pub shutdown_grace: Duration,
    pub log_file: Option<String>,
}

impl fmt::Debug for SlackConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SlackConfig")
            .field("token", &mask_token(&self.token))
            .field("proxy", &self.proxy)
            .field("api_url", &self.api_url)
            .field("transport", &self.transport)
            .field("error_policy", &self.error_policy)
            .field("shutdown_grace", &self.shutdown_grace)
            .field("log_file", &self.log_file)
            .finish()
    }
}

impl SlackConfig {
    /// 从环境变量加载：SLACK_TOKEN 必填（传入 `token` 时以其为准），其余可选。
    /// SLACK_ERROR_POLICY、SLACK_SHUTDOWN_GRACE_SECS 格式错误时返回错误。
    pub fn from_env(token: Option<String>) -> anyhow::Result<Self> {
        let token = match token {
            Some(token) => token,
            None => env::var("SLACK_TOKEN").map_err(|_| anyhow::anyhow!("SLACK_TOKEN not set"))?,
        };
        let mut config = Self::with_token(token);
        config.proxy = env::var("SLACK_PROXY").ok().filter(|s| !s.is_empty());
        if let Ok(api_url) = env::var("SLACK_API_URL") {
            config.api_url = api_url;
        }
        if let Ok(policy) = env::var("SLACK_ERROR_POLICY") {
            config.error_policy = policy.parse()?;
        }
        if let Ok(grace) = env::var("SLACK_SHUTDOWN_GRACE_SECS") {
            let secs: u64 = grace.trim().parse().map_err(|_| {
                DbotError::Config(format!("invalid SLACK_SHUTDOWN_GRACE_SECS: {}", grace))
            })?;
            config.shutdown_grace = Duration::from_secs(secs);
        }
        config.log_file = env::var("LOG_FILE").ok();
        config.validate()?;
        Ok(config)
    }

    /// 使用给定 token 构造，其余取默认值。
    pub fn with_token(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            proxy: None,
            api_url: DEFAULT_API_URL.to_string(),
            transport: TransportOptions::default(),
            error_policy: ErrorPolicy::default(),
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
            log_file: None,
        }
    }

    pub fn with_proxy(mut self, proxy: impl Into<String>) -> Self {
        self.proxy = Some(proxy.into());
        self
    }

    pub fn with_api_url(mut self, api_url: impl Into<String>) -> Self {
        self.api_url = api_url.into();
        self
    }

    pub fn with_transport(mut self, transport: TransportOptions) -> Self {
        self.transport = transport;
        self
    }

    pub fn with_error_policy(mut self, error_policy: ErrorPolicy) -> Self {
        self.error_policy = error_policy;
        self
    }

    pub fn with_shutdown_grace(mut self, shutdown_grace: Duration) -> Self {
        self.shutdown_grace = shutdown_grace;
        self
    }

    /// 校验：token 非空；api_url 与已设置的 proxy 须为合法 URL。
    pub fn validate(&self) -> dbot_core::Result<()> {
        if self.token.trim().is_empty() {
            return Err(DbotError::Config("token is empty".to_string()));
        }
        if reqwest::Url::parse(&self.api_url).is_err() {
            return Err(DbotError::Config(format!(
                "SLACK_API_URL is not a valid URL: {}",
                self.api_url
            )));
        }
        if let Some(ref proxy) = self.proxy {
            if reqwest::Url::parse(proxy).is_err() {
                return Err(DbotError::Config(format!(
                    "SLACK_PROXY is not a valid URL: {}",
                    proxy
                )));
            }
        }
        Ok(())
    }
}
