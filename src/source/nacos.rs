//! Nacos-compatible HTTP config service client.
//!
//! # Responsibilities
//! - Log in with username/password when credentials are configured
//! - Fetch document content (`GET /nacos/v1/cs/configs`)
//! - Long-poll for changes (`POST /nacos/v1/cs/configs/listener`) keyed by
//!   the MD5 of the content already held, and push new content
//!
//! # Design Decisions
//! - One long-poll task per subscribed document; it ends when the receiver
//!   is dropped
//! - Poll failures back off exponentially and never end the subscription
//! - Access tokens are cached and renewed shortly before they expire

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use tokio::sync::{mpsc, Mutex};
use url::Url;

use crate::resilience::backoff::Backoff;
use crate::source::remote::{DocumentKey, RemoteConfigService, RemoteError};
use crate::source::settings::RemoteSettings;

const CONFIGS_PATH: &str = "nacos/v1/cs/configs";
const LISTENER_PATH: &str = "nacos/v1/cs/configs/listener";
const LOGIN_PATH: &str = "nacos/v1/auth/login";

const WORD_SEPARATOR: char = '\u{2}';
const LINE_SEPARATOR: char = '\u{1}';

const DEFAULT_LONG_POLL: Duration = Duration::from_secs(30);
const RETRY_BASE: Duration = Duration::from_millis(500);
const RETRY_MAX: Duration = Duration::from_secs(30);

#[derive(Clone)]
struct Credentials {
    username: String,
    password: String,
}

struct AccessToken {
    value: String,
    expires_at: Instant,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct LoginResponse {
    access_token: String,
    token_ttl: u64,
}

/// HTTP client for a Nacos config server.
#[derive(Clone)]
pub struct NacosClient {
    http: reqwest::Client,
    base: Url,
    credentials: Option<Credentials>,
    app_name: Option<String>,
    token: Arc<Mutex<Option<AccessToken>>>,
    long_poll: Duration,
}

impl NacosClient {
    pub fn new(settings: &RemoteSettings) -> Result<Self, RemoteError> {
        let base = base_url(&settings.server_addr, settings.server_port)?;
        let http = reqwest::Client::builder()
            .connect_timeout(settings.fetch_timeout)
            .build()?;
        let credentials = match (&settings.username, &settings.password) {
            (Some(username), Some(password)) => Some(Credentials {
                username: username.clone(),
                password: password.clone(),
            }),
            (Some(_), None) | (None, Some(_)) => {
                tracing::warn!("Only one of username/password set, connecting anonymously");
                None
            }
            (None, None) => None,
        };

        Ok(Self {
            http,
            base,
            credentials,
            app_name: settings.app_name.clone(),
            token: Arc::new(Mutex::new(None)),
            long_poll: DEFAULT_LONG_POLL,
        })
    }

    /// Override how long the server may hold a listener request.
    pub fn with_long_poll(mut self, long_poll: Duration) -> Self {
        self.long_poll = long_poll;
        self
    }

    pub fn base_url(&self) -> &Url {
        &self.base
    }

    fn endpoint(&self, path: &str) -> Result<Url, RemoteError> {
        self.base
            .join(path)
            .map_err(|e| RemoteError::InvalidAddress(e.to_string()))
    }

    fn request(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.app_name {
            Some(app) => builder.header("Client-AppName", app),
            None => builder,
        }
    }

    async fn access_token(&self) -> Result<Option<String>, RemoteError> {
        let Some(credentials) = &self.credentials else {
            return Ok(None);
        };

        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref() {
            if token.expires_at > Instant::now() {
                return Ok(Some(token.value.clone()));
            }
        }

        let response = self
            .request(self.http.post(self.endpoint(LOGIN_PATH)?))
            .form(&[
                ("username", credentials.username.as_str()),
                ("password", credentials.password.as_str()),
            ])
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(RemoteError::Auth(format!(
                "login returned status {}",
                response.status()
            )));
        }
        let login: LoginResponse = response.json().await?;

        // Renew once 90% of the lifetime has passed.
        let ttl = Duration::from_secs(login.token_ttl.saturating_sub(login.token_ttl / 10));
        *cached = Some(AccessToken {
            value: login.access_token.clone(),
            expires_at: Instant::now() + ttl,
        });
        tracing::debug!(ttl_secs = login.token_ttl, "Obtained config service access token");
        Ok(Some(login.access_token))
    }

    async fn query(&self, key: &DocumentKey) -> Result<Vec<(&'static str, String)>, RemoteError> {
        let mut query = vec![("dataId", key.data_id.clone()), ("group", key.group.clone())];
        if !key.namespace.is_empty() {
            query.push(("tenant", key.namespace.clone()));
        }
        if let Some(token) = self.access_token().await? {
            query.push(("accessToken", token));
        }
        Ok(query)
    }

    /// Current content, or `None` when the document does not exist.
    async fn get_config(&self, key: &DocumentKey) -> Result<Option<String>, RemoteError> {
        let query = self.query(key).await?;
        let response = self
            .request(self.http.get(self.endpoint(CONFIGS_PATH)?))
            .query(&query)
            .send()
            .await?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => Ok(Some(response.text().await?)),
            status => Err(RemoteError::Status {
                status: status.as_u16(),
                body: response.text().await.unwrap_or_default(),
            }),
        }
    }

    /// Hold one listener request; `true` when the server reports a change.
    async fn poll_changed(&self, key: &DocumentKey, md5: &str) -> Result<bool, RemoteError> {
        let mut builder = self
            .request(self.http.post(self.endpoint(LISTENER_PATH)?))
            .header("Long-Pulling-Timeout", self.long_poll.as_millis().to_string())
            .timeout(self.long_poll + Duration::from_secs(10))
            .form(&[("Listening-Configs", listening_configs(key, md5))]);
        if let Some(token) = self.access_token().await? {
            builder = builder.query(&[("accessToken", token)]);
        }

        let response = builder.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(RemoteError::Status {
                status: status.as_u16(),
                body: response.text().await.unwrap_or_default(),
            });
        }
        Ok(!response.text().await?.trim().is_empty())
    }

    async fn watch(self, key: DocumentKey, mut md5: String, tx: mpsc::UnboundedSender<String>) {
        let mut backoff = Backoff::new(RETRY_BASE, RETRY_MAX);
        loop {
            let polled = tokio::select! {
                _ = tx.closed() => break,
                polled = self.poll_changed(&key, &md5) => polled,
            };

            let failure = match polled {
                Ok(false) => {
                    backoff.reset();
                    None
                }
                Ok(true) => match self.get_config(&key).await {
                    Ok(content) => {
                        backoff.reset();
                        let content = content.unwrap_or_default();
                        let digest = content_md5(&content);
                        if digest != md5 {
                            md5 = digest;
                            if tx.send(content).is_err() {
                                break;
                            }
                        }
                        None
                    }
                    Err(e) => Some((e, "Failed to fetch changed document")),
                },
                Err(e) => Some((e, "Long poll failed")),
            };

            if let Some((e, message)) = failure {
                let delay = backoff.next_delay();
                tracing::warn!(
                    document = %key,
                    error = %e,
                    failures = backoff.failures(),
                    retry_in_ms = delay.as_millis() as u64,
                    "{message}"
                );
                tokio::select! {
                    _ = tx.closed() => break,
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }
        tracing::debug!(document = %key, "Stopped watching remote document");
    }
}

#[async_trait]
impl RemoteConfigService for NacosClient {
    async fn fetch(&self, key: &DocumentKey) -> Result<String, RemoteError> {
        self.get_config(key)
            .await?
            .ok_or_else(|| RemoteError::NotFound(key.clone()))
    }

    async fn subscribe(
        &self,
        key: &DocumentKey,
        current: &str,
    ) -> Result<mpsc::UnboundedReceiver<String>, RemoteError> {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(self.clone().watch(key.clone(), content_md5(current), tx));
        Ok(rx)
    }
}

impl std::fmt::Debug for NacosClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NacosClient")
            .field("base", &self.base.as_str())
            .field("authenticated", &self.credentials.is_some())
            .field("long_poll", &self.long_poll)
            .finish()
    }
}

/// Server root URL; `addr` may be a bare host or a full URL.
fn base_url(addr: &str, port: u16) -> Result<Url, RemoteError> {
    let invalid = |e: url::ParseError| RemoteError::InvalidAddress(format!("{addr}: {e}"));
    let mut url = if addr.contains("://") {
        Url::parse(addr).map_err(invalid)?
    } else {
        Url::parse(&format!("http://{addr}")).map_err(invalid)?
    };
    url.set_port(Some(port))
        .map_err(|_| RemoteError::InvalidAddress(format!("{addr}: cannot carry a port")))?;
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    Ok(url)
}

fn content_md5(content: &str) -> String {
    format!("{:x}", md5::compute(content.as_bytes()))
}

fn listening_configs(key: &DocumentKey, md5: &str) -> String {
    let mut line = format!(
        "{}{WORD_SEPARATOR}{}{WORD_SEPARATOR}{md5}",
        key.data_id, key.group
    );
    if !key.namespace.is_empty() {
        line.push(WORD_SEPARATOR);
        line.push_str(&key.namespace);
    }
    line.push(LINE_SEPARATOR);
    line
}
