//! HTTP client for the hosted backend.
//!
//! Auth goes to `/auth/v1`, rows to `/rest/v1/{table}`, procedures to
//! `/rest/v1/rpc/{name}` and serverless functions to `/functions/v1/{name}`.
//! Every request carries the project `apikey`; the `Authorization` bearer is
//! the caller's token when one is given, the service key otherwise.

use std::time::Duration;

use futures_util::future::BoxFuture;
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue};
use reqwest::{Method, RequestBuilder, Response, Url};
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use super::realtime::RealtimeClient;
use super::{
    AccessToken, ApiErrorKind, AuthErrorCode, AuthEvent, AuthSession, AuthUser, Backend,
    BackendError, Filter, Query, RowChange, Rpc, SignOutScope, SignUpResult, Table,
};

/// Connection settings for [`RestBackend`].
#[derive(Clone)]
pub struct RestConfig {
    /// Project URL, e.g. `https://xyz.example.co`.
    pub base_url: String,
    /// Public (anonymous) API key.
    pub anon_key: String,
    /// Privileged key used for calls made without a user token.
    pub service_key: Option<String>,
    /// Per-request timeout.
    pub timeout: Duration,
}

impl std::fmt::Debug for RestConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RestConfig")
            .field("base_url", &self.base_url)
            .field("service_key", &self.service_key.as_ref().map(|_| "<redacted>"))
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

/// [`super::Backend`] talking to the hosted service over HTTP.
#[derive(Debug)]
pub struct RestBackend {
    http: reqwest::Client,
    config: RestConfig,
    auth_tx: broadcast::Sender<AuthEvent>,
    changes_tx: broadcast::Sender<RowChange>,
}

#[derive(Debug, Deserialize)]
struct AuthErrorBody {
    #[serde(default)]
    error_code: Option<String>,
    #[serde(default)]
    msg: Option<String>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    error_description: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    details: Option<String>,
}

impl RestBackend {
    /// Builds the HTTP client.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::Decode`] if the API key is not a valid header
    /// value, or [`BackendError::Transport`] if the client cannot be built.
    pub fn new(config: RestConfig) -> Result<Self, BackendError> {
        let mut headers = HeaderMap::new();
        let key = HeaderValue::from_str(&config.anon_key)
            .map_err(|_| BackendError::Decode("invalid api key".to_string()))?;
        headers.insert("apikey", key);

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(config.timeout)
            .build()?;

        let (auth_tx, _) = broadcast::channel(256);
        let (changes_tx, _) = broadcast::channel(1024);
        Ok(Self {
            http,
            config: RestConfig {
                base_url: config.base_url.trim_end_matches('/').to_string(),
                ..config
            },
            auth_tx,
            changes_tx,
        })
    }

    /// Spawns the realtime subscription that feeds [`Backend::row_changes`].
    ///
    /// The channel is joined with the service key when one is configured,
    /// so changes to user-scoped rows reach the gateway.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::Decode`] if the project URL cannot be turned
    /// into a realtime endpoint.
    pub fn spawn_realtime(&self) -> Result<JoinHandle<()>, BackendError> {
        let client = RealtimeClient::new(
            &self.config.base_url,
            &self.config.anon_key,
            self.config.service_key.clone(),
            self.changes_tx.clone(),
        )?;
        Ok(tokio::spawn(client.run()))
    }

    fn url(&self, path: &str, params: &[(String, String)]) -> Result<Url, BackendError> {
        let raw = format!("{}{path}", self.config.base_url);
        Url::parse_with_params(&raw, params).map_err(|e| BackendError::Decode(e.to_string()))
    }

    fn request(&self, method: Method, url: Url, token: Option<&AccessToken>) -> RequestBuilder {
        let bearer = token.map_or_else(
            || {
                self.config
                    .service_key
                    .as_deref()
                    .unwrap_or(&self.config.anon_key)
            },
            AccessToken::as_str,
        );
        self.http
            .request(method, url)
            .header(AUTHORIZATION, format!("Bearer {bearer}"))
    }

    async fn auth_error(resp: Response) -> BackendError {
        let status = resp.status();
        let body: Option<AuthErrorBody> = resp.json().await.ok();
        let (code, message) = body.map_or((None, None), |b| {
            (
                b.error_code.or(b.error),
                b.msg.or(b.error_description).or(b.message),
            )
        });
        let code = match code.as_deref() {
            Some(c) => AuthErrorCode::from_code(c),
            None if status.as_u16() == 401 => AuthErrorCode::SessionInvalid,
            None => AuthErrorCode::Other,
        };
        BackendError::auth(code, message.unwrap_or_else(|| status.to_string()))
    }

    async fn api_error(resp: Response) -> BackendError {
        let status = resp.status().as_u16();
        let body: Option<ApiErrorBody> = resp.json().await.ok();
        let (code, message) = body.map_or((None, None), |b| {
            (b.code, b.message.or(b.details))
        });
        BackendError::api(
            ApiErrorKind::classify(code.as_deref(), status),
            status,
            code.as_deref(),
            message.unwrap_or_else(|| format!("status {status}")),
        )
    }

    async fn rows(resp: Response) -> Result<Vec<Value>, BackendError> {
        if !resp.status().is_success() {
            return Err(Self::api_error(resp).await);
        }
        match resp.json::<Value>().await? {
            Value::Array(rows) => Ok(rows),
            Value::Null => Ok(Vec::new()),
            other => Ok(vec![other]),
        }
    }

    async fn session(resp: Response) -> Result<AuthSession, BackendError> {
        if !resp.status().is_success() {
            return Err(Self::auth_error(resp).await);
        }
        Ok(resp.json().await?)
    }

    fn filter_params(filters: &[Filter]) -> Vec<(String, String)> {
        filters.iter().map(Filter::to_param).collect()
    }
}

impl Backend for RestBackend {
    fn sign_up<'a>(
        &'a self,
        email: &'a str,
        password: &'a str,
        metadata: Value,
    ) -> BoxFuture<'a, Result<SignUpResult, BackendError>> {
        Box::pin(async move {
            let url = self.url("/auth/v1/signup", &[])?;
            let resp = self
                .request(Method::POST, url, None)
                .json(&json!({ "email": email, "password": password, "data": metadata }))
                .send()
                .await?;
            if !resp.status().is_success() {
                return Err(Self::auth_error(resp).await);
            }
            let body: Value = resp.json().await?;
            if body.get("access_token").is_some() {
                let session: AuthSession = serde_json::from_value(body)?;
                let _ = self.auth_tx.send(AuthEvent::SignedIn(session.user.id));
                return Ok(SignUpResult {
                    user: session.user.clone(),
                    session: Some(session),
                });
            }
            let user = body.get("user").cloned().unwrap_or(body);
            Ok(SignUpResult {
                user: serde_json::from_value(user)?,
                session: None,
            })
        })
    }

    fn sign_in<'a>(
        &'a self,
        email: &'a str,
        password: &'a str,
    ) -> BoxFuture<'a, Result<AuthSession, BackendError>> {
        Box::pin(async move {
            let url = self.url(
                "/auth/v1/token",
                &[("grant_type".to_string(), "password".to_string())],
            )?;
            let resp = self
                .request(Method::POST, url, None)
                .json(&json!({ "email": email, "password": password }))
                .send()
                .await?;
            let session = Self::session(resp).await?;
            let _ = self.auth_tx.send(AuthEvent::SignedIn(session.user.id));
            Ok(session)
        })
    }

    fn sign_out<'a>(
        &'a self,
        token: &'a AccessToken,
        scope: SignOutScope,
    ) -> BoxFuture<'a, Result<(), BackendError>> {
        Box::pin(async move {
            let user = self.get_user(token).await.ok();
            let url = self.url(
                "/auth/v1/logout",
                &[("scope".to_string(), scope.as_str().to_string())],
            )?;
            let resp = self.request(Method::POST, url, Some(token)).send().await?;
            // An already-revoked session is as good as a successful sign-out.
            if !resp.status().is_success() && resp.status().as_u16() != 401 {
                return Err(Self::auth_error(resp).await);
            }
            if let Some(user) = user {
                let _ = self.auth_tx.send(AuthEvent::SignedOut(user.id));
            }
            Ok(())
        })
    }

    fn get_user<'a>(&'a self, token: &'a AccessToken) -> BoxFuture<'a, Result<AuthUser, BackendError>> {
        Box::pin(async move {
            let url = self.url("/auth/v1/user", &[])?;
            let resp = self.request(Method::GET, url, Some(token)).send().await?;
            if !resp.status().is_success() {
                return Err(Self::auth_error(resp).await);
            }
            Ok(resp.json().await?)
        })
    }

    fn select<'a>(
        &'a self,
        token: Option<&'a AccessToken>,
        query: Query,
    ) -> BoxFuture<'a, Result<Vec<Value>, BackendError>> {
        Box::pin(async move {
            let url = self.url(&format!("/rest/v1/{}", query.table), &query.to_params())?;
            let resp = self.request(Method::GET, url, token).send().await?;
            Self::rows(resp).await
        })
    }

    fn insert<'a>(
        &'a self,
        token: Option<&'a AccessToken>,
        table: Table,
        rows: Vec<Value>,
    ) -> BoxFuture<'a, Result<Vec<Value>, BackendError>> {
        Box::pin(async move {
            let url = self.url(&format!("/rest/v1/{table}"), &[])?;
            let resp = self
                .request(Method::POST, url, token)
                .header("Prefer", "return=representation")
                .json(&rows)
                .send()
                .await?;
            Self::rows(resp).await
        })
    }

    fn update<'a>(
        &'a self,
        token: Option<&'a AccessToken>,
        table: Table,
        filters: Vec<Filter>,
        patch: Value,
    ) -> BoxFuture<'a, Result<Vec<Value>, BackendError>> {
        Box::pin(async move {
            let url = self.url(&format!("/rest/v1/{table}"), &Self::filter_params(&filters))?;
            let resp = self
                .request(Method::PATCH, url, token)
                .header("Prefer", "return=representation")
                .json(&patch)
                .send()
                .await?;
            Self::rows(resp).await
        })
    }

    fn delete<'a>(
        &'a self,
        token: Option<&'a AccessToken>,
        table: Table,
        filters: Vec<Filter>,
    ) -> BoxFuture<'a, Result<(), BackendError>> {
        Box::pin(async move {
            let url = self.url(&format!("/rest/v1/{table}"), &Self::filter_params(&filters))?;
            let resp = self.request(Method::DELETE, url, token).send().await?;
            if !resp.status().is_success() {
                return Err(Self::api_error(resp).await);
            }
            Ok(())
        })
    }

    fn rpc<'a>(
        &'a self,
        token: Option<&'a AccessToken>,
        rpc: Rpc,
        args: Value,
    ) -> BoxFuture<'a, Result<Value, BackendError>> {
        Box::pin(async move {
            let url = self.url(&format!("/rest/v1/rpc/{}", rpc.as_str()), &[])?;
            let resp = self.request(Method::POST, url, token).json(&args).send().await?;
            if !resp.status().is_success() {
                return Err(Self::api_error(resp).await);
            }
            let text = resp.text().await?;
            if text.trim().is_empty() {
                return Ok(Value::Null);
            }
            Ok(serde_json::from_str(&text)?)
        })
    }

    fn invoke<'a>(
        &'a self,
        token: Option<&'a AccessToken>,
        function: &'a str,
        body: Value,
    ) -> BoxFuture<'a, Result<Value, BackendError>> {
        Box::pin(async move {
            let url = self.url(&format!("/functions/v1/{function}"), &[])?;
            let resp = self.request(Method::POST, url, token).json(&body).send().await?;
            let status = resp.status();
            let text = resp.text().await?;
            if !status.is_success() {
                return Err(BackendError::Function {
                    function: function.to_string(),
                    message: if text.is_empty() { status.to_string() } else { text },
                });
            }
            if text.trim().is_empty() {
                return Ok(Value::Null);
            }
            Ok(serde_json::from_str(&text).unwrap_or(Value::String(text)))
        })
    }

    fn auth_events(&self) -> broadcast::Receiver<AuthEvent> {
        self.auth_tx.subscribe()
    }

    fn row_changes(&self) -> broadcast::Receiver<RowChange> {
        self.changes_tx.subscribe()
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    fn backend(service_key: Option<&str>) -> RestBackend {
        let Ok(backend) = RestBackend::new(RestConfig {
            base_url: "https://project.example.co/".to_string(),
            anon_key: "anon".to_string(),
            service_key: service_key.map(str::to_string),
            timeout: Duration::from_secs(5),
        }) else {
            panic!("client should build");
        };
        backend
    }

    #[test]
    fn urls_carry_filters() {
        let b = backend(None);
        let Ok(url) = b.url(
            "/rest/v1/tickets",
            &Query::from(Table::Tickets).eq("is_hidden", false).to_params(),
        ) else {
            panic!("url should parse");
        };
        assert_eq!(url.path(), "/rest/v1/tickets");
        assert!(url.query().unwrap_or_default().contains("is_hidden=eq.false"));
    }

    #[test]
    fn bearer_prefers_user_token_then_service_key() {
        let b = backend(Some("service"));
        let Ok(url) = b.url("/auth/v1/user", &[]) else {
            panic!("url should parse");
        };
        let token = AccessToken::new("user-token");
        let Ok(with_user) = b.request(Method::GET, url.clone(), Some(&token)).build() else {
            panic!("request should build");
        };
        let Ok(without) = b.request(Method::GET, url, None).build() else {
            panic!("request should build");
        };
        assert_eq!(
            with_user.headers().get(AUTHORIZATION).and_then(|v| v.to_str().ok()),
            Some("Bearer user-token")
        );
        assert_eq!(
            without.headers().get(AUTHORIZATION).and_then(|v| v.to_str().ok()),
            Some("Bearer service")
        );
    }

    #[test]
    fn config_debug_hides_keys() {
        let b = backend(Some("service-secret"));
        let shown = format!("{:?}", b.config);
        assert!(!shown.contains("service-secret"));
        assert!(!shown.contains("anon"));
    }
}
