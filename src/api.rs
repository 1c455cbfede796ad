use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::blocking::{Client as HttpClient, RequestBuilder, Response};
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, USER_AGENT};
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use url::Url;

use crate::session;

pub const DEFAULT_BASE_URL: &str = "http://localhost:8080";
pub const API_PREFIX: &str = "/api/v1";
pub const READINESS_PATH: &str = "/actuator/health/readiness";

pub type ApiResult<T> = std::result::Result<T, Error>;

/// Failure taxonomy the rest of the client keys off. 401 is recoverable
/// once (refresh-and-retry inside the gateway); everything else is
/// terminal for the call that produced it.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("api: transport: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("api: invalid url: {0}")]
    Url(#[from] url::ParseError),
    #[error("api: not authenticated")]
    Unauthorized,
    #[error("api: invalid request: {0}")]
    Validation(String),
    #[error("api: conflict: {0}")]
    Conflict(String),
    #[error("api: not found")]
    NotFound,
    #[error("api: request failed with status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("api: decode {context}: {source}")]
    Decode {
        context: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    /// Advisory only; expiry is discovered via 401, never polled.
    pub access_token_expires_at: i64,
    pub refresh_token_expires_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Post {
    pub id: String,
    #[serde(default)]
    pub author_id: Option<String>,
    pub author_display_name: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub likes: i64,
    pub views: i64,
    pub comments: i64,
    pub liked_by_me: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Page<T> {
    pub items: Vec<T>,
    pub page: i32,
    pub size: i32,
    pub total_elements: i64,
    pub total_pages: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostStats {
    pub post_id: String,
    pub likes: i64,
    pub views: i64,
    pub comments: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Comment {
    pub id: String,
    pub post_id: String,
    pub user_id: String,
    pub user_display_name: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemKind {
    Post,
    User,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Suggestion {
    pub id: String,
    pub kind: ItemKind,
    pub title: String,
    #[serde(default)]
    pub subtitle: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Suggestions {
    pub query: String,
    #[serde(rename = "type")]
    pub kind: SearchKind,
    pub items: Vec<Suggestion>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResult {
    pub id: String,
    pub kind: ItemKind,
    pub primary_text: String,
    #[serde(default)]
    pub secondary_text: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub posts: i64,
    pub likes: i64,
    pub views: i64,
    pub comments: i64,
    pub liked_by_me: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchPage {
    pub query: String,
    #[serde(rename = "type")]
    pub kind: SearchKind,
    pub items: Vec<SearchResult>,
    pub page: i32,
    pub size: i32,
    pub total_elements: i64,
    pub total_pages: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    pub email: String,
    pub role: String,
    #[serde(default)]
    pub preferred_language: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicProfile {
    pub id: String,
    pub email: String,
    pub role: String,
    #[serde(default)]
    pub preferred_language: String,
    pub created_at: DateTime<Utc>,
    pub posts: i64,
    pub likes: i64,
    pub comments: i64,
    pub views: i64,
    #[serde(default)]
    pub recent_posts: Vec<Post>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Readiness {
    pub status: String,
    #[serde(default)]
    pub components: Option<HashMap<String, ReadinessComponent>>,
}

impl Readiness {
    pub fn is_up(&self) -> bool {
        self.status == "UP"
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadinessComponent {
    pub status: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchKind {
    Posts,
    Users,
}

impl Default for SearchKind {
    fn default() -> Self {
        SearchKind::Posts
    }
}

impl SearchKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SearchKind::Posts => "posts",
            SearchKind::Users => "users",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Language {
    Es,
    En,
}

impl Default for Language {
    fn default() -> Self {
        Language::Es
    }
}

impl Language {
    pub fn as_str(&self) -> &'static str {
        match self {
            Language::Es => "es",
            Language::En => "en",
        }
    }

    /// Unknown or malformed codes fall back to Spanish, the server default.
    pub fn normalize(value: &str) -> Language {
        if value.trim().eq_ignore_ascii_case("en") {
            Language::En
        } else {
            Language::Es
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ClientConfig {
    pub base_url: Option<String>,
    pub user_agent: String,
    pub timeout: Option<Duration>,
    pub http_client: Option<HttpClient>,
}

/// Authenticated request gateway. Injects the bearer credential from the
/// session store and performs at most one refresh-and-retry on 401.
pub struct Client {
    http: HttpClient,
    base_url: Url,
    user_agent: String,
    sessions: Arc<session::Store>,
}

impl Client {
    pub fn new(sessions: Arc<session::Store>, config: ClientConfig) -> ApiResult<Self> {
        let base = config
            .base_url
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        let base_url = Url::parse(base.trim_end_matches('/'))?;
        let http = match config.http_client {
            Some(client) => client,
            None => HttpClient::builder()
                .timeout(config.timeout.unwrap_or(Duration::from_secs(20)))
                .build()?,
        };
        let user_agent = if config.user_agent.trim().is_empty() {
            format!("springram/{}", crate::VERSION)
        } else {
            config.user_agent
        };

        Ok(Client {
            http,
            base_url,
            user_agent,
            sessions,
        })
    }

    pub fn sessions(&self) -> &Arc<session::Store> {
        &self.sessions
    }

    // Auth endpoints are unauthenticated; the gateway path is not involved.

    pub fn register(&self, email: &str, password: &str) -> ApiResult<Session> {
        self.auth_call("/auth/register", email, password)
    }

    pub fn login(&self, email: &str, password: &str) -> ApiResult<Session> {
        self.auth_call("/auth/login", email, password)
    }

    fn auth_call(&self, path: &str, email: &str, password: &str) -> ApiResult<Session> {
        let url = self.api_url(path, &[])?;
        let resp = self
            .http
            .post(url)
            .header(USER_AGENT, self.user_agent.clone())
            .header(CONTENT_TYPE, "application/json")
            .json(&json!({ "email": email, "password": password }))
            .send()?;
        decode(check_status(resp)?, "auth response")
    }

    pub fn me(&self) -> ApiResult<User> {
        let resp = self.request(Method::GET, "/auth/me", &[], None)?;
        decode(resp, "user profile")
    }

    pub fn set_language(&self, language: Language) -> ApiResult<Language> {
        let resp = self.request(
            Method::PUT,
            "/auth/preferences/language",
            &[],
            Some(json!({ "language": language.as_str() })),
        )?;
        #[derive(Deserialize)]
        struct LanguagePreference {
            language: String,
        }
        let payload: LanguagePreference = decode(resp, "language preference")?;
        Ok(Language::normalize(&payload.language))
    }

    pub fn feed(&self, page: i32, size: i32) -> ApiResult<Page<Post>> {
        let params = page_params(page, size);
        let resp = self.request(Method::GET, "/posts/feed", &params, None)?;
        decode(resp, "feed page")
    }

    pub fn create_post(&self, content: &str) -> ApiResult<Post> {
        let resp = self.request(
            Method::POST,
            "/posts",
            &[],
            Some(json!({ "content": content })),
        )?;
        decode(resp, "created post")
    }

    pub fn post(&self, post_id: &str) -> ApiResult<Post> {
        let path = format!("/posts/{}", post_id);
        let resp = self.request(Method::GET, &path, &[], None)?;
        decode(resp, "post")
    }

    pub fn register_view(&self, post_id: &str) -> ApiResult<PostStats> {
        let path = format!("/posts/{}/view", post_id);
        let resp = self.request(Method::POST, &path, &[], None)?;
        decode(resp, "post stats")
    }

    pub fn like(&self, post_id: &str) -> ApiResult<PostStats> {
        let path = format!("/posts/{}/like", post_id);
        let resp = self.request(Method::POST, &path, &[], None)?;
        decode(resp, "post stats")
    }

    pub fn unlike(&self, post_id: &str) -> ApiResult<PostStats> {
        let path = format!("/posts/{}/like", post_id);
        let resp = self.request(Method::DELETE, &path, &[], None)?;
        decode(resp, "post stats")
    }

    pub fn comments(&self, post_id: &str, page: i32, size: i32) -> ApiResult<Page<Comment>> {
        let path = format!("/posts/{}/comments", post_id);
        let params = page_params(page, size);
        let resp = self.request(Method::GET, &path, &params, None)?;
        decode(resp, "comments page")
    }

    pub fn create_comment(&self, post_id: &str, content: &str) -> ApiResult<Comment> {
        let path = format!("/posts/{}/comments", post_id);
        let resp = self.request(
            Method::POST,
            &path,
            &[],
            Some(json!({ "content": content })),
        )?;
        decode(resp, "created comment")
    }

    pub fn suggestions(&self, query: &str, kind: SearchKind, limit: u32) -> ApiResult<Suggestions> {
        let params = vec![
            ("q".to_string(), query.to_string()),
            ("type".to_string(), kind.as_str().to_string()),
            ("limit".to_string(), limit.to_string()),
        ];
        let resp = self.request(Method::GET, "/search/suggestions", &params, None)?;
        decode(resp, "suggestions")
    }

    pub fn search(
        &self,
        query: &str,
        kind: SearchKind,
        page: i32,
        size: i32,
    ) -> ApiResult<SearchPage> {
        let mut params = vec![
            ("q".to_string(), query.to_string()),
            ("type".to_string(), kind.as_str().to_string()),
        ];
        params.extend(page_params(page, size));
        let resp = self.request(Method::GET, "/search/results", &params, None)?;
        decode(resp, "search page")
    }

    pub fn user_profile(&self, user_id: &str, recent_posts_limit: u32) -> ApiResult<PublicProfile> {
        let path = format!("/users/{}", user_id);
        let params = vec![(
            "recentPostsLimit".to_string(),
            recent_posts_limit.to_string(),
        )];
        let resp = self.request(Method::GET, &path, &params, None)?;
        decode(resp, "public profile")
    }

    /// One round through the gateway: bearer injection, then at most one
    /// refresh-and-retry when the first response is a 401 and a refresh
    /// credential is held. The retried outcome is terminal either way.
    fn request(
        &self,
        method: Method,
        path: &str,
        params: &[(String, String)],
        body: Option<serde_json::Value>,
    ) -> ApiResult<Response> {
        let url = self.api_url(path, params)?;
        let session = self.sessions.get();

        let first = self
            .build(method.clone(), url.clone(), session.as_ref(), body.as_ref())
            .send()?;

        if first.status().as_u16() != 401 {
            return check_status(first);
        }
        let refresh_token = match session.as_ref() {
            Some(current) if !current.refresh_token.is_empty() => current.refresh_token.clone(),
            _ => return check_status(first),
        };

        let renewed = match self.refresh(&refresh_token) {
            Some(renewed) => renewed,
            None => {
                // Irrecoverable refresh failure tears the session down; the
                // caller sees the original 401 outcome.
                self.sessions.set(None);
                return Err(Error::Unauthorized);
            }
        };
        self.sessions.set(Some(renewed.clone()));

        let retry = self
            .build(method, url, Some(&renewed), body.as_ref())
            .send()?;
        check_status(retry)
    }

    /// Refresh is best-effort from the gateway's point of view: any failure
    /// collapses to None and the caller logs the user out.
    fn refresh(&self, refresh_token: &str) -> Option<Session> {
        let url = self.api_url("/auth/refresh", &[]).ok()?;
        let resp = self
            .http
            .post(url)
            .header(USER_AGENT, self.user_agent.clone())
            .header(CONTENT_TYPE, "application/json")
            .json(&json!({ "refreshToken": refresh_token }))
            .send()
            .ok()?;
        if !resp.status().is_success() {
            log::warn!("session refresh rejected with status {}", resp.status());
            return None;
        }
        resp.json::<Session>().ok()
    }

    fn build(
        &self,
        method: Method,
        url: Url,
        session: Option<&Session>,
        body: Option<&serde_json::Value>,
    ) -> RequestBuilder {
        let mut req = self
            .http
            .request(method, url)
            .header(USER_AGENT, self.user_agent.clone());
        if let Some(session) = session {
            if !session.access_token.is_empty() {
                req = req.header(
                    AUTHORIZATION,
                    format!("Bearer {}", session.access_token),
                );
            }
        }
        if let Some(body) = body {
            req = req.header(CONTENT_TYPE, "application/json").json(body);
        }
        req
    }

    fn api_url(&self, path: &str, params: &[(String, String)]) -> ApiResult<Url> {
        let mut url = self.base_url.join(&format!("{}{}", API_PREFIX, path))?;
        if !params.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (k, v) in params {
                pairs.append_pair(k, v);
            }
        }
        Ok(url)
    }
}

/// Readiness is unauthenticated and lives outside the API prefix, so it
/// skips the gateway entirely.
pub fn fetch_readiness(base_url: &str, timeout: Duration) -> ApiResult<Readiness> {
    let url = Url::parse(base_url.trim_end_matches('/'))?.join(READINESS_PATH)?;
    let http = HttpClient::builder().timeout(timeout).build()?;
    let resp = http.get(url).send()?;
    decode(check_status(resp)?, "readiness")
}

fn page_params(page: i32, size: i32) -> Vec<(String, String)> {
    vec![
        ("page".to_string(), page.to_string()),
        ("size".to_string(), size.to_string()),
    ]
}

fn check_status(resp: Response) -> ApiResult<Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let code = status.as_u16();
    let body = resp.text().unwrap_or_default();
    match code {
        401 => Err(Error::Unauthorized),
        400 => Err(Error::Validation(body)),
        409 => Err(Error::Conflict(body)),
        404 => Err(Error::NotFound),
        _ => Err(Error::Status { status: code, body }),
    }
}

fn decode<T: DeserializeOwned>(resp: Response, context: &'static str) -> ApiResult<T> {
    let text = resp.text()?;
    serde_json::from_str(&text).map_err(|source| Error::Decode { context, source })
}
