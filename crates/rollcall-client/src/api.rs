//! Authenticated client for the attendance API.
//!
//! Every call except login goes through [`ApiClient::api_call`], which
//! attaches the bearer token and turns any 401 into a forced logout.

use std::sync::Arc;
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Method, Response, StatusCode, Url};
use rollcall_core::progress::{FrameCaptureResponse, ServerCaptureResponse};
use rollcall_core::report::ReportFilter;
use rollcall_core::types::{
    AttendanceReport, AttendanceSheet, EnrolledList, MonitoringStatus, TodaySummary,
};
use rollcall_core::{Descriptor, FaceAngle, Role};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use thiserror::Error;

use crate::enrollment::EnrollmentForm;
use crate::monitoring::CameraSource;
use crate::navigation::{Navigator, Route};
use crate::token::{TokenError, TokenStore};

pub const NETWORK_ERROR_MESSAGE: &str = "Network error. Please try again.";
pub const LOGIN_FAILED_MESSAGE: &str = "Login failed";

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("network error: {0}")]
    Network(#[source] reqwest::Error),
    /// The server rejected the token. Already logged out when returned.
    #[error("session expired; please log in again")]
    Unauthorized,
    #[error("not logged in")]
    NotAuthenticated,
    #[error("{message} (HTTP {status})")]
    Api { status: u16, message: String },
    #[error("unexpected response: {0}")]
    Decode(String),
    #[error("invalid header: {0}")]
    InvalidHeader(String),
    #[error("invalid url: {0}")]
    InvalidUrl(String),
    #[error(transparent)]
    Token(#[from] TokenError),
}

impl ApiError {
    /// The session is gone; retrying is pointless.
    pub fn is_auth(&self) -> bool {
        matches!(self, ApiError::Unauthorized | ApiError::NotAuthenticated)
    }

    /// Text for a dialog: the server's `error` field when it sent one.
    pub fn user_message(&self, fallback: &str) -> String {
        match self {
            ApiError::Api { message, .. } if !message.is_empty() => message.clone(),
            ApiError::Network(_) => NETWORK_ERROR_MESSAGE.to_string(),
            _ => fallback.to_string(),
        }
    }
}

/// Per-call extras. Caller headers override the defaults.
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    pub body: Option<Value>,
    pub query: Vec<(String, String)>,
    pub headers: Vec<(String, String)>,
}

impl RequestOptions {
    pub fn json(body: Value) -> Self {
        Self { body: Some(body), ..Self::default() }
    }

    pub fn query<K: Into<String>>(pairs: impl IntoIterator<Item = (K, String)>) -> Self {
        Self {
            query: pairs.into_iter().map(|(k, v)| (k.into(), v)).collect(),
            ..Self::default()
        }
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }
}

#[derive(Deserialize)]
struct ErrorBody {
    error: Option<String>,
    message: Option<String>,
}

#[derive(Deserialize)]
struct LoginResponse {
    access_token: String,
}

/// `/enrollment/start` reply.
#[derive(Debug, Clone, Deserialize)]
pub struct EnrollmentStarted {
    pub session_id: String,
    #[serde(default)]
    pub target_count: Option<u32>,
}

#[derive(Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
    tokens: Arc<TokenStore>,
    nav: Navigator,
}

impl ApiClient {
    pub fn new(
        base_url: &str,
        tokens: Arc<TokenStore>,
        nav: Navigator,
        timeout: Duration,
    ) -> Result<Self, ApiError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(ApiError::Network)?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            tokens,
            nav,
        })
    }

    pub fn url(&self, endpoint: &str) -> String {
        format!("{}{}", self.base_url, endpoint)
    }

    pub fn tokens(&self) -> &TokenStore {
        &self.tokens
    }

    pub fn navigator(&self) -> &Navigator {
        &self.nav
    }

    /// The stored token, or a redirect to login.
    pub fn require_auth(&self) -> Result<String, ApiError> {
        match self.tokens.get() {
            Some(token) => Ok(token),
            None => {
                self.nav.navigate(Route::Login);
                Err(ApiError::NotAuthenticated)
            }
        }
    }

    pub async fn api_call(
        &self,
        method: Method,
        endpoint: &str,
        opts: RequestOptions,
    ) -> Result<Response, ApiError> {
        let url = self.endpoint_url(endpoint, &[])?;
        self.send(method, url, endpoint, opts).await
    }

    /// `endpoint` under the base URL with `segments` appended, each
    /// percent-encoded as a single path segment.
    fn endpoint_url(&self, endpoint: &str, segments: &[&str]) -> Result<Url, ApiError> {
        let mut url = Url::parse(&self.url(endpoint)).map_err(|e| ApiError::InvalidUrl(format!("{endpoint}: {e}")))?;
        if !segments.is_empty() {
            url.path_segments_mut()
                .map_err(|()| ApiError::InvalidUrl(format!("{endpoint}: cannot be a base")))?
                .extend(segments);
        }
        Ok(url)
    }

    async fn send(&self, method: Method, url: Url, endpoint: &str, opts: RequestOptions) -> Result<Response, ApiError> {
        let token = self.require_auth()?;

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let mut bearer = HeaderValue::from_str(&format!("Bearer {token}"))
            .map_err(|e| ApiError::InvalidHeader(format!("authorization: {e}")))?;
        bearer.set_sensitive(true);
        headers.insert(AUTHORIZATION, bearer);
        for (name, value) in &opts.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| ApiError::InvalidHeader(format!("{name}: {e}")))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| ApiError::InvalidHeader(format!("{name}: {e}")))?;
            headers.insert(name, value);
        }

        let mut req = self.http.request(method.clone(), url).headers(headers);
        if !opts.query.is_empty() {
            req = req.query(&opts.query);
        }
        if let Some(body) = &opts.body {
            req = req.body(body.to_string());
        }

        let resp = req.send().await.map_err(|e| {
            tracing::warn!(%method, endpoint, error = %e, "request failed");
            ApiError::Network(e)
        })?;

        if resp.status() == StatusCode::UNAUTHORIZED {
            tracing::warn!(%method, endpoint, "401 from server; logging out");
            self.tokens.clear();
            self.nav.navigate(Route::Login);
            return Err(ApiError::Unauthorized);
        }
        tracing::debug!(%method, endpoint, status = resp.status().as_u16(), "api call");
        Ok(resp)
    }

    async fn call_json<T: DeserializeOwned>(
        &self,
        method: Method,
        endpoint: &str,
        opts: RequestOptions,
    ) -> Result<T, ApiError> {
        let resp = ensure_success(self.api_call(method, endpoint, opts).await?).await?;
        resp.json::<T>()
            .await
            .map_err(|e| ApiError::Decode(format!("{endpoint}: {e}")))
    }

    async fn call_unit(&self, method: Method, endpoint: &str, opts: RequestOptions) -> Result<(), ApiError> {
        ensure_success(self.api_call(method, endpoint, opts).await?).await?;
        Ok(())
    }

    // --- auth ---

    /// Exchange credentials for a token. Bad credentials are an ordinary
    /// error here, never a forced logout.
    pub async fn login(&self, username: &str, password: &str) -> Result<(), ApiError> {
        let resp = self
            .http
            .post(self.url("/auth/login"))
            .json(&json!({ "username": username, "password": password }))
            .send()
            .await
            .map_err(ApiError::Network)?;

        let status = resp.status();
        if !status.is_success() {
            let message = error_text(resp)
                .await
                .unwrap_or_else(|| LOGIN_FAILED_MESSAGE.to_string());
            tracing::warn!(username, status = status.as_u16(), "login rejected");
            return Err(ApiError::Api { status: status.as_u16(), message });
        }

        let body: LoginResponse = resp
            .json()
            .await
            .map_err(|e| ApiError::Decode(format!("/auth/login: {e}")))?;
        self.tokens.set(&body.access_token)?;
        tracing::info!(username, "logged in");
        self.nav.navigate(Route::Dashboard);
        Ok(())
    }

    /// Whether the stored token is still accepted.
    pub async fn verify(&self) -> bool {
        let Some(token) = self.tokens.get() else {
            return false;
        };
        match self.http.get(self.url("/auth/verify")).bearer_auth(token).send().await {
            Ok(resp) => resp.status().is_success(),
            Err(e) => {
                tracing::debug!(error = %e, "verify failed");
                false
            }
        }
    }

    /// Best-effort server logout; the local session always ends.
    pub async fn logout(&self) {
        if let Some(token) = self.tokens.get() {
            let result = self
                .http
                .post(self.url("/auth/logout"))
                .bearer_auth(token)
                .send()
                .await;
            if let Err(e) = result {
                tracing::debug!(error = %e, "logout request failed; clearing session anyway");
            }
        }
        self.tokens.clear();
        self.nav.navigate(Route::Login);
    }

    // --- monitoring ---

    pub async fn status(&self) -> Result<MonitoringStatus, ApiError> {
        self.call_json(Method::GET, "/attendance/status", RequestOptions::default()).await
    }

    pub async fn start_monitoring(&self, camera_source: &CameraSource) -> Result<(), ApiError> {
        let body = json!({ "camera_source": camera_source });
        self.call_unit(Method::POST, "/attendance/start", RequestOptions::json(body)).await
    }

    pub async fn stop_monitoring(&self) -> Result<(), ApiError> {
        self.call_unit(Method::POST, "/attendance/stop", RequestOptions::default()).await
    }

    pub async fn today_summary(&self) -> Result<TodaySummary, ApiError> {
        self.call_json(Method::GET, "/attendance/today-summary", RequestOptions::default()).await
    }

    /// MJPEG stream address with a cache-busting timestamp.
    pub fn stream_url(&self, t_millis: i64) -> String {
        format!("{}?t={t_millis}", self.url("/attendance/stream"))
    }

    /// Whether the stream answers with a success status. The stream is
    /// public, so this bypasses the 401 handling.
    pub async fn stream_ready(&self, url: &str) -> bool {
        match self.http.get(url).send().await {
            Ok(resp) => resp.status().is_success(),
            Err(_) => false,
        }
    }

    // --- enrollment ---

    pub async fn start_enrollment(&self, form: &EnrollmentForm) -> Result<EnrollmentStarted, ApiError> {
        self.call_json(Method::POST, "/enrollment/start", RequestOptions::json(form.to_json()))
            .await
    }

    pub async fn capture_descriptor(
        &self,
        session_id: &str,
        descriptor: &Descriptor,
        angle: &FaceAngle,
    ) -> Result<FrameCaptureResponse, ApiError> {
        let body = json!({
            "session_id": session_id,
            "descriptor": descriptor.values,
            "angle": angle,
            "use_client_processing": true,
        });
        self.call_json(Method::POST, "/enrollment/capture", RequestOptions::json(body)).await
    }

    pub async fn capture_frame(&self, session_id: &str, frame_data_url: &str) -> Result<FrameCaptureResponse, ApiError> {
        let body = json!({
            "session_id": session_id,
            "frame": frame_data_url,
            "use_client_processing": false,
        });
        self.call_json(Method::POST, "/enrollment/capture", RequestOptions::json(body)).await
    }

    pub async fn capture_server(&self, session_id: &str) -> Result<ServerCaptureResponse, ApiError> {
        let body = json!({ "session_id": session_id });
        self.call_json(Method::POST, "/enrollment/capture_server", RequestOptions::json(body))
            .await
    }

    pub async fn complete_enrollment(&self, session_id: &str) -> Result<(), ApiError> {
        let body = json!({ "session_id": session_id });
        self.call_unit(Method::POST, "/enrollment/complete", RequestOptions::json(body)).await
    }

    pub async fn cancel_enrollment(&self, session_id: &str) -> Result<(), ApiError> {
        let body = json!({ "session_id": session_id });
        self.call_unit(Method::POST, "/enrollment/cancel", RequestOptions::json(body)).await
    }

    pub async fn enrolled_list(&self) -> Result<EnrolledList, ApiError> {
        self.call_json(Method::GET, "/enrollment/list", RequestOptions::default()).await
    }

    pub async fn delete_enrolled(&self, person_id: &str, role: Role) -> Result<(), ApiError> {
        let url = self.endpoint_url("/enrollment/delete", &[person_id])?;
        let opts = RequestOptions::query([("role", role.as_str().to_string())]);
        ensure_success(self.send(Method::DELETE, url, "/enrollment/delete", opts).await?).await?;
        Ok(())
    }

    // --- reports ---

    pub async fn attendance_report(&self, filter: &ReportFilter) -> Result<AttendanceReport, ApiError> {
        let opts = RequestOptions::query(filter.query_pairs());
        self.call_json(Method::GET, "/reports/attendance", opts).await
    }

    pub async fn attendance_sheet(&self, filter: &ReportFilter) -> Result<AttendanceSheet, ApiError> {
        let opts = RequestOptions::query(filter.query_pairs());
        self.call_json(Method::GET, "/reports/attendance-sheet", opts).await
    }
}

async fn ensure_success(resp: Response) -> Result<Response, ApiError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let message = error_text(resp).await.unwrap_or_default();
    Err(ApiError::Api { status: status.as_u16(), message })
}

/// The `error` (or `message`) field of a JSON error body.
async fn error_text(resp: Response) -> Option<String> {
    let body: ErrorBody = resp.json().await.ok()?;
    body.error.or(body.message).filter(|m| !m.is_empty())
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use axum::extract::{Path, Query};
    use axum::http::{HeaderMap as AxumHeaders, StatusCode as AxumStatus};
    use axum::routing::{delete, get, post};
    use axum::{Json, Router};

    use super::*;
    use crate::test_util::{client, serve};

    #[tokio::test]
    async fn test_login_stores_token_and_navigates() {
        let router = Router::new().route(
            "/api/auth/login",
            post(|Json(body): Json<Value>| async move {
                assert_eq!(body["username"], "admin");
                Json(json!({ "access_token": "tok-1" }))
            }),
        );
        let t = client(&serve(router).await, None);
        t.api.navigator().navigate(Route::Login);

        t.api.login("admin", "secret").await.unwrap();
        assert_eq!(t.api.tokens().get().as_deref(), Some("tok-1"));
        assert_eq!(t.api.navigator().current(), Route::Dashboard);
    }

    #[tokio::test]
    async fn test_login_failure_surfaces_server_error_without_logout() {
        let router = Router::new().route(
            "/api/auth/login",
            post(|| async { (AxumStatus::UNAUTHORIZED, Json(json!({ "error": "Invalid credentials" }))) }),
        );
        let t = client(&serve(router).await, None);
        t.api.navigator().navigate(Route::Login);

        let err = t.api.login("admin", "wrong").await.unwrap_err();
        assert_eq!(err.user_message(LOGIN_FAILED_MESSAGE), "Invalid credentials");
        assert!(!err.is_auth());
    }

    #[tokio::test]
    async fn test_login_failure_without_body_falls_back() {
        let router = Router::new().route("/api/auth/login", post(|| async { AxumStatus::INTERNAL_SERVER_ERROR }));
        let t = client(&serve(router).await, None);
        let err = t.api.login("a", "b").await.unwrap_err();
        assert_eq!(err.user_message(LOGIN_FAILED_MESSAGE), LOGIN_FAILED_MESSAGE);
    }

    #[tokio::test]
    async fn test_login_network_failure() {
        // Nothing listens on port 9 on loopback.
        let t = client("http://127.0.0.1:9/api", None);
        let err = t.api.login("a", "b").await.unwrap_err();
        assert_eq!(err.user_message(LOGIN_FAILED_MESSAGE), NETWORK_ERROR_MESSAGE);
    }

    #[tokio::test]
    async fn test_api_call_sends_bearer_and_merges_headers() {
        let seen = Arc::new(Mutex::new(None::<(String, String, String)>));
        let seen2 = seen.clone();
        let router = Router::new().route(
            "/api/attendance/status",
            get(move |headers: AxumHeaders| {
                let seen = seen2.clone();
                async move {
                    let h = |n: &str| headers.get(n).and_then(|v| v.to_str().ok()).unwrap_or("").to_string();
                    *seen.lock().unwrap() = Some((h("authorization"), h("content-type"), h("x-client")));
                    Json(json!({ "is_running": false, "known_faces_count": 0 }))
                }
            }),
        );
        let t = client(&serve(router).await, Some("tok"));
        let resp = t
            .api
            .api_call(
                Method::GET,
                "/attendance/status",
                RequestOptions::default().header("X-Client", "rollcall"),
            )
            .await
            .unwrap();
        assert!(resp.status().is_success());
        let (auth, ctype, custom) = seen.lock().unwrap().clone().unwrap();
        assert_eq!(auth, "Bearer tok");
        assert_eq!(ctype, "application/json");
        assert_eq!(custom, "rollcall");
    }

    #[tokio::test]
    async fn test_caller_header_overrides_default() {
        let router = Router::new().route(
            "/api/echo",
            post(|headers: AxumHeaders| async move {
                headers.get("content-type").and_then(|v| v.to_str().ok()).unwrap_or("").to_string()
            }),
        );
        let t = client(&serve(router).await, Some("tok"));
        let resp = t
            .api
            .api_call(Method::POST, "/echo", RequestOptions::default().header("Content-Type", "text/plain"))
            .await
            .unwrap();
        assert_eq!(resp.text().await.unwrap(), "text/plain");
    }

    #[tokio::test]
    async fn test_any_401_clears_token_and_navigates_to_login() {
        let router = Router::new()
            .route("/api/attendance/today-summary", get(|| async { AxumStatus::UNAUTHORIZED }))
            .route("/api/enrollment/list", get(|| async { AxumStatus::UNAUTHORIZED }));
        let base = serve(router).await;

        let t = client(&base, Some("stale"));
        assert!(matches!(t.api.today_summary().await, Err(ApiError::Unauthorized)));
        assert_eq!(t.api.tokens().get(), None);
        assert_eq!(t.api.navigator().current(), Route::Login);

        let t = client(&base, Some("stale"));
        assert!(matches!(t.api.enrolled_list().await, Err(ApiError::Unauthorized)));
        assert_eq!(t.api.tokens().get(), None);
    }

    #[tokio::test]
    async fn test_missing_token_fails_without_request() {
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        let router = Router::new().route(
            "/api/attendance/status",
            get(move || {
                h.fetch_add(1, Ordering::SeqCst);
                async { Json(json!({ "is_running": true })) }
            }),
        );
        let t = client(&serve(router).await, None);
        assert!(matches!(t.api.status().await, Err(ApiError::NotAuthenticated)));
        assert_eq!(t.api.navigator().current(), Route::Login);
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_application_error_carries_server_text() {
        let router = Router::new().route(
            "/api/attendance/start",
            post(|| async { (AxumStatus::BAD_REQUEST, Json(json!({ "error": "camera busy" }))) }),
        );
        let t = client(&serve(router).await, Some("tok"));
        let err = t.api.start_monitoring(&CameraSource::Index(0)).await.unwrap_err();
        assert!(matches!(&err, ApiError::Api { status: 400, .. }));
        assert_eq!(err.user_message("Failed to start monitoring"), "camera busy");
        // Not an auth failure: the session survives.
        assert_eq!(t.api.tokens().get().as_deref(), Some("tok"));
    }

    #[tokio::test]
    async fn test_verify_and_logout() {
        let logouts = Arc::new(AtomicUsize::new(0));
        let l = logouts.clone();
        let router = Router::new()
            .route("/api/auth/verify", get(|| async { Json(json!({ "valid": true })) }))
            .route(
                "/api/auth/logout",
                post(move || {
                    l.fetch_add(1, Ordering::SeqCst);
                    async { AxumStatus::INTERNAL_SERVER_ERROR }
                }),
            );
        let t = client(&serve(router).await, Some("tok"));
        assert!(t.api.verify().await);

        t.api.logout().await;
        assert_eq!(logouts.load(Ordering::SeqCst), 1);
        assert_eq!(t.api.tokens().get(), None);
        assert_eq!(t.api.navigator().current(), Route::Login);
        assert!(!t.api.verify().await);
    }

    #[tokio::test]
    async fn test_delete_encodes_id_and_role() {
        let seen = Arc::new(Mutex::new(None::<(String, String)>));
        let s = seen.clone();
        let router = Router::new().route(
            "/api/enrollment/delete/:id",
            delete(move |Path(id): Path<String>, Query(q): Query<HashMap<String, String>>| {
                let s = s.clone();
                async move {
                    *s.lock().unwrap() = Some((id, q.get("role").cloned().unwrap_or_default()));
                    Json(json!({ "message": "ok" }))
                }
            }),
        );
        let t = client(&serve(router).await, Some("tok"));
        t.api.delete_enrolled("S 01/a", Role::Staff).await.unwrap();
        assert_eq!(seen.lock().unwrap().clone().unwrap(), ("S 01/a".to_string(), "staff".to_string()));

        let url = t.api.endpoint_url("/enrollment/delete", &["a b/c?"]).unwrap();
        assert!(url.path().ends_with("/api/enrollment/delete/a%20b%2Fc%3F"), "{url}");
    }

    #[tokio::test]
    async fn test_report_query_omits_empty_filters() {
        let seen = Arc::new(Mutex::new(HashMap::new()));
        let s = seen.clone();
        let router = Router::new().route(
            "/api/reports/attendance",
            get(move |Query(q): Query<HashMap<String, String>>| {
                let s = s.clone();
                async move {
                    *s.lock().unwrap() = q;
                    Json(json!({ "role": "student", "data": [], "count": 0 }))
                }
            }),
        );
        let t = client(&serve(router).await, Some("tok"));
        let filter = ReportFilter { role: Role::Student, from: None, to: None, person_id: Some("  ".into()) };
        let report = t.api.attendance_report(&filter).await.unwrap();
        assert_eq!(report.count, 0);
        let q = seen.lock().unwrap().clone();
        assert_eq!(q.len(), 1);
        assert_eq!(q.get("role").map(String::as_str), Some("student"));
    }
}
