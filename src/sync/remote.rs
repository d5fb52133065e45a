use reqwest::{Client, Method, RequestBuilder};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::future::Future;

use crate::core::error::RemoteError;

/// Normalized answer from the backend.
///
/// `status` is 0 when the server was never reached. A 2xx whose body did not
/// decode has `ok == false` and the decode error in `error`.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiResponse<T> {
    pub ok: bool,
    pub status: u16,
    pub data: Option<T>,
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn success(status: u16, data: Option<T>) -> Self {
        Self {
            ok: true,
            status,
            data,
            error: None,
        }
    }

    pub fn failure(status: u16, error: String) -> Self {
        Self {
            ok: false,
            status,
            data: None,
            error: Some(error),
        }
    }

    fn take_error(&mut self) -> RemoteError {
        let text = self.error.take().unwrap_or_default();
        match self.status {
            0 => RemoteError::Network(text),
            200..=299 => RemoteError::Decode(text),
            status => RemoteError::Status { status, body: text },
        }
    }

    /// The body if there was one. Failures become a [`RemoteError`].
    pub fn into_data(mut self) -> Result<Option<T>, RemoteError> {
        if self.ok {
            Ok(self.data)
        } else {
            Err(self.take_error())
        }
    }

    /// Like [`into_data`](Self::into_data) but an empty body is an error.
    pub fn into_result(self) -> Result<T, RemoteError> {
        self.into_data()?
            .ok_or_else(|| RemoteError::Decode("empty response body".to_string()))
    }
}

/// The remote call primitive the resilience layer is written against.
pub trait Remote: Send + Sync {
    fn get<T>(&self, path: &str) -> impl Future<Output = ApiResponse<T>> + Send
    where
        T: DeserializeOwned + Send;

    fn post<T, B>(&self, path: &str, body: &B) -> impl Future<Output = ApiResponse<T>> + Send
    where
        T: DeserializeOwned + Send,
        B: Serialize + Sync;

    fn del<T>(&self, path: &str) -> impl Future<Output = ApiResponse<T>> + Send
    where
        T: DeserializeOwned + Send;
}

/// JSON-over-HTTPS client for the productivity backend.
#[derive(Clone)]
pub struct ApiClient {
    base_url: String,
    token: Option<String>,
    http: Client,
}

impl ApiClient {
    pub fn new(base_url: &str, token: Option<&str>) -> Result<Self, RemoteError> {
        let http = Client::builder()
            .user_agent(concat!("wick/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| RemoteError::Network(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.map(str::to_string),
            http,
        })
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let req = self.http.request(method, self.url(path));
        match &self.token {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }

    async fn send<T: DeserializeOwned + Send>(&self, req: RequestBuilder) -> ApiResponse<T> {
        let resp = match req.send().await {
            Ok(r) => r,
            Err(e) => return ApiResponse::failure(0, e.to_string()),
        };

        let status = resp.status();
        let text = match resp.text().await {
            Ok(t) => t,
            Err(e) => return ApiResponse::failure(0, format!("failed to read body: {}", e)),
        };

        if !status.is_success() {
            return ApiResponse::failure(status.as_u16(), text);
        }
        if text.trim().is_empty() {
            return ApiResponse::success(status.as_u16(), None);
        }
        match serde_json::from_str(&text) {
            Ok(data) => ApiResponse::success(status.as_u16(), Some(data)),
            Err(e) => ApiResponse::failure(status.as_u16(), e.to_string()),
        }
    }
}

impl Remote for ApiClient {
    async fn get<T>(&self, path: &str) -> ApiResponse<T>
    where
        T: DeserializeOwned + Send,
    {
        log::debug!("GET {}", path);
        self.send(self.request(Method::GET, path)).await
    }

    async fn post<T, B>(&self, path: &str, body: &B) -> ApiResponse<T>
    where
        T: DeserializeOwned + Send,
        B: Serialize + Sync,
    {
        log::debug!("POST {}", path);
        self.send(self.request(Method::POST, path).json(body)).await
    }

    async fn del<T>(&self, path: &str) -> ApiResponse<T>
    where
        T: DeserializeOwned + Send,
    {
        log::debug!("DELETE {}", path);
        self.send(self.request(Method::DELETE, path)).await
    }
}
