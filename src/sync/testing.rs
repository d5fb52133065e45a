//! In-memory [`Remote`] that replays scripted responses.

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use super::remote::{ApiResponse, Remote};

#[derive(Debug, Clone, PartialEq)]
pub struct Call {
    pub method: &'static str,
    pub path: String,
    pub body: Option<Value>,
}

/// Responses are queued per `(method, path)`. The last queued response for a
/// route repeats forever, so a single scripted failure means "always fails".
#[derive(Default)]
pub struct ScriptedRemote {
    routes: Mutex<HashMap<(&'static str, String), VecDeque<ApiResponse<Value>>>>,
    calls: Mutex<Vec<Call>>,
}

impl ScriptedRemote {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(&self, method: &'static str, path: &str, response: ApiResponse<Value>) {
        self.routes
            .lock()
            .unwrap()
            .entry((method, path.to_string()))
            .or_default()
            .push_back(response);
    }

    /// Forget everything queued for a route.
    pub fn clear(&self, method: &'static str, path: &str) {
        self.routes.lock().unwrap().remove(&(method, path.to_string()));
    }

    pub fn ok(&self, method: &'static str, path: &str, data: Value) {
        self.script(method, path, ApiResponse::success(200, Some(data)));
    }

    pub fn fail(&self, method: &'static str, path: &str, status: u16, error: &str) {
        self.script(method, path, ApiResponse::failure(status, error.to_string()));
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, method: &str, path: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.method == method && c.path == path)
            .count()
    }

    fn respond<T: DeserializeOwned>(
        &self,
        method: &'static str,
        path: &str,
        body: Option<Value>,
    ) -> ApiResponse<T> {
        self.calls.lock().unwrap().push(Call {
            method,
            path: path.to_string(),
            body,
        });

        let scripted = {
            let mut routes = self.routes.lock().unwrap();
            match routes.get_mut(&(method, path.to_string())) {
                Some(queue) if queue.len() > 1 => queue.pop_front(),
                Some(queue) => queue.front().cloned(),
                None => None,
            }
        };
        let Some(resp) = scripted else {
            return ApiResponse::failure(404, format!("no route for {} {}", method, path));
        };

        if !resp.ok {
            return ApiResponse::failure(resp.status, resp.error.unwrap_or_default());
        }
        match resp.data {
            None => ApiResponse::success(resp.status, None),
            Some(value) => match serde_json::from_value(value) {
                Ok(data) => ApiResponse::success(resp.status, Some(data)),
                Err(e) => ApiResponse::failure(resp.status, e.to_string()),
            },
        }
    }
}

impl Remote for ScriptedRemote {
    async fn get<T>(&self, path: &str) -> ApiResponse<T>
    where
        T: DeserializeOwned + Send,
    {
        tokio::task::yield_now().await;
        self.respond("GET", path, None)
    }

    async fn post<T, B>(&self, path: &str, body: &B) -> ApiResponse<T>
    where
        T: DeserializeOwned + Send,
        B: Serialize + Sync,
    {
        let body = serde_json::to_value(body).ok();
        tokio::task::yield_now().await;
        self.respond("POST", path, body)
    }

    async fn del<T>(&self, path: &str) -> ApiResponse<T>
    where
        T: DeserializeOwned + Send,
    {
        tokio::task::yield_now().await;
        self.respond("DELETE", path, None)
    }
}
