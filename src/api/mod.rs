//! Typed HTTP client for the fleet backend
//!
//! Thin wrapper over reqwest that owns base-URL joining, the bearer
//! header, and global 401 interception. A 401 on any call wipes the
//! credentials through the auth manager (which emits the re-login
//! event) before the error surfaces to the caller.

pub mod types;

use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use crate::auth::AuthManager;
use crate::config::ConsoleConfig;
use crate::error::{ConsoleError, Result};

use types::{
    Ack, DirEntry, ExecuteRequest, Host, HostPayload, ListResponse, LoginResponse,
    PlaybookRequest, PlaybookResponse, ReadResponse, UploadResponse, WsTokenResponse,
};

pub struct ApiClient {
    http: reqwest::Client,
    config: ConsoleConfig,
    auth: Arc<AuthManager>,
}

impl ApiClient {
    pub fn new(config: ConsoleConfig, auth: Arc<AuthManager>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;
        Ok(Self { http, config, auth })
    }

    pub fn config(&self) -> &ConsoleConfig {
        &self.config
    }

    pub(crate) fn url(&self, path: &str) -> String {
        self.config.api_url(path)
    }

    fn authorize(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self.auth.token() {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    pub(crate) fn get(&self, path: &str) -> reqwest::RequestBuilder {
        self.authorize(self.http.get(self.url(path)))
    }

    pub(crate) fn post(&self, path: &str) -> reqwest::RequestBuilder {
        self.authorize(self.http.post(self.url(path)))
    }

    fn put(&self, path: &str) -> reqwest::RequestBuilder {
        self.authorize(self.http.put(self.url(path)))
    }

    fn delete(&self, path: &str) -> reqwest::RequestBuilder {
        self.authorize(self.http.delete(self.url(path)))
    }

    /// Decode a response, intercepting 401 globally.
    pub(crate) async fn handle<T: DeserializeOwned>(
        &self,
        response: reqwest::Response,
    ) -> Result<T> {
        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED {
            self.auth.handle_unauthorized().await;
            return Err(ConsoleError::Unauthorized);
        }
        if !status.is_success() {
            let message = match response.json::<Ack>().await {
                Ok(ack) if !ack.message.is_empty() => ack.message,
                _ => status
                    .canonical_reason()
                    .unwrap_or("request failed")
                    .to_string(),
            };
            return Err(ConsoleError::Api {
                status: status.as_u16(),
                message,
            });
        }
        Ok(response.json::<T>().await?)
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let response = self.get(path).send().await?;
        self.handle(response).await
    }

    async fn post_json<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T> {
        let response = self.post(path).json(body).send().await?;
        self.handle(response).await
    }

    // ------------------------------------------------------------------
    // Auth
    // ------------------------------------------------------------------

    /// Log in and install the returned token into the auth manager.
    pub async fn login(&self, username: &str, password: &str) -> Result<()> {
        let body = serde_json::json!({ "username": username, "password": password });
        let response = self.http.post(self.url("/api/login")).json(&body).send().await?;
        let login: LoginResponse = self.handle(response).await?;
        match login.token {
            Some(token) if login.success => {
                self.auth.login(token).await?;
                Ok(())
            }
            _ => Err(ConsoleError::Api {
                status: 200,
                message: if login.message.is_empty() {
                    "login rejected".to_string()
                } else {
                    login.message
                },
            }),
        }
    }

    // ------------------------------------------------------------------
    // Hosts
    // ------------------------------------------------------------------

    pub async fn list_hosts(&self) -> Result<Vec<Host>> {
        self.get_json("/api/hosts").await
    }

    pub async fn get_host(&self, id: i64) -> Result<Host> {
        self.get_json(&format!("/api/hosts/{}", id)).await
    }

    pub async fn add_host(&self, payload: &HostPayload) -> Result<Ack> {
        self.post_json("/api/hosts", payload).await
    }

    pub async fn update_host(&self, id: i64, payload: &HostPayload) -> Result<Ack> {
        let response = self
            .put(&format!("/api/hosts/{}", id))
            .json(payload)
            .send()
            .await?;
        self.handle(response).await
    }

    pub async fn delete_host(&self, id: i64) -> Result<Ack> {
        let response = self.delete(&format!("/api/hosts/{}", id)).send().await?;
        self.handle(response).await
    }

    pub async fn host_facts(&self, id: i64) -> Result<serde_json::Value> {
        self.get_json(&format!("/api/hosts/{}/facts", id)).await
    }

    /// Remote reachability check. `Ok(ack)` carries the verdict;
    /// transport errors surface as `Err`.
    pub async fn ping_host(&self, id: i64) -> Result<Ack> {
        self.get_json(&format!("/api/hosts/{}/ping", id)).await
    }

    // ------------------------------------------------------------------
    // Operations
    // ------------------------------------------------------------------

    /// Fan a shell command out to the selected hosts. The response shape
    /// varies with the runner, so it is kept verbatim for log rendering.
    pub async fn execute(&self, request: &ExecuteRequest) -> Result<serde_json::Value> {
        debug!("execute: {}", request.command);
        self.post_json("/api/execute", request).await
    }

    pub async fn run_playbook(&self, request: &PlaybookRequest) -> Result<PlaybookResponse> {
        self.post_json("/api/playbook", request).await
    }

    /// Multipart fan-out upload. The body is built by the caller so the
    /// file part can stream with progress tracking.
    pub(crate) async fn upload_multipart(
        &self,
        form: reqwest::multipart::Form,
    ) -> Result<UploadResponse> {
        let response = self.post("/api/upload").multipart(form).send().await?;
        self.handle(response).await
    }

    /// Server-side command log, newest last.
    pub async fn server_logs(&self, limit: usize) -> Result<Vec<serde_json::Value>> {
        self.get_json(&format!("/api/logs?limit={}", limit)).await
    }

    pub async fn clear_server_logs(&self) -> Result<Ack> {
        let response = self.delete("/api/logs").send().await?;
        self.handle(response).await
    }

    // ------------------------------------------------------------------
    // Terminal
    // ------------------------------------------------------------------

    /// Single-use short-expiry token gating the terminal socket.
    pub async fn ws_token(&self, host_id: i64) -> Result<String> {
        let response: WsTokenResponse =
            self.get_json(&format!("/api/ws-token/{}", host_id)).await?;
        Ok(response.token)
    }

    // ------------------------------------------------------------------
    // Remote files
    // ------------------------------------------------------------------

    pub async fn file_list(&self, host_id: i64, path: &str) -> Result<Vec<DirEntry>> {
        let response: ListResponse = self
            .get_json(&format!(
                "/api/sftp/{}/list?path={}",
                host_id,
                urlencode(path)
            ))
            .await?;
        if !response.success {
            return Err(ConsoleError::Api {
                status: 200,
                message: response.message,
            });
        }
        Ok(response.files)
    }

    pub async fn file_read(&self, host_id: i64, path: &str) -> Result<String> {
        let response: ReadResponse = self
            .get_json(&format!(
                "/api/sftp/{}/read?path={}",
                host_id,
                urlencode(path)
            ))
            .await?;
        if !response.success {
            return Err(ConsoleError::Api {
                status: 200,
                message: response.message,
            });
        }
        Ok(response.content)
    }

    pub async fn file_write(&self, host_id: i64, path: &str, content: &str) -> Result<Ack> {
        let body = serde_json::json!({ "path": path, "content": content });
        self.post_json(&format!("/api/sftp/{}/write", host_id), &body)
            .await
    }

    pub async fn file_mkdir(&self, host_id: i64, path: &str) -> Result<Ack> {
        let body = serde_json::json!({ "path": path });
        self.post_json(&format!("/api/sftp/{}/mkdir", host_id), &body)
            .await
    }

    pub async fn file_touch(&self, host_id: i64, path: &str) -> Result<Ack> {
        let body = serde_json::json!({ "path": path });
        self.post_json(&format!("/api/sftp/{}/touch", host_id), &body)
            .await
    }

    /// Delete is type-qualified so the backend picks rm vs rmdir.
    pub async fn file_delete(&self, host_id: i64, path: &str, is_dir: bool) -> Result<Ack> {
        let body = serde_json::json!({
            "path": path,
            "type": if is_dir { "directory" } else { "file" },
        });
        self.post_json(&format!("/api/sftp/{}/delete", host_id), &body)
            .await
    }

    pub async fn file_rename(&self, host_id: i64, old_path: &str, new_path: &str) -> Result<Ack> {
        let body = serde_json::json!({ "old_path": old_path, "new_path": new_path });
        self.post_json(&format!("/api/sftp/{}/rename", host_id), &body)
            .await
    }

    /// Direct resource URL for a download; the shell hands it to the
    /// browser so nothing is buffered in the console core.
    pub fn file_download_url(&self, host_id: i64, path: &str) -> String {
        let base = self.url(&format!(
            "/api/sftp/{}/download?path={}",
            host_id,
            urlencode(path)
        ));
        match self.auth.token() {
            Some(token) => format!("{}&token={}", base, token),
            None => base,
        }
    }
}

/// Minimal percent-encoding for query values: remote paths may carry
/// spaces and reserved characters.
fn urlencode(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for byte in value.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'.' | b'_' | b'~' | b'/' => {
                out.push(byte as char)
            }
            _ => out.push_str(&format!("%{:02X}", byte)),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_urlencode_keeps_path_separators() {
        assert_eq!(urlencode("/var/log/app"), "/var/log/app");
    }

    #[test]
    fn test_urlencode_escapes_spaces_and_reserved() {
        assert_eq!(urlencode("/tmp/a b&c"), "/tmp/a%20b%26c");
    }
}
