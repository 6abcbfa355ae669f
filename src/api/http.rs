use super::schema::{
    interpret, AckResponse, AnalyzeResponse, ProgressResponse, ServiceReply, SessionsResponse,
    StatusResponse, UploadResponse,
};
use super::{AnalysisApi, ApiError};
use crate::model::{AnalysisForm, DashboardConfig, ProgressSnapshot, Session, SessionAction};
use crate::validation::UploadFile;
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Method, Url};
use serde::de::DeserializeOwned;

/// `AnalysisApi` over HTTP with reqwest.
///
/// No per-request deadline is set; a hung request stays pending until the
/// transport gives up.
pub struct HttpApi {
    http: reqwest::Client,
    base: Url,
}

impl HttpApi {
    pub fn new(cfg: &DashboardConfig) -> Result<Self> {
        let base = Url::parse(&cfg.base_url)
            .with_context(|| format!("invalid base URL: {}", cfg.base_url))?;
        if base.cannot_be_a_base() {
            anyhow::bail!("base URL cannot carry a path: {}", cfg.base_url);
        }
        let http = reqwest::Client::builder()
            .user_agent(cfg.user_agent.clone())
            .build()
            .context("build HTTP client")?;
        Ok(Self { http, base })
    }

    /// Join path segments onto the base URL, percent-encoding each one.
    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty();
            path.extend(segments);
        }
        url
    }

    async fn send<T>(&self, request: reqwest::RequestBuilder, url: &Url) -> Result<T, ApiError>
    where
        T: DeserializeOwned + ServiceReply,
    {
        let endpoint = url.path().to_string();
        let resp = request.send().await.map_err(|source| ApiError::Transport {
            endpoint: endpoint.clone(),
            source,
        })?;
        let status = resp.status().as_u16();
        let body = resp.text().await.map_err(|source| ApiError::Transport {
            endpoint: endpoint.clone(),
            source,
        })?;
        tracing::debug!(%endpoint, status, bytes = body.len(), "service reply");
        interpret(&endpoint, status, &body)
    }

    async fn call<T>(&self, method: Method, segments: &[&str]) -> Result<T, ApiError>
    where
        T: DeserializeOwned + ServiceReply,
    {
        let url = self.endpoint(segments);
        let request = self.http.request(method, url.clone());
        self.send(request, &url).await
    }
}

#[async_trait]
impl AnalysisApi for HttpApi {
    async fn analyze(&self, form: &AnalysisForm) -> Result<String, ApiError> {
        let url = self.endpoint(&["api", "analyze"]);
        let request = self.http.post(url.clone()).json(form);
        let reply: AnalyzeResponse = self.send(request, &url).await?;
        reply.session_id.ok_or_else(|| ApiError::Decode {
            endpoint: url.path().to_string(),
            reason: "missing session_id".into(),
        })
    }

    async fn progress(&self, session_id: &str) -> Result<ProgressSnapshot, ApiError> {
        let reply: ProgressResponse = self
            .call(Method::GET, &["api", "progress", session_id])
            .await?;
        Ok(reply.into())
    }

    async fn list_sessions(&self) -> Result<Vec<Session>, ApiError> {
        let reply: SessionsResponse = self.call(Method::GET, &["api", "sessions"]).await?;
        Ok(reply.sessions)
    }

    async fn session_status(&self, session_id: &str) -> Result<Session, ApiError> {
        let segments = ["api", "sessions", session_id, "status"];
        let reply: StatusResponse = self.call(Method::GET, &segments).await?;
        reply.session.ok_or_else(|| ApiError::Decode {
            endpoint: self.endpoint(&segments).path().to_string(),
            reason: "missing session".into(),
        })
    }

    async fn session_action(
        &self,
        session_id: &str,
        action: SessionAction,
    ) -> Result<(), ApiError> {
        let _: AckResponse = self
            .call(
                Method::POST,
                &["api", "sessions", session_id, action.path_segment()],
            )
            .await?;
        Ok(())
    }

    async fn delete_session(&self, session_id: &str) -> Result<(), ApiError> {
        let _: AckResponse = self
            .call(Method::DELETE, &["api", "sessions", session_id])
            .await?;
        Ok(())
    }

    async fn clear_sessions(&self) -> Result<(), ApiError> {
        let _: AckResponse = self
            .call(Method::POST, &["api", "sessions", "clear"])
            .await?;
        Ok(())
    }

    async fn upload(&self, file: &UploadFile) -> Result<String, ApiError> {
        let url = self.endpoint(&["api", "upload"]);
        let part = reqwest::multipart::Part::bytes(file.contents.to_vec())
            .file_name(file.file_name.clone())
            .mime_str(&file.mime)
            .map_err(|source| ApiError::Transport {
                endpoint: url.path().to_string(),
                source,
            })?;
        let form = reqwest::multipart::Form::new().part("file", part);
        let request = self.http.post(url.clone()).multipart(form);
        let reply: UploadResponse = self.send(request, &url).await?;
        reply.file_id.ok_or_else(|| ApiError::Decode {
            endpoint: url.path().to_string(),
            reason: "missing file_id".into(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn api(base: &str) -> HttpApi {
        HttpApi::new(&DashboardConfig {
            base_url: base.into(),
            poll_interval: Duration::from_secs(3),
            notification_ttl: Duration::from_secs(5),
            user_agent: "test".into(),
        })
        .unwrap()
    }

    #[test]
    fn test_endpoint_joins_segments() {
        let a = api("http://localhost:5000");
        assert_eq!(
            a.endpoint(&["api", "progress", "abc123"]).as_str(),
            "http://localhost:5000/api/progress/abc123"
        );
    }

    #[test]
    fn test_endpoint_keeps_base_prefix_and_encodes_ids() {
        let a = api("https://example.com/dash/");
        assert_eq!(
            a.endpoint(&["api", "sessions", "a b/c", "status"]).as_str(),
            "https://example.com/dash/api/sessions/a%20b%2Fc/status"
        );
    }

    #[test]
    fn test_rejects_invalid_base_url() {
        let res = HttpApi::new(&DashboardConfig {
            base_url: "not a url".into(),
            poll_interval: Duration::from_secs(3),
            notification_ttl: Duration::from_secs(5),
            user_agent: "test".into(),
        });
        assert!(res.is_err());
    }
}
