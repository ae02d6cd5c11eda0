use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tether_common::{
    error::{Result, TetherError},
    traits::SessionApi,
    types::{SessionId, Size},
};
use tracing::{debug, instrument};

#[derive(Serialize)]
struct CreateSessionRequest {
    cols: u16,
    rows: u16,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateSessionResponse {
    session_id: String,
}

/// Session lifecycle over the backend's REST endpoints
#[derive(Clone)]
pub struct HttpSessionApi {
    http: Client,
    base_url: String,
}

impl HttpSessionApi {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl SessionApi for HttpSessionApi {
    #[instrument(skip(self))]
    async fn create_session(&self, size: Size) -> Result<SessionId> {
        let url = format!("{}/sessions", self.base_url);
        let res = self
            .http
            .post(url)
            .json(&CreateSessionRequest {
                cols: size.cols,
                rows: size.rows,
            })
            .send()
            .await
            .map_err(|e| TetherError::Acquisition(e.to_string()))?;

        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(TetherError::Acquisition(format!(
                "unexpected status: {} body={}",
                status, body
            )));
        }

        let body: CreateSessionResponse = res
            .json()
            .await
            .map_err(|e| TetherError::Acquisition(format!("malformed response: {}", e)))?;
        debug!("Backend created session {}", body.session_id);
        Ok(SessionId::new(body.session_id))
    }

    #[instrument(skip(self))]
    async fn delete_session(&self, id: &SessionId) -> Result<()> {
        let url = format!("{}/sessions/{}", self.base_url, id);
        self.http
            .delete(url)
            .send()
            .await
            .and_then(|res| res.error_for_status())
            .map_err(|e| TetherError::Transport(e.to_string()))?;
        Ok(())
    }
}
