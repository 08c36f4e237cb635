use serde::Deserialize;
use serenity::async_trait;
use tracing::{debug, warn};

use crate::music::error::{MusicError, Result};

/// Publishes long text somewhere users can follow a link to.
#[async_trait]
pub trait PasteService: Send + Sync {
    async fn post(&self, text: &str) -> Result<String>;
}

/// Hastebin-compatible paste server: `POST /documents` answers `{"key": "..."}`.
pub struct HastebinPaste {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Deserialize)]
struct PasteResponse {
    key: String,
}

impl HastebinPaste {
    pub fn new(base_url: impl Into<String>) -> Self {
        HastebinPaste {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn document_url(&self, key: &str) -> String {
        format!("{}/{}", self.base_url, key)
    }
}

#[async_trait]
impl PasteService for HastebinPaste {
    async fn post(&self, text: &str) -> Result<String> {
        let response = self
            .client
            .post(format!("{}/documents", self.base_url))
            .header("Content-Type", "text/plain; charset=utf-8")
            .body(text.to_string())
            .send()
            .await
            .map_err(|why| MusicError::Paste(why.to_string()))?;

        if !response.status().is_success() {
            warn!("Paste service answered {}", response.status());
            return Err(MusicError::Paste(format!(
                "paste service returned status {}",
                response.status()
            )));
        }

        let paste: PasteResponse = response
            .json()
            .await
            .map_err(|why| MusicError::Paste(why.to_string()))?;

        debug!("Pasted {} bytes as {}", text.len(), paste.key);

        Ok(self.document_url(&paste.key))
    }
}
