use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use tracing::debug;
use url::Url;

use super::{WellnessDocument, WellnessSource};

/// Wellness survey backend reached over HTTP. The endpoint returns the same
/// JSON array as the file export.
pub struct HttpWellnessSource {
    http: Client,
    url: Url,
}

impl HttpWellnessSource {
    pub fn new(url: &str) -> Result<Self> {
        let url = Url::parse(url).with_context(|| format!("invalid wellness API URL '{url}'"))?;
        let http = Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(HttpWellnessSource { http, url })
    }
}

#[async_trait]
impl WellnessSource for HttpWellnessSource {
    fn name(&self) -> &str {
        "wellness-api"
    }

    async fn fetch_wellness(&self) -> Result<Vec<WellnessDocument>> {
        debug!("Fetching wellness surveys from {}", self.url);

        let resp = self
            .http
            .get(self.url.clone())
            .send()
            .await
            .context("wellness API request failed")?;

        if !resp.status().is_success() {
            anyhow::bail!("wellness API error: {}", resp.status());
        }

        let docs: Vec<WellnessDocument> = resp
            .json()
            .await
            .context("Failed to parse wellness API response")?;
        Ok(docs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_invalid_url() {
        assert!(HttpWellnessSource::new("not a url").is_err());
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_an_error() {
        // Port 9 (discard) on localhost is closed in test environments
        let source = HttpWellnessSource::new("http://127.0.0.1:9/wellness").unwrap();
        assert!(source.fetch_wellness().await.is_err());
    }
}
