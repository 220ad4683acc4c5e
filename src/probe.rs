use crate::engine::ConnectivityProbe;
use anyhow::{Context, Result};
use std::time::Duration;

/// Reachability check against a small list of well-known URLs. Any completed
/// HTTP exchange proves the uplink; only transport-level failures count
/// against a URL.
pub struct HttpProbe {
    client: reqwest::Client,
    urls: Vec<String>,
}

impl HttpProbe {
    pub fn new(urls: Vec<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build connectivity probe client")?;
        Ok(Self { client, urls })
    }
}

impl ConnectivityProbe for HttpProbe {
    async fn is_reachable(&self) -> bool {
        for url in &self.urls {
            match self.client.get(url).send().await {
                Ok(_) => return true,
                Err(err) => {
                    tracing::debug!(url = %url, error = %err, "connectivity probe attempt failed")
                }
            }
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn empty_url_list_is_unreachable() {
        let probe = HttpProbe::new(Vec::new(), Duration::from_millis(100)).unwrap();
        assert!(!probe.is_reachable().await);
    }

    #[tokio::test]
    async fn closed_port_is_unreachable() {
        let probe = HttpProbe::new(
            vec!["http://127.0.0.1:9".to_string()],
            Duration::from_millis(200),
        )
        .unwrap();
        assert!(!probe.is_reachable().await);
    }
}
