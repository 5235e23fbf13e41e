//! Article summary lookup
//!
//! Fetches the plain-text extract of a Wikipedia article through the REST
//! summary endpoint. Best effort: any failure is `None`.

use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Deserialize)]
struct SummaryResponse {
    extract: Option<String>,
}

pub struct SummaryClient {
    client: Client,
}

impl SummaryClient {
    pub fn new(user_agent: &str, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .user_agent(user_agent.to_string())
            .timeout(timeout)
            .build()?;
        Ok(Self { client })
    }

    pub async fn fetch(&self, article_url: &str) -> Option<String> {
        let api_url = summary_api_url(article_url)?;
        let response = match self.client.get(&api_url).send().await {
            Ok(response) => response,
            Err(e) => {
                tracing::debug!(url = %api_url, error = %e, "Summary fetch failed");
                return None;
            }
        };
        if !response.status().is_success() {
            return None;
        }
        let summary: SummaryResponse = response.json().await.ok()?;
        summary.extract.filter(|s| !s.trim().is_empty())
    }
}

/// `https://<lang>.wikipedia.org/wiki/<title>` → REST summary URL
pub fn summary_api_url(article_url: &str) -> Option<String> {
    let (base, title) = article_url.split_once("/wiki/")?;
    if title.is_empty() {
        return None;
    }
    let host = base.rsplit('/').next()?;
    let lang = host.strip_suffix(".wikipedia.org").unwrap_or("en");
    Some(format!(
        "https://{}.wikipedia.org/api/rest_v1/page/summary/{}",
        lang, title
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summary_url() {
        assert_eq!(
            summary_api_url("https://en.wikipedia.org/wiki/Battle_of_Hastings").as_deref(),
            Some("https://en.wikipedia.org/api/rest_v1/page/summary/Battle_of_Hastings")
        );
        assert_eq!(
            summary_api_url("https://pt.wikipedia.org/wiki/Revolu%C3%A7%C3%A3o").as_deref(),
            Some("https://pt.wikipedia.org/api/rest_v1/page/summary/Revolu%C3%A7%C3%A3o")
        );
        assert_eq!(summary_api_url("https://example.org/page"), None);
        assert_eq!(summary_api_url("https://en.wikipedia.org/wiki/"), None);
    }
}
