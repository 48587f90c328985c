use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, COOKIE, USER_AGENT};
use reqwest::Client;
use scraper::Html;

use super::extract::{compile_selectors, extract_fields, page_title};
use super::{ScrapeError, Scraper, ScraperSettings};
use crate::models::job::{ScrapeConfig, ScrapeJob};
use crate::models::scrape::ScrapeOutput;

/// Single HTTP GET followed by CSS extraction.
pub struct StaticScraper {
    client: Client,
    user_agent: String,
    timeout: Duration,
}

impl StaticScraper {
    pub fn new(settings: &ScraperSettings) -> Result<Self, ScrapeError> {
        Ok(Self {
            client: Self::builder(settings.request_timeout).build()?,
            user_agent: settings.user_agent.clone(),
            timeout: settings.request_timeout,
        })
    }

    fn builder(timeout: Duration) -> reqwest::ClientBuilder {
        Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout.min(Duration::from_secs(10)))
            .gzip(true)
    }

    /// Proxied jobs need their own client; everything else shares one.
    fn client_for(&self, config: &ScrapeConfig) -> Result<Client, ScrapeError> {
        match config.proxy.as_deref() {
            None => Ok(self.client.clone()),
            Some(proxy) => {
                let proxy = reqwest::Proxy::all(proxy)
                    .map_err(|_| ScrapeError::InvalidProxy(proxy.to_string()))?;
                Ok(Self::builder(self.timeout).proxy(proxy).build()?)
            }
        }
    }

    fn request_headers(&self, config: &ScrapeConfig) -> Result<HeaderMap, ScrapeError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&self.user_agent)
                .map_err(|_| ScrapeError::InvalidHeader(USER_AGENT.to_string()))?,
        );

        for (name, value) in config.headers.iter().flatten() {
            let header_name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|_| ScrapeError::InvalidHeader(name.clone()))?;
            let header_value =
                HeaderValue::from_str(value).map_err(|_| ScrapeError::InvalidHeader(name.clone()))?;
            headers.insert(header_name, header_value);
        }

        if let Some(cookies) = config.cookies.as_ref().filter(|c| !c.is_empty()) {
            headers.insert(
                COOKIE,
                HeaderValue::from_str(&cookie_header(cookies))
                    .map_err(|_| ScrapeError::InvalidHeader(COOKIE.to_string()))?,
            );
        }

        Ok(headers)
    }
}

/// `name=value` pairs joined the way browsers send them, in stable order.
fn cookie_header(cookies: &HashMap<String, String>) -> String {
    let mut pairs: Vec<_> = cookies.iter().collect();
    pairs.sort();
    pairs
        .into_iter()
        .map(|(name, value)| format!("{name}={value}"))
        .collect::<Vec<_>>()
        .join("; ")
}

/// Parse fetched markup into a scrape result. Kept synchronous because
/// `Html` cannot be held across an await.
fn build_output(
    url: &str,
    status_code: u16,
    html: String,
    selectors: Option<&HashMap<String, String>>,
) -> Result<ScrapeOutput, ScrapeError> {
    let compiled = selectors.map(compile_selectors).transpose()?;
    let document = Html::parse_document(&html);
    let title = page_title(&document);
    let extracted_data = compiled.map(|compiled| extract_fields(&document, &compiled));

    Ok(ScrapeOutput {
        url: url.to_string(),
        status_code: Some(status_code),
        title,
        html,
        extracted_data,
    })
}

#[async_trait]
impl Scraper for StaticScraper {
    async fn scrape(&self, job: &ScrapeJob) -> Result<ScrapeOutput, ScrapeError> {
        tracing::info!(job_id = %job.job_id, url = %job.url, "Scraping with static fetch");

        let client = self.client_for(&job.config)?;
        let headers = self.request_headers(&job.config)?;

        let response = client.get(&job.url).headers(headers).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ScrapeError::Status(status.as_u16()));
        }
        let html = response.text().await?;

        build_output(
            &job.url,
            status.as_u16(),
            html,
            job.config.selectors.as_ref(),
        )
    }
}
