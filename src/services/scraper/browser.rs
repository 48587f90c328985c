//! Headless Chromium strategy.
//!
//! Each scrape launches its own browser process. [`BrowserSession`] owns the
//! process and its CDP event loop: it is closed explicitly on the normal
//! path, and dropping it (error, timeout, revocation) aborts the event loop
//! and kills the process.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::network::{
    CookieParam, Headers, SetExtraHttpHeadersParams,
};
use chromiumoxide::Page;
use futures::StreamExt;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};

use super::{ScrapeError, Scraper, ScraperSettings};
use crate::models::job::{ScrapeConfig, ScrapeJob};
use crate::models::scrape::ScrapeOutput;

/// Browser-automation scraper.
pub struct BrowserScraper {
    user_agent: String,
    navigation_timeout: Duration,
}

/// A launched browser plus the task driving its CDP connection.
struct BrowserSession {
    browser: Browser,
    handler: JoinHandle<()>,
}

impl BrowserSession {
    async fn launch(config: BrowserConfig) -> Result<Self, ScrapeError> {
        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| ScrapeError::Browser(format!("launch failed: {e}")))?;

        let handler = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if event.is_err() {
                    break;
                }
            }
        });

        Ok(Self { browser, handler })
    }

    async fn close(mut self) {
        if let Err(e) = self.browser.close().await {
            tracing::warn!(error = %e, "Browser did not close cleanly, killing it");
            self.browser.kill().await;
        }
        if let Err(e) = self.browser.wait().await {
            tracing::warn!(error = %e, "Failed to reap browser process");
        }
    }
}

impl Drop for BrowserSession {
    fn drop(&mut self) {
        // The browser process itself is killed when `Browser` drops.
        self.handler.abort();
    }
}

impl BrowserScraper {
    pub fn new(settings: &ScraperSettings) -> Self {
        Self {
            user_agent: settings.user_agent.clone(),
            navigation_timeout: settings.request_timeout,
        }
    }

    fn browser_config(&self, config: &ScrapeConfig) -> Result<BrowserConfig, ScrapeError> {
        let user_agent = config
            .headers
            .as_ref()
            .and_then(|h| {
                h.iter()
                    .find(|(name, _)| name.eq_ignore_ascii_case("user-agent"))
                    .map(|(_, value)| value.clone())
            })
            .unwrap_or_else(|| self.user_agent.clone());

        let mut builder = BrowserConfig::builder()
            .no_sandbox()
            .request_timeout(self.navigation_timeout)
            .arg("--disable-dev-shm-usage")
            .arg(format!("--user-agent={user_agent}"));

        if let Some(proxy) = &config.proxy {
            builder = builder.arg(format!("--proxy-server={proxy}"));
        }

        builder.build().map_err(ScrapeError::Browser)
    }

    async fn prepare_page(&self, page: &Page, job: &ScrapeJob) -> Result<(), ScrapeError> {
        if let Some(headers) = job.config.headers.as_ref().filter(|h| !h.is_empty()) {
            let headers = serde_json::to_value(headers)
                .map_err(|e| ScrapeError::InvalidHeader(e.to_string()))?;
            page.execute(SetExtraHttpHeadersParams::new(Headers::new(headers)))
                .await
                .map_err(|e| ScrapeError::Browser(format!("setting headers failed: {e}")))?;
        }

        if let Some(cookies) = job.config.cookies.as_ref().filter(|c| !c.is_empty()) {
            let params = cookies
                .iter()
                .map(|(name, value)| {
                    CookieParam::builder()
                        .name(name.clone())
                        .value(value.clone())
                        .url(job.url.clone())
                        .build()
                        .map_err(ScrapeError::Browser)
                })
                .collect::<Result<Vec<_>, _>>()?;
            page.set_cookies(params)
                .await
                .map_err(|e| ScrapeError::Browser(format!("setting cookies failed: {e}")))?;
        }

        Ok(())
    }

    async fn visit(&self, session: &BrowserSession, job: &ScrapeJob) -> Result<ScrapeOutput, ScrapeError> {
        let page = session
            .browser
            .new_page("about:blank")
            .await
            .map_err(|e| ScrapeError::Browser(format!("opening page failed: {e}")))?;

        self.prepare_page(&page, job).await?;

        let navigation = async {
            page.goto(job.url.as_str()).await?;
            page.wait_for_navigation().await?;
            Ok::<_, chromiumoxide::error::CdpError>(())
        };
        timeout(self.navigation_timeout, navigation)
            .await
            .map_err(|_| ScrapeError::Timeout(self.navigation_timeout))?
            .map_err(|e| ScrapeError::Browser(format!("navigation failed: {e}")))?;

        if job.config.wait_time > 0 {
            sleep(Duration::from_secs(u64::from(job.config.wait_time))).await;
        }

        let title = page
            .get_title()
            .await
            .map_err(|e| ScrapeError::Browser(e.to_string()))?;
        let html = page
            .content()
            .await
            .map_err(|e| ScrapeError::Browser(e.to_string()))?;

        let extracted_data = match &job.config.selectors {
            Some(selectors) => Some(extract_from_page(&page, selectors).await),
            None => None,
        };

        Ok(ScrapeOutput {
            url: job.url.clone(),
            status_code: None,
            title,
            html,
            extracted_data,
        })
    }
}

/// Query each selector in the live page. A failing key degrades to an empty list.
async fn extract_from_page(
    page: &Page,
    selectors: &HashMap<String, String>,
) -> HashMap<String, Vec<String>> {
    let mut extracted = HashMap::with_capacity(selectors.len());
    for (key, css) in selectors {
        let values = match page.find_elements(css.as_str()).await {
            Ok(elements) => {
                let mut texts = Vec::with_capacity(elements.len());
                for element in elements {
                    if let Ok(Some(text)) = element.inner_text().await {
                        let text = text.trim();
                        if !text.is_empty() {
                            texts.push(text.to_string());
                        }
                    }
                }
                texts
            }
            Err(e) => {
                tracing::warn!(key = %key, selector = %css, error = %e, "Selector evaluation failed");
                Vec::new()
            }
        };
        extracted.insert(key.clone(), values);
    }
    extracted
}

#[async_trait]
impl Scraper for BrowserScraper {
    async fn scrape(&self, job: &ScrapeJob) -> Result<ScrapeOutput, ScrapeError> {
        tracing::info!(job_id = %job.job_id, url = %job.url, "Scraping with headless browser");

        let session = BrowserSession::launch(self.browser_config(&job.config)?).await?;
        let outcome = self.visit(&session, job).await;
        session.close().await;
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scraper() -> BrowserScraper {
        BrowserScraper::new(&ScraperSettings {
            user_agent: "scrape-dispatch-test".to_string(),
            request_timeout: Duration::from_secs(5),
        })
    }

    #[test]
    fn test_browser_config_builds_with_proxy() {
        let config = ScrapeConfig {
            proxy: Some("http://proxy.internal:3128".to_string()),
            ..ScrapeConfig::default()
        };
        // Building needs a resolvable Chrome binary; only assert when one exists.
        if let Ok(browser_config) = scraper().browser_config(&config) {
            drop(browser_config);
        }
    }

    #[tokio::test]
    #[ignore] // Requires a local Chrome/Chromium installation
    async fn test_scrapes_data_url() {
        let job = ScrapeJob::new(
            "data:text/html,<title>Inline</title><h1 class='x'>Hello</h1>",
            ScrapeConfig {
                selectors: Some(HashMap::from([
                    ("heading".to_string(), "h1.x".to_string()),
                    ("missing".to_string(), ".nope".to_string()),
                ])),
                ..ScrapeConfig::default()
            },
        );

        let output = scraper().scrape(&job).await.unwrap();
        assert_eq!(output.title.as_deref(), Some("Inline"));
        let extracted = output.extracted_data.unwrap();
        assert_eq!(extracted["heading"], vec!["Hello"]);
        assert!(extracted["missing"].is_empty());
    }
}
