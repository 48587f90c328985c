use garde::Validate;
use url::Url;

use crate::models::job::ScrapeConfig;
use crate::services::scraper::extract::compile_selectors;
use crate::services::scraper::ScrapeError;

/// Upper bound on a submitted URL, matching the request schema.
const MAX_URL_LENGTH: usize = 2000;

/// Reasons a submission is refused before any job is created.
#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error("{0}")]
    Constraint(String),

    #[error("Invalid URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("Unsupported URL scheme '{0}', expected http or https")]
    UnsupportedScheme(String),

    #[error("Invalid selector for '{key}': {message}")]
    InvalidSelector { key: String, message: String },

    #[error("Invalid proxy URL '{0}'")]
    InvalidProxy(String),
}

impl From<garde::Report> for ValidationError {
    fn from(report: garde::Report) -> Self {
        ValidationError::Constraint(report.to_string())
    }
}

/// Check a target URL: well-formed, absolute, http or https.
pub fn validate_url(raw: &str) -> Result<Url, ValidationError> {
    if raw.is_empty() || raw.len() > MAX_URL_LENGTH {
        return Err(ValidationError::InvalidUrl {
            url: raw.to_string(),
            reason: format!("length must be between 1 and {MAX_URL_LENGTH}"),
        });
    }

    let url = Url::parse(raw).map_err(|e| ValidationError::InvalidUrl {
        url: raw.to_string(),
        reason: e.to_string(),
    })?;

    match url.scheme() {
        "http" | "https" => {}
        other => return Err(ValidationError::UnsupportedScheme(other.to_string())),
    }
    if url.host_str().is_none() {
        return Err(ValidationError::InvalidUrl {
            url: raw.to_string(),
            reason: "missing host".to_string(),
        });
    }

    Ok(url)
}

/// Check the shared configuration: numeric ranges, selectors and proxy.
pub fn validate_config(config: &ScrapeConfig) -> Result<(), ValidationError> {
    config.validate()?;

    if let Some(selectors) = &config.selectors {
        compile_selectors(selectors).map_err(|e| match e {
            ScrapeError::InvalidSelector { key, message } => {
                ValidationError::InvalidSelector { key, message }
            }
            other => ValidationError::Constraint(other.to_string()),
        })?;
    }

    if let Some(proxy) = &config.proxy {
        let parsed = Url::parse(proxy).map_err(|_| ValidationError::InvalidProxy(proxy.clone()))?;
        if parsed.host_str().is_none() {
            return Err(ValidationError::InvalidProxy(proxy.clone()));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_accepts_http_and_https() {
        assert!(validate_url("http://example.com/jobs").is_ok());
        assert!(validate_url("https://careers.example.org/list?page=2").is_ok());
    }

    #[test]
    fn test_rejects_malformed_urls() {
        assert!(matches!(
            validate_url("not a url"),
            Err(ValidationError::InvalidUrl { .. })
        ));
        assert!(matches!(validate_url(""), Err(ValidationError::InvalidUrl { .. })));
        let long = format!("http://example.com/{}", "a".repeat(MAX_URL_LENGTH));
        assert!(validate_url(&long).is_err());
    }

    #[test]
    fn test_rejects_other_schemes() {
        assert!(matches!(
            validate_url("ftp://files.example.com/a.html"),
            Err(ValidationError::UnsupportedScheme(s)) if s == "ftp"
        ));
        assert!(validate_url("file:///etc/passwd").is_err());
    }

    #[test]
    fn test_config_selector_must_parse() {
        let config = ScrapeConfig {
            selectors: Some(HashMap::from([("title".to_string(), "h1[".to_string())])),
            ..ScrapeConfig::default()
        };
        match validate_config(&config) {
            Err(ValidationError::InvalidSelector { key, .. }) => assert_eq!(key, "title"),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_config_proxy_must_parse() {
        let config = ScrapeConfig {
            proxy: Some("::nope::".to_string()),
            ..ScrapeConfig::default()
        };
        assert!(matches!(
            validate_config(&config),
            Err(ValidationError::InvalidProxy(_))
        ));

        let config = ScrapeConfig {
            proxy: Some("http://proxy.internal:3128".to_string()),
            ..ScrapeConfig::default()
        };
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_config_ranges_surface_as_constraint() {
        let config = ScrapeConfig {
            wait_time: 500,
            ..ScrapeConfig::default()
        };
        assert!(matches!(
            validate_config(&config),
            Err(ValidationError::Constraint(_))
        ));
    }
}
