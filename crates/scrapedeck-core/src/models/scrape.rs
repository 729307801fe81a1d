//! Scrape job submissions.

use reqwest::Url;
use serde::{Deserialize, Serialize};

use crate::api::ApiError;

/// Page fetch strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ScrapeMethod {
    /// Plain HTTP fetch
    Static,
    /// Headless browser render
    #[default]
    Dynamic,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ScrapeType {
    /// Fixed extraction: metadata, headings, links, images
    #[default]
    General,
    /// Operator-supplied CSS selectors
    Custom,
}

/// A named CSS selector. `attr` picks an attribute instead of the text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Selector {
    pub name: String,
    pub selector: String,
    #[serde(default)]
    pub attr: String,
}

impl Selector {
    fn is_usable(&self) -> bool {
        !self.name.trim().is_empty() && !self.selector.trim().is_empty()
    }
}

/// Body of `POST /scrape`.
#[derive(Debug, Clone, Serialize)]
pub struct ScrapeRequest {
    pub url: String,
    pub method: ScrapeMethod,
    #[serde(rename = "scrapeType")]
    pub scrape_type: ScrapeType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selectors: Option<Vec<Selector>>,
}

impl ScrapeRequest {
    pub fn general(url: impl Into<String>, method: ScrapeMethod) -> Self {
        Self {
            url: url.into(),
            method,
            scrape_type: ScrapeType::General,
            selectors: None,
        }
    }

    pub fn custom(url: impl Into<String>, method: ScrapeMethod, selectors: Vec<Selector>) -> Self {
        Self {
            url: url.into(),
            method,
            scrape_type: ScrapeType::Custom,
            selectors: Some(selectors),
        }
    }

    /// Check the request and drop blank selector rows.
    pub fn validated(mut self) -> Result<Self, ApiError> {
        validate_target_url(&self.url)?;
        match self.scrape_type {
            ScrapeType::General => self.selectors = None,
            ScrapeType::Custom => {
                let usable: Vec<Selector> = self
                    .selectors
                    .take()
                    .unwrap_or_default()
                    .into_iter()
                    .filter(Selector::is_usable)
                    .collect();
                if usable.is_empty() {
                    return Err(ApiError::Validation(
                        "At least one selector with a name and CSS selector is required".to_string(),
                    ));
                }
                self.selectors = Some(usable);
            }
        }
        Ok(self)
    }
}

/// Body of `POST /scrape/youtube`.
#[derive(Debug, Clone, Serialize)]
pub struct YoutubeScrapeRequest {
    pub url: String,
    pub limit: u32,
}

impl YoutubeScrapeRequest {
    pub fn validated(self) -> Result<Self, ApiError> {
        validate_target_url(&self.url)?;
        if self.limit == 0 {
            return Err(ApiError::Validation("Comment limit must be at least 1".to_string()));
        }
        Ok(self)
    }
}

/// `info` object of a successful scrape response.
#[derive(Debug, Clone, Deserialize)]
pub struct ScrapeInfo {
    #[serde(rename = "savedToFile")]
    pub saved_to_file: String,
}

fn validate_target_url(url: &str) -> Result<(), ApiError> {
    let parsed = Url::parse(url.trim())
        .map_err(|e| ApiError::Validation(format!("Invalid URL '{}': {}", url, e)))?;
    match parsed.scheme() {
        "http" | "https" => Ok(()),
        other => Err(ApiError::Validation(format!(
            "Unsupported URL scheme '{}', expected http or https",
            other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_general_request_wire_shape() {
        let req = ScrapeRequest::general("https://example.com", ScrapeMethod::Static)
            .validated()
            .unwrap();
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"url": "https://example.com", "method": "static", "scrapeType": "general"})
        );
    }

    #[test]
    fn test_custom_request_drops_blank_selectors() {
        let req = ScrapeRequest::custom(
            "https://example.com",
            ScrapeMethod::Dynamic,
            vec![
                Selector {
                    name: "price".to_string(),
                    selector: ".price".to_string(),
                    attr: String::new(),
                },
                Selector::default(),
                Selector {
                    name: "link".to_string(),
                    selector: " ".to_string(),
                    attr: "href".to_string(),
                },
            ],
        )
        .validated()
        .unwrap();
        let selectors = req.selectors.unwrap();
        assert_eq!(selectors.len(), 1);
        assert_eq!(selectors[0].name, "price");
    }

    #[test]
    fn test_custom_request_without_selectors_fails() {
        let err = ScrapeRequest::custom("https://example.com", ScrapeMethod::Dynamic, vec![Selector::default()])
            .validated()
            .unwrap_err();
        assert!(matches!(err, ApiError::Validation(_)));
    }

    #[test]
    fn test_rejects_non_http_targets() {
        assert!(ScrapeRequest::general("ftp://example.com", ScrapeMethod::Static).validated().is_err());
        assert!(ScrapeRequest::general("example.com", ScrapeMethod::Static).validated().is_err());
    }

    #[test]
    fn test_youtube_limit_must_be_positive() {
        let req = YoutubeScrapeRequest {
            url: "https://www.youtube.com/watch?v=abc".to_string(),
            limit: 0,
        };
        assert!(req.validated().is_err());
    }
}
