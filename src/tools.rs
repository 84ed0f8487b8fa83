use std::time::Duration;

use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::blocking::Client;
use tracing::warn;

use crate::config::SearchConfig;
use crate::error::{self, AgentdError, Result};

pub const NO_RESULTS: &str = "[no results found]";
const USER_AGENT: &str = "agentd/1.0";

/// Tool collaborator behind `tool://` instructions.
pub trait ToolInvoker: Send + Sync {
    /// Run a named tool. Never fails; problems are reported in the text.
    fn invoke(&self, name: &str) -> String;

    /// Web search, formatted as `- <title> (<url>)` lines.
    fn web_search(&self, query: &str) -> String;
}

/// Default tools: named tools are placeholders, search hits DuckDuckGo's HTML endpoint.
#[derive(Debug, Clone)]
pub struct BuiltinTools {
    search: SearchConfig,
}

impl BuiltinTools {
    pub fn new(search: SearchConfig) -> Self {
        Self { search }
    }

    fn fetch_results_page(&self, query: &str) -> Result<String> {
        let client = Client::builder()
            .timeout(Duration::from_secs(self.search.timeout_secs))
            .user_agent(USER_AGENT)
            .build()?;
        let resp = client
            .get(&self.search.endpoint)
            .query(&[("q", query)])
            .send()?;
        if !resp.status().is_success() {
            return Err(AgentdError::Status {
                service: "web search",
                status: resp.status().as_u16(),
                body: String::new(),
            });
        }
        Ok(resp.text()?)
    }
}

impl Default for BuiltinTools {
    fn default() -> Self {
        Self::new(SearchConfig::default())
    }
}

impl ToolInvoker for BuiltinTools {
    fn invoke(&self, name: &str) -> String {
        format!("[Tool: {name} executed]")
    }

    fn web_search(&self, query: &str) -> String {
        match self.fetch_results_page(query) {
            Ok(html) => format_results(&extract_results(&html, self.search.max_results)),
            Err(err) => {
                warn!(query, error = %err, "web search failed");
                error::as_output(&err)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchHit {
    pub title: String,
    pub url: String,
}

static RESULT_ANCHOR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?s)<a\b([^>]*\bclass="[^"]*\bresult__a\b[^"]*"[^>]*)>(.*?)</a>"#)
        .expect("result anchor regex must compile")
});
static HREF: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"\bhref="([^"]*)""#).expect("href regex must compile"));
static TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]*>").expect("tag regex must compile"));

/// Pull `a.result__a` anchors out of a results page, at most `max`.
pub fn extract_results(html: &str, max: usize) -> Vec<SearchHit> {
    RESULT_ANCHOR
        .captures_iter(html)
        .filter_map(|cap| {
            let attrs = cap.get(1)?.as_str();
            let url = HREF.captures(attrs)?.get(1)?.as_str();
            let title = TAG.replace_all(cap.get(2)?.as_str(), "");
            Some(SearchHit {
                title: decode_entities(title.trim()),
                url: decode_entities(url),
            })
        })
        .take(max)
        .collect()
}

pub fn format_results(hits: &[SearchHit]) -> String {
    if hits.is_empty() {
        return NO_RESULTS.to_string();
    }
    hits.iter()
        .map(|h| format!("- {} ({})", h.title, h.url))
        .collect::<Vec<_>>()
        .join("\n")
}

fn decode_entities(s: &str) -> String {
    s.replace("&quot;", "\"")
        .replace("&#x27;", "'")
        .replace("&#39;", "'")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&")
}
