//! web_search and web_fetch

use serde::Deserialize;

use super::ToolContext;
use crate::args::{QueryArgs, WebFetchArgs};
use crate::error::{Result, ToolError};
use rho_agent::ToolResult;
use rho_agent::compaction::truncate_with_marker;

const MAX_FETCH_CHARS: usize = 20_000;
/// Bytes read from a page before the rest is dropped
const MAX_FETCH_BYTES: usize = MAX_FETCH_CHARS * 4;
const MAX_SEARCH_BYTES: usize = 1024 * 1024;
const FETCH_MARKER: &str = "\n[... page truncated]";
const TEXT_WIDTH: usize = 100;
const DEFAULT_RESULTS: usize = 5;

#[derive(Deserialize)]
struct SearchResponse {
    #[serde(default)]
    results: Vec<SearchHit>,
}

#[derive(Deserialize)]
struct SearchHit {
    #[serde(default)]
    title: String,
    url: String,
    #[serde(default, alias = "snippet")]
    content: String,
}

/// Queries a SearXNG-compatible JSON endpoint
pub async fn web_search(ctx: &ToolContext<'_>, args: QueryArgs) -> Result<ToolResult> {
    let Some(endpoint) = ctx.config.web_search_endpoint.as_deref() else {
        return Err(ToolError::Unavailable("No web search endpoint is configured".into()));
    };
    let url = format!(
        "{}?q={}&format=json",
        endpoint.trim_end_matches('?'),
        urlencoding::encode(&args.query)
    );

    let request = ctx.http.get(&url).timeout(ctx.config.fetch_timeout).send();
    let response = tokio::select! {
        biased;
        _ = ctx.cancel.cancelled() => return Err(ToolError::Cancelled),
        r = request => r?,
    };
    let (bytes, complete) = read_body(ctx, response.error_for_status()?, MAX_SEARCH_BYTES).await?;
    if !complete {
        return Err(ToolError::BadResponse(format!(
            "search response is larger than {MAX_SEARCH_BYTES} bytes"
        )));
    }
    let body: SearchResponse =
        serde_json::from_slice(&bytes).map_err(|e| ToolError::BadResponse(e.to_string()))?;

    let limit = args.limit.unwrap_or(DEFAULT_RESULTS);
    if body.results.is_empty() {
        return Ok(ToolResult::ok(format!("No results for \"{}\"", args.query)));
    }
    let output = body
        .results
        .iter()
        .take(limit)
        .enumerate()
        .map(|(i, hit)| format!("{}. {}\n   {}\n   {}", i + 1, hit.title, hit.url, hit.content.trim()))
        .collect::<Vec<_>>()
        .join("\n");
    Ok(ToolResult::ok(output).with_metadata("count", body.results.len().min(limit)))
}

pub async fn web_fetch(ctx: &ToolContext<'_>, args: WebFetchArgs) -> Result<ToolResult> {
    let url = args.url.trim();
    if !(url.starts_with("http://") || url.starts_with("https://")) {
        return Err(ToolError::InvalidArguments(format!(
            "url must start with http:// or https://, got {url}"
        )));
    }

    let request = ctx.http.get(url).timeout(ctx.config.fetch_timeout).send();
    let response = tokio::select! {
        biased;
        _ = ctx.cancel.cancelled() => return Err(ToolError::Cancelled),
        r = request => r?,
    };
    let status = response.status();
    let is_html = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.contains("html"));
    let (bytes, complete) = read_body(ctx, response.error_for_status()?, MAX_FETCH_BYTES).await?;
    let body = String::from_utf8_lossy(&bytes).into_owned();

    let text = if is_html || looks_like_html(&body) {
        html_to_text(&body)
    } else {
        body
    };
    let mut output = truncate_with_marker(&text, MAX_FETCH_CHARS, FETCH_MARKER);
    if !complete && !output.ends_with(FETCH_MARKER) {
        output.push_str(FETCH_MARKER);
    }
    Ok(ToolResult::ok(output)
        .with_metadata("status", status.as_u16())
        .with_metadata("url", url)
        .with_metadata("complete", complete))
}

/// Read at most `limit` bytes of the body, watching for cancellation between
/// chunks. The flag is false when the body was cut short.
async fn read_body(
    ctx: &ToolContext<'_>,
    mut response: reqwest::Response,
    limit: usize,
) -> Result<(Vec<u8>, bool)> {
    let mut body = Vec::new();
    loop {
        let chunk = tokio::select! {
            biased;
            _ = ctx.cancel.cancelled() => return Err(ToolError::Cancelled),
            c = response.chunk() => c?,
        };
        let Some(chunk) = chunk else {
            return Ok((body, true));
        };
        if body.len() + chunk.len() > limit {
            body.extend_from_slice(&chunk[..limit - body.len()]);
            return Ok((body, false));
        }
        body.extend_from_slice(&chunk);
    }
}

fn looks_like_html(body: &str) -> bool {
    let lower: String = body.trim_start().chars().take(512).collect::<String>().to_ascii_lowercase();
    lower.starts_with("<!doctype html") || lower.starts_with("<html") || lower.contains("<head")
}

pub(crate) fn html_to_text(html: &str) -> String {
    match html2text::from_read(html.as_bytes(), TEXT_WIDTH) {
        Ok(text) if !text.trim().is_empty() => text,
        _ => html.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_html_detection() {
        assert!(looks_like_html("  <!DOCTYPE html><html></html>"));
        assert!(!looks_like_html("{\"json\": true}"));
    }

    #[test]
    fn test_html_to_text_drops_tags() {
        let text = html_to_text("<html><body><h1>Title</h1><p>Hello <b>world</b></p></body></html>");
        assert!(text.contains("Title"));
        assert!(text.contains("Hello"));
        assert!(!text.contains("<p>"));
    }
}
