//! The ephemeral "fresh-fetch" side-channel: a throwaway CDP session used by
//! the polling loop to read a stylesheet's *current* text. The primary
//! session's `CSS.getStyleSheetText` is cached by the browser after the
//! first call for a given id, so repeatedly calling it there would just
//! return stale text — a brand-new session always gets the live value.

use std::time::Duration;

use anyhow::Context;
use chromiumoxide::browser::Browser;
use chromiumoxide::cdp::browser_protocol::css::{self, EventStyleSheetAdded, GetStyleSheetTextParams};
use chromiumoxide::cdp::browser_protocol::dom;
use futures::StreamExt;
use log::debug;

const SETTLE: Duration = Duration::from_millis(200);
const PREFIX_LEN: usize = 100;

/// One stylesheet as seen by a fresh, just-attached session.
#[derive(Clone, Debug)]
pub struct FreshStylesheet {
    /// The stylesheet id *within this ephemeral session* — unrelated to any
    /// id the primary session assigned the same stylesheet.
    pub id: String,
    /// Current full text.
    pub text: String,
    /// `text`'s leading 100 trimmed characters, used to match this entry
    /// back to a tracked stylesheet by content rather than by id.
    pub content_key: String,
}

/// `text`'s leading 100 trimmed characters — the content key both the
/// orchestrator's registry matching and the Vite dev-id matching key off of.
#[must_use]
pub fn content_key(text: &str) -> String {
    text.chars().take(PREFIX_LEN).collect::<String>().trim().to_owned()
}

/// Open a fresh transient session against the page whose URL starts with
/// `target_url_prefix`, enable DOM+CSS, wait briefly for the browser to
/// announce its stylesheets, pull each one's current text, and close the
/// session.
///
/// Recoverable by construction: any failure — connection refused included,
/// since the primary session already proved the endpoint reachable by the
/// time polling starts — yields an empty list rather than propagating.
pub async fn get_all_fresh_stylesheets(
    chrome_host: &str,
    chrome_port: u16,
    target_url_prefix: &str,
) -> Vec<FreshStylesheet> {
    match fetch(chrome_host, chrome_port, target_url_prefix).await {
        Ok(sheets) => sheets,
        Err(err) => {
            debug!("fresh stylesheet fetch failed: {err}");
            Vec::new()
        }
    }
}

async fn fetch(
    chrome_host: &str,
    chrome_port: u16,
    target_url_prefix: &str,
) -> anyhow::Result<Vec<FreshStylesheet>> {
    let endpoint = format!("http://{chrome_host}:{chrome_port}");
    let (mut browser, mut handler) = Browser::connect(&endpoint).await.context("connect failed")?;

    let handler_task = tokio::spawn(async move {
        while let Some(event) = handler.next().await {
            if let Err(err) = event {
                debug!("fresh session handler error: {err}");
            }
        }
    });

    let result = fetch_with_browser(&browser, target_url_prefix).await;

    handler_task.abort();
    let _ = browser.close().await;
    result
}

async fn fetch_with_browser(browser: &Browser, target_url_prefix: &str) -> anyhow::Result<Vec<FreshStylesheet>> {
    let pages = browser.pages().await.context("failed to list targets")?;
    let mut target = None;
    for candidate in pages {
        let url = candidate.url().await.ok().flatten().unwrap_or_default();
        if url.starts_with(target_url_prefix) {
            target = Some(candidate);
            break;
        }
    }
    let page = target.context("target tab not found for fresh fetch")?;

    page.execute(dom::EnableParams::default())
        .await
        .context("DOM.enable failed")?;
    page.execute(css::EnableParams::default())
        .await
        .context("CSS.enable failed")?;

    let mut added_stream = page
        .event_listener::<EventStyleSheetAdded>()
        .await
        .context("failed to subscribe to styleSheetAdded")?;

    let mut collected_ids: Vec<String> = Vec::new();
    {
        let collector = async {
            while let Some(event) = added_stream.next().await {
                collected_ids.push(event.header.style_sheet_id.inner().clone());
            }
        };
        tokio::select! {
            () = collector => {}
            () = tokio::time::sleep(SETTLE) => {}
        }
    }

    let mut sheets = Vec::with_capacity(collected_ids.len());
    for id in collected_ids {
        let response = match page.execute(GetStyleSheetTextParams::new(id.clone())).await {
            Ok(response) => response,
            Err(err) => {
                debug!("fresh fetch: failed to read stylesheet {id}: {err}");
                continue;
            }
        };
        sheets.push(FreshStylesheet {
            content_key: content_key(&response.text),
            text: response.text.clone(),
            id,
        });
    }
    Ok(sheets)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_key_limits_to_100_chars() {
        let text = format!("{}  trailing", "a".repeat(150));
        let key = content_key(&text);
        assert_eq!(key.len(), 100);
        assert!(!key.contains("trailing"));
    }

    #[test]
    fn content_key_trims_leading_whitespace_taken_within_the_100_char_window() {
        // The 100-char window is taken before trimming, so the 2 leading
        // spaces here count against the budget: the result is 98 'a's, not
        // 100.
        let text = format!("  {}  trailing", "a".repeat(150));
        let key = content_key(&text);
        assert_eq!(key, "a".repeat(98));
        assert!(!key.starts_with(' '));
    }

    #[test]
    fn content_key_of_short_text_is_itself_trimmed() {
        assert_eq!(content_key("  .a { color: red; }  "), ".a { color: red; }");
    }
}
