//! Owns the one long-lived CDP session against the target page: attaches to
//! the first tab whose URL matches the configured prefix, enables the
//! domains the agent needs (DOM before CSS — CSS.enable depends on the DOM
//! tree already being tracked), and forwards `styleSheetAdded`/
//! `styleSheetChanged` notifications into a channel the orchestrator drains
//! in its event loop.

use std::sync::Arc;

use anyhow::Context;
use chromiumoxide::browser::Browser;
use chromiumoxide::cdp::browser_protocol::css::{
    self, CssStyleSheetHeader, EventStyleSheetAdded, EventStyleSheetChanged, GetStyleSheetTextParams,
};
use chromiumoxide::cdp::browser_protocol::dom;
use chromiumoxide::cdp::browser_protocol::page::{self, ReloadParams};
use chromiumoxide::page::Page;
use futures::StreamExt;
use log::debug;
use tokio::sync::mpsc;

use crate::error::FatalError;
use crate::registry::StylesheetHeader;

/// A stylesheet notification forwarded from a background event-listener task
/// into the orchestrator's main select loop.
pub enum SessionEvent {
    /// `CSS.styleSheetAdded` — a new stylesheet entered the page.
    Added(String, StylesheetHeader),
    /// `CSS.styleSheetChanged` — the browser's cached text for a
    /// already-tracked stylesheet changed.
    Changed(String),
}

fn header_from_cdp(header: &CssStyleSheetHeader) -> StylesheetHeader {
    StylesheetHeader {
        source_url: header.source_url.clone(),
        is_inline: header.is_inline,
        source_map_url: header.source_map_url.clone().unwrap_or_default(),
    }
}

/// C2 — the primary session: one attached page plus its event stream.
pub struct SessionManager {
    browser: Browser,
    page: Arc<Page>,
    events: mpsc::UnboundedReceiver<SessionEvent>,
}

impl SessionManager {
    /// Connect to Chrome at `chrome_host:chrome_port`, attach to the first
    /// target whose URL starts with `target_url_prefix`, wire up the
    /// stylesheet event listeners, and enable DOM, CSS, and Page in that
    /// order.
    ///
    /// A TCP connection that's refused outright is a fatal
    /// [`FatalError::TransportUnreachable`] — there's no point retrying
    /// without the user doing something about it. Once connected, a target
    /// list with nothing matching `target_url_prefix` is a fatal
    /// [`FatalError::TargetNotFound`] naming every tab that *was* open, so
    /// the user can see what prefix they should have used instead.
    pub async fn connect(
        chrome_host: &str,
        chrome_port: u16,
        target_url_prefix: &str,
    ) -> anyhow::Result<Self> {
        if tokio::net::TcpStream::connect((chrome_host, chrome_port))
            .await
            .is_err()
        {
            return Err(FatalError::TransportUnreachable {
                host: chrome_host.to_owned(),
                port: chrome_port,
            }
            .into());
        }

        let endpoint = format!("http://{chrome_host}:{chrome_port}");
        let (browser, mut handler) = Browser::connect(&endpoint)
            .await
            .context("failed to establish a CDP session")?;

        tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(err) = event {
                    debug!("browser handler error: {err}");
                }
            }
        });

        let pages = browser
            .pages()
            .await
            .context("failed to list attached targets")?;
        let mut seen_urls = Vec::new();
        let mut matched = None;
        for candidate in pages {
            let url = candidate.url().await.ok().flatten().unwrap_or_default();
            seen_urls.push(url.clone());
            if url.starts_with(target_url_prefix) {
                matched = Some(candidate);
                break;
            }
        }
        let page = Arc::new(matched.ok_or_else(|| FatalError::TargetNotFound {
            prefix: target_url_prefix.to_owned(),
            seen: seen_urls,
        })?);

        let (tx, rx) = mpsc::unbounded_channel();
        spawn_event_forwarders(Arc::clone(&page), tx).await?;

        page.execute(dom::EnableParams::default())
            .await
            .context("DOM.enable failed")?;
        page.execute(css::EnableParams::default())
            .await
            .context("CSS.enable failed")?;
        page.execute(page::EnableParams::default())
            .await
            .context("Page.enable failed")?;

        Ok(Self { browser, page, events: rx })
    }

    /// Await the next stylesheet notification. Returns `None` once the
    /// underlying event streams have both ended (the page navigated away or
    /// the browser disconnected).
    pub async fn next_event(&mut self) -> Option<SessionEvent> {
        self.events.recv().await
    }

    /// `CSS.getStyleSheetText` for `id`. The browser caches this result
    /// after the first call for a given id, which is why the polling loop
    /// goes through the ephemeral fresh-fetch session instead of calling
    /// this repeatedly.
    pub async fn get_stylesheet_text(&self, id: &str) -> anyhow::Result<String> {
        let response = self
            .page
            .execute(GetStyleSheetTextParams::new(id.to_owned()))
            .await
            .with_context(|| format!("CSS.getStyleSheetText failed for {id}"))?;
        Ok(response.text.clone())
    }

    /// `Page.reload`, issued once at startup after the registry is cleared
    /// so every stylesheet re-enters as a fresh `styleSheetAdded` event.
    pub async fn reload_page(&self) -> anyhow::Result<()> {
        self.page
            .execute(ReloadParams::default())
            .await
            .context("Page.reload failed")?;
        Ok(())
    }

    /// Match `candidates` (stylesheet id, content-key pairs) against live
    /// `<style data-vite-dev-id>` elements in the DOM, returning the
    /// `(stylesheet id, dev id)` pairs that matched by content prefix.
    pub async fn match_vite_stylesheets(&self, candidates: &[(String, String)]) -> Vec<(String, String)> {
        let mut matched = Vec::new();
        let elements = match self.page.find_elements("style[data-vite-dev-id]").await {
            Ok(elements) => elements,
            Err(err) => {
                debug!("vite dev-id element query failed: {err}");
                return matched;
            }
        };
        for element in elements {
            let Some(dev_id) = element.attribute("data-vite-dev-id") else {
                continue;
            };
            let Ok(Some(text)) = element.inner_text().await else {
                continue;
            };
            let key = super::fresh::content_key(&text);
            if let Some((id, _)) = candidates.iter().find(|(_, candidate_key)| *candidate_key == key) {
                matched.push((id.clone(), dev_id));
            }
        }
        matched
    }

    /// Release the session. Closing the underlying browser connection is
    /// best-effort — there's nothing useful to do with a failure here during
    /// shutdown.
    pub async fn close(mut self) {
        let _ = self.browser.close().await;
    }
}

async fn spawn_event_forwarders(
    page: Arc<Page>,
    tx: mpsc::UnboundedSender<SessionEvent>,
) -> anyhow::Result<()> {
    let mut added_stream = page
        .event_listener::<EventStyleSheetAdded>()
        .await
        .context("failed to subscribe to CSS.styleSheetAdded")?;
    let added_tx = tx.clone();
    tokio::spawn(async move {
        while let Some(event) = added_stream.next().await {
            let id = event.header.style_sheet_id.inner().clone();
            let header = header_from_cdp(&event.header);
            if added_tx.send(SessionEvent::Added(id, header)).is_err() {
                break;
            }
        }
    });

    let mut changed_stream = page
        .event_listener::<EventStyleSheetChanged>()
        .await
        .context("failed to subscribe to CSS.styleSheetChanged")?;
    tokio::spawn(async move {
        while let Some(event) = changed_stream.next().await {
            let id = event.style_sheet_id.inner().clone();
            if tx.send(SessionEvent::Changed(id)).is_err() {
                break;
            }
        }
    });

    Ok(())
}
