use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;

use crate::config::Locator;

/// What an element must satisfy before a wait returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Condition {
    Visible,
    Clickable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Keystroke {
    ArrowDown,
    Enter,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScrollTarget {
    Top,
    Bottom,
}

/// Everything the portal flow needs from a browser session.
///
/// Lookups that simply find nothing are not errors: `wait_for` and
/// `is_present` report them as `false`. Errors are reserved for a broken
/// session or an interaction the page rejected.
#[async_trait]
pub trait Browser: Send + Sync {
    async fn goto(&self, url: &str) -> Result<()>;

    /// Current `document.body.scrollHeight`.
    async fn page_height(&self) -> Result<i64>;

    /// Wait up to `timeout` for `locator` to satisfy `condition`.
    async fn wait_for(&self, locator: &Locator, condition: Condition, timeout: Duration)
        -> Result<bool>;

    async fn is_present(&self, locator: &Locator) -> Result<bool>;

    async fn count(&self, locator: &Locator) -> Result<usize>;

    async fn text(&self, locator: &Locator) -> Result<String>;

    async fn click(&self, locator: &Locator) -> Result<()>;

    async fn clear(&self, locator: &Locator) -> Result<()>;

    async fn send_keys(&self, locator: &Locator, text: &str) -> Result<()>;

    async fn press(&self, locator: &Locator, key: Keystroke) -> Result<()>;

    async fn scroll_into_view(&self, locator: &Locator) -> Result<()>;

    async fn scroll_page(&self, target: ScrollTarget) -> Result<()>;

    async fn frame_count(&self) -> Result<usize>;

    async fn enter_frame(&self, index: usize) -> Result<()>;

    async fn enter_default_frame(&self) -> Result<()>;

    async fn window_count(&self) -> Result<usize>;

    async fn switch_to_window(&self, index: usize) -> Result<()>;

    async fn quit(self) -> Result<()>
    where
        Self: Sized;
}
