mod browser;
mod confirmation;
mod login;
pub mod webdriver;

use std::time::Duration;

use anyhow::{bail, Result};
use thiserror::Error;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

use crate::activity_log::ActivityLog;
use crate::config::{Credentials, Locator, PortalConfig};
use crate::record_store::{excel_line, RecordStore, ERRO};

pub use browser::{Browser, Condition, Keystroke, ScrollTarget};
pub use confirmation::{
    count_confirmed, first_unconfirmed, join_statuses, normalize_status, CONFIRMED_PREFIX,
    NOT_CONFIRMED,
};
pub use webdriver::ThirtyfourBrowser;

#[derive(Debug, Error)]
pub enum PortalError {
    #[error("Não foi possível acessar o elemento {locator} após {attempts} tentativas")]
    ElementUnavailable { locator: Locator, attempts: usize },
    #[error("Não foi possível clicar no elemento {locator} após {attempts} tentativas")]
    ClickFailed { locator: Locator, attempts: usize },
    #[error("Module window did not open within {0:?}")]
    WindowNotOpened(Duration),
    #[error("GUIA_COD vazio na linha {0}")]
    EmptyGuia(usize),
    #[error("Número da carteira não encontrado na planilha para a linha {0}")]
    EmptyCardNumber(usize),
    #[error("Procedure at position {position} still not confirmed after {timeout:?}")]
    StatusNotConfirmed { position: usize, timeout: Duration },
}

/// One logged-in portal session working through the spreadsheet rows.
pub struct PortalSession<B: Browser> {
    browser: B,
    store: RecordStore,
    activity_log: ActivityLog,
    config: PortalConfig,
    credentials: Credentials,
    row_index: usize,
    last_guia: Option<String>,
    statuses: Vec<String>,
    confirmed_in_run: usize,
    searches_reused: usize,
}

impl<B: Browser> PortalSession<B> {
    pub fn new(
        browser: B,
        store: RecordStore,
        activity_log: ActivityLog,
        config: PortalConfig,
        credentials: Credentials,
    ) -> Self {
        Self {
            browser,
            store,
            activity_log,
            config,
            credentials,
            row_index: 0,
            last_guia: None,
            statuses: Vec::new(),
            confirmed_in_run: 0,
            searches_reused: 0,
        }
    }

    pub fn set_row(&mut self, row_index: usize) {
        self.row_index = row_index;
    }

    pub fn store(&self) -> &RecordStore {
        &self.store
    }

    /// Statuses captured from the last confirmation dialog.
    pub fn statuses(&self) -> &[String] {
        &self.statuses
    }

    pub fn last_guia(&self) -> Option<&str> {
        self.last_guia.as_deref()
    }

    /// Procedures this session moved to "Confirmado".
    pub fn confirmed_in_run(&self) -> usize {
        self.confirmed_in_run
    }

    /// Rows whose guia was already on screen, so no search was run.
    pub fn searches_reused(&self) -> usize {
        self.searches_reused
    }

    pub fn save(&self) {
        self.store.save();
    }

    /// Write `message` to ERRO for the current row and persist.
    pub fn record_error(&mut self, message: &str) {
        self.store.update(self.row_index, ERRO, message);
        self.store.save();
    }

    /// Close the browser and hand back the record store.
    pub async fn shutdown(self) -> RecordStore {
        if let Err(e) = self.browser.quit().await {
            warn!("Failed to close browser session cleanly: {}", e);
        } else {
            info!("Browser session closed");
        }
        self.store
    }

    fn current_line(&self) -> usize {
        excel_line(self.row_index)
    }

    /// Poll the page height every `interval` until two readings match or
    /// `timeout` runs out. A hint that rendering settled, nothing more.
    pub async fn wait_for_stability(&self, timeout: Duration, interval: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        let mut old_height = self.browser.page_height().await?;
        loop {
            sleep(interval).await;
            let new_height = self.browser.page_height().await?;
            if new_height == old_height {
                debug!("Page height stable at {}", new_height);
                break;
            }
            if Instant::now() >= deadline {
                debug!("Page height still changing after {:?}", timeout);
                break;
            }
            old_height = new_height;
        }
        Ok(())
    }

    /// Wait for `locator` to become clickable, giving each attempt the
    /// configured find timeout.
    pub async fn retry_find(&self, locator: &Locator, attempts: usize) -> Result<()> {
        let timings = &self.config.timings;
        for attempt in 1..=attempts {
            if self
                .browser
                .wait_for(locator, Condition::Clickable, timings.find_timeout)
                .await?
            {
                info!("Element found: {}", locator);
                return Ok(());
            }
            warn!(
                "Attempt {}/{} to reach {} failed, retrying...",
                attempt, attempts, locator
            );
            sleep(timings.retry_backoff).await;
        }

        Err(PortalError::ElementUnavailable {
            locator: locator.clone(),
            attempts,
        }
        .into())
    }

    async fn find(&self, locator: &Locator) -> Result<()> {
        self.retry_find(locator, self.config.timings.find_attempts)
            .await
    }

    async fn try_click(&self, locator: &Locator) -> Result<()> {
        let timeout = self.config.timings.click_timeout;
        if !self
            .browser
            .wait_for(locator, Condition::Clickable, timeout)
            .await?
        {
            bail!("{} not clickable within {:?}", locator, timeout);
        }
        self.browser.click(locator).await
    }

    /// Click with retries; every failure is logged and retried after the
    /// backoff.
    pub async fn safe_click(&self, locator: &Locator) -> Result<()> {
        let attempts = self.config.timings.click_attempts;
        for attempt in 1..=attempts {
            match self.try_click(locator).await {
                Ok(()) => {
                    info!("Clicked {}", locator);
                    return Ok(());
                }
                Err(e) => warn!(
                    "Click on {} failed (attempt {}/{}): {:#}",
                    locator, attempt, attempts, e
                ),
            }
            sleep(self.config.timings.retry_backoff).await;
        }

        Err(PortalError::ClickFailed {
            locator: locator.clone(),
            attempts,
        }
        .into())
    }

    /// Scroll the element into view, let the layout settle, then click it.
    pub async fn scroll_and_click(&self, locator: &Locator) -> Result<()> {
        self.browser.scroll_into_view(locator).await?;
        sleep(self.config.timings.scroll_settle).await;
        self.browser.click(locator).await
    }
}
