use anyhow::{bail, Result};
use tokio::time::{sleep, Instant};
use tracing::{error, info};
use unicode_normalization::UnicodeNormalization;

use super::{Browser, Condition, Keystroke, PortalError, PortalSession, ScrollTarget};
use crate::record_store::{CARTEIRINHA, CONFIRMACOES, GUIA_COD, QT_CONFIRMADA};

pub const NOT_CONFIRMED: &str = "N\u{e3}o confirmado";
pub const CONFIRMED_PREFIX: &str = "Confirmado";

/// Trimmed, NFC-composed status text as shown by the portal.
pub fn normalize_status(raw: &str) -> String {
    raw.trim().nfc().collect()
}

pub fn join_statuses(statuses: &[String]) -> String {
    statuses.join("; ")
}

pub fn count_confirmed(statuses: &[String]) -> usize {
    statuses
        .iter()
        .filter(|s| s.starts_with(CONFIRMED_PREFIX))
        .count()
}

/// Index of the first status that reads exactly "Não confirmado".
pub fn first_unconfirmed(statuses: &[String]) -> Option<usize> {
    statuses.iter().position(|s| s == NOT_CONFIRMED)
}

impl<B: Browser> PortalSession<B> {
    /// Work the current row: filter its guia, capture the dialog, confirm
    /// the first pending procedure and clean up for the next row.
    ///
    /// Only an empty GUIA_COD fails the row. Every step after it logs its
    /// own failure and the row carries on.
    pub async fn process_row(&mut self) -> Result<()> {
        let guia = self.store.get(self.row_index, GUIA_COD);
        if guia.is_empty() {
            return Err(PortalError::EmptyGuia(self.current_line()).into());
        }

        if self.last_guia.as_deref() == Some(guia.as_str()) {
            info!("Guia {} already located, skipping search", guia);
            self.searches_reused += 1;
        } else if let Err(e) = self.search_guia(&guia).await {
            error!("Failed to fill guia number {}: {:#}", guia, e);
        }

        self.statuses.clear();
        match self.open_confirmation_dialog().await {
            Ok(()) => self.capture_statuses().await,
            Err(e) => error!("Failed to open the procedure confirmation dialog: {:#}", e),
        }

        self.confirm_first_pending().await;
        self.dismiss_notification().await;

        self.last_guia = Some(guia);
        self.reset_scroll().await;
        Ok(())
    }

    pub async fn search_guia(&self, guia: &str) -> Result<()> {
        let locators = &self.config.locators;
        let settle = self.config.timings.guia_search_settle;

        info!("Locating guia number field");
        self.find(&locators.guia_input).await?;
        self.browser.clear(&locators.guia_input).await?;
        self.browser.send_keys(&locators.guia_input, guia).await?;
        info!("Guia number filled: {}", guia);

        self.find(&locators.guia_search_button).await?;
        self.browser.click(&locators.guia_search_button).await?;
        sleep(settle).await;

        self.browser.scroll_page(ScrollTarget::Bottom).await?;
        sleep(settle).await;
        Ok(())
    }

    pub async fn open_confirmation_dialog(&self) -> Result<()> {
        let icon = &self.config.locators.confirm_icon;

        info!("Opening procedure confirmation dialog");
        self.find(icon).await?;
        self.browser.click(icon).await?;
        info!("Confirmation icon clicked");
        sleep(self.config.timings.dialog_open_settle).await;
        Ok(())
    }

    /// Read every procedure status in the dialog into the status list,
    /// record them on the row and append them to the activity log.
    /// Failures are logged; whatever was read so far is kept.
    pub async fn capture_statuses(&mut self) {
        if let Err(e) = self.try_capture_statuses().await {
            error!("Failed to capture confirmations: {:#}", e);
        }
    }

    async fn try_capture_statuses(&mut self) -> Result<()> {
        let locators = &self.config.locators;
        let timeout = self.config.timings.modal_timeout;

        info!("Capturing procedure confirmations");
        self.statuses.clear();

        if !self
            .browser
            .wait_for(&locators.confirmation_modal, Condition::Visible, timeout)
            .await?
        {
            bail!("Confirmation modal not visible after {:?}", timeout);
        }

        let total = self.browser.count(&locators.all_procedure_items()).await?;
        for position in 1..=total {
            let raw = self
                .browser
                .text(&locators.procedure_status_at(position))
                .await?;
            let status = normalize_status(&raw);
            info!("Confirmation captured at position {}: {}", position, status);
            self.statuses.push(status);
        }

        let joined = join_statuses(&self.statuses);
        let confirmed = count_confirmed(&self.statuses);
        self.store.update(self.row_index, CONFIRMACOES, joined.as_str());
        self.store.update(self.row_index, QT_CONFIRMADA, confirmed);
        info!("Procedures confirmed: {}", confirmed);
        self.store.save();

        self.activity_log.append(self.current_line(), &joined)?;
        info!("Confirmations appended to {:?}", self.activity_log.path());
        Ok(())
    }

    /// Confirm only the first "Não confirmado" procedure, then rewrite the
    /// row's status columns whatever the outcome.
    pub async fn confirm_first_pending(&mut self) {
        if self.statuses.is_empty() {
            return;
        }

        info!("Processing first unconfirmed procedure");
        match first_unconfirmed(&self.statuses) {
            Some(idx) => {
                let position = idx + 1;
                info!(
                    "Procedure at position {} is not confirmed, confirming now",
                    position
                );
                match self.confirm_procedure(position).await {
                    Ok(updated) => {
                        info!("New status at position {}: {}", position, updated);
                        self.statuses[idx] = updated;
                        self.confirmed_in_run += 1;
                    }
                    Err(e) => {
                        error!("Failed to confirm procedure at position {}: {:#}", position, e)
                    }
                }
            }
            None => info!("No unconfirmed procedure for this row"),
        }

        let joined = join_statuses(&self.statuses);
        let confirmed = count_confirmed(&self.statuses);
        self.store.update(self.row_index, CONFIRMACOES, joined);
        self.store.update(self.row_index, QT_CONFIRMADA, confirmed);
        self.store.save();
    }

    async fn confirm_procedure(&mut self, position: usize) -> Result<String> {
        let scoped = self.config.locators.card_trigger_at(position);
        let trigger = if self.browser.is_present(&scoped).await? {
            scoped
        } else {
            info!("Confirmation trigger not inside item {}, using page-wide lookup", position);
            self.config.locators.card_trigger_anywhere()
        };
        self.browser.click(&trigger).await?;
        info!("Confirmation trigger clicked at position {}", position);

        if let Err(e) = self.enter_card_number().await {
            let message = format!("Erro no campo 'numeroDaCarteiraConfirmacao': {:#}", e);
            error!("{}", message);
            self.record_error(&message);
            return Err(e);
        }

        self.wait_for_confirmed_status(position).await
    }

    async fn enter_card_number(&self) -> Result<()> {
        let locators = &self.config.locators;
        let timings = &self.config.timings;

        if !self
            .browser
            .wait_for(&locators.card_input, Condition::Visible, timings.card_input_timeout)
            .await?
        {
            bail!(
                "Card number field not visible after {:?}",
                timings.card_input_timeout
            );
        }

        let card = self.store.get(self.row_index, CARTEIRINHA);
        if card.is_empty() {
            return Err(PortalError::EmptyCardNumber(self.current_line()).into());
        }

        self.browser.send_keys(&locators.card_input, &card).await?;
        info!("Card number field filled with {}", card);
        sleep(timings.card_typing_settle).await;

        self.browser
            .press(&locators.card_input, Keystroke::ArrowDown)
            .await?;
        self.browser
            .press(&locators.card_input, Keystroke::Enter)
            .await?;

        if !self
            .browser
            .wait_for(
                &locators.card_confirm_button,
                Condition::Clickable,
                timings.confirm_button_timeout,
            )
            .await?
        {
            bail!("Confirm button not clickable after card number entry");
        }
        self.browser.click(&locators.card_confirm_button).await?;
        info!("Confirm button clicked after card number entry");
        Ok(())
    }

    async fn wait_for_confirmed_status(&self, position: usize) -> Result<String> {
        let locator = self.config.locators.procedure_status_at(position);
        let timeout = self.config.timings.status_timeout;
        let deadline = Instant::now() + timeout;

        loop {
            let status = normalize_status(&self.browser.text(&locator).await?);
            if status.starts_with(CONFIRMED_PREFIX) {
                return Ok(status);
            }
            if Instant::now() >= deadline {
                return Err(PortalError::StatusNotConfirmed { position, timeout }.into());
            }
            sleep(self.config.timings.status_poll).await;
        }
    }

    /// Close the notification shown after a confirmation, if there is one.
    pub async fn dismiss_notification(&self) {
        if let Err(e) = self.try_dismiss_notification().await {
            error!("Failed to close notification alert: {:#}", e);
        }
    }

    async fn try_dismiss_notification(&self) -> Result<()> {
        let close = &self.config.locators.notification_close;
        let timings = &self.config.timings;

        info!("Checking for notification alert");
        sleep(timings.notification_settle).await;

        if self.browser.is_present(close).await? {
            self.browser.click(close).await?;
            info!("Notification alert closed on first try");
            return Ok(());
        }

        if self
            .browser
            .wait_for(close, Condition::Clickable, timings.notification_timeout)
            .await?
        {
            self.browser.click(close).await?;
            info!("Notification alert closed after waiting");
        } else {
            info!("No notification alert found");
        }
        Ok(())
    }

    pub async fn reset_scroll(&self) {
        info!("Scrolling back to the top for the next row");
        match self.browser.scroll_page(ScrollTarget::Top).await {
            Ok(()) => sleep(self.config.timings.scroll_reset_settle).await,
            Err(e) => error!("Failed to scroll back to the top: {:#}", e),
        }
    }
}
