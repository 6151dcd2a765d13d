use std::time::Duration;

use anyhow::Result;
use tokio::time::{sleep, Instant};
use tracing::{debug, error, info};

use super::{Browser, Condition, PortalError, PortalSession};

impl<B: Browser> PortalSession<B> {
    /// Log in, open the module window and the procedure search. Any failure
    /// is written to ERRO for the current row before it is returned.
    pub async fn login(&mut self) -> Result<()> {
        match self.run_login().await {
            Ok(()) => Ok(()),
            Err(e) => {
                let message = format!("{:#}", e);
                error!("Failed to access the IPASGO portal: {}", message);
                self.record_error(&message);
                Err(e.context("Login to the IPASGO portal failed"))
            }
        }
    }

    async fn run_login(&self) -> Result<()> {
        let locators = &self.config.locators;
        let timings = &self.config.timings;

        info!("Opening login page {}", self.config.login_url);
        self.browser.goto(&self.config.login_url).await?;
        self.wait_for_stability(timings.login_stability, timings.stability_interval)
            .await?;

        self.find(&locators.username_input).await?;
        self.browser
            .send_keys(&locators.username_input, &self.credentials.username)
            .await?;

        self.find(&locators.password_input).await?;
        self.browser
            .send_keys(&locators.password_input, &self.credentials.password)
            .await?;

        self.safe_click(&locators.login_button).await?;

        self.dismiss_frame_alert().await;
        self.wait_for_stability(timings.login_stability, timings.stability_interval)
            .await?;

        self.find(&locators.module_link).await?;
        self.scroll_and_click(&locators.module_link).await?;

        self.wait_for_window_count(2, timings.window_timeout).await?;
        self.browser.switch_to_window(1).await?;

        self.find(&locators.main_menu).await?;
        sleep(timings.menu_settle).await;
        info!("Login completed");

        self.open_procedure_search().await
    }

    /// Close the alert some frames show after login. Finding none, or
    /// failing to look, is not an error.
    async fn dismiss_frame_alert(&self) {
        match self.try_dismiss_frame_alert().await {
            Ok(true) => {}
            Ok(false) => debug!("No alert found in any frame"),
            Err(e) => {
                debug!("Frame alert check skipped: {:#}", e);
                let _ = self.browser.enter_default_frame().await;
            }
        }
    }

    async fn try_dismiss_frame_alert(&self) -> Result<bool> {
        let close = &self.config.locators.iframe_alert_close;
        let timings = &self.config.timings;

        let frames = self.browser.frame_count().await?;
        for index in 0..frames {
            self.browser.enter_frame(index).await?;
            if self
                .browser
                .wait_for(close, Condition::Clickable, timings.iframe_alert_timeout)
                .await?
            {
                self.browser.click(close).await?;
                info!("Alert detected and closed inside frame {}", index);
                self.browser.enter_default_frame().await?;
                self.wait_for_stability(timings.iframe_stability, timings.stability_interval)
                    .await?;
                return Ok(true);
            }
            self.browser.enter_default_frame().await?;
        }
        Ok(false)
    }

    async fn wait_for_window_count(&self, expected: usize, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        loop {
            if self.browser.window_count().await? >= expected {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(PortalError::WindowNotOpened(timeout).into());
            }
            sleep(self.config.timings.window_poll).await;
        }
    }

    /// Open the procedure search screen. Called once, as the last login step.
    pub async fn open_procedure_search(&self) -> Result<()> {
        let locators = &self.config.locators;

        info!("Opening procedure search");
        self.find(&locators.procedure_search_icon).await?;
        self.scroll_and_click(&locators.procedure_search_icon)
            .await?;
        sleep(self.config.timings.procedure_search_settle).await;

        self.close_popup_alert().await
    }

    async fn close_popup_alert(&self) -> Result<()> {
        let close = &self.config.locators.popup_alert_close;
        debug!("Checking for popup alert");
        if self
            .browser
            .wait_for(close, Condition::Visible, self.config.timings.popup_alert_timeout)
            .await?
        {
            self.browser.click(close).await?;
            info!("Popup alert closed");
        } else {
            info!("No popup alert found, continuing");
        }
        Ok(())
    }
}
