use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use thirtyfour::error::WebDriverError;
use thirtyfour::prelude::*;
use thirtyfour::Key;
use tracing::debug;

use super::browser::{Browser, Condition, Keystroke, ScrollTarget};
use crate::config::Locator;

const QUERY_POLL: Duration = Duration::from_millis(250);

fn by(locator: &Locator) -> By {
    match locator {
        Locator::Id(v) => By::Id(v.as_str()),
        Locator::Css(v) => By::Css(v.as_str()),
        Locator::Xpath(v) => By::XPath(v.as_str()),
    }
}

/// Chrome session driven through a chromedriver endpoint.
pub struct ThirtyfourBrowser {
    driver: WebDriver,
}

impl ThirtyfourBrowser {
    pub async fn connect(webdriver_url: &str, headless: bool) -> Result<Self> {
        let mut caps = DesiredCapabilities::chrome();
        if headless {
            caps.add_chrome_arg("--headless")?;
        } else {
            caps.add_chrome_arg("--start-maximized")?;
        }
        caps.add_chrome_arg("--no-sandbox")?;
        caps.add_chrome_arg("--disable-dev-shm-usage")?;
        caps.add_chrome_arg("--disable-gpu")?;
        caps.add_chrome_arg("--window-size=1920,1080")?;

        let driver = WebDriver::new(webdriver_url, caps)
            .await
            .context("Failed to connect to WebDriver")?;

        driver
            .set_page_load_timeout(Duration::from_secs(60))
            .await?;
        driver.set_script_timeout(Duration::from_secs(60)).await?;

        debug!("Connected to WebDriver at {}", webdriver_url);
        Ok(Self { driver })
    }

    async fn element(&self, locator: &Locator) -> Result<WebElement> {
        self.driver
            .find(by(locator))
            .await
            .with_context(|| format!("Element not found: {}", locator))
    }
}

#[async_trait]
impl Browser for ThirtyfourBrowser {
    async fn goto(&self, url: &str) -> Result<()> {
        self.driver.goto(url).await?;
        Ok(())
    }

    async fn page_height(&self) -> Result<i64> {
        let ret = self
            .driver
            .execute("return document.body.scrollHeight;", vec![])
            .await
            .context("Failed to read page height")?;
        ret.json()
            .as_f64()
            .map(|h| h as i64)
            .context("Page height is not a number")
    }

    async fn wait_for(
        &self,
        locator: &Locator,
        condition: Condition,
        timeout: Duration,
    ) -> Result<bool> {
        let query = self.driver.query(by(locator)).wait(timeout, QUERY_POLL);
        let query = match condition {
            Condition::Visible => query.and_displayed(),
            Condition::Clickable => query.and_clickable(),
        };

        match query.first().await {
            Ok(_) => Ok(true),
            Err(WebDriverError::NoSuchElement(..)) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn is_present(&self, locator: &Locator) -> Result<bool> {
        match self.driver.find(by(locator)).await {
            Ok(_) => Ok(true),
            Err(WebDriverError::NoSuchElement(..)) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn count(&self, locator: &Locator) -> Result<usize> {
        Ok(self.driver.find_all(by(locator)).await?.len())
    }

    async fn text(&self, locator: &Locator) -> Result<String> {
        Ok(self.element(locator).await?.text().await?)
    }

    async fn click(&self, locator: &Locator) -> Result<()> {
        self.element(locator).await?.click().await?;
        Ok(())
    }

    async fn clear(&self, locator: &Locator) -> Result<()> {
        self.element(locator).await?.clear().await?;
        Ok(())
    }

    async fn send_keys(&self, locator: &Locator, text: &str) -> Result<()> {
        self.element(locator).await?.send_keys(text).await?;
        Ok(())
    }

    async fn press(&self, locator: &Locator, key: Keystroke) -> Result<()> {
        let key = match key {
            Keystroke::ArrowDown => Key::Down,
            Keystroke::Enter => Key::Enter,
        };
        self.element(locator).await?.send_keys(key + "").await?;
        Ok(())
    }

    async fn scroll_into_view(&self, locator: &Locator) -> Result<()> {
        self.element(locator).await?.scroll_into_view().await?;
        Ok(())
    }

    async fn scroll_page(&self, target: ScrollTarget) -> Result<()> {
        let script = match target {
            ScrollTarget::Top => "window.scrollTo(0, 0);",
            ScrollTarget::Bottom => "window.scrollTo(0, document.body.scrollHeight);",
        };
        self.driver.execute(script, vec![]).await?;
        Ok(())
    }

    async fn frame_count(&self) -> Result<usize> {
        Ok(self.driver.find_all(By::Tag("iframe")).await?.len())
    }

    async fn enter_frame(&self, index: usize) -> Result<()> {
        let frame = self
            .driver
            .find_all(By::Tag("iframe"))
            .await?
            .into_iter()
            .nth(index)
            .with_context(|| format!("Frame {} not found", index))?;
        frame.enter_frame().await?;
        Ok(())
    }

    async fn enter_default_frame(&self) -> Result<()> {
        self.driver.enter_default_frame().await?;
        Ok(())
    }

    async fn window_count(&self) -> Result<usize> {
        Ok(self.driver.windows().await?.len())
    }

    async fn switch_to_window(&self, index: usize) -> Result<()> {
        let handle = self
            .driver
            .windows()
            .await?
            .into_iter()
            .nth(index)
            .with_context(|| format!("Window {} not found", index))?;
        self.driver.switch_to_window(handle).await?;
        Ok(())
    }

    async fn quit(self) -> Result<()> {
        self.driver.quit().await?;
        Ok(())
    }
}
