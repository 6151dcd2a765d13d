use std::fmt;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const USERNAME_ENV: &str = "IPASGO_USERNAME";
pub const PASSWORD_ENV: &str = "IPASGO_PASSWORD";
pub const WEBDRIVER_URL_ENV: &str = "IPASGO_WEBDRIVER_URL";
pub const DEFAULT_WEBDRIVER_URL: &str = "http://localhost:9515";

const LOGIN_URL: &str = "https://portalos.ipasgo.go.gov.br/Portal_Dominio/PrestadorLogin.aspx";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Credential {0} not found in the environment")]
    MissingCredential(&'static str),
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Invalid config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },
}

/// Portal login, read from `IPASGO_USERNAME` / `IPASGO_PASSWORD`.
#[derive(Clone)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

impl Credentials {
    /// Resolve both credentials through `lookup`; blank values count as missing.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let read = |key: &'static str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .ok_or(ConfigError::MissingCredential(key))
        };

        Ok(Self {
            username: read(USERNAME_ENV)?,
            password: read(PASSWORD_ENV)?,
        })
    }
}

/// How an element is looked up in the page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Locator {
    Id(String),
    Css(String),
    Xpath(String),
}

impl Locator {
    pub fn id(value: &str) -> Self {
        Locator::Id(value.to_string())
    }

    pub fn css(value: &str) -> Self {
        Locator::Css(value.to_string())
    }

    pub fn xpath(value: &str) -> Self {
        Locator::Xpath(value.to_string())
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Locator::Id(v) => write!(f, "id={}", v),
            Locator::Css(v) => write!(f, "css={}", v),
            Locator::Xpath(v) => write!(f, "xpath={}", v),
        }
    }
}

/// Element locators for the portal's current markup.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Locators {
    pub username_input: Locator,
    pub password_input: Locator,
    pub login_button: Locator,
    pub iframe_alert_close: Locator,
    pub module_link: Locator,
    pub main_menu: Locator,
    pub procedure_search_icon: Locator,
    pub popup_alert_close: Locator,
    pub guia_input: Locator,
    pub guia_search_button: Locator,
    pub confirm_icon: Locator,
    pub confirmation_modal: Locator,
    /// XPath matching every procedure row of the confirmation modal.
    pub procedure_items: String,
    /// Status span, relative to one procedure row.
    pub procedure_status: String,
    /// Card confirmation trigger, relative to one procedure row.
    pub card_trigger: String,
    pub card_input: Locator,
    pub card_confirm_button: Locator,
    pub notification_close: Locator,
}

impl Default for Locators {
    fn default() -> Self {
        Self {
            username_input: Locator::id("SilkUIFramework_wt13_block_wtUsername_wtUserNameInput2"),
            password_input: Locator::id("SilkUIFramework_wt13_block_wtPassword_wtPasswordInput"),
            login_button: Locator::id("SilkUIFramework_wt13_block_wtAction_wtLoginButton"),
            iframe_alert_close: Locator::xpath(
                "//a[contains(@id, 'wt15')]/span[contains(@class, 'fa-close')]",
            ),
            module_link: Locator::xpath(
                "//*[@id='IpasgoTheme_wt16_block_wtMainContent_wtSistemas_ctl08_SilkUIFramework_wt36_block_wtActions_wtModulos_SilkUIFramework_wt9_block_wtContent_wtModuloPortalTable_ctl04_wt2']/span",
            ),
            main_menu: Locator::id("menuPrincipal"),
            procedure_search_icon: Locator::css(".localizar-procedimentos-icon"),
            popup_alert_close: Locator::xpath("//*[@id=\"button-1\"]"),
            guia_input: Locator::css("div.input-group > input.form-control.small"),
            guia_search_button: Locator::xpath(
                "//div[contains(@class, 'input-group')]//span[contains(@class, 'fa-search') and contains(@class, 'pointer')]",
            ),
            confirm_icon: Locator::xpath(
                "//*[@id=\"localizarprocedimentos\"]/div[2]/div/div[2]/div/div[2]/div[1]/div/div/div/div[2]/div[2]/div/div[1]/div/div[1]/div[2]/div/i[2]",
            ),
            confirmation_modal: Locator::id("confirmar-procedimentos-modal"),
            procedure_items: "//*[@id=\"confirmar-procedimentos-modal\"]/div/div/div[2]/div[2]/div/div[2]/div/div"
                .to_string(),
            procedure_status: ".//span[starts-with(@data-bind, \"text: IsConfirmado()\")]"
                .to_string(),
            card_trigger: ".//*[@id=\"span-cartao-magnetico\"]/span[1]".to_string(),
            card_input: Locator::xpath("//*[@id=\"numeroDaCarteiraConfirmacao\"]"),
            card_confirm_button: Locator::xpath(
                "//*[@id=\"indentificar-confirmar-procedimentos-modal\"]/div/div/div[3]/div/button[2]",
            ),
            notification_close: Locator::xpath(
                "//i[contains(@class, 'fa-times') and contains(@class, 'close')]",
            ),
        }
    }
}

fn strip_relative(relative: &str) -> &str {
    relative.trim_start_matches('.').trim_start_matches('/')
}

impl Locators {
    pub fn all_procedure_items(&self) -> Locator {
        Locator::Xpath(self.procedure_items.clone())
    }

    /// Procedure row at 1-based `position` in the modal.
    pub fn procedure_item(&self, position: usize) -> String {
        format!("{}[{}]", self.procedure_items, position)
    }

    pub fn procedure_status_at(&self, position: usize) -> Locator {
        Locator::Xpath(format!(
            "{}//{}",
            self.procedure_item(position),
            strip_relative(&self.procedure_status)
        ))
    }

    pub fn card_trigger_at(&self, position: usize) -> Locator {
        Locator::Xpath(format!(
            "{}//{}",
            self.procedure_item(position),
            strip_relative(&self.card_trigger)
        ))
    }

    /// Card trigger looked up anywhere in the page.
    pub fn card_trigger_anywhere(&self) -> Locator {
        Locator::Xpath(format!("//{}", strip_relative(&self.card_trigger)))
    }
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

/// Fixed pauses and bounded waits used to pace the portal. None of these
/// guarantee the page is ready; they only make it likely.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Timings {
    #[serde(with = "millis")]
    pub find_timeout: Duration,
    pub find_attempts: usize,
    #[serde(with = "millis")]
    pub click_timeout: Duration,
    pub click_attempts: usize,
    #[serde(with = "millis")]
    pub retry_backoff: Duration,
    #[serde(with = "millis")]
    pub scroll_settle: Duration,
    #[serde(with = "millis")]
    pub stability_interval: Duration,
    #[serde(with = "millis")]
    pub login_stability: Duration,
    #[serde(with = "millis")]
    pub iframe_alert_timeout: Duration,
    #[serde(with = "millis")]
    pub iframe_stability: Duration,
    #[serde(with = "millis")]
    pub window_timeout: Duration,
    #[serde(with = "millis")]
    pub window_poll: Duration,
    #[serde(with = "millis")]
    pub menu_settle: Duration,
    #[serde(with = "millis")]
    pub procedure_search_settle: Duration,
    #[serde(with = "millis")]
    pub popup_alert_timeout: Duration,
    #[serde(with = "millis")]
    pub guia_search_settle: Duration,
    #[serde(with = "millis")]
    pub dialog_open_settle: Duration,
    #[serde(with = "millis")]
    pub modal_timeout: Duration,
    #[serde(with = "millis")]
    pub card_input_timeout: Duration,
    #[serde(with = "millis")]
    pub card_typing_settle: Duration,
    #[serde(with = "millis")]
    pub confirm_button_timeout: Duration,
    #[serde(with = "millis")]
    pub status_timeout: Duration,
    #[serde(with = "millis")]
    pub status_poll: Duration,
    #[serde(with = "millis")]
    pub notification_settle: Duration,
    #[serde(with = "millis")]
    pub notification_timeout: Duration,
    #[serde(with = "millis")]
    pub scroll_reset_settle: Duration,
}

impl Default for Timings {
    fn default() -> Self {
        Self {
            find_timeout: Duration::from_secs(10),
            find_attempts: 3,
            click_timeout: Duration::from_secs(5),
            click_attempts: 3,
            retry_backoff: Duration::from_secs(1),
            scroll_settle: Duration::from_secs(2),
            stability_interval: Duration::from_secs(1),
            login_stability: Duration::from_secs(10),
            iframe_alert_timeout: Duration::from_secs(5),
            iframe_stability: Duration::from_secs(5),
            window_timeout: Duration::from_secs(20),
            window_poll: Duration::from_millis(500),
            menu_settle: Duration::from_secs(4),
            procedure_search_settle: Duration::from_secs(5),
            popup_alert_timeout: Duration::from_secs(2),
            guia_search_settle: Duration::from_secs(2),
            dialog_open_settle: Duration::from_secs(2),
            modal_timeout: Duration::from_secs(10),
            card_input_timeout: Duration::from_secs(10),
            card_typing_settle: Duration::from_secs(1),
            confirm_button_timeout: Duration::from_secs(10),
            status_timeout: Duration::from_secs(10),
            status_poll: Duration::from_millis(500),
            notification_settle: Duration::from_millis(1500),
            notification_timeout: Duration::from_secs(2),
            scroll_reset_settle: Duration::from_secs(1),
        }
    }
}

impl Timings {
    /// Every pause and wait set to zero; attempt counts are kept.
    pub fn immediate() -> Self {
        let defaults = Self::default();
        Self {
            find_timeout: Duration::ZERO,
            find_attempts: defaults.find_attempts,
            click_timeout: Duration::ZERO,
            click_attempts: defaults.click_attempts,
            retry_backoff: Duration::ZERO,
            scroll_settle: Duration::ZERO,
            stability_interval: Duration::ZERO,
            login_stability: Duration::ZERO,
            iframe_alert_timeout: Duration::ZERO,
            iframe_stability: Duration::ZERO,
            window_timeout: Duration::ZERO,
            window_poll: Duration::ZERO,
            menu_settle: Duration::ZERO,
            procedure_search_settle: Duration::ZERO,
            popup_alert_timeout: Duration::ZERO,
            guia_search_settle: Duration::ZERO,
            dialog_open_settle: Duration::ZERO,
            modal_timeout: Duration::ZERO,
            card_input_timeout: Duration::ZERO,
            card_typing_settle: Duration::ZERO,
            confirm_button_timeout: Duration::ZERO,
            status_timeout: Duration::ZERO,
            status_poll: Duration::ZERO,
            notification_settle: Duration::ZERO,
            notification_timeout: Duration::ZERO,
            scroll_reset_settle: Duration::ZERO,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PortalConfig {
    pub login_url: String,
    pub locators: Locators,
    pub timings: Timings,
}

impl Default for PortalConfig {
    fn default() -> Self {
        Self {
            login_url: LOGIN_URL.to_string(),
            locators: Locators::default(),
            timings: Timings::default(),
        }
    }
}

impl PortalConfig {
    /// Defaults, overridden by whatever the TOML file at `path` names.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let Some(path) = path else {
            return Ok(Self::default());
        };

        let display = path.display().to_string();
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: display.clone(),
            source,
        })?;
        Self::from_toml(&contents).map_err(|source| ConfigError::Parse {
            path: display,
            source,
        })
    }

    pub fn from_toml(contents: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(contents)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_credentials_from_lookup() {
        let env: HashMap<&str, &str> =
            HashMap::from([(USERNAME_ENV, "prestador"), (PASSWORD_ENV, " segredo ")]);
        let creds = Credentials::from_lookup(|k| env.get(k).map(|v| v.to_string())).unwrap();
        assert_eq!(creds.username, "prestador");
        assert_eq!(creds.password, "segredo");
        assert!(!format!("{:?}", creds).contains("segredo"));
    }

    #[test]
    fn test_credentials_missing_or_blank() {
        let err = Credentials::from_lookup(|_| None).unwrap_err();
        assert!(matches!(err, ConfigError::MissingCredential(USERNAME_ENV)));

        let err = Credentials::from_lookup(|k| {
            (k == USERNAME_ENV).then(|| "prestador".to_string())
        })
        .unwrap_err();
        assert!(matches!(err, ConfigError::MissingCredential(PASSWORD_ENV)));

        let err = Credentials::from_lookup(|_| Some("   ".to_string())).unwrap_err();
        assert!(matches!(err, ConfigError::MissingCredential(USERNAME_ENV)));
    }

    #[test]
    fn test_positional_locators() {
        let locators = Locators {
            procedure_items: "//div[@id='m']/div".to_string(),
            procedure_status: ".//span[@class='s']".to_string(),
            card_trigger: ".//*[@id='c']/span[1]".to_string(),
            ..Locators::default()
        };

        assert_eq!(
            locators.procedure_status_at(2),
            Locator::xpath("//div[@id='m']/div[2]//span[@class='s']")
        );
        assert_eq!(
            locators.card_trigger_at(1),
            Locator::xpath("//div[@id='m']/div[1]//*[@id='c']/span[1]")
        );
        assert_eq!(
            locators.card_trigger_anywhere(),
            Locator::xpath("//*[@id='c']/span[1]")
        );
    }

    #[test]
    fn test_partial_toml_overrides_defaults() {
        let config = PortalConfig::from_toml(
            r##"
            login_url = "https://example.test/login"

            [locators]
            main_menu = { css = "#menu" }

            [timings]
            modal_timeout = 2500
            "##,
        )
        .unwrap();

        assert_eq!(config.login_url, "https://example.test/login");
        assert_eq!(config.locators.main_menu, Locator::css("#menu"));
        assert_eq!(config.locators.login_button, Locators::default().login_button);
        assert_eq!(config.timings.modal_timeout, Duration::from_millis(2500));
        assert_eq!(config.timings.window_timeout, Duration::from_secs(20));
    }

    #[test]
    fn test_load_without_path_uses_defaults() {
        let config = PortalConfig::load(None).unwrap();
        assert!(config.login_url.contains("ipasgo"));
    }
}
