// In-memory stand-in for the portal, shared by the integration tests.
#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use rust_xlsxwriter::Workbook;

use ipasgo_cli::activity_log::ActivityLog;
use ipasgo_cli::config::{Credentials, Locator, Locators, PortalConfig, Timings};
use ipasgo_cli::portal::{Browser, Condition, Keystroke, PortalSession, ScrollTarget};
use ipasgo_cli::record_store::RecordStore;

pub const CONFIRMED_AT: &str = "Confirmado 15/10/2026 10:00";

pub struct MockState {
    locators: Locators,
    guias: HashMap<String, Vec<String>>,
    typed: HashMap<String, String>,
    filtered_guia: Option<String>,
    modal_open: bool,
    pending_position: Option<usize>,
    card_selected: bool,
    in_frame: bool,
    hidden: HashSet<String>,
    broken_scroll_guias: HashSet<String>,
    pub frames: usize,
    pub frame_alert: bool,
    pub windows: usize,
    pub current_window: usize,
    pub notification: bool,
    /// Successive `page_height` readings; the last one repeats.
    pub heights: Vec<i64>,
    pub height_reads: usize,
    pub events: Vec<String>,
    pub quit: bool,
}

impl MockState {
    fn statuses(&self) -> Option<&Vec<String>> {
        self.filtered_guia
            .as_ref()
            .filter(|_| self.modal_open)
            .and_then(|g| self.guias.get(g))
    }

    fn item_count(&self) -> usize {
        self.statuses().map(|s| s.len()).unwrap_or(0)
    }

    fn position_of(&self, locator: &Locator, make: impl Fn(&Locators, usize) -> Locator) -> Option<usize> {
        (1..=self.item_count()).find(|p| make(&self.locators, *p) == *locator)
    }

    fn present(&self, locator: &Locator) -> bool {
        let l = &self.locators;
        if self.hidden.contains(&locator.to_string()) {
            return false;
        }
        if *locator == l.iframe_alert_close {
            return self.in_frame && self.frame_alert;
        }
        if *locator == l.popup_alert_close {
            return false;
        }
        if *locator == l.notification_close {
            return self.notification;
        }
        if *locator == l.confirmation_modal {
            return self.modal_open;
        }
        if *locator == l.card_input || *locator == l.card_confirm_button {
            return self.pending_position.is_some();
        }
        if *locator == l.card_trigger_anywhere() {
            return self.modal_open;
        }
        if let Locator::Xpath(xpath) = locator {
            if xpath.starts_with(&l.procedure_items) && *locator != l.all_procedure_items() {
                return self.position_of(locator, Locators::procedure_status_at).is_some()
                    || self.position_of(locator, Locators::card_trigger_at).is_some();
            }
        }
        true
    }
}

/// Fake portal: every locator is found unless hidden, except the ones whose
/// presence depends on portal state (dialog, card field, alerts).
#[derive(Clone)]
pub struct MockPortal {
    state: Arc<Mutex<MockState>>,
}

impl MockPortal {
    pub fn new(guias: &[(&str, &[&str])]) -> Self {
        let guias = guias
            .iter()
            .map(|(guia, statuses)| {
                (
                    guia.to_string(),
                    statuses.iter().map(|s| s.to_string()).collect(),
                )
            })
            .collect();

        Self {
            state: Arc::new(Mutex::new(MockState {
                locators: Locators::default(),
                guias,
                typed: HashMap::new(),
                filtered_guia: None,
                modal_open: false,
                pending_position: None,
                card_selected: false,
                in_frame: false,
                hidden: HashSet::new(),
                broken_scroll_guias: HashSet::new(),
                frames: 0,
                frame_alert: false,
                windows: 1,
                current_window: 0,
                notification: false,
                heights: Vec::new(),
                height_reads: 0,
                events: Vec::new(),
                quit: false,
            })),
        }
    }

    pub fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap()
    }

    /// Make `locator` impossible to find.
    pub fn hide(&self, locator: &Locator) {
        self.state().hidden.insert(locator.to_string());
    }

    /// Fail the scroll back to the top while `guia` is filtered.
    pub fn break_scroll_for(&self, guia: &str) {
        self.state().broken_scroll_guias.insert(guia.to_string());
    }

    pub fn clicks_on(&self, locator: &Locator) -> usize {
        let wanted = format!("click:{}", locator);
        self.state().events.iter().filter(|e| **e == wanted).count()
    }

    pub fn has_event(&self, event: &str) -> bool {
        self.state().events.iter().any(|e| e == event)
    }
}

#[async_trait]
impl Browser for MockPortal {
    async fn goto(&self, url: &str) -> Result<()> {
        self.state().events.push(format!("goto:{}", url));
        Ok(())
    }

    async fn page_height(&self) -> Result<i64> {
        let mut state = self.state();
        let height = state
            .heights
            .get(state.height_reads)
            .or(state.heights.last())
            .copied()
            .unwrap_or(1080);
        state.height_reads += 1;
        Ok(height)
    }

    async fn wait_for(&self, locator: &Locator, _: Condition, _: Duration) -> Result<bool> {
        Ok(self.state().present(locator))
    }

    async fn is_present(&self, locator: &Locator) -> Result<bool> {
        Ok(self.state().present(locator))
    }

    async fn count(&self, locator: &Locator) -> Result<usize> {
        let state = self.state();
        if *locator == state.locators.all_procedure_items() {
            Ok(state.item_count())
        } else {
            Ok(0)
        }
    }

    async fn text(&self, locator: &Locator) -> Result<String> {
        let state = self.state();
        let position = state
            .position_of(locator, Locators::procedure_status_at)
            .ok_or_else(|| anyhow!("no such element: {}", locator))?;
        let statuses = state.statuses().ok_or_else(|| anyhow!("dialog closed"))?;
        Ok(format!("  {} ", statuses[position - 1]))
    }

    async fn click(&self, locator: &Locator) -> Result<()> {
        let mut guard = self.state();
        let state = &mut *guard;
        state.events.push(format!("click:{}", locator));
        if !state.present(locator) {
            bail!("no such element: {}", locator);
        }

        let l = state.locators.clone();
        if *locator == l.module_link {
            state.windows = 2;
        } else if *locator == l.guia_search_button {
            state.filtered_guia = state.typed.get(&l.guia_input.to_string()).cloned();
            state.modal_open = false;
        } else if *locator == l.confirm_icon {
            let known = state
                .filtered_guia
                .as_ref()
                .map(|g| state.guias.contains_key(g))
                .unwrap_or(false);
            state.modal_open = known;
        } else if *locator == l.card_trigger_anywhere() {
            let first = state
                .statuses()
                .and_then(|s| s.iter().position(|x| x == "Não confirmado"));
            state.pending_position = first.map(|i| i + 1);
        } else if let Some(position) = state.position_of(locator, Locators::card_trigger_at) {
            state.pending_position = Some(position);
        } else if *locator == l.card_confirm_button {
            let card = state.typed.remove(&l.card_input.to_string()).unwrap_or_default();
            let position = state.pending_position.take();
            if let (Some(position), false, true) = (position, card.is_empty(), state.card_selected) {
                let guia = state.filtered_guia.clone().unwrap_or_default();
                if let Some(statuses) = state.guias.get_mut(&guia) {
                    statuses[position - 1] = CONFIRMED_AT.to_string();
                }
                state.notification = true;
            }
            state.card_selected = false;
        } else if *locator == l.notification_close {
            state.notification = false;
        }
        Ok(())
    }

    async fn clear(&self, locator: &Locator) -> Result<()> {
        self.state().typed.remove(&locator.to_string());
        Ok(())
    }

    async fn send_keys(&self, locator: &Locator, text: &str) -> Result<()> {
        let mut state = self.state();
        state.events.push(format!("keys:{}:{}", locator, text));
        state
            .typed
            .entry(locator.to_string())
            .or_default()
            .push_str(text);
        Ok(())
    }

    async fn press(&self, locator: &Locator, key: Keystroke) -> Result<()> {
        let mut state = self.state();
        state.events.push(format!("press:{}:{:?}", locator, key));
        if key == Keystroke::Enter && *locator == state.locators.card_input {
            state.card_selected = true;
        }
        Ok(())
    }

    async fn scroll_into_view(&self, _: &Locator) -> Result<()> {
        Ok(())
    }

    async fn scroll_page(&self, target: ScrollTarget) -> Result<()> {
        let mut state = self.state();
        state.events.push(format!("scroll:{:?}", target));
        let broken = state
            .filtered_guia
            .as_ref()
            .map(|g| state.broken_scroll_guias.contains(g))
            .unwrap_or(false);
        if target == ScrollTarget::Top && broken {
            bail!("javascript error: window is not defined");
        }
        Ok(())
    }

    async fn frame_count(&self) -> Result<usize> {
        Ok(self.state().frames)
    }

    async fn enter_frame(&self, index: usize) -> Result<()> {
        let mut state = self.state();
        if index >= state.frames {
            bail!("no such frame: {}", index);
        }
        state.in_frame = true;
        Ok(())
    }

    async fn enter_default_frame(&self) -> Result<()> {
        self.state().in_frame = false;
        Ok(())
    }

    async fn window_count(&self) -> Result<usize> {
        Ok(self.state().windows)
    }

    async fn switch_to_window(&self, index: usize) -> Result<()> {
        let mut state = self.state();
        if index >= state.windows {
            bail!("no such window: {}", index);
        }
        state.current_window = index;
        state.events.push(format!("switch:{}", index));
        Ok(())
    }

    async fn quit(self) -> Result<()> {
        let mut state = self.state();
        state.quit = true;
        state.events.push("quit".to_string());
        Ok(())
    }
}

/// Write a `Planilha1` sheet with GUIA_COD (numeric when it parses) and
/// CARTEIRINHA columns.
pub fn write_workbook(path: &Path, rows: &[(&str, &str)]) {
    let mut workbook = Workbook::new();
    let worksheet = workbook.add_worksheet();
    worksheet.set_name("Planilha1").unwrap();
    worksheet.write_string(0, 0, "Guia_Cod").unwrap();
    worksheet.write_string(0, 1, "carteirinha").unwrap();

    for (idx, (guia, card)) in rows.iter().enumerate() {
        let line = (idx + 1) as u32;
        match guia.parse::<f64>() {
            Ok(number) => {
                worksheet.write_number(line, 0, number).unwrap();
            }
            Err(_) if guia.is_empty() => {}
            Err(_) => {
                worksheet.write_string(line, 0, *guia).unwrap();
            }
        }
        if !card.is_empty() {
            worksheet.write_string(line, 1, *card).unwrap();
        }
    }
    workbook.save(path).unwrap();
}

pub struct Fixture {
    pub dir: tempfile::TempDir,
    pub workbook: PathBuf,
    pub log: PathBuf,
}

impl Fixture {
    pub fn new(rows: &[(&str, &str)]) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let workbook = dir.path().join("Base_confirmacao.xlsx");
        let log = dir.path().join("salvamento.txt");
        write_workbook(&workbook, rows);
        Self { dir, workbook, log }
    }

    pub fn session(&self, portal: &MockPortal) -> PortalSession<MockPortal> {
        let store = RecordStore::open(&self.workbook, "Planilha1").unwrap();
        let config = PortalConfig {
            timings: Timings::immediate(),
            ..PortalConfig::default()
        };
        let credentials = Credentials {
            username: "prestador".to_string(),
            password: "segredo".to_string(),
        };
        PortalSession::new(
            portal.clone(),
            store,
            ActivityLog::new(self.log.clone()),
            config,
            credentials,
        )
    }

    pub fn reload(&self) -> RecordStore {
        RecordStore::open(&self.workbook, "Planilha1").unwrap()
    }

    pub fn log_contents(&self) -> String {
        std::fs::read_to_string(&self.log).unwrap_or_default()
    }
}
