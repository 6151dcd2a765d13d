use std::fmt;
use std::path::{Path, PathBuf};

use calamine::{open_workbook_auto, Data, Reader};
use chrono::{NaiveDate, NaiveDateTime, TimeDelta};
use rust_xlsxwriter::{Format, Workbook, XlsxError};
use thiserror::Error;
use tracing::{error, info};

pub const GUIA_COD: &str = "GUIA_COD";
pub const CARTEIRINHA: &str = "CARTEIRINHA";
pub const CONFIRMACOES: &str = "CONFIRMACOES";
pub const ERRO: &str = "ERRO";
pub const QT_CONFIRMADA: &str = "QT_CONFIRMADA";

/// Columns the input spreadsheet must already carry.
pub const REQUIRED_COLUMNS: [&str; 2] = [GUIA_COD, CARTEIRINHA];

/// Columns written by the automation, created empty when missing.
pub const RESULT_COLUMNS: [&str; 3] = [CONFIRMACOES, ERRO, QT_CONFIRMADA];

/// Spreadsheet line shown to the user for a zero-based data row
/// (one header line, 1-based numbering).
pub fn excel_line(row_index: usize) -> usize {
    row_index + 2
}

const DATETIME_FORMAT: &str = "yyyy-mm-dd hh:mm:ss";

/// Excel serial date (days since 1899-12-30, fraction is time of day).
fn serial_to_datetime(serial: f64) -> Option<NaiveDateTime> {
    let epoch = NaiveDate::from_ymd_opt(1899, 12, 30)?.and_hms_opt(0, 0, 0)?;
    let millis = (serial * 86_400_000.0).round() as i64;
    epoch.checked_add_signed(TimeDelta::try_milliseconds(millis)?)
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Failed to open spreadsheet {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: calamine::Error,
    },
    #[error("Sheet '{sheet}' not found in {path}")]
    MissingSheet { path: PathBuf, sheet: String },
    #[error("Sheet '{0}' has no header row")]
    EmptySheet(String),
    #[error("Required column '{0}' not found")]
    MissingColumn(&'static str),
    #[error("Failed to write spreadsheet: {0}")]
    Write(#[from] XlsxError),
}

/// A single cell as held in memory between load and save.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum CellValue {
    #[default]
    Empty,
    Text(String),
    Number(f64),
    /// Excel serial date, written back with a date format.
    DateTime(f64),
    Bool(bool),
}

impl CellValue {
    fn from_data(cell: &Data) -> Self {
        match cell {
            Data::Empty => CellValue::Empty,
            Data::String(s) => CellValue::Text(s.clone()),
            Data::Float(f) => CellValue::Number(*f),
            Data::Int(i) => CellValue::Number(*i as f64),
            Data::Bool(b) => CellValue::Bool(*b),
            Data::DateTime(dt) => CellValue::DateTime(dt.as_f64()),
            Data::Error(_) => CellValue::Empty,
            other => CellValue::Text(other.to_string()),
        }
    }
}

impl fmt::Display for CellValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CellValue::Empty => Ok(()),
            CellValue::Text(s) => write!(f, "{}", s.trim()),
            CellValue::Number(n) if n.is_finite() && n.fract() == 0.0 => {
                write!(f, "{}", *n as i64)
            }
            CellValue::Number(n) => write!(f, "{}", n),
            CellValue::DateTime(serial) => match serial_to_datetime(*serial) {
                Some(dt) => write!(f, "{}", dt.format("%Y-%m-%d %H:%M:%S")),
                None => write!(f, "{}", serial),
            },
            CellValue::Bool(true) => write!(f, "True"),
            CellValue::Bool(false) => write!(f, "False"),
        }
    }
}

impl From<&str> for CellValue {
    fn from(value: &str) -> Self {
        CellValue::Text(value.to_string())
    }
}

impl From<String> for CellValue {
    fn from(value: String) -> Self {
        CellValue::Text(value)
    }
}

impl From<usize> for CellValue {
    fn from(value: usize) -> Self {
        CellValue::Number(value as f64)
    }
}

/// In-memory copy of one worksheet with upper-cased column names.
///
/// Mutations stay in memory until [`RecordStore::save`] rewrites the whole
/// sheet to the file it was loaded from.
#[derive(Debug, Clone)]
pub struct RecordStore {
    path: PathBuf,
    sheet: String,
    columns: Vec<String>,
    rows: Vec<Vec<CellValue>>,
}

impl RecordStore {
    /// Load `sheet` from the workbook at `path` and make sure the result
    /// columns exist.
    pub fn open(path: impl AsRef<Path>, sheet: &str) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let mut workbook = open_workbook_auto(&path).map_err(|source| StoreError::Open {
            path: path.clone(),
            source,
        })?;

        if !workbook.sheet_names().iter().any(|name| name == sheet) {
            return Err(StoreError::MissingSheet {
                path,
                sheet: sheet.to_string(),
            });
        }

        let range = workbook
            .worksheet_range(sheet)
            .map_err(|source| StoreError::Open {
                path: path.clone(),
                source,
            })?;

        let mut lines = range.rows();
        let header = lines
            .next()
            .ok_or_else(|| StoreError::EmptySheet(sheet.to_string()))?;
        let columns: Vec<String> = header
            .iter()
            .map(|cell| cell.to_string().trim().to_uppercase())
            .collect();

        let rows: Vec<Vec<CellValue>> = lines
            .map(|line| {
                let mut row: Vec<CellValue> = line.iter().map(CellValue::from_data).collect();
                row.resize(columns.len(), CellValue::Empty);
                row
            })
            .collect();

        let mut store = Self {
            path,
            sheet: sheet.to_string(),
            columns,
            rows,
        };
        store.migrate()?;

        info!(
            "Loaded {} rows from sheet '{}' of {:?}",
            store.rows.len(),
            store.sheet,
            store.path
        );
        Ok(store)
    }

    /// Fail on missing input columns and append the result columns that are
    /// not there yet.
    fn migrate(&mut self) -> Result<(), StoreError> {
        for required in REQUIRED_COLUMNS {
            if self.column_index(required).is_none() {
                return Err(StoreError::MissingColumn(required));
            }
        }

        for result_column in RESULT_COLUMNS {
            if self.column_index(result_column).is_none() {
                self.columns.push(result_column.to_string());
                for row in &mut self.rows {
                    row.push(CellValue::Empty);
                }
            }
        }
        Ok(())
    }

    fn column_index(&self, column: &str) -> Option<usize> {
        let wanted = column.trim().to_uppercase();
        self.columns.iter().position(|name| *name == wanted)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn sheet(&self) -> &str {
        &self.sheet
    }

    /// Cell text for `column` in `row_index`; empty when the cell, the
    /// column or the row does not exist.
    pub fn get(&self, row_index: usize, column: &str) -> String {
        let Some(col) = self.column_index(column) else {
            error!("Column '{}' not found", column);
            return String::new();
        };
        match self.rows.get(row_index) {
            Some(row) => row[col].to_string(),
            None => {
                error!("Row {} is outside the sheet", excel_line(row_index));
                String::new()
            }
        }
    }

    pub fn update(&mut self, row_index: usize, column: &str, value: impl Into<CellValue>) {
        let Some(col) = self.column_index(column) else {
            error!("Column '{}' not found while updating", column);
            return;
        };
        let Some(row) = self.rows.get_mut(row_index) else {
            error!(
                "Row {} is outside the sheet, column '{}' not updated",
                excel_line(row_index),
                column
            );
            return;
        };

        let value = value.into();
        info!(
            "Updated line {}, column '{}': {}",
            excel_line(row_index),
            column,
            value
        );
        row[col] = value;
    }

    /// Rewrite the sheet in place. Failures are logged and the in-memory
    /// state is kept.
    pub fn save(&self) {
        match self.try_save() {
            Ok(()) => info!("Saved changes to {:?}", self.path),
            Err(e) => error!("Failed to save {:?}: {}", self.path, e),
        }
    }

    pub fn try_save(&self) -> Result<(), StoreError> {
        let mut workbook = Workbook::new();
        let date_format = Format::new().set_num_format(DATETIME_FORMAT);
        let worksheet = workbook.add_worksheet();
        worksheet.set_name(self.sheet.as_str())?;

        for (col, name) in self.columns.iter().enumerate() {
            worksheet.write_string(0, col as u16, name.as_str())?;
        }

        for (idx, row) in self.rows.iter().enumerate() {
            let line = (idx + 1) as u32;
            for (col, cell) in row.iter().enumerate() {
                let col = col as u16;
                match cell {
                    CellValue::Empty => {}
                    CellValue::Text(s) => {
                        worksheet.write_string(line, col, s.as_str())?;
                    }
                    CellValue::Number(n) => {
                        worksheet.write_number(line, col, *n)?;
                    }
                    CellValue::DateTime(serial) => {
                        worksheet.write_number_with_format(line, col, *serial, &date_format)?;
                    }
                    CellValue::Bool(b) => {
                        worksheet.write_boolean(line, col, *b)?;
                    }
                }
            }
        }

        workbook.save(&self.path)?;
        Ok(())
    }
}
