use anyhow::Result;
use serde::Serialize;

use crate::record_store::{excel_line, RecordStore, CONFIRMACOES, ERRO, GUIA_COD, QT_CONFIRMADA};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RowSummary {
    pub line: usize,
    pub guia: String,
    pub confirmed: usize,
    pub total: usize,
    pub error: String,
}

#[derive(Debug, Default, PartialEq, Serialize)]
pub struct SummaryTotals {
    pub rows: usize,
    pub rows_captured: usize,
    pub rows_with_error: usize,
    pub procedures: usize,
    pub confirmed: usize,
}

pub fn summarize(store: &RecordStore) -> Vec<RowSummary> {
    (0..store.len())
        .map(|idx| {
            let confirmations = store.get(idx, CONFIRMACOES);
            let total = confirmations
                .split(';')
                .filter(|s| !s.trim().is_empty())
                .count();
            RowSummary {
                line: excel_line(idx),
                guia: store.get(idx, GUIA_COD),
                confirmed: store.get(idx, QT_CONFIRMADA).parse().unwrap_or(0),
                total,
                error: store.get(idx, ERRO),
            }
        })
        .collect()
}

pub fn totals(rows: &[RowSummary]) -> SummaryTotals {
    rows.iter().fold(SummaryTotals::default(), |mut acc, row| {
        acc.rows += 1;
        if row.total > 0 {
            acc.rows_captured += 1;
        }
        if !row.error.is_empty() {
            acc.rows_with_error += 1;
        }
        acc.procedures += row.total;
        acc.confirmed += row.confirmed;
        acc
    })
}

#[derive(Serialize)]
struct SummaryDocument<'a> {
    rows: &'a [RowSummary],
    totals: SummaryTotals,
}

/// Rows and totals as pretty-printed JSON.
pub fn summary_json(rows: &[RowSummary]) -> Result<String> {
    let document = SummaryDocument {
        rows,
        totals: totals(rows),
    };
    Ok(serde_json::to_string_pretty(&document)?)
}

pub fn print_summary(rows: &[RowSummary]) {
    println!(
        "\n{:<6} {:<16} {:<12} {:<60}",
        "Linha", "Guia", "Confirmadas", "Erro"
    );
    println!("{}", "-".repeat(96));

    for row in rows {
        let error: String = row.error.chars().take(60).collect();
        println!(
            "{:<6} {:<16} {:<12} {:<60}",
            row.line,
            row.guia,
            format!("{}/{}", row.confirmed, row.total),
            error
        );
    }

    let totals = totals(rows);
    println!("{}", "-".repeat(96));
    println!(
        "Rows: {} | Captured: {} | With error: {} | Procedures confirmed: {}/{}",
        totals.rows, totals.rows_captured, totals.rows_with_error, totals.confirmed, totals.procedures
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(total: usize, confirmed: usize, error: &str) -> RowSummary {
        RowSummary {
            line: 2,
            guia: "1".to_string(),
            confirmed,
            total,
            error: error.to_string(),
        }
    }

    #[test]
    fn test_totals() {
        let rows = vec![row(3, 2, ""), row(0, 0, "GUIA_COD vazio na linha 3"), row(1, 1, "")];
        assert_eq!(
            totals(&rows),
            SummaryTotals {
                rows: 3,
                rows_captured: 2,
                rows_with_error: 1,
                procedures: 4,
                confirmed: 3,
            }
        );
    }

    #[test]
    fn test_summary_json_carries_rows_and_totals() {
        let rows = vec![row(2, 1, "")];
        let value: serde_json::Value = serde_json::from_str(&summary_json(&rows).unwrap()).unwrap();
        assert_eq!(value["rows"][0]["line"], 2);
        assert_eq!(value["rows"][0]["guia"], "1");
        assert_eq!(value["totals"]["procedures"], 2);
        assert_eq!(value["totals"]["confirmed"], 1);
    }

    #[test]
    fn test_totals_empty() {
        assert_eq!(totals(&[]), SummaryTotals::default());
    }
}
