//! Session export
//!
//! Renders a session summary to CSV or pretty-printed JSON, and replays
//! a past session out of scan history so closed sessions stay
//! exportable after restart.

use chrono::Utc;
use serde::Serialize;
use std::fs;
use std::path::Path;
use tracing::info;

use crate::catalog::CatalogEntry;
use crate::error::Result;
use crate::recognition::{RecognitionResult, TextVerification};
use crate::session::{summarize, SessionSummary};
use crate::storage::Store;

const CSV_HEADER: &str =
    "Deck Name,Manufacturer,Casino,Buy Price,Sell Price,Profit,Margin %,Confidence,Timestamp";

/// Export file format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Csv,
    Json,
}

impl ExportFormat {
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_lowercase().as_str() {
            "csv" => Some(ExportFormat::Csv),
            "json" => Some(ExportFormat::Json),
            _ => None,
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ExportDocument<'a> {
    export_date: String,
    session_id: &'a str,
    total_decks: usize,
    total_buy_value: f64,
    total_sell_value: f64,
    total_profit: f64,
    average_margin: &'a str,
    results: &'a [RecognitionResult],
}

/// Render a summary in the requested format.
pub fn render(summary: &SessionSummary, format: ExportFormat) -> Result<String> {
    match format {
        ExportFormat::Csv => Ok(render_csv(summary)),
        ExportFormat::Json => render_json(summary),
    }
}

/// Render a summary and write it to `path`.
pub fn export_to_file(summary: &SessionSummary, format: ExportFormat, path: &Path) -> Result<()> {
    let rendered = render(summary, format)?;
    fs::write(path, rendered)?;
    info!(
        "Exported session {} ({} results) to {:?}",
        summary.session_id, summary.total_decks, path
    );
    Ok(())
}

fn render_csv(summary: &SessionSummary) -> String {
    let mut out = String::from(CSV_HEADER);
    out.push('\n');

    for result in &summary.results {
        let snapshot = &result.pricing_snapshot;
        let margin = if snapshot.buy_price > 0.0 {
            snapshot.profit() / snapshot.buy_price * 100.0
        } else {
            0.0
        };

        out.push_str(&format!(
            "{},{},{},{:.2},{:.2},{:.2},{:.2}%,{:.1}%,{}\n",
            csv_field(&result.name),
            csv_field(&result.manufacturer),
            csv_field(result.casino.as_deref().unwrap_or("")),
            snapshot.buy_price,
            snapshot.sell_price,
            snapshot.profit(),
            margin,
            result.classification_confidence * 100.0,
            result.observed_at.to_rfc3339(),
        ));
    }
    out
}

/// Quote a text field, doubling any embedded quotes.
fn csv_field(value: &str) -> String {
    format!("\"{}\"", value.replace('"', "\"\""))
}

fn render_json(summary: &SessionSummary) -> Result<String> {
    let document = ExportDocument {
        export_date: Utc::now().to_rfc3339(),
        session_id: &summary.session_id,
        total_decks: summary.total_decks,
        total_buy_value: summary.total_buy_value,
        total_sell_value: summary.total_sell_value,
        total_profit: summary.total_profit,
        average_margin: &summary.average_margin,
        results: &summary.results,
    };
    Ok(serde_json::to_string_pretty(&document)?)
}

/// Rebuild a summary for a past session from scan history.
///
/// OCR evidence is not persisted, so replayed results carry the
/// unverified score. Pricing comes from the snapshot taken at scan
/// time, not today's catalog.
pub fn replay_session(store: &Store, session_id: &str) -> Result<SessionSummary> {
    let history = store.get_scan_history(session_id)?;

    let mut results = Vec::with_capacity(history.len());
    for record in history {
        let entry = store
            .get_catalog_entry(&record.catalog_id)?
            .unwrap_or_else(|| CatalogEntry {
                id: record.catalog_id.clone(),
                name: record.catalog_id.clone(),
                manufacturer: String::new(),
                casino: None,
                fingerprint: String::new(),
            });

        results.push(RecognitionResult {
            catalog_id: record.catalog_id,
            name: entry.name,
            manufacturer: entry.manufacturer,
            casino: entry.casino,
            classification_confidence: record.classification_confidence,
            text_verification: TextVerification::unverified(),
            pricing_snapshot: record.pricing_snapshot,
            observed_at: record.observed_at,
        });
    }

    Ok(summarize(session_id, &results))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::PricingSnapshot;
    use crate::storage::ScanRecord;
    use chrono::{TimeZone, Utc};

    fn result(name: &str, casino: Option<&str>, buy: f64, sell: f64) -> RecognitionResult {
        RecognitionResult {
            catalog_id: name.to_string(),
            name: name.to_string(),
            manufacturer: "Bee".to_string(),
            casino: casino.map(|c| c.to_string()),
            classification_confidence: 0.914,
            text_verification: TextVerification::unverified(),
            pricing_snapshot: PricingSnapshot {
                buy_price: buy,
                sell_price: sell,
            },
            observed_at: Utc.with_ymd_and_hms(2025, 3, 14, 9, 26, 53).unwrap(),
        }
    }

    #[test]
    fn test_csv_header_and_row_format() {
        let summary = summarize("s", &[result("Bellagio 88", Some("Bellagio"), 2.0, 12.0)]);
        let csv = render_csv(&summary);
        let mut lines = csv.lines();

        assert_eq!(lines.next().unwrap(), CSV_HEADER);
        let row = lines.next().unwrap();
        assert_eq!(
            row,
            "\"Bellagio 88\",\"Bee\",\"Bellagio\",2.00,12.00,10.00,500.00%,91.4%,2025-03-14T09:26:53+00:00"
        );
        assert!(lines.next().is_none());
    }

    #[test]
    fn test_csv_doubles_embedded_quotes() {
        let summary = summarize("s", &[result("The \"Lucky\" Deck", None, 1.0, 2.0)]);
        let csv = render_csv(&summary);

        assert!(csv.contains("\"The \"\"Lucky\"\" Deck\""));
        // absent casino renders as an empty quoted field
        assert!(csv.contains(",\"\","));
    }

    #[test]
    fn test_csv_monetary_fields_round_trip() {
        let originals = [(2.0, 12.0), (1.005, 3.333), (0.1, 0.2)];
        let results: Vec<RecognitionResult> = originals
            .iter()
            .map(|&(buy, sell)| result("Deck", None, buy, sell))
            .collect();
        let csv = render_csv(&summarize("s", &results));

        for (line, (buy, sell)) in csv.lines().skip(1).zip(originals) {
            let fields: Vec<&str> = line.split(',').collect();
            let parsed_buy: f64 = fields[3].parse().unwrap();
            let parsed_sell: f64 = fields[4].parse().unwrap();
            assert!((parsed_buy - buy).abs() < 0.005);
            assert!((parsed_sell - sell).abs() < 0.005);
        }
    }

    #[test]
    fn test_csv_zero_buy_price_margin() {
        let summary = summarize("s", &[result("Freebie", None, 0.0, 5.0)]);
        let csv = render_csv(&summary);
        assert!(csv.contains(",0.00%,"));
    }

    #[test]
    fn test_json_document_shape() {
        let summary = summarize("s-1", &[result("Bellagio 88", Some("Bellagio"), 2.0, 12.0)]);
        let rendered = render_json(&summary).unwrap();
        let value: serde_json::Value = serde_json::from_str(&rendered).unwrap();

        assert!(value["exportDate"].is_string());
        assert_eq!(value["sessionId"], "s-1");
        assert_eq!(value["totalDecks"], 1);
        assert_eq!(value["totalProfit"], 10.0);
        assert_eq!(value["results"].as_array().unwrap().len(), 1);
        assert_eq!(value["results"][0]["catalogId"], "Bellagio 88");
    }

    #[test]
    fn test_replay_rebuilds_summary_from_history() {
        let store = Store::open_in_memory().unwrap();
        store
            .insert_catalog_entry(&CatalogEntry {
                id: "bellagio-88".to_string(),
                name: "Bellagio 88".to_string(),
                manufacturer: "Bee".to_string(),
                casino: Some("Bellagio".to_string()),
                fingerprint: "fp".to_string(),
            })
            .unwrap();
        store
            .insert_scan_record(&ScanRecord {
                id: "scan-1".to_string(),
                session_id: "s-1".to_string(),
                catalog_id: "bellagio-88".to_string(),
                observed_at: Utc::now(),
                classification_confidence: 0.91,
                pricing_snapshot: PricingSnapshot {
                    buy_price: 2.0,
                    sell_price: 12.0,
                },
            })
            .unwrap();

        let summary = replay_session(&store, "s-1").unwrap();
        assert_eq!(summary.total_decks, 1);
        assert_eq!(summary.total_profit, 10.0);
        assert_eq!(summary.results[0].name, "Bellagio 88");
        // verification evidence is not persisted
        assert!(
            (summary.results[0].text_verification.verification_score - 0.3).abs() < 0.001
        );
    }

    #[test]
    fn test_replay_unknown_session_is_empty() {
        let store = Store::open_in_memory().unwrap();
        let summary = replay_session(&store, "missing").unwrap();
        assert_eq!(summary.total_decks, 0);
        assert_eq!(summary.average_margin, "0%");
    }

    #[test]
    fn test_format_parse() {
        assert_eq!(ExportFormat::parse("CSV"), Some(ExportFormat::Csv));
        assert_eq!(ExportFormat::parse("json"), Some(ExportFormat::Json));
        assert!(ExportFormat::parse("xml").is_none());
    }
}
