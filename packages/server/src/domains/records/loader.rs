//! Columnar parser for the period export CSV.
//!
//! The export is header-addressed; we read the columns the evidence
//! pipeline needs by their header names and keep the full row as JSON
//! for downstream extraction.

use std::collections::HashMap;

use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use sqlx::PgPool;
use uuid::Uuid;

const COL_ISSUE_DATE: &str = "Fecha de emisión";
const COL_DOC_TYPE: &str = "Tipo CP/Doc.";
const COL_SERIES: &str = "Serie del CDP";
const COL_NUMBER: &str = "Nro CP o Doc. Nro Inicial (Rango)";
const COL_SUPPLIER_RUC: &str = "Nro Doc Identidad";
const COL_SUPPLIER_NAME: &str = "Apellidos Nombres/ Razón  Social";
const COL_SUPPLIER_NAME_ALT: &str = "Apellidos Nombres/ Razón Social";
const COL_TOTAL: &str = "Total CP";
const COL_CAR: &str = "CAR SUNAT";

#[derive(Debug, Clone)]
pub struct ParsedRow {
    pub item_id: String,
    pub doc_type: String,
    pub series: Option<String>,
    pub number: Option<String>,
    pub issue_date: Option<NaiveDate>,
    pub supplier_ruc: Option<String>,
    pub supplier_name: Option<String>,
    pub total: Option<f64>,
    pub raw: serde_json::Value,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct LoadSummary {
    pub parsed: usize,
    pub upserted: usize,
    pub skipped: usize,
}

/// Parse the export body into rows the pipeline can upsert.
///
/// Rows without a supplier or series are summary/filler lines at the
/// tail of the export and are skipped, not errors.
pub fn parse_export_csv(body: &[u8]) -> Result<(Vec<ParsedRow>, usize)> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(body);

    let headers: Vec<String> = reader
        .headers()
        .context("export has no header row")?
        .iter()
        .map(|h| h.trim().to_string())
        .collect();
    if headers.is_empty() {
        bail!("export has no header row");
    }

    let mut rows = Vec::new();
    let mut skipped = 0;

    for record in reader.records() {
        let record = record.context("unreadable export row")?;
        let fields: HashMap<&str, &str> = headers
            .iter()
            .map(String::as_str)
            .zip(record.iter())
            .collect();

        let supplier_ruc = non_empty(fields.get(COL_SUPPLIER_RUC).copied());
        let series = non_empty(fields.get(COL_SERIES).copied());
        if supplier_ruc.is_none() || series.is_none() {
            skipped += 1;
            continue;
        }

        let doc_type = non_empty(fields.get(COL_DOC_TYPE).copied()).unwrap_or_default();
        let number = non_empty(fields.get(COL_NUMBER).copied());
        let issue_date = fields
            .get(COL_ISSUE_DATE)
            .copied()
            .and_then(parse_export_date);
        let supplier_name = non_empty(
            fields
                .get(COL_SUPPLIER_NAME)
                .or_else(|| fields.get(COL_SUPPLIER_NAME_ALT))
                .copied(),
        );
        let total = fields
            .get(COL_TOTAL)
            .copied()
            .and_then(|v| v.trim().parse::<f64>().ok());

        // The CAR is unique per row when present; otherwise fall back
        // to the composite business key.
        let item_id = match non_empty(fields.get(COL_CAR).copied()) {
            Some(car) => car,
            None => format!(
                "{}-{}-{}-{}",
                supplier_ruc.as_deref().unwrap_or(""),
                doc_type,
                series.as_deref().unwrap_or(""),
                number.as_deref().unwrap_or(""),
            ),
        };

        let raw: serde_json::Value = fields
            .iter()
            .map(|(k, v)| (k.to_string(), serde_json::Value::String(v.to_string())))
            .collect::<serde_json::Map<_, _>>()
            .into();

        rows.push(ParsedRow {
            item_id,
            doc_type,
            series,
            number,
            issue_date,
            supplier_ruc,
            supplier_name,
            total,
            raw,
        });
    }

    Ok((rows, skipped))
}

/// Upsert parsed rows for one (account, period).
pub async fn upsert_rows(
    account_id: Uuid,
    period: &str,
    rows: &[ParsedRow],
    pool: &PgPool,
) -> Result<LoadSummary> {
    let mut summary = LoadSummary {
        parsed: rows.len(),
        ..Default::default()
    };

    for row in rows {
        sqlx::query(
            r#"
            INSERT INTO purchase_records (
                id, account_id, period, item_id, doc_type, series, number,
                issue_date, supplier_ruc, supplier_name, total, raw
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            ON CONFLICT (account_id, period, item_id) DO UPDATE SET
                doc_type = EXCLUDED.doc_type,
                series = EXCLUDED.series,
                number = EXCLUDED.number,
                issue_date = EXCLUDED.issue_date,
                supplier_ruc = EXCLUDED.supplier_ruc,
                supplier_name = EXCLUDED.supplier_name,
                total = EXCLUDED.total,
                raw = EXCLUDED.raw
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(account_id)
        .bind(period)
        .bind(&row.item_id)
        .bind(&row.doc_type)
        .bind(&row.series)
        .bind(&row.number)
        .bind(row.issue_date)
        .bind(&row.supplier_ruc)
        .bind(&row.supplier_name)
        .bind(row.total)
        .bind(&row.raw)
        .execute(pool)
        .await?;
        summary.upserted += 1;
    }

    Ok(summary)
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty() && !v.eq_ignore_ascii_case("null"))
        .map(str::to_string)
}

/// Export dates come as `1/12/2025`; ISO dates are accepted too.
fn parse_export_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    NaiveDate::parse_from_str(raw, "%d/%m/%Y")
        .or_else(|_| NaiveDate::parse_from_str(raw, "%Y-%m-%d"))
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
CAR SUNAT,Fecha de emisión,Tipo CP/Doc.,Serie del CDP,Nro CP o Doc. Nro Inicial (Rango),Nro Doc Identidad,Apellidos Nombres/ Razón  Social,Total CP
0001-1,1/8/2025,01,F001,123,20555555551,PROVEEDOR UNO SAC,118.00
0001-2,2/8/2025,14,S001,456,20555555552,SERVICIOS DOS EIRL,59.00
,,,,,,,
";

    #[test]
    fn parses_rows_and_skips_filler() {
        let (rows, skipped) = parse_export_csv(SAMPLE.as_bytes()).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(skipped, 1);

        let first = &rows[0];
        assert_eq!(first.item_id, "0001-1");
        assert_eq!(first.doc_type, "01");
        assert_eq!(first.series.as_deref(), Some("F001"));
        assert_eq!(first.supplier_ruc.as_deref(), Some("20555555551"));
        assert_eq!(
            first.issue_date,
            Some(NaiveDate::from_ymd_opt(2025, 8, 1).unwrap())
        );
        assert_eq!(first.total, Some(118.00));
    }

    #[test]
    fn falls_back_to_composite_key_without_car() {
        let body = "\
Fecha de emisión,Tipo CP/Doc.,Serie del CDP,Nro CP o Doc. Nro Inicial (Rango),Nro Doc Identidad,Total CP
1/8/2025,01,F001,123,20555555551,10.00
";
        let (rows, _) = parse_export_csv(body.as_bytes()).unwrap();
        assert_eq!(rows[0].item_id, "20555555551-01-F001-123");
    }

    #[test]
    fn keeps_full_row_as_raw_json() {
        let (rows, _) = parse_export_csv(SAMPLE.as_bytes()).unwrap();
        assert_eq!(
            rows[0].raw.get("Total CP").and_then(|v| v.as_str()),
            Some("118.00")
        );
    }

    #[test]
    fn empty_body_fails() {
        assert!(parse_export_csv(b"").is_err() || parse_export_csv(b"").unwrap().0.is_empty());
    }

    #[test]
    fn date_formats_accepted() {
        assert_eq!(
            parse_export_date("1/12/2025"),
            Some(NaiveDate::from_ymd_opt(2025, 12, 1).unwrap())
        );
        assert_eq!(
            parse_export_date("2025-12-01"),
            Some(NaiveDate::from_ymd_opt(2025, 12, 1).unwrap())
        );
        assert_eq!(parse_export_date(""), None);
    }
}
