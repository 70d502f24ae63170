//! CSV import/export in the column layout of the old weight-tracking workbook:
//! `Date,Weight (lbs),User,Body Fat %,Waist Size (in)`.

use std::collections::HashSet;
use std::io::{Read, Write};

use anyhow::{Context, Result, bail};
use chrono::NaiveDate;
use tracing::warn;

use crate::db::Database;
use crate::models::{
    ImportSummary, NewObservation, Observation, validate_body_fat, validate_waist, validate_weight,
};

pub const HEADERS: [&str; 5] = [
    "Date",
    "Weight (lbs)",
    "User",
    "Body Fat %",
    "Waist Size (in)",
];

/// A row that parsed cleanly and is ready to be stored.
#[derive(Debug, Clone, PartialEq)]
pub struct SheetRow {
    pub date: NaiveDate,
    pub weight: f64,
    pub user: String,
    pub body_fat: Option<f64>,
    pub waist: Option<f64>,
}

#[derive(Debug, Clone, Default)]
pub struct ParsedSheet {
    pub rows: Vec<SheetRow>,
    /// Rows dropped for a missing or invalid date, weight, user or metric.
    pub skipped: usize,
}

/// Parse observation rows from any reader.
///
/// `Date`, `Weight (lbs)` and `User` are required columns; the body-fat and
/// waist columns may be absent entirely. Blank lines are ignored, rows whose
/// values don't parse are counted in [`ParsedSheet::skipped`].
pub fn parse_sheet_csv<R: Read>(reader: R) -> Result<ParsedSheet> {
    let mut rdr = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let headers = rdr.headers().context("Failed to read CSV headers")?.clone();
    let col =
        |name: &str| -> Option<usize> { headers.iter().position(|h| h.eq_ignore_ascii_case(name)) };

    let idx_date = col(HEADERS[0]).context("Missing required column: Date")?;
    let idx_weight = col(HEADERS[1]).context("Missing required column: Weight (lbs)")?;
    let idx_user = col(HEADERS[2]).context("Missing required column: User")?;
    let idx_body_fat = col(HEADERS[3]);
    let idx_waist = col(HEADERS[4]);

    let mut parsed = ParsedSheet::default();

    for (line_num, result) in rdr.records().enumerate() {
        let record = result.with_context(|| format!("Failed to parse CSV row {}", line_num + 2))?;
        if record.iter().all(str::is_empty) {
            continue;
        }

        let field = |idx: usize| record.get(idx).unwrap_or("").trim();
        let opt_f64 = |idx: Option<usize>| -> Option<f64> {
            idx.and_then(|i| record.get(i))
                .and_then(|v| v.trim().parse::<f64>().ok())
        };

        let user = field(idx_user);
        let date = normalize_date(field(idx_date));
        let weight = field(idx_weight).parse::<f64>().ok().filter(|w| *w > 0.0);

        let row = match (date, weight) {
            (Ok(date), Some(weight)) if !user.is_empty() => SheetRow {
                date,
                weight,
                user: user.to_string(),
                body_fat: opt_f64(idx_body_fat).filter(|v| *v > 0.0),
                waist: opt_f64(idx_waist).filter(|v| *v > 0.0),
            },
            _ => {
                warn!(row = line_num + 2, "skipping unreadable CSV row");
                parsed.skipped += 1;
                continue;
            }
        };

        // Same rules the database applies, so dry runs and real imports agree
        if let Err(e) = validate_weight(row.weight)
            .and_then(|()| validate_body_fat(row.body_fat))
            .and_then(|()| validate_waist(row.waist))
        {
            warn!(row = line_num + 2, "skipping CSV row: {e}");
            parsed.skipped += 1;
            continue;
        }
        parsed.rows.push(row);
    }

    Ok(parsed)
}

/// Accepts `YYYY-MM-DD`, a spreadsheet datetime such as `2024-01-15 00:00:00`,
/// or `M/D/YYYY`.
fn normalize_date(raw: &str) -> Result<NaiveDate> {
    let head = raw.split([' ', 'T']).next().unwrap_or_default();
    if let Ok(d) = NaiveDate::parse_from_str(head, "%Y-%m-%d") {
        return Ok(d);
    }
    if let Ok(d) = NaiveDate::parse_from_str(head, "%m/%d/%Y") {
        return Ok(d);
    }
    bail!("Cannot parse date: '{raw}'")
}

/// Store parsed rows, creating users that don't exist yet.
///
/// With `dry_run` nothing is written but the summary reflects what would be.
/// A real import is all-or-nothing: any failing row rolls back the whole file.
pub fn import_sheet_rows(db: &Database, sheet: &ParsedSheet, dry_run: bool) -> Result<ImportSummary> {
    if dry_run {
        store_rows(db, sheet, true)
    } else {
        db.in_transaction(|db| store_rows(db, sheet, false))
    }
}

fn store_rows(db: &Database, sheet: &ParsedSheet, dry_run: bool) -> Result<ImportSummary> {
    let mut summary = ImportSummary {
        rows_parsed: sheet.rows.len() + sheet.skipped,
        rows_skipped: sheet.skipped,
        ..ImportSummary::default()
    };

    let mut known: HashSet<String> = db.list_users()?.into_iter().map(|u| u.name).collect();

    for row in &sheet.rows {
        if !known.contains(&row.user) {
            if !dry_run {
                db.add_user(&row.user)?;
            }
            known.insert(row.user.clone());
            summary.users_created += 1;
        }

        if !dry_run {
            db.add_observation(&NewObservation {
                user: row.user.clone(),
                date: row.date,
                weight: row.weight,
                body_fat: row.body_fat,
                waist: row.waist,
            })
            .with_context(|| format!("Failed to import row for {} on {}", row.user, row.date))?;
        }
        summary.observations_added += 1;
    }

    Ok(summary)
}

pub fn write_sheet_csv<W: Write>(writer: W, observations: &[Observation]) -> Result<()> {
    let mut wtr = csv::Writer::from_writer(writer);
    wtr.write_record(HEADERS)?;
    for o in observations {
        wtr.write_record([
            o.date.format("%Y-%m-%d").to_string(),
            o.weight.to_string(),
            o.user.clone(),
            o.body_fat.map(|v| v.to_string()).unwrap_or_default(),
            o.waist.map(|v| v.to_string()).unwrap_or_default(),
        ])?;
    }
    wtr.flush()?;
    Ok(())
}
