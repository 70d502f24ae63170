use anyhow::Result;
use std::process;
use tabled::{
    Table, Tabled,
    settings::{Alignment, Modify, Style, object::Columns},
};

use weighin_core::db::Database;
use weighin_core::models::{NewObservation, Observation, UpdateObservation, sort_newest_first};

use super::helpers::{fmt_opt, json_error, parse_date, resolve_user, weight_to_lbs};

/// Metric values shared by `log` and `edit`.
pub(crate) struct EntryArgs {
    pub weight: f64,
    pub unit: String,
    pub date: Option<String>,
    pub body_fat: Option<f64>,
    pub waist: Option<f64>,
}

fn describe(entry: &Observation) -> String {
    let mut line = format!(
        "{:.1} lbs for {} on {}",
        entry.weight,
        entry.user,
        entry.date.format("%Y-%m-%d")
    );
    if let Some(bf) = entry.body_fat {
        line.push_str(&format!(", body fat {bf:.1}%"));
    }
    if let Some(w) = entry.waist {
        line.push_str(&format!(", waist {w:.1} in"));
    }
    line
}

pub(crate) fn cmd_log(
    db: &Database,
    user: Option<String>,
    args: EntryArgs,
    json: bool,
) -> Result<()> {
    let user = resolve_user(db, user)?;
    let entry = NewObservation {
        user,
        date: parse_date(args.date)?,
        weight: weight_to_lbs(args.weight, &args.unit)?,
        body_fat: args.body_fat,
        waist: args.waist,
    };

    let created = db.add_observation(&entry)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&created)?);
    } else {
        println!("Logged [{}] {}", created.id, describe(&created));
    }

    Ok(())
}

pub(crate) fn cmd_edit(db: &Database, id: i64, args: EntryArgs, json: bool) -> Result<()> {
    let Some(existing) = db.get_observation(id)? else {
        if json {
            println!("{}", json_error(&format!("Entry {id} not found")));
        } else {
            eprintln!("Entry {id} not found");
        }
        process::exit(2);
    };

    let date = match args.date {
        Some(d) => parse_date(Some(d))?,
        None => existing.date,
    };
    let update = UpdateObservation {
        date,
        weight: weight_to_lbs(args.weight, &args.unit)?,
        body_fat: args.body_fat,
        waist: args.waist,
    };

    let updated = db.update_observation(id, &update)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&updated)?);
    } else {
        println!("Updated [{id}] {}", describe(&updated));
    }

    Ok(())
}

pub(crate) fn cmd_delete(db: &Database, id: i64, json: bool) -> Result<()> {
    if db.delete_observation(id)? {
        if json {
            println!("{}", serde_json::json!({ "deleted": id }));
        } else {
            println!("Deleted entry {id}");
        }
        Ok(())
    } else {
        if json {
            println!("{}", json_error(&format!("Entry {id} not found")));
        } else {
            eprintln!("Entry {id} not found");
        }
        process::exit(2);
    }
}

pub(crate) fn cmd_history(db: &Database, user: Option<String>, json: bool) -> Result<()> {
    let user = resolve_user(db, user)?;
    // Newest first, like the web table
    let mut entries = db.list_observations(&user)?;
    sort_newest_first(&mut entries);

    if json {
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }

    if entries.is_empty() {
        eprintln!("No entries for {user}. Use `weighin log` to record one.");
        return Ok(());
    }

    #[derive(Tabled)]
    struct HistoryRow {
        #[tabled(rename = "ID")]
        id: i64,
        #[tabled(rename = "Date")]
        date: String,
        #[tabled(rename = "Weight (lbs)")]
        weight: String,
        #[tabled(rename = "Body Fat")]
        body_fat: String,
        #[tabled(rename = "Waist (in)")]
        waist: String,
    }

    let rows: Vec<HistoryRow> = entries
        .iter()
        .map(|e| HistoryRow {
            id: e.id,
            date: e.date.format("%Y-%m-%d").to_string(),
            weight: format!("{:.1}", e.weight),
            body_fat: fmt_opt(e.body_fat, "%"),
            waist: fmt_opt(e.waist, ""),
        })
        .collect();

    let table = Table::new(&rows)
        .with(Style::rounded())
        .with(Modify::new(Columns::new(2..)).with(Alignment::right()))
        .to_string();
    println!("{user}");
    println!("{table}");

    Ok(())
}
