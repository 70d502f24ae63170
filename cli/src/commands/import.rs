use std::path::Path;

use anyhow::{Context, Result};

use weighin_core::db::Database;
use weighin_core::sheet_csv::{import_sheet_rows, parse_sheet_csv, write_sheet_csv};

pub fn cmd_import(db: &Database, path: &Path, dry_run: bool, json: bool) -> Result<()> {
    let file = std::fs::File::open(path)
        .with_context(|| format!("Failed to open file: {}", path.display()))?;

    let sheet = parse_sheet_csv(file)?;

    if sheet.rows.is_empty() {
        if json {
            println!(
                "{}",
                serde_json::json!({ "error": "No usable rows found in CSV file" })
            );
        } else {
            eprintln!("No usable rows found in CSV file.");
        }
        return Ok(());
    }

    let summary = import_sheet_rows(db, &sheet, dry_run)?;

    if json {
        let mut value = serde_json::to_value(&summary)?;
        value["dry_run"] = serde_json::Value::Bool(dry_run);
        println!("{value}");
    } else {
        if dry_run {
            println!("Dry run — no changes made.\n");
        } else {
            println!("Import complete.\n");
        }
        println!("  Rows parsed:   {}", summary.rows_parsed);
        println!("  Rows skipped:  {}", summary.rows_skipped);
        println!("  Users created: {}", summary.users_created);
        println!("  Entries added: {}", summary.observations_added);
    }

    Ok(())
}

pub fn cmd_export(db: &Database, path: &Path, json: bool) -> Result<()> {
    let observations = db.all_observations()?;
    let file = std::fs::File::create(path)
        .with_context(|| format!("Failed to create file: {}", path.display()))?;
    write_sheet_csv(file, &observations)?;

    if json {
        println!(
            "{}",
            serde_json::json!({ "exported": observations.len(), "path": path.display().to_string() })
        );
    } else {
        println!(
            "Exported {} entries to {}",
            observations.len(),
            path.display()
        );
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn export_then_import_through_files() {
        let dir = tempfile::tempdir().unwrap();
        let csv_path = dir.path().join("weights.csv");

        let source = Database::open_in_memory().unwrap();
        source.add_user("Bob").unwrap();
        source
            .add_observation(&weighin_core::models::NewObservation {
                user: "Bob".to_string(),
                date: chrono::NaiveDate::from_ymd_opt(2024, 5, 1).unwrap(),
                weight: 150.0,
                body_fat: Some(18.0),
                waist: None,
            })
            .unwrap();
        cmd_export(&source, &csv_path, true).unwrap();

        let target = Database::open_in_memory().unwrap();
        cmd_import(&target, &csv_path, false, true).unwrap();

        let imported = target.list_observations("Bob").unwrap();
        assert_eq!(imported.len(), 1);
        assert_eq!(imported[0].body_fat, Some(18.0));
    }

    #[test]
    fn import_missing_file_errors() {
        let db = Database::open_in_memory().unwrap();
        let err = cmd_import(&db, Path::new("/nonexistent/weights.csv"), true, false).unwrap_err();
        assert!(err.to_string().contains("Failed to open file"));
    }
}
