use anyhow::{Context, Result, bail};
use chrono::{Local, NaiveDate};
use serde::Serialize;

use weighin_core::db::Database;

pub(crate) const LBS_PER_KG: f64 = 2.204_62;

/// Avoid displaying "-0.0" after rounding.
pub(crate) fn no_neg_zero(v: f64) -> f64 {
    if v == 0.0 { 0.0 } else { v }
}

pub(crate) fn parse_date(date_str: Option<String>) -> Result<NaiveDate> {
    match date_str {
        None => Ok(Local::now().date_naive()),
        Some(s) => match s.as_str() {
            "today" => Ok(Local::now().date_naive()),
            "yesterday" => Ok(Local::now().date_naive() - chrono::Duration::days(1)),
            "tomorrow" => Ok(Local::now().date_naive() + chrono::Duration::days(1)),
            _ => NaiveDate::parse_from_str(&s, "%Y-%m-%d").with_context(|| {
                format!("Invalid date '{s}'. Use YYYY-MM-DD or today/yesterday/tomorrow")
            }),
        },
    }
}

/// Convert a weight given on the command line into pounds.
pub(crate) fn weight_to_lbs(value: f64, unit: &str) -> Result<f64> {
    match unit.to_lowercase().as_str() {
        "lbs" | "lb" => Ok(value),
        "kg" => {
            let lbs = no_neg_zero(value * LBS_PER_KG);
            eprintln!("Converting {value:.1} kg → {lbs:.1} lbs");
            Ok(lbs)
        }
        _ => bail!("Invalid unit '{unit}'. Use 'lbs' or 'kg'"),
    }
}

/// The named user, or the first profile when none is given.
pub(crate) fn resolve_user(db: &Database, user: Option<String>) -> Result<String> {
    if let Some(name) = user {
        if db.get_user(&name)?.is_none() {
            bail!("User '{name}' not found. Use `weighin user add` to create it");
        }
        return Ok(name);
    }
    db.list_users()?
        .into_iter()
        .next()
        .map(|u| u.name)
        .context("No users found")
}

pub(crate) fn json_error(message: &str) -> String {
    #[derive(Serialize)]
    struct CliError<'a> {
        error: &'a str,
    }
    serde_json::to_string(&CliError { error: message })
        .unwrap_or_else(|_| format!("{{\"error\":\"{message}\"}}"))
}

pub(crate) fn fmt_opt(v: Option<f64>, suffix: &str) -> String {
    v.map_or_else(|| "-".to_string(), |v| format!("{v:.1}{suffix}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_date_keywords_and_iso() {
        let today = Local::now().date_naive();
        assert_eq!(parse_date(None).unwrap(), today);
        assert_eq!(parse_date(Some("today".into())).unwrap(), today);
        assert_eq!(
            parse_date(Some("yesterday".into())).unwrap(),
            today - chrono::Duration::days(1)
        );
        assert_eq!(
            parse_date(Some("2024-02-29".into())).unwrap(),
            NaiveDate::from_ymd_opt(2024, 2, 29).unwrap()
        );
        assert!(parse_date(Some("2024-13-01".into())).is_err());
    }

    #[test]
    fn weight_to_lbs_units() {
        assert!((weight_to_lbs(180.0, "lbs").unwrap() - 180.0).abs() < f64::EPSILON);
        assert!((weight_to_lbs(180.0, "LB").unwrap() - 180.0).abs() < f64::EPSILON);
        assert!((weight_to_lbs(100.0, "kg").unwrap() - 220.462).abs() < 0.001);
        assert!(weight_to_lbs(80.0, "stone").is_err());
    }

    #[test]
    fn resolve_user_defaults_to_first_profile() {
        let db = Database::open_in_memory().unwrap();
        db.add_user("Bob").unwrap();
        assert_eq!(resolve_user(&db, None).unwrap(), "User 1");
        assert_eq!(resolve_user(&db, Some("Bob".into())).unwrap(), "Bob");
        assert!(resolve_user(&db, Some("Nobody".into())).is_err());
    }

    #[test]
    fn fmt_opt_placeholder() {
        assert_eq!(fmt_opt(None, " lbs"), "-");
        assert_eq!(fmt_opt(Some(21.04), "%"), "21.0%");
    }
}
