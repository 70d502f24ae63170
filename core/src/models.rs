use anyhow::{Context, Result, bail};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Name given to the profile seeded into a fresh database.
pub const DEFAULT_USER: &str = "User 1";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UserProfile {
    pub id: i64,
    pub name: String,
    pub start_weight: Option<f64>,
    pub goal_weight: Option<f64>,
    pub created_at: String,
    pub updated_at: String,
}

impl UserProfile {
    #[must_use]
    pub fn goals(&self) -> Goals {
        Goals {
            start_weight: self.start_weight,
            goal_weight: self.goal_weight,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct Goals {
    pub start_weight: Option<f64>,
    pub goal_weight: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Observation {
    pub id: i64,
    pub uuid: String,
    pub user: String,
    pub date: NaiveDate,
    pub weight: f64,
    pub body_fat: Option<f64>,
    pub waist: Option<f64>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone)]
pub struct NewObservation {
    pub user: String,
    pub date: NaiveDate,
    pub weight: f64,
    pub body_fat: Option<f64>,
    pub waist: Option<f64>,
}

/// Replacement values for an existing observation. The owning user never changes.
#[derive(Debug, Clone)]
pub struct UpdateObservation {
    pub date: NaiveDate,
    pub weight: f64,
    pub body_fat: Option<f64>,
    pub waist: Option<f64>,
}

impl NewObservation {
    pub fn validate(&self) -> Result<()> {
        validate_user_name(&self.user)?;
        validate_weight(self.weight)?;
        validate_body_fat(self.body_fat)?;
        validate_waist(self.waist)
    }
}

impl UpdateObservation {
    pub fn validate(&self) -> Result<()> {
        validate_weight(self.weight)?;
        validate_body_fat(self.body_fat)?;
        validate_waist(self.waist)
    }
}

/// Trim a user name and reject it if nothing is left.
pub fn validate_user_name(name: &str) -> Result<String> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        bail!("User name cannot be empty");
    }
    Ok(trimmed.to_string())
}

pub fn validate_weight(weight: f64) -> Result<()> {
    if !weight.is_finite() || weight <= 0.0 {
        bail!("Weight must be a positive number");
    }
    Ok(())
}

// Body fat and waist follow the same positivity rule as weight.
pub fn validate_body_fat(body_fat: Option<f64>) -> Result<()> {
    if let Some(bf) = body_fat {
        if !bf.is_finite() || bf <= 0.0 || bf > 100.0 {
            bail!("Body fat must be a percentage between 0 and 100");
        }
    }
    Ok(())
}

pub fn validate_waist(waist: Option<f64>) -> Result<()> {
    if let Some(w) = waist {
        if !w.is_finite() || w <= 0.0 {
            bail!("Waist size must be a positive number");
        }
    }
    Ok(())
}

pub fn validate_goals(goals: &Goals) -> Result<()> {
    for (label, value) in [
        ("Start weight", goals.start_weight),
        ("Goal weight", goals.goal_weight),
    ] {
        if let Some(v) = value {
            if !v.is_finite() || v <= 0.0 {
                bail!("{label} must be a positive number");
            }
        }
    }
    Ok(())
}

/// Parse an optional decimal form field. Blank input means "not supplied".
pub fn parse_optional_metric(raw: Option<&str>, field: &str) -> Result<Option<f64>> {
    match raw.map(str::trim) {
        None | Some("") => Ok(None),
        Some(s) => s
            .parse::<f64>()
            .map(Some)
            .with_context(|| format!("Invalid {field}: '{s}' is not a number")),
    }
}

/// Newest date first. Entries sharing a date keep their insertion order.
pub fn sort_newest_first(entries: &mut [Observation]) {
    entries.sort_by_key(|o| std::cmp::Reverse(o.date));
}

pub fn parse_date(s: &str) -> Result<NaiveDate> {
    let s = s.trim();
    if s.is_empty() {
        bail!("Date is required");
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .with_context(|| format!("Invalid date '{s}'. Use YYYY-MM-DD"))
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ImportSummary {
    pub rows_parsed: usize,
    pub rows_skipped: usize,
    pub users_created: usize,
    pub observations_added: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_observation() -> NewObservation {
        NewObservation {
            user: "Alice".to_string(),
            date: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            weight: 180.0,
            body_fat: Some(22.5),
            waist: Some(34.0),
        }
    }

    #[test]
    fn test_validate_user_name_trims() {
        assert_eq!(validate_user_name("  Bob ").unwrap(), "Bob");
    }

    #[test]
    fn test_validate_user_name_empty() {
        assert!(validate_user_name("   ").is_err());
    }

    #[test]
    fn test_validate_weight() {
        assert!(validate_weight(150.0).is_ok());
        assert!(validate_weight(0.0).is_err());
        assert!(validate_weight(-3.0).is_err());
        assert!(validate_weight(f64::NAN).is_err());
    }

    #[test]
    fn test_validate_body_fat_range() {
        assert!(validate_body_fat(None).is_ok());
        assert!(validate_body_fat(Some(18.0)).is_ok());
        assert!(validate_body_fat(Some(0.0)).is_err());
        assert!(validate_body_fat(Some(101.0)).is_err());
    }

    #[test]
    fn test_validate_waist() {
        assert!(validate_waist(None).is_ok());
        assert!(validate_waist(Some(32.5)).is_ok());
        assert!(validate_waist(Some(-1.0)).is_err());
    }

    #[test]
    fn test_validate_goals() {
        assert!(validate_goals(&Goals::default()).is_ok());
        assert!(
            validate_goals(&Goals {
                start_weight: Some(200.0),
                goal_weight: Some(170.0),
            })
            .is_ok()
        );
        let err = validate_goals(&Goals {
            start_weight: None,
            goal_weight: Some(0.0),
        })
        .unwrap_err();
        assert!(err.to_string().contains("Goal weight"));
    }

    #[test]
    fn test_new_observation_validate() {
        assert!(sample_observation().validate().is_ok());

        let mut bad = sample_observation();
        bad.weight = 0.0;
        assert!(bad.validate().is_err());

        let mut bad = sample_observation();
        bad.user = String::new();
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_parse_optional_metric() {
        assert_eq!(parse_optional_metric(None, "body fat").unwrap(), None);
        assert_eq!(parse_optional_metric(Some(""), "body fat").unwrap(), None);
        assert_eq!(parse_optional_metric(Some("  "), "waist").unwrap(), None);
        assert_eq!(
            parse_optional_metric(Some("21.5"), "body fat").unwrap(),
            Some(21.5)
        );
        let err = parse_optional_metric(Some("abc"), "waist").unwrap_err();
        assert!(err.to_string().contains("waist"));
    }

    #[test]
    fn test_parse_date() {
        assert_eq!(
            parse_date("2024-03-05").unwrap(),
            NaiveDate::from_ymd_opt(2024, 3, 5).unwrap()
        );
        assert!(parse_date("").is_err());
        assert!(parse_date("03/05/2024").is_err());
    }

    #[test]
    fn test_user_profile_goals() {
        let user = UserProfile {
            id: 1,
            name: "Alice".to_string(),
            start_weight: Some(190.0),
            goal_weight: None,
            created_at: String::new(),
            updated_at: String::new(),
        };
        assert_eq!(
            user.goals(),
            Goals {
                start_weight: Some(190.0),
                goal_weight: None,
            }
        );
    }

    #[test]
    fn test_sort_newest_first_keeps_same_date_order() {
        let entry = |id: i64, day: u32| Observation {
            id,
            uuid: format!("uuid-{id}"),
            user: "Alice".to_string(),
            date: NaiveDate::from_ymd_opt(2024, 1, day).unwrap(),
            weight: 180.0,
            body_fat: None,
            waist: None,
            created_at: String::new(),
            updated_at: String::new(),
        };
        let mut entries = vec![entry(1, 1), entry(2, 2), entry(3, 2), entry(4, 3)];
        sort_newest_first(&mut entries);

        let ids: Vec<i64> = entries.iter().map(|o| o.id).collect();
        assert_eq!(ids, vec![4, 2, 3, 1]);
    }
}
