use anyhow::Result;
use tabled::{
    Table, Tabled,
    settings::{Alignment, Modify, Style, object::Columns},
};

use weighin_core::db::Database;
use weighin_core::models::Goals;

use super::helpers::{fmt_opt, resolve_user, weight_to_lbs};

pub(crate) fn cmd_user_add(db: &Database, name: &str, json: bool) -> Result<()> {
    let user = db.add_user(name)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&user)?);
    } else {
        println!("Added user '{}'", user.name);
    }

    Ok(())
}

pub(crate) fn cmd_user_list(db: &Database, json: bool) -> Result<()> {
    let users = db.list_users()?;

    if json {
        println!("{}", serde_json::to_string_pretty(&users)?);
        return Ok(());
    }

    #[derive(Tabled)]
    struct UserRow {
        #[tabled(rename = "Name")]
        name: String,
        #[tabled(rename = "Start (lbs)")]
        start: String,
        #[tabled(rename = "Goal (lbs)")]
        goal: String,
        #[tabled(rename = "Entries")]
        entries: usize,
    }

    let mut rows = Vec::with_capacity(users.len());
    for u in &users {
        rows.push(UserRow {
            name: u.name.clone(),
            start: fmt_opt(u.start_weight, ""),
            goal: fmt_opt(u.goal_weight, ""),
            entries: db.list_observations(&u.name)?.len(),
        });
    }

    let table = Table::new(&rows)
        .with(Style::rounded())
        .with(Modify::new(Columns::new(1..)).with(Alignment::right()))
        .to_string();
    println!("{table}");

    Ok(())
}

pub(crate) fn cmd_user_delete(db: &Database, name: &str, json: bool) -> Result<()> {
    let removed = db.delete_user(name)?;

    if json {
        println!(
            "{}",
            serde_json::json!({ "deleted": name, "observations_removed": removed })
        );
    } else {
        println!("User '{name}' and {removed} entries have been deleted");
    }

    Ok(())
}

pub(crate) fn cmd_user_goals(
    db: &Database,
    user: Option<String>,
    start: Option<f64>,
    goal: Option<f64>,
    unit: &str,
    json: bool,
) -> Result<()> {
    let user = resolve_user(db, user)?;
    let goals = Goals {
        start_weight: start.map(|v| weight_to_lbs(v, unit)).transpose()?,
        goal_weight: goal.map(|v| weight_to_lbs(v, unit)).transpose()?,
    };
    let profile = db.set_goals(&user, &goals)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&profile)?);
    } else {
        println!(
            "Goals for {} updated: start {} lbs, goal {} lbs",
            profile.name,
            fmt_opt(profile.start_weight, ""),
            fmt_opt(profile.goal_weight, "")
        );
    }

    Ok(())
}
