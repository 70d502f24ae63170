use anyhow::Result;

use weighin_core::db::Database;
use weighin_core::stats::{HistoryView, MetricStats};

use super::helpers::{fmt_opt, resolve_user};

pub(crate) fn cmd_stats(
    db: &Database,
    user: Option<String>,
    compare: Option<&str>,
    json: bool,
) -> Result<()> {
    let user = resolve_user(db, user)?;
    let view = db.build_history_view(&user, compare)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&view)?);
    } else {
        print_view(&user, compare, &view);
    }

    Ok(())
}

fn print_metric(label: &str, stats: Option<&MetricStats>, suffix: &str) {
    if let Some(s) = stats {
        println!(
            "  {label:<10} current {:.1}{suffix}  highest {:.1}{suffix}  lowest {:.1}{suffix}",
            s.current, s.highest, s.lowest
        );
    }
}

fn print_view(user: &str, compare: Option<&str>, view: &HistoryView) {
    let s = &view.summary;
    println!("=== {user} ===\n");
    println!(
        "  Weight     current {}  highest {}  lowest {}",
        fmt_opt(s.current, " lbs"),
        fmt_opt(s.highest, " lbs"),
        fmt_opt(s.lowest, " lbs")
    );
    println!(
        "  Goals      start {}  goal {}",
        fmt_opt(s.start, " lbs"),
        fmt_opt(s.goal, " lbs")
    );
    if let Some(progress) = &s.to_goal {
        println!("  To goal    {} ({})", progress.label, progress.class.as_str());
    }
    print_metric("Body fat", s.body_fat.as_ref(), "%");
    print_metric("Waist", s.waist.as_ref(), " in");

    let axes = &view.axes;
    println!();
    println!(
        "  Chart: {} dates, weight axis {} – {}",
        view.weight_chart.labels.len(),
        fmt_opt(axes.primary_min, ""),
        fmt_opt(axes.primary_max, "")
    );
    if let (Some(other), Some(label)) = (compare, &axes.secondary_label) {
        let plotted = view
            .weight_chart
            .comparison
            .as_ref()
            .map_or(0, |series| series.iter().flatten().count());
        println!(
            "  Compared with {other}: {plotted} entries, {label} axis {} – {}",
            fmt_opt(axes.secondary_min, ""),
            fmt_opt(axes.secondary_max, "")
        );
    }
}
