use anyhow::Result;
use chrono::{Local, NaiveDateTime, Timelike};
use tabled::{
    Table, Tabled,
    settings::{Alignment, Modify, Style, object::Columns},
};

use runzen_core::models::Scope;
use runzen_core::service::TrackerService;

fn now() -> NaiveDateTime {
    let now = Local::now().naive_local();
    now.with_nanosecond(0).unwrap_or(now)
}

fn print_pairs(rows: &[(&str, String)]) {
    #[derive(Tabled)]
    struct Row {
        #[tabled(rename = "")]
        label: String,
        #[tabled(rename = "")]
        value: String,
    }

    let rows: Vec<Row> = rows
        .iter()
        .map(|(label, value)| Row {
            label: (*label).to_string(),
            value: value.clone(),
        })
        .collect();
    let table = Table::new(&rows)
        .with(Style::rounded())
        .with(Modify::new(Columns::new(1..2)).with(Alignment::right()))
        .to_string();
    println!("{table}");
}

pub(crate) fn cmd_summary(svc: &TrackerService, scope: Scope, json: bool) -> Result<()> {
    let summary = svc.stats_summary(scope, now())?;
    let motivation = svc.motivation(scope, &mut rand::rng())?;

    if json {
        let body = serde_json::json!({ "stats": summary, "motivation": motivation });
        println!("{}", serde_json::to_string_pretty(&body)?);
        return Ok(());
    }

    print_pairs(&[
        ("Total runs", summary.total_runs.to_string()),
        ("Total km", format!("{:.1}", summary.total_km)),
        ("Average pace", format!("{} /km", summary.average_pace)),
        ("Current streak", format!("{} wk", summary.current_streak)),
        ("Longest streak", format!("{} wk", summary.longest_streak)),
        (
            "This week",
            format!("{} runs, {:.1} km", summary.runs_this_week, summary.km_this_week),
        ),
        (
            "This month",
            format!("{} runs, {:.1} km", summary.runs_this_month, summary.km_this_month),
        ),
    ]);
    println!("{} {}", motivation.emoji, motivation.message);
    if let Some(achievement) = motivation.achievement {
        println!("  Milestone: {achievement}");
    }

    Ok(())
}

pub(crate) fn cmd_streak(svc: &TrackerService, scope: Scope, json: bool) -> Result<()> {
    let progress = svc.streak_progress(scope, now())?;

    if json {
        println!("{}", serde_json::to_string_pretty(&progress)?);
        return Ok(());
    }

    print_pairs(&[
        (
            "Long runs (10k+)",
            format!(
                "{}/{}",
                progress.long_runs_completed, progress.long_runs_needed
            ),
        ),
        (
            "Short runs",
            format!(
                "{}/{}",
                progress.short_runs_completed, progress.short_runs_needed
            ),
        ),
        ("Current streak", format!("{} wk", progress.current_streak)),
        ("Longest streak", format!("{} wk", progress.longest_streak)),
    ]);
    println!("{}", progress.message);

    Ok(())
}

pub(crate) fn cmd_records(svc: &TrackerService, scope: Scope, json: bool) -> Result<()> {
    let records = svc.personal_records(scope)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&records)?);
        return Ok(());
    }

    #[derive(Tabled)]
    struct RecordRow {
        #[tabled(rename = "Distance")]
        distance: String,
        #[tabled(rename = "Best")]
        time: String,
        #[tabled(rename = "Pace /km")]
        pace: String,
        #[tabled(rename = "Date")]
        date: String,
    }

    let rows: Vec<RecordRow> = records
        .0
        .iter()
        .map(|(run_type, record)| RecordRow {
            distance: run_type.label().to_string(),
            time: record.as_ref().map_or("-".into(), |r| r.time.clone()),
            pace: record.as_ref().map_or("-".into(), |r| r.pace.clone()),
            date: record.as_ref().map_or(String::new(), |r| r.date.clone()),
        })
        .collect();

    let table = Table::new(&rows)
        .with(Style::rounded())
        .with(Modify::new(Columns::new(1..3)).with(Alignment::right()))
        .to_string();
    println!("{table}");

    Ok(())
}

pub(crate) fn cmd_goals(svc: &TrackerService, scope: Scope, json: bool) -> Result<()> {
    let progress = svc.goals_progress(scope, now())?;

    if json {
        println!("{}", serde_json::to_string_pretty(&progress)?);
        return Ok(());
    }

    let yearly = &progress.yearly;
    let monthly = &progress.monthly;
    print_pairs(&[
        (
            "This year",
            format!(
                "{:.1} / {:.0} km ({:.0}%)",
                yearly.current_km, yearly.goal_km, yearly.percent
            ),
        ),
        (
            "Year remaining",
            format!("{:.1} km in {} days", yearly.remaining_km, yearly.days_remaining),
        ),
        ("On track", String::from(if yearly.on_track { "yes" } else { "no" })),
        (
            "This month",
            format!(
                "{:.1} / {:.0} km ({:.0}%)",
                monthly.current_km, monthly.goal_km, monthly.percent
            ),
        ),
        ("Months goal hit", progress.monthly_goals_hit.to_string()),
    ]);

    Ok(())
}

pub(crate) fn cmd_achievements(svc: &TrackerService, scope: Scope, json: bool) -> Result<()> {
    let report = svc.achievements(scope, now())?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    #[derive(Tabled)]
    struct AchievementRow {
        #[tabled(rename = "")]
        emoji: &'static str,
        #[tabled(rename = "Achievement")]
        name: &'static str,
        #[tabled(rename = "How")]
        description: &'static str,
        #[tabled(rename = "Unlocked")]
        unlocked: &'static str,
    }

    let rows: Vec<AchievementRow> = report
        .unlocked
        .iter()
        .chain(&report.locked)
        .map(|a| AchievementRow {
            emoji: a.emoji,
            name: a.name,
            description: a.description,
            unlocked: if a.unlocked { "yes" } else { "" },
        })
        .collect();

    let table = Table::new(&rows).with(Style::rounded()).to_string();
    println!("{table}");
    println!("{} of {} unlocked", report.unlocked_count, report.total);

    Ok(())
}

pub(crate) fn cmd_review(
    svc: &TrackerService,
    scope: Scope,
    month: Option<(i32, u32)>,
    json: bool,
) -> Result<()> {
    let Some(review) = svc.month_review(scope, month, now())? else {
        let message = "No month review available. Pass --year and --month to pick one.";
        if json {
            println!("{}", serde_json::json!({ "available": false }));
        } else {
            eprintln!("{message}");
        }
        return Ok(());
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&review)?);
        return Ok(());
    }

    let runs = &review.runs;
    let mut rows = vec![
        ("Runs", runs.count.to_string()),
        ("Distance", format!("{:.1} km", runs.total_km)),
        ("Time", runs.formatted_duration.clone()),
        ("Average pace", format!("{} /km", runs.average_pace)),
        ("Outdoor / treadmill", format!("{} / {}", runs.outdoor, runs.treadmill)),
        ("Best day streak", format!("{} days", runs.best_day_streak)),
        (
            "Goal",
            format!(
                "{:.0}% of {:.0} km{}",
                review.goal.percent,
                review.goal.goal_km,
                if review.goal.met { " (met)" } else { "" }
            ),
        ),
        (
            "Vs previous month",
            format!(
                "{:+.1} km, {:+} runs",
                review.vs_previous.km_change, review.vs_previous.runs_change
            ),
        ),
    ];
    if review.steps.entries > 0 {
        rows.push(("Average steps", review.steps.average.to_string()));
    }
    if let Some(change) = review.weight.change {
        rows.push(("Weight change", format!("{change:+.1} lbs")));
    }

    println!("{}", review.month_label);
    print_pairs(&rows);

    Ok(())
}

