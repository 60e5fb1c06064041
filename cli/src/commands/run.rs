use anyhow::Result;
use tabled::{
    Table, Tabled,
    settings::{Alignment, Modify, Style, object::Columns},
};

use runzen_core::models::{
    NewRun, RunFilter, Scope, validate_category, validate_duration, validate_run_type,
};
use runzen_core::records::PrCheck;
use runzen_core::service::{RunView, TrackerService};

use super::helpers::{parse_duration, parse_when, report_not_found, truncate};

#[allow(clippy::too_many_arguments)]
pub(crate) fn cmd_run_log(
    svc: &TrackerService,
    scope: Scope,
    run_type: &str,
    duration: &str,
    category: &str,
    notes: Option<String>,
    at: Option<String>,
    json: bool,
) -> Result<()> {
    let run_type = validate_run_type(run_type)?;
    let duration_seconds = parse_duration(duration)?;
    validate_duration(duration_seconds)?;
    let category = validate_category(category)?;
    let completed_at = parse_when(at)?;

    let logged = svc.log_run(
        scope,
        &NewRun {
            run_type,
            duration_seconds,
            notes,
            category,
            completed_at,
        },
    )?;
    let view = RunView::from(&logged.run);

    if json {
        let body = serde_json::json!({
            "run": view,
            "is_personal_best": logged.personal_best.is_some(),
            "pr_type": logged.personal_best.as_ref().map(|_| PrCheck::pr_type(&view.run_type)),
            "personal_best": logged.personal_best,
        });
        println!("{}", serde_json::to_string_pretty(&body)?);
    } else {
        println!(
            "Logged {} in {} ({} /km) on {}",
            view.run_type,
            view.formatted_duration,
            view.pace_per_km,
            view.completed_at.format("%Y-%m-%d %H:%M")
        );
        if let Some(pr) = &logged.personal_best {
            println!("  New personal best! {}", pr.message);
        }
    }

    Ok(())
}

pub(crate) fn cmd_run_list(
    svc: &TrackerService,
    scope: Scope,
    run_type: Option<&str>,
    limit: i64,
    json: bool,
) -> Result<()> {
    let run_type = run_type.map(validate_run_type).transpose()?;
    let filter = RunFilter {
        skip: 0,
        limit,
        run_type: run_type.map(|t| t.label().to_string()),
    };
    let runs: Vec<RunView> = svc
        .list_runs(scope, &filter)?
        .iter()
        .map(RunView::from)
        .collect();

    if json {
        println!("{}", serde_json::to_string_pretty(&runs)?);
    } else if runs.is_empty() {
        eprintln!("No runs found. Use `runzen run log` to record one.");
    } else {
        #[derive(Tabled)]
        struct RunRow {
            #[tabled(rename = "ID")]
            id: i64,
            #[tabled(rename = "Date")]
            date: String,
            #[tabled(rename = "Distance")]
            run_type: String,
            #[tabled(rename = "Time")]
            time: String,
            #[tabled(rename = "Pace /km")]
            pace: String,
            #[tabled(rename = "Where")]
            category: String,
            #[tabled(rename = "Notes")]
            notes: String,
        }

        let rows: Vec<RunRow> = runs
            .iter()
            .map(|r| RunRow {
                id: r.id,
                date: r.completed_at.format("%Y-%m-%d").to_string(),
                run_type: r.run_type.clone(),
                time: r.formatted_duration.clone(),
                pace: r.pace_per_km.clone(),
                category: r.category.clone(),
                notes: r.notes.as_deref().map(|n| truncate(n, 30)).unwrap_or_default(),
            })
            .collect();

        let table = Table::new(&rows)
            .with(Style::rounded())
            .with(Modify::new(Columns::new(3..5)).with(Alignment::right()))
            .to_string();
        println!("{table}");
    }

    Ok(())
}

pub(crate) fn cmd_run_delete(
    svc: &TrackerService,
    scope: Scope,
    id: i64,
    json: bool,
) -> Result<()> {
    if !svc.delete_run(scope, id)? {
        report_not_found(&format!("Run {id} not found"), json);
        return Ok(());
    }

    if json {
        println!("{}", serde_json::json!({ "deleted": id }));
    } else {
        println!("Deleted run {id}");
    }

    Ok(())
}
