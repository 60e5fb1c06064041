use anyhow::Result;
use tabled::{
    Table, Tabled,
    settings::{Alignment, Modify, Style, object::Columns},
};

use runzen_core::models::{NewWeightEntry, Scope, validate_weight};
use runzen_core::service::TrackerService;

use super::helpers::{parse_when, report_not_found, truncate};

const KG_PER_LB: f64 = 0.453_592;

pub(crate) fn cmd_weight_log(
    svc: &TrackerService,
    scope: Scope,
    lbs: f64,
    at: Option<String>,
    notes: Option<String>,
    json: bool,
) -> Result<()> {
    validate_weight(lbs)?;
    let recorded_at = parse_when(at)?;
    let entry = svc.log_weight(
        scope,
        &NewWeightEntry {
            weight_lbs: lbs,
            recorded_at,
            notes,
        },
    )?;

    if json {
        println!("{}", serde_json::to_string_pretty(&entry)?);
    } else {
        println!(
            "Logged {:.1} lbs ({:.1} kg) on {}",
            entry.weight_lbs,
            entry.weight_lbs * KG_PER_LB,
            entry.recorded_at.format("%Y-%m-%d")
        );
        if let Some(ref n) = entry.notes {
            println!("  Notes: {n}");
        }
        let progress = svc.weight_progress(scope, recorded_at)?;
        if let Some(to_lose) = progress.weight_to_lose {
            println!(
                "  {:.1} lbs lost so far, {to_lose:.1} to go ({:.0}%)",
                progress.weight_lost, progress.percent_complete
            );
        }
    }

    Ok(())
}

pub(crate) fn cmd_weight_history(
    svc: &TrackerService,
    scope: Scope,
    limit: i64,
    json: bool,
) -> Result<()> {
    let entries = svc.list_weights(scope, limit)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&entries)?);
    } else if entries.is_empty() {
        eprintln!("No weight entries found. Use `runzen weight log` to record your weight.");
    } else {
        #[derive(Tabled)]
        struct WeightRow {
            #[tabled(rename = "ID")]
            id: i64,
            #[tabled(rename = "Date")]
            date: String,
            #[tabled(rename = "Weight (lbs)")]
            lbs: String,
            #[tabled(rename = "Weight (kg)")]
            kg: String,
            #[tabled(rename = "Notes")]
            notes: String,
        }

        let rows: Vec<WeightRow> = entries
            .iter()
            .map(|e| WeightRow {
                id: e.id,
                date: e.recorded_at.format("%Y-%m-%d").to_string(),
                lbs: format!("{:.1}", e.weight_lbs),
                kg: format!("{:.1}", e.weight_lbs * KG_PER_LB),
                notes: e.notes.as_deref().map(|n| truncate(n, 30)).unwrap_or_default(),
            })
            .collect();

        let table = Table::new(&rows)
            .with(Style::rounded())
            .with(Modify::new(Columns::new(2..4)).with(Alignment::right()))
            .to_string();
        println!("{table}");
    }

    Ok(())
}

pub(crate) fn cmd_weight_delete(
    svc: &TrackerService,
    scope: Scope,
    id: i64,
    json: bool,
) -> Result<()> {
    if !svc.delete_weight(scope, id)? {
        report_not_found(&format!("Weight entry {id} not found"), json);
        return Ok(());
    }

    if json {
        println!("{}", serde_json::json!({ "deleted": id }));
    } else {
        println!("Deleted weight entry {id}");
    }

    Ok(())
}
