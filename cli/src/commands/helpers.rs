use anyhow::{Context, Result, bail};
use serde_json::Value;
use tabled::{
    Table, Tabled,
    settings::{Alignment, Modify, Style, object::Columns},
};

use nourish_core::models::{CalorieResult, QueuedOperation, SavedPlan};
use nourish_core::queue::{DrainOutcome, DrainReport};

/// Parse a JSON object given on the command line.
pub(crate) fn parse_json_object(s: &str) -> Result<Value> {
    let value: Value =
        serde_json::from_str(s).with_context(|| format!("Invalid JSON payload: '{s}'"))?;
    if !value.is_object() {
        bail!("Payload must be a JSON object, e.g. '{{\"name\": \"oats\"}}'");
    }
    Ok(value)
}

/// Interpret a record id argument: integers stay numeric, anything else is a string.
pub(crate) fn parse_record_id(s: &str) -> Value {
    s.trim()
        .parse::<i64>()
        .map_or_else(|_| Value::String(s.trim().to_string()), Value::from)
}

pub(crate) fn print_result(result: &CalorieResult) {
    let (protein_g, carbs_g, fats_g) = result.macro_breakdown.grams_for(result.daily_calorie_goal);
    let m = &result.macro_breakdown;

    println!("BMR:            {} kcal", result.bmr);
    println!("TDEE:           {} kcal", result.tdee);
    println!("Daily goal:     {} kcal", result.daily_calorie_goal);
    println!(
        "Macros:         Protein {}% ({protein_g:.0}g)  Carbs {}% ({carbs_g:.0}g)  Fat {}% ({fats_g:.0}g)",
        m.protein, m.carbs, m.fats
    );
    println!("Timeline:       {}", result.timeline_estimate);
    println!("Method:         {}", result.calculation_method.as_str());
    println!();
    for tip in &result.personalized_advice {
        println!("  - {tip}");
    }
}

pub(crate) fn print_plan_table(plans: &[SavedPlan]) {
    #[derive(Tabled)]
    struct PlanRow {
        #[tabled(rename = "ID")]
        id: i64,
        #[tabled(rename = "Created")]
        created: String,
        #[tabled(rename = "Weight")]
        weight: String,
        #[tabled(rename = "Target")]
        target: String,
        #[tabled(rename = "BMR")]
        bmr: i64,
        #[tabled(rename = "TDEE")]
        tdee: i64,
        #[tabled(rename = "Goal")]
        goal: i64,
        #[tabled(rename = "P/C/F")]
        macros: String,
        #[tabled(rename = "Method")]
        method: String,
    }

    let rows: Vec<PlanRow> = plans
        .iter()
        .map(|p| {
            let m = &p.result.macro_breakdown;
            PlanRow {
                id: p.id,
                created: truncate(&p.created_at, 16),
                weight: format!("{:.1}", p.profile.current_weight_kg),
                target: format!("{:.1}", p.profile.target_weight_kg),
                bmr: p.result.bmr,
                tdee: p.result.tdee,
                goal: p.result.daily_calorie_goal,
                macros: format!("{}/{}/{}", m.protein, m.carbs, m.fats),
                method: p.result.calculation_method.as_str().to_string(),
            }
        })
        .collect();

    let table = Table::new(&rows)
        .with(Style::rounded())
        .with(Modify::new(Columns::new(2..7)).with(Alignment::right()))
        .to_string();
    println!("{table}");
}

pub(crate) fn print_queue_table(entries: &[QueuedOperation]) {
    #[derive(Tabled)]
    struct QueueRow {
        #[tabled(rename = "#")]
        idx: usize,
        #[tabled(rename = "Op")]
        kind: String,
        #[tabled(rename = "Target")]
        target: String,
        #[tabled(rename = "Payload")]
        payload: String,
        #[tabled(rename = "Tries")]
        attempts: u32,
        #[tabled(rename = "Queued")]
        enqueued: String,
    }

    let rows: Vec<QueueRow> = entries
        .iter()
        .enumerate()
        .map(|(i, op)| QueueRow {
            idx: i + 1,
            kind: op.kind.as_str().to_string(),
            target: op.target.clone(),
            payload: truncate(&op.payload.to_string(), 40),
            attempts: op.attempts,
            enqueued: op.enqueued_at.format("%Y-%m-%d %H:%M:%S").to_string(),
        })
        .collect();

    let table = Table::new(&rows)
        .with(Style::rounded())
        .with(Modify::new(Columns::new(4..5)).with(Alignment::right()))
        .to_string();
    println!("{table}");
}

pub(crate) fn describe_drain(report: &DrainReport) -> String {
    match report.outcome {
        DrainOutcome::Empty => "Queue is empty, nothing to sync.".to_string(),
        DrainOutcome::Offline => format!(
            "Remote store unreachable; {} operation(s) still queued.",
            report.remaining
        ),
        DrainOutcome::AlreadyRunning => "A sync is already in progress.".to_string(),
        DrainOutcome::Completed => {
            let mut line = format!("Synced {} operation(s)", report.replayed);
            if report.failed > 0 {
                line.push_str(&format!(", {} failed", report.failed));
            }
            if report.dead_lettered > 0 {
                line.push_str(&format!(", {} given up", report.dead_lettered));
            }
            line.push_str(&format!("; {} remaining.", report.remaining));
            line
        }
    }
}

pub(crate) fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else if max < 3 {
        s.chars().take(max).collect()
    } else {
        let end = s.char_indices().nth(max - 3).map_or(s.len(), |(i, _)| i);
        format!("{}...", &s[..end])
    }
}
