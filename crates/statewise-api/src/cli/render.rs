//! Terminal rendering for execution status, history and output.

use anyhow::Result;
use chrono::{DateTime, Utc};
use comfy_table::{presets, Cell, Color, ContentArrangement, Table};
use console::style;
use serde_json::{json, Value};
use statewise_types::context::{Context, ExecutionStatus, ExecutionSummary, StateRecord};

pub fn status_cell(status: ExecutionStatus) -> Cell {
    match status {
        ExecutionStatus::Pending => Cell::new("○ pending").fg(Color::Yellow),
        ExecutionStatus::Running => Cell::new("● running").fg(Color::Blue),
        ExecutionStatus::Success => Cell::new("✓ success").fg(Color::Green),
        ExecutionStatus::Failure => Cell::new("✗ failure").fg(Color::Red),
    }
}

pub fn format_status(status: ExecutionStatus) -> String {
    match status {
        ExecutionStatus::Pending => format!("{}", style("○ pending").yellow()),
        ExecutionStatus::Running => format!("{}", style("● running").blue()),
        ExecutionStatus::Success => format!("{}", style("✓ success").green()),
        ExecutionStatus::Failure => format!("{}", style("✗ failure").red()),
    }
}

fn format_time(time: Option<DateTime<Utc>>) -> String {
    time.map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| "-".to_string())
}

fn format_duration(seconds: Option<f64>) -> String {
    match seconds {
        Some(s) if s < 1.0 => format!("{:.0}ms", s * 1000.0),
        Some(s) => format!("{s:.1}s"),
        None => "-".to_string(),
    }
}

fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() > max {
        let cut: String = text.chars().take(max.saturating_sub(3)).collect();
        format!("{cut}...")
    } else {
        text.to_string()
    }
}

/// One row per finished state, plus the active state if it has not finished.
pub fn history_table(ctx: &Context) -> Table {
    let mut table = Table::new();
    table.load_preset(presets::UTF8_FULL_CONDENSED);
    table.set_content_arrangement(ContentArrangement::Dynamic);

    table.set_header(vec![
        Cell::new("State").fg(Color::White),
        Cell::new("Entered").fg(Color::White),
        Cell::new("Duration").fg(Color::White),
        Cell::new("Next").fg(Color::White),
        Cell::new("Error").fg(Color::White),
    ]);

    let mut push = |record: &StateRecord, active: bool| {
        let name = record.name.clone().unwrap_or_default();
        let name_cell = if active {
            Cell::new(format!("{name} …")).fg(Color::Cyan)
        } else {
            Cell::new(name)
        };
        let error_cell = match &record.error {
            Some(error) => {
                let text = match &record.cause {
                    Some(cause) => format!("{error}: {}", truncate(cause, 40)),
                    None => error.clone(),
                };
                Cell::new(text).fg(Color::Red)
            }
            None => Cell::new(""),
        };
        table.add_row(vec![
            name_cell,
            Cell::new(format_time(record.entered_time)),
            Cell::new(format_duration(record.duration)),
            Cell::new(record.next_state.as_deref().unwrap_or("")),
            error_cell,
        ]);
    };

    for record in &ctx.state_history {
        push(record, false);
    }
    if ctx.state_started() && !ctx.state_finished() {
        push(&ctx.state, true);
    }
    table
}

/// Machine-readable summary of a context.
pub fn context_summary(ctx: &Context) -> Value {
    let mut summary = json!({
        "execution_id": ctx.execution.id,
        "status": ctx.status(),
        "states": ctx.state_history.len(),
    });
    if let Some(name) = ctx.state_name() {
        summary["state"] = json!(name);
    }
    if ctx.ended() {
        summary["output"] = ctx.output().cloned().unwrap_or(Value::Null);
    }
    summary
}

pub fn print_context(ctx: &Context, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(&context_summary(ctx))?);
        return Ok(());
    }

    println!();
    println!(
        "  Execution {}  {}",
        style(ctx.execution.id).cyan(),
        format_status(ctx.status())
    );
    if let Some(name) = ctx.state_name().filter(|_| !ctx.ended()) {
        println!("  Current state: {}", style(name).bold());
    }
    println!();
    if !ctx.state_history.is_empty() || ctx.state_started() {
        println!("{}", history_table(ctx));
        println!();
    }
    if ctx.ended() {
        print_output(ctx.output())?;
    }
    Ok(())
}

pub fn print_output(output: Option<&Value>) -> Result<()> {
    match output {
        Some(output) => {
            println!("  {}", style("Output").bold());
            println!("{}", serde_json::to_string_pretty(output)?);
        }
        None => println!("  {}", style("(no output)").dim()),
    }
    Ok(())
}

pub fn executions_table(rows: &[ExecutionSummary]) -> Table {
    let mut table = Table::new();
    table.load_preset(presets::UTF8_FULL_CONDENSED);
    table.set_content_arrangement(ContentArrangement::Dynamic);

    table.set_header(vec![
        Cell::new("Execution").fg(Color::White),
        Cell::new("Status").fg(Color::White),
        Cell::new("State").fg(Color::White),
        Cell::new("Started").fg(Color::White),
        Cell::new("Ended").fg(Color::White),
    ]);

    for row in rows {
        table.add_row(vec![
            Cell::new(row.id),
            status_cell(row.status),
            Cell::new(row.state_name.as_deref().unwrap_or("-")),
            Cell::new(format_time(row.start_time)),
            Cell::new(format_time(row.end_time)),
        ]);
    }
    table
}
