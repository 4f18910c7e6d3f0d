//! Reporting and export: JSON, CSV, and Markdown artifacts for a run.
//!
//! - **JSON**: the full [`RunReport`] with schema versioning
//! - **CSV**: fill tape, equity curve, and per-fill implementation cost
//! - **Markdown**: a human-readable summary
//!
//! Unknown schema versions are rejected on load.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use pitlab_core::domain::Fill;
use pitlab_core::execution::ExecutionCost;
use pitlab_core::metrics::EquityPoint;

use crate::report::{RunReport, SCHEMA_VERSION};

// ─── JSON export ────────────────────────────────────────────────────

pub fn export_report_json(report: &RunReport) -> Result<String> {
    serde_json::to_string_pretty(report).context("failed to serialize RunReport to JSON")
}

/// Deserialize a `RunReport`, rejecting schema versions newer than ours.
pub fn import_report_json(json: &str) -> Result<RunReport> {
    let report: RunReport =
        serde_json::from_str(json).context("failed to deserialize RunReport from JSON")?;
    if report.schema_version > SCHEMA_VERSION {
        bail!(
            "unsupported schema version {} (max supported: {})",
            report.schema_version,
            SCHEMA_VERSION
        );
    }
    Ok(report)
}

// ─── CSV export ─────────────────────────────────────────────────────

/// Columns: order_id, fill_id, security_id, side, quantity, price, venue,
/// timestamp, fees
pub fn export_fills_csv(fills: &[Fill]) -> Result<String> {
    let mut wtr = csv::Writer::from_writer(vec![]);
    wtr.write_record([
        "order_id",
        "fill_id",
        "security_id",
        "side",
        "quantity",
        "price",
        "venue",
        "timestamp",
        "fees",
    ])?;
    for f in fills {
        wtr.write_record([
            &f.order_id.to_string(),
            &f.fill_id.to_string(),
            &f.security_id.to_string(),
            &format!("{:?}", f.side),
            &f.quantity.to_string(),
            &format!("{:.6}", f.price),
            &f.venue,
            &f.timestamp.to_rfc3339(),
            &format!("{:.2}", f.fees),
        ])?;
    }
    finish(wtr)
}

pub fn export_equity_csv(curve: &[EquityPoint]) -> Result<String> {
    let mut wtr = csv::Writer::from_writer(vec![]);
    wtr.write_record(["timestamp", "equity", "cash", "gross_exposure", "realized_pnl"])?;
    for p in curve {
        wtr.write_record([
            &p.at.to_rfc3339(),
            &format!("{:.2}", p.equity),
            &format!("{:.2}", p.cash),
            &format!("{:.2}", p.gross_exposure),
            &format!("{:.2}", p.realized_pnl),
        ])?;
    }
    finish(wtr)
}

/// Participation is blank when ADV was unknown.
pub fn export_costs_csv(costs: &[ExecutionCost]) -> Result<String> {
    let mut wtr = csv::Writer::from_writer(vec![]);
    wtr.write_record([
        "order_id",
        "fill_id",
        "security_id",
        "quantity",
        "arrival_price",
        "participation",
        "impact",
        "spread",
    ])?;
    for c in costs {
        wtr.write_record([
            &c.order_id.to_string(),
            &c.fill_id.to_string(),
            &c.security_id.to_string(),
            &c.quantity.to_string(),
            &format!("{:.6}", c.arrival_price),
            &c.participation.map(|p| format!("{p:.6}")).unwrap_or_default(),
            &format!("{:.4}", c.impact),
            &format!("{:.4}", c.spread),
        ])?;
    }
    finish(wtr)
}

fn finish(wtr: csv::Writer<Vec<u8>>) -> Result<String> {
    let data = wtr.into_inner().context("failed to flush CSV writer")?;
    String::from_utf8(data).context("CSV output is not valid UTF-8")
}

// ─── Artifact bundle ────────────────────────────────────────────────

/// Save the full artifact set under `output_dir/run_<id prefix>/`:
/// - `report.json`
/// - `fills.csv`
/// - `equity.csv`
/// - `costs.csv`
/// - `report.md`
///
/// Returns the created directory.
pub fn save_artifacts(report: &RunReport, output_dir: &Path) -> Result<PathBuf> {
    let prefix: String = report.run_id.0.chars().take(16).collect();
    let run_dir = output_dir.join(format!("run_{prefix}"));
    std::fs::create_dir_all(&run_dir)
        .with_context(|| format!("failed to create artifact dir: {}", run_dir.display()))?;

    let files = [
        ("report.json", export_report_json(report)?),
        ("fills.csv", export_fills_csv(&report.fills)?),
        ("equity.csv", export_equity_csv(&report.equity_curve)?),
        ("costs.csv", export_costs_csv(&report.costs)?),
        ("report.md", generate_markdown(report)),
    ];
    for (name, body) in files {
        let path = run_dir.join(name);
        std::fs::write(&path, body)
            .with_context(|| format!("failed to write {}", path.display()))?;
    }
    Ok(run_dir)
}

pub fn load_artifacts(dir: &Path) -> Result<RunReport> {
    let path = dir.join("report.json");
    let json = std::fs::read_to_string(&path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    import_report_json(&json)
}

// ─── Markdown ───────────────────────────────────────────────────────

pub fn generate_markdown(report: &RunReport) -> String {
    let s = &report.summary;
    let p = &report.performance;
    let mut md = String::with_capacity(1024);

    md.push_str("# Run Report\n\n");
    md.push_str("| Field | Value |\n| --- | --- |\n");
    md.push_str(&format!("| Run | `{}` |\n", report.run_id));
    md.push_str(&format!("| Seed | {} |\n", report.seed));
    md.push_str(&format!("| Solver | {} |\n", report.solver));
    md.push_str(&format!("| Backend | {} |\n", report.backend));
    md.push_str(&format!(
        "| Rebalances | {} ({} skipped) |\n\n",
        report.rebalances, report.skipped_rebalances
    ));

    md.push_str("## Performance\n\n| Metric | Value |\n| --- | --- |\n");
    md.push_str(&format!("| Total return | {:.2}% |\n", p.total_return * 100.0));
    md.push_str(&format!("| Sharpe | {:.2} |\n", p.sharpe));
    md.push_str(&format!("| Sortino | {:.2} |\n", p.sortino));
    md.push_str(&format!("| Max drawdown | {:.2}% |\n", p.max_drawdown * 100.0));
    if let Some(eq) = s.final_equity {
        md.push_str(&format!("| Final equity | {eq:.2} |\n"));
    }
    md.push('\n');

    md.push_str("## Execution\n\n| Metric | Value |\n| --- | --- |\n");
    md.push_str(&format!("| Fills | {} |\n", s.fills));
    md.push_str(&format!("| Traded notional | {:.2} |\n", s.traded_notional));
    md.push_str(&format!("| Turnover | {:.2} |\n", s.turnover));
    md.push_str(&format!("| Fees | {:.2} |\n", s.fees));
    md.push_str(&format!(
        "| Implementation cost | {:.2} (impact {:.2}, spread {:.2}) |\n",
        s.impact_cost + s.spread_cost,
        s.impact_cost,
        s.spread_cost
    ));
    for (state, count) in &report.order_states {
        md.push_str(&format!("| Orders {state} | {count} |\n"));
    }
    md.push('\n');

    if !report.degraded.is_empty() || s.safety_rejections > 0 || s.discrepancies > 0 {
        md.push_str("## Incidents\n\n");
        md.push_str(&format!("- Degraded allocations: {}\n", report.degraded.len()));
        md.push_str(&format!("- Safety rejections: {}\n", s.safety_rejections));
        md.push_str(&format!("- Reconciliation discrepancies: {}\n", s.discrepancies));
        for d in &report.degraded {
            md.push_str(&format!("  - {} `{}`: {}\n", d.timestamp, d.solver, d.reason));
        }
    }
    md
}
