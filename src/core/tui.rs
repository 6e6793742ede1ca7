//! Operator-facing terminal rendering: banner boxes, the registry status table, and run
//! summaries. Machine-readable output goes through `--format json` instead.

use crate::core::consensus::CriticFinding;
use crate::core::pipeline::{AuditFailure, AuditOutcome, Submission};
use crate::core::silo::{AtomicRecord, SiloHealth};
use colored::{Color, Colorize};
use std::env;

const MIN_BOX_WIDTH: usize = 40;
const MAX_BOX_WIDTH: usize = 64;
const PREVIEW_CHARS: usize = 96;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BoxStyle {
    Info,
    Success,
    Warning,
    Error,
}

impl BoxStyle {
    fn color(self) -> Color {
        match self {
            BoxStyle::Info => Color::BrightCyan,
            BoxStyle::Success => Color::BrightGreen,
            BoxStyle::Warning => Color::BrightYellow,
            BoxStyle::Error => Color::BrightRed,
        }
    }
}

pub fn health_style(health: SiloHealth) -> BoxStyle {
    match health {
        SiloHealth::Stable => BoxStyle::Success,
        SiloHealth::Degraded => BoxStyle::Warning,
        SiloHealth::Critical | SiloHealth::Obsolete => BoxStyle::Error,
    }
}

pub fn terminal_width() -> usize {
    env::var("TERM_WIDTH")
        .ok()
        .and_then(|w| w.parse().ok())
        .or_else(|| env::var("COLUMNS").ok().and_then(|c| c.parse().ok()))
        .unwrap_or(80)
}

fn box_width() -> usize {
    terminal_width().clamp(MIN_BOX_WIDTH, MAX_BOX_WIDTH)
}

pub fn box_top(width: usize) -> String {
    format!("╔{}╗", "═".repeat(width.saturating_sub(2)))
}

pub fn box_bottom(width: usize) -> String {
    format!("╚{}╝", "═".repeat(width.saturating_sub(2)))
}

/// Centre `content` between `║` borders, truncating when it does not fit.
pub fn box_row(content: &str, width: usize) -> String {
    let inner = width.saturating_sub(2);
    let content = compact_line(content, inner.saturating_sub(3));
    let padding = inner.saturating_sub(content.chars().count());
    let left = padding / 2;
    format!(
        "║{}{}{}║",
        " ".repeat(left),
        content,
        " ".repeat(padding - left)
    )
}

pub fn render_box(title: &str, subtitle: &str, style: BoxStyle) {
    let width = box_width();
    let color = style.color();
    println!("{}", box_top(width).color(color));
    println!("{}", box_row(title, width).color(color).bold());
    if !subtitle.is_empty() {
        println!("{}", box_row(subtitle, width).color(color));
    }
    println!("{}", box_bottom(width).color(color));
}

/// Collapse whitespace and bound length for one-line display.
pub fn compact_line(input: &str, max_chars: usize) -> String {
    let collapsed = input.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.chars().count() <= max_chars {
        return collapsed;
    }
    let head: String = collapsed.chars().take(max_chars).collect();
    format!("{}...", head)
}

pub fn preview_findings(findings: &[CriticFinding], max_chars: usize) -> Vec<String> {
    findings
        .iter()
        .map(|f| format!("{:<10} {}", f.critic, compact_line(&f.text, max_chars)))
        .collect()
}

/// One line of `list` output. `None` means the registry could not be read.
pub fn status_row(id: &str, record: Option<&AtomicRecord>, health: Option<SiloHealth>) -> String {
    match (record, health) {
        (Some(record), Some(health)) => {
            let line = format!(
                "{} {:<28} {:>8}  {:<9} strikes {}",
                health.icon(),
                id,
                record.integrity_percent(),
                health.as_str(),
                record.strike_count
            );
            line.color(health_style(health).color()).to_string()
        }
        _ => format!("⚠️ {:<28} {:>8}  {}", id, "--", "UNREACHABLE")
            .dimmed()
            .to_string(),
    }
}

pub fn render_outcome(outcome: &AuditOutcome) {
    let score = outcome.report.final_score;
    let style = if score >= crate::core::silo::DEGRADED_BELOW_BPS {
        BoxStyle::Success
    } else if score >= crate::core::silo::CRITICAL_BELOW_BPS {
        BoxStyle::Warning
    } else {
        BoxStyle::Error
    };
    render_box(
        &format!("{} CERTIFIED", outcome.atomic_id),
        &format!(
            "{} bps | {} | mode {}",
            score,
            outcome.validation.mode,
            outcome.mode.as_str()
        ),
        style,
    );
    for line in preview_findings(&outcome.report.findings, PREVIEW_CHARS) {
        println!("  {}", line.dimmed());
    }
    let scores: Vec<String> = outcome.report.jury.iter().map(|j| j.score.to_string()).collect();
    println!(
        "  jury      [{}] mean {:.2}",
        scores.join(", "),
        outcome.report.mean_severity
    );
    println!("  hash      {}", outcome.payload.certification_hash);
    match &outcome.anchor {
        Submission::Confirmed(receipt) => println!(
            "  anchored  {} (nonce {})",
            receipt.tx_hash.green(),
            receipt.nonce
        ),
        Submission::AlreadyDone { reason } => {
            println!("  anchored  {}", format!("already on ledger: {}", reason).yellow())
        }
    }
    if !outcome.validation.ok {
        for e in &outcome.validation.errors {
            println!("  {} {}", "schema".yellow(), e);
        }
    }
}

pub fn render_failure(failure: &AuditFailure) {
    render_box(
        &format!("{} ABORTED", failure.atomic_id),
        &format!("during {}", failure.stage),
        BoxStyle::Error,
    );
    println!("  {}", failure.error.to_string().red());
}
