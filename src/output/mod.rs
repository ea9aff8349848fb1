//! Output module for the command front-end
//!
//! Renders crawler listings, failed tasks and maintenance reports as plain
//! text. Rendering returns strings; printing is left to the binary.

mod table;

pub use table::Table;

use crate::crawler::{CleanupReport, CrawlerListing, ScheduledReport};
use crate::state::TaskState;
use crate::storage::TaskRecord;
use std::collections::HashMap;

/// Longest error message shown in the failed task table
const MAX_ERROR_WIDTH: usize = 80;

/// Renders the `list` table
pub fn render_listing(rows: &[CrawlerListing]) -> String {
    let mut table = Table::new(["Name", "Description", "Schedule", "Due"]);
    for row in rows {
        table.add_row([
            row.name.clone(),
            row.description.clone(),
            row.schedule.clone(),
            row.due.to_string(),
        ]);
    }
    table.render()
}

/// Renders the failed tasks of a crawler
pub fn render_failed_tasks(tasks: &[TaskRecord]) -> String {
    if tasks.is_empty() {
        return "No failed tasks\n".to_string();
    }

    let mut table = Table::new(["ID", "Stage", "Run", "Retries", "Created", "Error"]);
    for task in tasks {
        table.add_row([
            task.id.to_string(),
            task.stage.clone(),
            task.run_id.clone(),
            task.retry_count.to_string(),
            task.created_at.format("%Y-%m-%d %H:%M:%S").to_string(),
            truncate(task.last_error.as_deref().unwrap_or("-"), MAX_ERROR_WIDTH),
        ]);
    }
    table.render()
}

/// Renders the result of `cleanup`
pub fn render_cleanup(reports: &[(String, CleanupReport)]) -> String {
    let mut table = Table::new(["Crawler", "Requeued", "Failed", "Run marker"]);
    for (crawler, report) in reports.iter().filter(|(_, r)| !r.is_empty()) {
        table.add_row([
            crawler.clone(),
            report.requeued.to_string(),
            report.failed.to_string(),
            if report.cleared_run { "cleared" } else { "-" }.to_string(),
        ]);
    }

    if table.is_empty() {
        "Nothing to clean up\n".to_string()
    } else {
        table.render()
    }
}

/// Renders the result of one scheduling pass
pub fn render_scheduled(report: &ScheduledReport) -> String {
    let mut out = String::new();

    if report.started.is_empty() {
        out.push_str("No crawler was due\n");
    }
    for (crawler, run_id) in &report.started {
        out.push_str(&format!("Started {} (run {})\n", crawler, run_id));
    }
    for (crawler, error) in &report.errors {
        out.push_str(&format!("Failed {}: {}\n", crawler, error));
    }

    out
}

/// Renders task counts by state
pub fn render_queue_counts(counts: &HashMap<TaskState, u64>) -> String {
    TaskState::all()
        .iter()
        .map(|state| format!("{}={}", state, counts.get(state).copied().unwrap_or(0)))
        .collect::<Vec<_>>()
        .join(" ")
}

fn truncate(text: &str, max: usize) -> String {
    let line = text.lines().next().unwrap_or("");
    if line.chars().count() <= max {
        line.to_string()
    } else {
        let mut short: String = line.chars().take(max.saturating_sub(3)).collect();
        short.push_str("...");
        short
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::DueState;

    #[test]
    fn test_render_listing() {
        let rows = vec![
            CrawlerListing {
                name: "alpha".to_string(),
                description: "First".to_string(),
                schedule: "daily".to_string(),
                due: DueState::Yes,
            },
            CrawlerListing {
                name: "beta".to_string(),
                description: String::new(),
                schedule: "-".to_string(),
                due: DueState::Off,
            },
        ];

        let out = render_listing(&rows);
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines[0], "Name   Description  Schedule  Due");
        assert_eq!(lines[2], "alpha  First        daily     yes");
        assert_eq!(lines[3], "beta                -         off");
    }

    #[test]
    fn test_render_cleanup_skips_empty_reports() {
        let reports = vec![
            ("a".to_string(), CleanupReport::default()),
            (
                "b".to_string(),
                CleanupReport {
                    requeued: 2,
                    failed: 0,
                    cleared_run: true,
                },
            ),
        ];
        let out = render_cleanup(&reports);
        assert!(!out.contains("\na "));
        assert!(out.contains("cleared"));

        assert_eq!(render_cleanup(&reports[..1]), "Nothing to clean up\n");
    }

    #[test]
    fn test_render_scheduled() {
        let report = ScheduledReport {
            started: vec![("a".to_string(), "01H".to_string())],
            errors: vec![("b".to_string(), "boom".to_string())],
        };
        assert_eq!(render_scheduled(&report), "Started a (run 01H)\nFailed b: boom\n");
    }

    #[test]
    fn test_render_queue_counts() {
        let mut counts = HashMap::new();
        counts.insert(TaskState::Queued, 3);
        assert_eq!(render_queue_counts(&counts), "queued=3 running=0 failed=0");
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("first line\nsecond", 80), "first line");
        assert_eq!(truncate("abcdefghij", 6), "abc...");
    }
}
