use std::io::IsTerminal;
use std::time::{Duration, Instant};

use anstyle::{AnsiColor, Effects, Style};
use indicatif::{ProgressBar, ProgressStyle};
use lantern_core::{Snapshot, Stage};
use lantern_updater::UpdateReport;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub(crate) enum OutputStyle {
    Plain,
    Rich,
}

pub(crate) fn current_output_style() -> OutputStyle {
    output_style_for(
        std::io::stdout().is_terminal(),
        std::env::var_os("NO_COLOR").is_some(),
    )
}

pub(crate) fn output_style_for(is_terminal: bool, no_color: bool) -> OutputStyle {
    if is_terminal && !no_color {
        OutputStyle::Rich
    } else {
        OutputStyle::Plain
    }
}

pub(crate) fn render_status_line(style: OutputStyle, status: &str, message: &str) -> String {
    match style {
        OutputStyle::Plain => message.to_string(),
        OutputStyle::Rich => format!("[{}] {message}", status.to_ascii_uppercase()),
    }
}

/// Spinner shown while a pipeline runs; a no-op in plain mode.
pub(crate) struct PipelineSpinner {
    style: OutputStyle,
    label: String,
    progress_bar: Option<ProgressBar>,
    started_at: Instant,
}

impl PipelineSpinner {
    pub(crate) fn start(style: OutputStyle, label: &str) -> Self {
        let progress_bar = if style == OutputStyle::Rich {
            let progress_bar = ProgressBar::new_spinner();
            if let Ok(spinner_style) = ProgressStyle::with_template("{spinner:.cyan.bold} {msg} {elapsed}") {
                progress_bar.set_style(spinner_style.tick_chars("<^>v "));
            }
            progress_bar.set_message(label.to_string());
            progress_bar.enable_steady_tick(Duration::from_millis(80));
            Some(progress_bar)
        } else {
            None
        };

        Self {
            style,
            label: label.to_string(),
            progress_bar,
            started_at: Instant::now(),
        }
    }

    pub(crate) fn finish(mut self) {
        let Some(progress_bar) = self.progress_bar.take() else {
            return;
        };
        progress_bar.finish_and_clear();
        if self.style == OutputStyle::Rich {
            println!(
                "{} finished in {}",
                colorize(label_style(), &self.label),
                format_elapsed(self.started_at.elapsed())
            );
        }
    }
}

pub(crate) fn format_update_report(report: &UpdateReport, style: OutputStyle) -> Vec<String> {
    let session = &report.session;
    let versions = session.version_info.as_ref();
    let mut lines = Vec::new();

    match session.stage {
        Stage::Done => {
            let line = match versions {
                Some(info) if !session.visited(Stage::Backup) => {
                    format!("already at {}; nothing to do", info.current)
                }
                Some(info) => format!("updated {} -> {}", info.current, info.target),
                None => "update complete".to_string(),
            };
            lines.push(render_status_line(style, "ok", &line));
            if let Some(id) = &session.snapshot_id {
                lines.push(render_status_line(
                    style,
                    "step",
                    &format!("snapshot {id} kept for rollback"),
                ));
            }
            if !report.pruned.is_empty() {
                lines.push(render_status_line(
                    style,
                    "step",
                    &format!("pruned {} old snapshot(s)", report.pruned.len()),
                ));
            }
        }
        Stage::RolledBack => {
            if let Some(record) = &session.error {
                lines.push(render_status_line(
                    style,
                    "warn",
                    &format!("update failed: {record}"),
                ));
            }
            let restored = match (&session.snapshot_id, versions) {
                (Some(id), Some(info)) => {
                    format!("rolled back to snapshot {id}; still at {}", info.current)
                }
                (Some(id), None) => format!("rolled back to snapshot {id}"),
                _ => "rolled back".to_string(),
            };
            lines.push(render_status_line(style, "warn", &restored));
        }
        _ => {
            if let Some(record) = &session.error {
                lines.push(render_status_line(
                    style,
                    "fail",
                    &format!("update failed: {record}"),
                ));
            }
            if let Some(rollback_err) = &report.rollback_failure {
                lines.push(render_status_line(style, "fail", &rollback_err.to_string()));
            }
            if let Some(id) = report.last_known_good() {
                lines.push(render_status_line(
                    style,
                    "fail",
                    &format!(
                        "last known good snapshot: {id}; restore it with `lantern rollback --snapshot {id}`"
                    ),
                ));
            }
        }
    }

    lines
}

pub(crate) fn format_snapshot_lines(
    snapshots: &[Snapshot],
    last: Option<&str>,
    style: OutputStyle,
) -> Vec<String> {
    if snapshots.is_empty() {
        return vec!["no snapshots".to_string()];
    }

    snapshots
        .iter()
        .map(|snapshot| {
            let present = snapshot.present_paths().count();
            let mut line = format!(
                "{} created_at={} paths={present}/{}",
                snapshot.id,
                snapshot.created_at_unix,
                snapshot.captured_paths.len()
            );
            if last == Some(snapshot.id.as_str()) {
                let marker = match style {
                    OutputStyle::Plain => "(rollback target)".to_string(),
                    OutputStyle::Rich => colorize(label_style(), "(rollback target)"),
                };
                line.push(' ');
                line.push_str(&marker);
            }
            line
        })
        .collect()
}

fn format_elapsed(elapsed: Duration) -> String {
    let secs = elapsed.as_secs();
    let millis = elapsed.subsec_millis();
    format!("{secs}.{millis:03}s")
}

fn label_style() -> Style {
    Style::new()
        .fg_color(Some(AnsiColor::BrightCyan.into()))
        .effects(Effects::BOLD)
}

fn colorize(style: Style, text: &str) -> String {
    format!("{}{}{}", style.render(), text, style.render_reset())
}
