//! Run reports.
//!
//! Three renderings of one [`RunReport`]: `report.json`, `report.html` and
//! `summary.txt`. Rendering only reads the report, so writing twice gives
//! the same files.

use base64::Engine;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::analyzer::UiAssessment;
use crate::config::ArtifactSettings;
use crate::evidence::{ConsoleEntry, IntegrityRecord, NetworkEntry, ScreenshotRef};
use crate::governor::CriticalFailureRecord;
use crate::harness::types::{HarnessResult, PhaseResult, PhaseStatus, RunState, RunSummary};
use crate::validation::ValidationRecord;

/// Everything a finished run accumulated
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunReport {
    pub run_id: String,
    pub source: String,
    pub base_url: String,
    pub state: RunState,
    pub success: bool,
    pub fail_fast: bool,
    /// Still true when no page was ever confirmed ready
    pub first_access: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub stop_reason: Option<String>,
    pub summary: RunSummary,
    pub phases: Vec<PhaseResult>,
    pub validations: Vec<ValidationRecord>,
    pub critical_failures: Vec<CriticalFailureRecord>,
    pub assessments: Vec<UiAssessment>,
    pub integrity: Vec<IntegrityRecord>,
    pub console: Vec<ConsoleEntry>,
    pub network: Vec<NetworkEntry>,
    pub artifact_dir: PathBuf,
}

impl RunReport {
    pub fn is_critical(&self) -> bool {
        !self.critical_failures.is_empty()
    }

    pub fn console_error_count(&self) -> usize {
        self.console.iter().filter(|e| e.is_error()).count()
    }

    pub fn failed_request_count(&self) -> usize {
        self.network.iter().filter(|n| n.is_failure()).count()
    }

    pub fn phase(&self, name: &str) -> Option<&PhaseResult> {
        self.phases.iter().find(|p| p.name == name)
    }
}

/// Counters recomputed from the sealed phases.
///
/// Disagreement with the live counters is logged; the recomputed value wins.
/// The report itself is left untouched.
pub fn verified_summary(report: &RunReport) -> RunSummary {
    let recomputed = RunSummary::from_phases(
        &report.phases,
        report.critical_failures.len(),
        report.summary.duration_ms,
    );
    if !recomputed.same_counts(&report.summary) {
        warn!(
            live_total = report.summary.total,
            recomputed_total = recomputed.total,
            "live counters disagree with phase list, using recomputed summary"
        );
    }
    recomputed
}

/// Paths of the written report files
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportPaths {
    pub json: PathBuf,
    pub html: PathBuf,
    pub summary: PathBuf,
}

#[derive(Debug, Clone)]
pub struct ReportGenerator {
    embed_images: bool,
}

impl ReportGenerator {
    pub fn new(artifacts: &ArtifactSettings) -> Self {
        Self {
            embed_images: artifacts.embed_images,
        }
    }

    /// Write all three reports into the run's artifact directory
    pub fn write_all(&self, report: &RunReport) -> HarnessResult<ReportPaths> {
        let dir = &report.artifact_dir;
        fs::create_dir_all(dir)?;
        let paths = ReportPaths {
            json: dir.join("report.json"),
            html: dir.join("report.html"),
            summary: dir.join("summary.txt"),
        };
        fs::write(&paths.json, self.render_json(report)?)?;
        fs::write(&paths.html, self.render_html(report))?;
        fs::write(&paths.summary, self.render_summary(report))?;
        info!(dir = %dir.display(), "reports written");
        Ok(paths)
    }

    pub fn render_json(&self, report: &RunReport) -> HarnessResult<String> {
        let summary = verified_summary(report);
        let mut value = serde_json::to_value(report)?;
        if let Some(obj) = value.as_object_mut() {
            obj.insert("summary".to_string(), serde_json::to_value(&summary)?);
            obj.insert("successRate".to_string(), summary.success_rate().into());
            obj.insert("criticalFailureRate".to_string(), summary.critical_failure_rate().into());
        }
        Ok(serde_json::to_string_pretty(&value)?)
    }

    pub fn render_summary(&self, report: &RunReport) -> String {
        let summary = verified_summary(report);
        let mut out = String::new();
        let _ = writeln!(out, "Backoffice harness run {}", report.run_id);
        let _ = writeln!(out, "Target:   {} ({})", report.base_url, report.source);
        let _ = writeln!(out, "State:    {}", report.state);
        let _ = writeln!(out, "Result:   {}", if report.success { "PASSED" } else { "FAILED" });
        if let Some(reason) = &report.stop_reason {
            let _ = writeln!(out, "Stopped:  {}", reason);
        }
        let _ = writeln!(out);
        let _ = writeln!(out, "Total:    {}", summary.total);
        let _ = writeln!(out, "Passed:   {}", summary.passed);
        let _ = writeln!(out, "Failed:   {}", summary.failed);
        let _ = writeln!(out, "Errors:   {}", summary.errors);
        let _ = writeln!(out, "Skipped:  {}", summary.skipped);
        let _ = writeln!(out, "Critical: {}", summary.critical_failures);
        let _ = writeln!(out, "Success rate:          {:.1}%", summary.success_rate() * 100.0);
        let critical_rate = summary.critical_failure_rate() * 100.0;
        let _ = writeln!(out, "Critical failure rate: {:.1}%", critical_rate);
        let _ = writeln!(out, "Duration: {:.1}s", summary.duration_ms as f64 / 1000.0);
        let _ = writeln!(out, "Console errors: {}", report.console_error_count());
        let _ = writeln!(out, "Failed requests: {}", report.failed_request_count());
        let _ = writeln!(out);
        for phase in &report.phases {
            let marker = if phase.critical { " [critical]" } else { "" };
            let _ = write!(out, "  {:<8} {}{}", phase.status.as_str(), phase.name, marker);
            if let Some(error) = &phase.error {
                let _ = write!(out, ": {}", error);
            }
            let _ = writeln!(out);
        }
        out
    }

    pub fn render_html(&self, report: &RunReport) -> String {
        let summary = verified_summary(report);
        let critical = report.is_critical();
        let mut out = String::new();

        out.push_str("<!DOCTYPE html>\n<html lang=\"en\">\n<head>\n<meta charset=\"utf-8\">\n");
        let _ = writeln!(out, "<title>Harness report {}</title>", escape_html(&report.run_id));
        out.push_str(STYLE);
        out.push_str("</head>\n<body>\n");

        let header_class = if critical { "header critical" } else { "header" };
        let _ = writeln!(out, "<div class=\"{}\">", header_class);
        let _ = writeln!(out, "<h1>Backoffice harness report</h1>");
        let _ = writeln!(
            out,
            "<p>{} &middot; {} &middot; {} &middot; {}</p>",
            escape_html(&report.run_id),
            escape_html(&report.base_url),
            report.state,
            report.started_at.format("%Y-%m-%d %H:%M:%S UTC")
        );
        out.push_str("</div>\n");

        if critical {
            out.push_str("<div class=\"alert\">\n<h2>Critical failure</h2>\n");
            if let Some(reason) = &report.stop_reason {
                let _ = writeln!(
                    out,
                    "<p>Run stopped: <strong>{}</strong></p>",
                    escape_html(reason)
                );
            }
            out.push_str("<ul>\n");
            for record in &report.critical_failures {
                let _ = writeln!(
                    out,
                    "<li>{} <span class=\"muted\">{}</span></li>",
                    escape_html(&record.reason),
                    record.timestamp.format("%H:%M:%S%.3f")
                );
            }
            out.push_str("</ul>\n</div>\n");
        }

        out.push_str("<div class=\"summary\">\n");
        for (label, value) in [
            ("Total", summary.total),
            ("Passed", summary.passed),
            ("Failed", summary.failed),
            ("Errors", summary.errors),
            ("Skipped", summary.skipped),
            ("Critical", summary.critical_failures),
        ] {
            let _ = writeln!(
                out,
                "<div class=\"stat\"><b>{}</b><span>{}</span></div>",
                value, label
            );
        }
        let _ = writeln!(
            out,
            "<div class=\"stat\"><b>{:.1}%</b><span>Success rate</span></div>",
            summary.success_rate() * 100.0
        );
        let _ = writeln!(
            out,
            "<div class=\"stat\"><b>{:.1}s</b><span>Duration</span></div>",
            summary.duration_ms as f64 / 1000.0
        );
        out.push_str("</div>\n");

        out.push_str("<h2>Phases</h2>\n");
        for phase in &report.phases {
            self.render_phase(&mut out, phase, report);
        }

        let errors: Vec<&ConsoleEntry> = report.console.iter().filter(|e| e.is_error()).collect();
        if !errors.is_empty() {
            let _ = writeln!(
                out,
                "<h2>Browser errors ({})</h2>\n<ul class=\"console\">",
                errors.len()
            );
            for entry in errors {
                let _ = writeln!(
                    out,
                    "<li><span class=\"muted\">{}</span> {}</li>",
                    escape_html(&entry.phase),
                    escape_html(&entry.text)
                );
            }
            out.push_str("</ul>\n");
        }

        out.push_str(VIEWER);
        out.push_str("</body>\n</html>\n");
        out
    }

    fn render_phase(&self, out: &mut String, phase: &PhaseResult, report: &RunReport) {
        let open = if phase.status == PhaseStatus::Passed { "" } else { " open" };
        let _ = writeln!(out, "<details class=\"phase {}\"{}>", phase.status.as_str(), open);
        let _ = writeln!(
            out,
            "<summary><span class=\"badge\">{}</span> {}{} \
             <span class=\"muted\">{} ms</span></summary>",
            phase.status.as_str(),
            escape_html(&phase.name),
            if phase.critical { " <em>critical</em>" } else { "" },
            phase.duration_ms()
        );
        if let Some(error) = &phase.error {
            let _ = writeln!(out, "<p class=\"error\">{}</p>", escape_html(error));
        }

        let validations: Vec<&ValidationRecord> = report
            .validations
            .iter()
            .filter(|v| v.phase_name == phase.name)
            .collect();
        if !validations.is_empty() {
            out.push_str("<table>\n<tr><th>Validation</th><th>Status</th><th>Message</th></tr>\n");
            for v in validations {
                let _ = writeln!(
                    out,
                    "<tr><td>{}</td><td>{}</td><td>{}</td></tr>",
                    v.validation_type,
                    v.status,
                    escape_html(&v.message)
                );
            }
            out.push_str("</table>\n");
        }

        if !phase.details.is_empty() {
            let details = serde_json::to_string_pretty(&phase.details).unwrap_or_default();
            let _ = writeln!(out, "<pre>{}</pre>", escape_html(&details));
        }

        if !phase.screenshots.is_empty() {
            out.push_str("<div class=\"gallery\">\n");
            for shot in &phase.screenshots {
                self.render_screenshot(out, shot);
            }
            out.push_str("</div>\n");
        }
        out.push_str("</details>\n");
    }

    fn render_screenshot(&self, out: &mut String, shot: &ScreenshotRef) {
        let src = if self.embed_images {
            embed_png(&shot.file_path).unwrap_or_default()
        } else {
            shot.file_path.display().to_string()
        };
        let caption = format!("{} ({})", shot.description, shot.status_tag.as_str());
        if src.is_empty() {
            let _ = writeln!(
                out,
                "<figure class=\"missing\">\
                 <figcaption>{} - image unavailable</figcaption></figure>",
                escape_html(&caption)
            );
            return;
        }
        let _ = writeln!(
            out,
            "<figure><img src=\"{}\" alt=\"{}\" onclick=\"openViewer(this)\">\
             <figcaption>{}</figcaption></figure>",
            escape_html(&src),
            escape_html(&caption),
            escape_html(&caption)
        );
    }
}

/// `data:` URI for a PNG on disk, `None` when the file is missing or empty
fn embed_png(path: &Path) -> Option<String> {
    let bytes = fs::read(path).ok()?;
    if bytes.is_empty() {
        return None;
    }
    let encoded = base64::engine::general_purpose::STANDARD.encode(&bytes);
    Some(format!("data:image/png;base64,{}", encoded))
}

fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

const STYLE: &str = r#"<style>
body { font-family: system-ui, sans-serif; margin: 0; padding: 0 2rem 2rem; background: #f6f7f9; color: #1d2330; }
.header { background: #2d5be3; color: #fff; margin: 0 -2rem 1.5rem; padding: 1rem 2rem; }
.header.critical { background: #b3261e; }
.alert { border: 2px solid #b3261e; background: #fdecea; padding: 0.5rem 1rem; margin-bottom: 1.5rem; }
.summary { display: flex; gap: 1rem; flex-wrap: wrap; margin-bottom: 1.5rem; }
.stat { background: #fff; padding: 0.75rem 1rem; border-radius: 6px; min-width: 6rem; }
.stat b { display: block; font-size: 1.4rem; }
.phase { background: #fff; border-left: 4px solid #999; margin-bottom: 0.5rem; padding: 0.5rem 1rem; }
.phase.passed { border-color: #2e7d32; }
.phase.failed { border-color: #c62828; }
.phase.error { border-color: #ef6c00; }
.phase.skipped { border-color: #9e9e9e; opacity: 0.7; }
.badge { text-transform: uppercase; font-size: 0.75rem; font-weight: bold; }
.muted { color: #6b7280; font-size: 0.85rem; }
.error { color: #c62828; }
pre { background: #f0f2f5; padding: 0.5rem; overflow-x: auto; font-size: 0.8rem; }
table { border-collapse: collapse; margin: 0.5rem 0; }
td, th { border: 1px solid #ddd; padding: 0.25rem 0.5rem; text-align: left; }
.gallery { display: flex; gap: 0.75rem; flex-wrap: wrap; }
figure { margin: 0; width: 220px; }
figure img { width: 100%; cursor: zoom-in; border: 1px solid #ccc; }
figcaption { font-size: 0.75rem; }
#viewer { display: none; position: fixed; inset: 0; background: rgba(0,0,0,0.85); align-items: center; justify-content: center; cursor: zoom-out; }
#viewer img { max-width: 95vw; max-height: 95vh; }
</style>
"#;

const VIEWER: &str = r#"<div id="viewer" onclick="this.style.display='none'"><img alt=""></div>
<script>
function openViewer(img) {
  var viewer = document.getElementById('viewer');
  viewer.querySelector('img').src = img.src;
  viewer.style.display = 'flex';
}
</script>
"#;
