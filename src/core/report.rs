use crate::config::project_config::NotifyOn;
use crate::domain::model::{BadgeStatus, Job, JobState};
use serde::Serialize;

/// Overall badge state of the latest job of each workflow.
pub fn badge_status(latest: &[Job]) -> BadgeStatus {
    if latest.is_empty() {
        return BadgeStatus::Unknown;
    }
    if latest.iter().any(|j| !j.state.is_terminal()) {
        return BadgeStatus::Running;
    }
    if latest.iter().any(|j| j.state == JobState::Errored) {
        return BadgeStatus::Error;
    }
    if latest.iter().any(|j| j.state == JobState::Failed) {
        return BadgeStatus::Failing;
    }
    BadgeStatus::Passing
}

/// Shields.io endpoint badge document.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ShieldsEndpoint {
    pub schema_version: u8,
    pub label: String,
    pub message: String,
    pub color: String,
}

pub fn shields_endpoint(label: &str, status: BadgeStatus) -> ShieldsEndpoint {
    ShieldsEndpoint {
        schema_version: 1,
        label: label.to_string(),
        message: status.message().to_string(),
        color: status.color().to_string(),
    }
}

fn color_hex(color: &str) -> &'static str {
    match color {
        "brightgreen" => "#4c1",
        "red" => "#e05d44",
        "orange" => "#fe7d37",
        "yellow" => "#dfb317",
        _ => "#9f9f9f",
    }
}

fn escape_xml(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

/// Approximate Verdana 11px width.
fn text_width(text: &str) -> u32 {
    text.chars().map(|c| if c.is_ascii_uppercase() { 8 } else { 7 }).sum::<u32>() + 10
}

/// Flat-style SVG badge.
pub fn render_svg(label: &str, message: &str, color: &str) -> String {
    let label_width = text_width(label);
    let message_width = text_width(message);
    let width = label_width + message_width;
    let label = escape_xml(label);
    let message = escape_xml(message);
    let fill = color_hex(color);

    format!(
        r##"<svg xmlns="http://www.w3.org/2000/svg" width="{width}" height="20" role="img" aria-label="{label}: {message}"><title>{label}: {message}</title><linearGradient id="s" x2="0" y2="100%"><stop offset="0" stop-color="#bbb" stop-opacity=".1"/><stop offset="1" stop-opacity=".1"/></linearGradient><clipPath id="r"><rect width="{width}" height="20" rx="3" fill="#fff"/></clipPath><g clip-path="url(#r)"><rect width="{label_width}" height="20" fill="#555"/><rect x="{label_width}" width="{message_width}" height="20" fill="{fill}"/><rect width="{width}" height="20" fill="url(#s)"/></g><g fill="#fff" text-anchor="middle" font-family="Verdana,Geneva,DejaVu Sans,sans-serif" font-size="11"><text x="{label_x}" y="14">{label}</text><text x="{message_x}" y="14">{message}</text></g></svg>"##,
        width = width,
        label_width = label_width,
        message_width = message_width,
        fill = fill,
        label = label,
        message = message,
        label_x = label_width / 2,
        message_x = label_width + message_width / 2,
    )
}

/// One-line summary used for commit statuses and email subjects.
pub fn describe(job: &Job) -> String {
    let Some(result) = &job.result else {
        return match job.state {
            JobState::Queued => "Queued".to_string(),
            _ => "Running".to_string(),
        };
    };

    match job.state {
        JobState::Passed => match &result.tests {
            Some(tests) => format!(
                "{}/{} tests passed in {}s",
                tests.passed, tests.total, result.duration_secs
            ),
            None => format!("Passed in {}s", result.duration_secs),
        },
        JobState::Failed => match &result.tests {
            Some(tests) if tests.failed > 0 => {
                format!("failed: {} of {} tests", tests.failed, tests.total)
            }
            _ => format!(
                "failed: {}",
                result.error.as_deref().unwrap_or("non-zero exit status")
            ),
        },
        JobState::Errored => format!(
            "errored: {}",
            result.error.as_deref().unwrap_or("unknown error")
        ),
        JobState::Queued | JobState::Running => "Running".to_string(),
    }
}

/// Whether a finished job warrants an email under `on`.
pub fn should_email(on: NotifyOn, job: &Job, previous: Option<&Job>) -> bool {
    if !job.state.is_terminal() {
        return false;
    }
    match on {
        NotifyOn::Always => true,
        NotifyOn::Failure => matches!(job.state, JobState::Failed | JobState::Errored),
        NotifyOn::Change => previous.map_or(true, |p| p.state != job.state),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EmailMessage {
    pub from: String,
    pub to: Vec<String>,
    pub subject: String,
    pub text: String,
}

pub fn render_email(job: &Job, from: &str, to: &[String], job_url: &str) -> EmailMessage {
    let subject = format!(
        "[opencorps] {}@{} {}: {} ({})",
        job.project,
        job.commit.branch,
        job.workflow.name,
        job.state,
        job.commit.short_sha()
    );

    let mut text = format!(
        "Workflow:  {}\nProject:   {}\nBranch:    {}\nCommit:    {} by {}\n           {}\nResult:    {}\n",
        job.workflow.name,
        job.project,
        job.commit.branch,
        job.commit.sha,
        job.commit.author,
        job.commit.message.lines().next().unwrap_or(""),
        describe(job),
    );

    if let Some(result) = &job.result {
        if let Some(coverage) = result.coverage {
            text.push_str(&format!("Coverage:  {:.1}%\n", coverage));
        }
        if !result.utilization.is_empty() {
            text.push_str("Utilization:\n");
            for (resource, count) in &result.utilization {
                text.push_str(&format!("  {:<20} {}\n", resource, count));
            }
        }
        if !result.log_tail.is_empty() {
            let tail = crate::core::toolchain::log_tail(&result.log_tail, 40);
            text.push_str("\nLast lines of output:\n");
            text.push_str(&tail);
            text.push('\n');
        }
    }
    text.push_str(&format!("\nDetails: {}\n", job_url));

    EmailMessage {
        from: from.to_string(),
        to: to.to_vec(),
        subject,
        text,
    }
}
