//! Outreach templates and body composition.

use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;
use tracing::info;

use crate::error::PipelineError;
use crate::pipeline::types::{JobRecord, SheetRow};

pub const DEFAULT_SUBJECT_TEMPLATE: &str = "Application for {role} - {company}";

pub const DEFAULT_BODY_TEMPLATE: &str = "Hi Hiring Team,\n\n\
I am interested in the {role} opportunity at {company}.\n\
I have experience in QA, automation testing, API testing, and Playwright.\n\n\
Location preference: {location}\n\
Experience fit: {experience}\n\
Relevant skills: {skills}\n\n\
Please find my CV attached.\n\n\
Best regards,\n\
{sender_name}\n";

static TAG_RE: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new(r"<[^>]+>").ok());
static BR_RE: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new(r"(?i)<br\s*/?>").ok());
static P_CLOSE_RE: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new(r"(?i)</p>").ok());
static PLACEHOLDER_RE: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r"\{(company|role|location|experience|skills|sender_name)\}").ok()
});

/// Read the body template, writing the default one first if the file is missing.
pub fn load_or_init_template(path: &Path) -> Result<String, PipelineError> {
    match std::fs::read_to_string(path) {
        Ok(text) => Ok(text),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent).map_err(|e| {
                    PipelineError::Template(format!("{}: {e}", parent.display()))
                })?;
            }
            std::fs::write(path, DEFAULT_BODY_TEMPLATE)
                .map_err(|e| PipelineError::Template(format!("{}: {e}", path.display())))?;
            info!(path = %path.display(), "Wrote default outreach template");
            Ok(DEFAULT_BODY_TEMPLATE.to_string())
        }
        Err(e) => Err(PipelineError::Template(format!("{}: {e}", path.display()))),
    }
}

/// Values substituted into subject and body templates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateFields {
    pub company: String,
    pub role: String,
    pub location: String,
    pub experience: String,
    pub skills: String,
    pub sender_name: String,
}

impl TemplateFields {
    /// Blank fields fall back to `Company`, `Role` and `N/A`.
    pub fn from_row(row: &SheetRow, sender_name: &str) -> Self {
        let or = |value: &str, fallback: &str| {
            let value = value.trim();
            if value.is_empty() {
                fallback.to_string()
            } else {
                value.to_string()
            }
        };
        Self {
            company: or(&row.company, "Company"),
            role: or(&row.role, "Role"),
            location: or(&row.location, "N/A"),
            experience: or(&row.experience, "N/A"),
            skills: or(&row.skills, "N/A"),
            sender_name: sender_name.to_string(),
        }
    }
}

/// `user@gmail.com` → `user`.
pub fn sender_name_from_address(address: &str) -> String {
    address.split('@').next().unwrap_or_default().to_string()
}

/// Substitute known `{placeholder}`s in one pass. Unknown braces are left
/// alone, and braces inside substituted values are never expanded.
pub fn render(template: &str, fields: &TemplateFields) -> String {
    let Some(re) = &*PLACEHOLDER_RE else {
        return template.to_string();
    };
    re.replace_all(template, |caps: &regex::Captures<'_>| match &caps[1] {
        "company" => fields.company.clone(),
        "role" => fields.role.clone(),
        "location" => fields.location.clone(),
        "experience" => fields.experience.clone(),
        "skills" => fields.skills.clone(),
        "sender_name" => fields.sender_name.clone(),
        _ => caps[0].to_string(),
    })
    .into_owned()
}

// ── Body composition ────────────────────────────────────────────────

/// Plain-text and HTML alternatives for one body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComposedBody {
    pub plain: String,
    pub html: String,
}

pub fn looks_like_html(text: &str) -> bool {
    match &*TAG_RE {
        Some(re) => re.is_match(text),
        None => false,
    }
}

/// HTML bodies keep their markup with line breaks made explicit (mail
/// clients collapse raw newlines). Plain bodies are escaped and wrapped.
pub fn compose_body(body: &str) -> ComposedBody {
    if looks_like_html(body) {
        ComposedBody {
            plain: html_to_plain(body),
            html: body.replace("\r\n", "\n").replace('\n', "<br>\n"),
        }
    } else {
        ComposedBody {
            plain: body.to_string(),
            html: format!(
                "<html><body>{}</body></html>",
                escape_html(body).replace('\n', "<br>\n")
            ),
        }
    }
}

fn html_to_plain(text: &str) -> String {
    let mut plain = text.to_string();
    for (re, with) in [(&*BR_RE, "\n"), (&*P_CLOSE_RE, "\n"), (&*TAG_RE, "")] {
        if let Some(re) = re {
            plain = re.replace_all(&plain, with).into_owned();
        }
    }
    unescape_html(&plain).trim().to_string()
}

fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            _ => out.push(ch),
        }
    }
    out
}

fn unescape_html(text: &str) -> String {
    text.replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&#x27;", "'")
        .replace("&amp;", "&")
}

// ── Job summary digest ──────────────────────────────────────────────

pub fn summary_subject(group_name: &str) -> String {
    format!("New Filtered Jobs - {group_name}")
}

pub fn summary_body(records: &[JobRecord]) -> String {
    let mut lines = vec![format!("Total new relevant jobs: {}", records.len()), String::new()];
    for (idx, job) in records.iter().enumerate() {
        lines.push(format!(
            "{}. {} at {}\n   Date: {}\n   Sender: {}\n   Location: {}\n   Experience: {}\n   Skills: {}\n   Contact Email: {}\n",
            idx + 1,
            job.role,
            job.company,
            job.date,
            job.sender,
            job.location,
            job.experience,
            job.skills,
            job.contact_email,
        ));
    }
    lines.join("\n")
}
