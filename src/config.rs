//! Configuration loaded from the environment.
//!
//! Everything is optional at load time; the mode being run asks for what it
//! needs through the `require_*` accessors, so `health` does not demand SMTP
//! credentials and `outreach` does not demand an LLM key.

use std::path::PathBuf;
use std::time::Duration;

use secrecy::SecretString;

use crate::error::ConfigError;
use crate::llm::LlmConfig;
use crate::mail::SmtpConfig;
use crate::mail::template::DEFAULT_SUBJECT_TEMPLATE;
use crate::pipeline::extraction::DEFAULT_CV_KEYWORDS;
use crate::sheet::parse_sheet_id;

pub const DEFAULT_GROUP_NAME: &str = "Qa Paid Experience";
pub const DEFAULT_MODEL: &str = "openai/gpt-4o-mini";
pub const DEFAULT_SITE_NAME: &str = "Job Scrapping - Whatsapp";
pub const DEFAULT_WORKSHEET: &str = "Filtered Jobs";

/// What the binary does this invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Scrape → extract → write, then optionally outreach.
    Run,
    /// Outreach only.
    Outreach,
    /// Poll the sheet and run outreach when rows are added.
    Watch,
    /// Check the LLM provider (and the sheet, when configured).
    Health,
}

impl std::str::FromStr for Mode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "run" | "main" => Ok(Mode::Run),
            "outreach" => Ok(Mode::Outreach),
            "watch" => Ok(Mode::Watch),
            "health" => Ok(Mode::Health),
            other => Err(ConfigError::InvalidValue {
                key: "JOBFEED_MODE".into(),
                message: format!("unknown mode '{other}' (expected run, outreach, watch, health)"),
            }),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SheetConfig {
    pub spreadsheet_id: String,
    pub access_token: SecretString,
    pub worksheet: String,
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub mode: Mode,
    pub data_dir: PathBuf,
    pub log_dir: PathBuf,
    pub group_name: String,
    pub scroll_window_secs: u64,
    pub cv_keywords: Vec<String>,
    pub summary_recipient: Option<String>,
    pub run_outreach_on_main: bool,
    pub outreach_limit: usize,
    pub template_file: PathBuf,
    pub subject_template: String,
    pub cv_file_path: Option<PathBuf>,
    pub watch_interval: Duration,
    pub watch_send_on_start: bool,
    llm: Option<LlmConfig>,
    sheet: Option<SheetConfig>,
    mail: Option<SmtpConfig>,
}

/// Values that mean "not configured" (left over from `.env.example`).
fn clean(value: Option<String>) -> Option<String> {
    let value = value?.trim().to_string();
    match value.to_lowercase().as_str() {
        "" | "replace_me" | "none" | "null" => None,
        _ => Some(value),
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key: key.into(),
            message: format!("expected a boolean, got '{value}'"),
        }),
    }
}

fn parse_num<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    value.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
        key: key.into(),
        message: e.to_string(),
    })
}

impl PipelineConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key → value source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |key: &str| clean(lookup(key));
        let or = |key: &str, default: &str| get(key).unwrap_or_else(|| default.to_string());

        let mode = match get("JOBFEED_MODE") {
            Some(m) => m.parse()?,
            None => Mode::Run,
        };

        let scroll_window_secs = match get("SCROLL_WINDOW_SECS") {
            Some(v) => parse_num("SCROLL_WINDOW_SECS", &v)?,
            None => 30,
        };
        let outreach_limit = match get("OUTREACH_LIMIT") {
            Some(v) => parse_num("OUTREACH_LIMIT", &v)?,
            None => 0,
        };
        let watch_interval_secs: u64 = match get("SHEET_WATCH_INTERVAL_SECS") {
            Some(v) => parse_num("SHEET_WATCH_INTERVAL_SECS", &v)?,
            None => 60,
        };
        if watch_interval_secs == 0 {
            return Err(ConfigError::InvalidValue {
                key: "SHEET_WATCH_INTERVAL_SECS".into(),
                message: "must be at least 1".into(),
            });
        }
        let run_outreach_on_main = match get("RUN_OUTREACH_ON_MAIN") {
            Some(v) => parse_bool("RUN_OUTREACH_ON_MAIN", &v)?,
            None => true,
        };
        let watch_send_on_start = match get("SHEET_WATCH_SEND_ON_START") {
            Some(v) => parse_bool("SHEET_WATCH_SEND_ON_START", &v)?,
            None => false,
        };

        let cv_keywords = match get("CV_KEYWORDS") {
            Some(list) => list
                .split(',')
                .map(|k| k.trim().to_string())
                .filter(|k| !k.is_empty())
                .collect(),
            None => DEFAULT_CV_KEYWORDS.iter().map(|k| k.to_string()).collect(),
        };

        let llm = get("OPENROUTER_API_KEY").map(|key| LlmConfig {
            api_key: SecretString::from(key),
            model: or("OPENROUTER_MODEL", DEFAULT_MODEL),
            site_url: or("OPENROUTER_SITE_URL", ""),
            site_name: or("OPENROUTER_SITE_NAME", DEFAULT_SITE_NAME),
            base_url: get("OPENROUTER_BASE_URL"),
        });

        let spreadsheet_id = get("GOOGLE_SHEET_ID")
            .or_else(|| get("GOOGLE_SHEET_URL"))
            .map(|v| parse_sheet_id(&v));
        let sheet = match (spreadsheet_id, get("GOOGLE_SHEETS_ACCESS_TOKEN")) {
            (Some(spreadsheet_id), Some(token)) => Some(SheetConfig {
                spreadsheet_id,
                access_token: SecretString::from(token),
                worksheet: or("OUTREACH_WORKSHEET", DEFAULT_WORKSHEET),
            }),
            _ => None,
        };

        let smtp_port = match get("SMTP_PORT") {
            Some(v) => parse_num("SMTP_PORT", &v)?,
            None => 587,
        };
        let mail = match (get("GMAIL_USER"), get("GMAIL_APP_PASSWORD")) {
            (Some(user), Some(password)) => Some(SmtpConfig {
                host: or("SMTP_HOST", "smtp.gmail.com"),
                port: smtp_port,
                from_address: user.clone(),
                username: user,
                password: SecretString::from(password),
            }),
            _ => None,
        };

        Ok(Self {
            mode,
            data_dir: PathBuf::from(or("JOBFEED_DATA_DIR", "./data")),
            log_dir: PathBuf::from(or("JOBFEED_LOG_DIR", "./logs")),
            group_name: or("GROUP_NAME", DEFAULT_GROUP_NAME),
            scroll_window_secs,
            cv_keywords,
            summary_recipient: get("SUMMARY_RECIPIENT"),
            run_outreach_on_main,
            outreach_limit,
            template_file: PathBuf::from(or(
                "OUTREACH_TEMPLATE_FILE",
                "./templates/company_email_template.txt",
            )),
            subject_template: or("OUTREACH_SUBJECT_TEMPLATE", DEFAULT_SUBJECT_TEMPLATE),
            cv_file_path: get("CV_FILE_PATH").map(PathBuf::from),
            watch_interval: Duration::from_secs(watch_interval_secs),
            watch_send_on_start,
            llm,
            sheet,
            mail,
        })
    }

    pub fn require_llm(&self) -> Result<&LlmConfig, ConfigError> {
        self.llm
            .as_ref()
            .ok_or_else(|| ConfigError::MissingEnvVar("OPENROUTER_API_KEY".into()))
    }

    pub fn require_sheet(&self) -> Result<&SheetConfig, ConfigError> {
        self.sheet.as_ref().ok_or_else(|| {
            ConfigError::MissingEnvVar(
                "GOOGLE_SHEET_ID (or GOOGLE_SHEET_URL) and GOOGLE_SHEETS_ACCESS_TOKEN".into(),
            )
        })
    }

    pub fn require_mail(&self) -> Result<&SmtpConfig, ConfigError> {
        self.mail
            .as_ref()
            .ok_or_else(|| ConfigError::MissingEnvVar("GMAIL_USER and GMAIL_APP_PASSWORD".into()))
    }

    pub fn require_cv_file(&self) -> Result<&PathBuf, ConfigError> {
        let path = self
            .cv_file_path
            .as_ref()
            .ok_or_else(|| ConfigError::MissingEnvVar("CV_FILE_PATH".into()))?;
        if !path.is_file() {
            return Err(ConfigError::InvalidValue {
                key: "CV_FILE_PATH".into(),
                message: format!("{} does not exist", path.display()),
            });
        }
        Ok(path)
    }

    pub fn sheet(&self) -> Option<&SheetConfig> {
        self.sheet.as_ref()
    }

    pub fn mail(&self) -> Option<&SmtpConfig> {
        self.mail.as_ref()
    }

    /// Whether this invocation sends outreach email.
    pub fn outreach_enabled(&self) -> bool {
        match self.mode {
            Mode::Run => self.run_outreach_on_main,
            Mode::Outreach | Mode::Watch => true,
            Mode::Health => false,
        }
    }

    /// Fail fast on everything the selected mode needs.
    pub fn validate(&self) -> Result<(), ConfigError> {
        match self.mode {
            Mode::Health => {
                self.require_llm()?;
            }
            Mode::Run => {
                self.require_llm()?;
                self.require_sheet()?;
                if self.summary_recipient.is_some() {
                    self.require_mail()?;
                }
            }
            Mode::Outreach | Mode::Watch => {
                self.require_sheet()?;
            }
        }
        if self.outreach_enabled() {
            self.require_mail()?;
            self.require_cv_file()?;
        }
        Ok(())
    }
}
