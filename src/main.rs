use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, Layer};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use jobfeed::config::{Mode, PipelineConfig};
use jobfeed::connectivity::ConnectivityCheck;
use jobfeed::error::{ConfigError, Error};
use jobfeed::llm::{create_provider, health_check};
use jobfeed::mail::template::{load_or_init_template, sender_name_from_address};
use jobfeed::mail::{MailService, SmtpMailer};
use jobfeed::pipeline::extraction::LlmClassifier;
use jobfeed::pipeline::outreach::OutreachSettings;
use jobfeed::pipeline::{OutreachRunner, Pipeline, PipelineSettings, RunOutcome, SheetWatcher};
use jobfeed::scrape::{STAGING_FILE, StagingFileScraper};
use jobfeed::sheet::{self, GoogleSheet, SheetService};

const HEALTH_PROMPT: &str = r#"Reply with JSON only: {"ok": true}"#;

const LOG_FILE: &str = "automation.log";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Install rustls crypto provider before any TLS usage
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    let _ = dotenvy::dotenv();
    let config = PipelineConfig::from_env()?;

    std::fs::create_dir_all(&config.log_dir)
        .with_context(|| format!("creating log dir {}", config.log_dir.display()))?;
    std::fs::create_dir_all(&config.data_dir)
        .with_context(|| format!("creating data dir {}", config.data_dir.display()))?;
    let _log_guard = init_tracing(&config.log_dir);

    eprintln!("📋 jobfeed v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Mode: {:?}", config.mode);
    eprintln!("   Group: {}", config.group_name);
    eprintln!("   Data: {}", config.data_dir.display());

    config.validate()?;

    match config.mode {
        Mode::Health => run_health(&config).await?,
        Mode::Run => run_pipeline(&config).await?,
        Mode::Outreach => run_outreach(&config).await?,
        Mode::Watch => run_watch(&config).await?,
    }
    Ok(())
}

/// Stdout plus the append-only diagnostic log file.
fn init_tracing(log_dir: &Path) -> tracing_appender::non_blocking::WorkerGuard {
    let env_filter =
        || EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let file_appender = tracing_appender::rolling::never(log_dir, LOG_FILE);
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_filter(env_filter()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(file_writer)
                .with_ansi(false)
                .with_filter(env_filter()),
        )
        .init();
    guard
}

async fn run_health(config: &PipelineConfig) -> Result<(), Error> {
    let llm = create_provider(config.require_llm()?)?;
    match health_check(llm.as_ref(), HEALTH_PROMPT).await {
        Ok(reply) => info!(model = llm.model_name(), reply = %reply, "AI health check OK"),
        Err(e) => {
            error!(model = llm.model_name(), error = %e, "AI health check failed");
            return Err(e.into());
        }
    }

    if config.sheet().is_some() {
        let service = build_sheet(config)?;
        match sheet::check_access(service.as_ref()).await {
            Ok(rows) => info!(rows, "Sheet health check OK"),
            Err(e) => {
                error!(error = %e, "Sheet health check failed");
                return Err(e.into());
            }
        }
    }
    Ok(())
}

fn build_sheet(config: &PipelineConfig) -> Result<Arc<dyn SheetService>, Error> {
    let sheet = config.require_sheet()?;
    Ok(Arc::new(GoogleSheet::new(
        sheet.access_token.clone(),
        &sheet.spreadsheet_id,
        &sheet.worksheet,
    )?))
}

fn build_outreach(
    config: &PipelineConfig,
    sheet: Arc<dyn SheetService>,
    mailer: Arc<dyn MailService>,
) -> Result<OutreachRunner, Error> {
    let smtp = config.require_mail()?;
    let settings = OutreachSettings {
        subject_template: config.subject_template.clone(),
        body_template: load_or_init_template(&config.template_file)?,
        sender_name: sender_name_from_address(&smtp.username),
        attachment: Some(config.require_cv_file()?.clone()),
        limit: config.outreach_limit,
    };
    Ok(OutreachRunner::new(sheet, mailer, settings, &config.data_dir)
        .with_connectivity_check(ConnectivityCheck::with_defaults()?))
}

fn build_mailer(config: &PipelineConfig) -> Option<Arc<dyn MailService>> {
    config
        .mail()
        .map(|smtp| Arc::new(SmtpMailer::new(smtp.clone())) as Arc<dyn MailService>)
}

fn require_mailer(config: &PipelineConfig) -> Result<Arc<dyn MailService>, ConfigError> {
    build_mailer(config)
        .ok_or_else(|| ConfigError::MissingEnvVar("GMAIL_USER and GMAIL_APP_PASSWORD".into()))
}

async fn run_pipeline(config: &PipelineConfig) -> Result<(), Error> {
    let llm = create_provider(config.require_llm()?)?;
    let classifier = Arc::new(LlmClassifier::new(llm, config.cv_keywords.clone()));
    let scraper = Arc::new(StagingFileScraper::new(config.data_dir.join(STAGING_FILE)));
    let sheet = build_sheet(config)?;

    let mut pipeline = Pipeline::new(
        scraper,
        classifier,
        sheet.clone(),
        PipelineSettings {
            group_name: config.group_name.clone(),
            scroll_window_secs: config.scroll_window_secs,
            data_dir: config.data_dir.clone(),
            summary_recipient: config.summary_recipient.clone(),
            run_outreach: config.run_outreach_on_main,
        },
    );
    if let Some(mailer) = build_mailer(config) {
        if config.run_outreach_on_main {
            pipeline = pipeline.with_outreach(build_outreach(config, sheet, mailer.clone())?);
        }
        pipeline = pipeline.with_mailer(mailer);
    }

    match pipeline.run().await? {
        RunOutcome::Skipped => info!("Run skipped: another run is in progress"),
        RunOutcome::Completed(report) => info!(
            scraped = report.scraped,
            new = report.new_messages,
            relevant = report.relevant,
            appended = report.appended,
            duplicates = report.duplicates_suppressed,
            outreach_sent = report.outreach.as_ref().map(|o| o.sent).unwrap_or(0),
            "Run finished"
        ),
    }
    Ok(())
}

async fn run_outreach(config: &PipelineConfig) -> Result<(), Error> {
    let sheet = build_sheet(config)?;
    let mailer = require_mailer(config)?;
    let runner = build_outreach(config, sheet, mailer)?;

    match runner.run().await? {
        RunOutcome::Skipped => info!("Outreach skipped: another run is in progress"),
        RunOutcome::Completed(report) => info!(
            eligible = report.eligible,
            sent = report.sent,
            failed = report.failed,
            "Outreach finished"
        ),
    }
    Ok(())
}

async fn run_watch(config: &PipelineConfig) -> Result<(), Error> {
    let sheet = build_sheet(config)?;
    let mailer = require_mailer(config)?;
    let runner = build_outreach(config, sheet.clone(), mailer)?;
    let watcher = SheetWatcher::new(
        sheet,
        runner,
        &config.data_dir,
        config.watch_interval,
        config.watch_send_on_start,
    );

    watcher
        .run(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "Failed to listen for shutdown signal");
                std::future::pending::<()>().await;
            }
        })
        .await;
    Ok(())
}
