//! The job pipeline.
//!
//! Every run flows through:
//! 1. `Scraper::fetch_messages()` — raw chat messages
//! 2. `dedup::new_messages()` — only what came after the watermark
//! 3. `ExtractionStage::run()` — LLM classification into job records
//! 4. `SheetWriter::write()` — append rows not already in the sheet
//! 5. `OutreachStage::run()` — email contacts nobody has emailed yet
//!
//! **The watermark moves only after a successful write.** A run that fails
//! part-way leaves it where it was and the next run repeats the work; the
//! sheet and sent-tracker dedup make the repeat harmless.

pub mod dedup;
pub mod extraction;
pub mod orchestrator;
pub mod outreach;
pub mod sheet_writer;
pub mod types;
pub mod watcher;

pub use orchestrator::{OutreachRunner, Pipeline, PipelineSettings, RunOutcome, RunReport};
pub use watcher::SheetWatcher;
