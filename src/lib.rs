//! jobfeed — chat-group job postings to a spreadsheet, with deduplicated outreach.

pub mod config;
pub mod connectivity;
pub mod error;
pub mod llm;
pub mod mail;
pub mod pipeline;
pub mod scrape;
pub mod sheet;
pub mod store;

#[cfg(test)]
pub(crate) mod testing;
