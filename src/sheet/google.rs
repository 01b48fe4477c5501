//! Google Sheets v4 values API over reqwest.
//!
//! Auth is a bearer token handed in by configuration; minting it (service
//! account JWT exchange) happens outside this process.

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, Url};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::{Column, HeaderMap, SheetService, column_letters, parse_grid};
use crate::error::SheetError;
use crate::pipeline::types::{JobRecord, SheetRow};

pub const DEFAULT_BASE_URL: &str = "https://sheets.googleapis.com";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Widest range read back. Ten known columns plus room for hand-added ones.
const READ_COLUMNS: &str = "A1:Z";

#[derive(Deserialize)]
struct ValueRange {
    #[serde(default)]
    values: Vec<Vec<serde_json::Value>>,
}

#[derive(Serialize)]
struct ValueBody<'a> {
    values: &'a [Vec<String>],
}

pub struct GoogleSheet {
    client: Client,
    token: SecretString,
    base_url: String,
    spreadsheet_id: String,
    worksheet: String,
    /// Header resolved on first use; refreshed by `ensure_header`.
    header: Mutex<Option<HeaderMap>>,
}

impl GoogleSheet {
    pub fn new(
        token: SecretString,
        spreadsheet_id: impl Into<String>,
        worksheet: impl Into<String>,
    ) -> Result<Self, SheetError> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| SheetError::Request(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            token,
            base_url: DEFAULT_BASE_URL.to_string(),
            spreadsheet_id: spreadsheet_id.into(),
            worksheet: worksheet.into(),
            header: Mutex::new(None),
        })
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    /// `'Sheet Name'!A1` style range. Quotes inside the name are doubled.
    fn range(&self, cells: &str) -> String {
        format!("'{}'!{}", self.worksheet.replace('\'', "''"), cells)
    }

    /// `.../v4/spreadsheets/{id}/values/{segment}` with the segment encoded.
    fn values_url(&self, segment: &str) -> Result<Url, SheetError> {
        let mut url = Url::parse(&self.base_url)
            .map_err(|e| SheetError::Request(format!("Invalid base URL: {e}")))?;
        url.path_segments_mut()
            .map_err(|_| SheetError::Request("base URL cannot carry a path".to_string()))?
            .pop_if_empty()
            .extend(["v4", "spreadsheets", self.spreadsheet_id.as_str(), "values", segment]);
        Ok(url)
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        self.client
            .request(method, url)
            .bearer_auth(self.token.expose_secret())
    }

    async fn send(&self, builder: RequestBuilder) -> Result<reqwest::Response, SheetError> {
        let response = builder
            .send()
            .await
            .map_err(|e| SheetError::Request(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SheetError::Api {
                status: status.as_u16(),
                body: body.chars().take(300).collect(),
            });
        }
        Ok(response)
    }

    async fn get_values(&self, cells: &str) -> Result<Vec<Vec<String>>, SheetError> {
        let url = self.values_url(&self.range(cells))?;
        let response = self.send(self.request(Method::GET, url)).await?;
        let parsed: ValueRange = response
            .json()
            .await
            .map_err(|e| SheetError::InvalidResponse(e.to_string()))?;
        Ok(parsed
            .values
            .into_iter()
            .map(|row| row.into_iter().map(cell_text).collect())
            .collect())
    }

    async fn put_values(&self, cells: &str, values: &[Vec<String>]) -> Result<(), SheetError> {
        let url = self.values_url(&self.range(cells))?;
        let builder = self
            .request(Method::PUT, url)
            .query(&[("valueInputOption", "USER_ENTERED")])
            .json(&ValueBody { values });
        self.send(builder).await?;
        Ok(())
    }

    fn cached_header(&self) -> Option<HeaderMap> {
        self.header.lock().ok().and_then(|guard| guard.clone())
    }

    fn cache_header(&self, header: HeaderMap) {
        if let Ok(mut guard) = self.header.lock() {
            *guard = Some(header);
        }
    }

    async fn header(&self) -> Result<HeaderMap, SheetError> {
        if let Some(header) = self.cached_header() {
            return Ok(header);
        }
        let rows = self.get_values("1:1").await?;
        let header = HeaderMap::from_row(rows.first().map(Vec::as_slice).unwrap_or(&[]));
        if !header.is_empty() {
            self.cache_header(header.clone());
        }
        Ok(header)
    }
}

/// Sheets returns strings for USER_ENTERED text but numbers/bools for typed cells.
fn cell_text(value: serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s,
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    }
}

#[async_trait]
impl SheetService for GoogleSheet {
    async fn read_all_rows(&self) -> Result<Vec<SheetRow>, SheetError> {
        let grid = self.get_values(READ_COLUMNS).await?;
        if let Some(first) = grid.first() {
            let header = HeaderMap::from_row(first);
            if !header.is_empty() {
                self.cache_header(header);
            }
        }
        let rows = parse_grid(&grid);
        debug!(worksheet = %self.worksheet, rows = rows.len(), "Read sheet rows");
        Ok(rows)
    }

    async fn append_row(&self, record: &JobRecord) -> Result<(), SheetError> {
        let mut header = self.header().await?;
        if header.is_empty() {
            self.ensure_header().await?;
            header = self.header().await?;
        }
        let cells = header.cells_for(record)?;

        let url = self.values_url(&format!("{}:append", self.range("A1")))?;
        let builder = self
            .request(Method::POST, url)
            .query(&[
                ("valueInputOption", "USER_ENTERED"),
                ("insertDataOption", "INSERT_ROWS"),
            ])
            .json(&ValueBody {
                values: &[cells],
            });
        self.send(builder).await?;
        Ok(())
    }

    async fn update_cell(
        &self,
        row_number: usize,
        column: Column,
        value: &str,
    ) -> Result<(), SheetError> {
        let header = self.header().await?;
        let index = header.require(column)?;
        let a1 = format!("{}{}", column_letters(index), row_number);
        self.put_values(&a1, &[vec![value.to_string()]]).await
    }

    async fn ensure_header(&self) -> Result<(), SheetError> {
        let rows = self.get_values("1:1").await?;
        let current = HeaderMap::from_row(rows.first().map(Vec::as_slice).unwrap_or(&[]));
        let Some(titles) = current.completed() else {
            self.cache_header(current);
            return Ok(());
        };

        let last = column_letters(titles.len().saturating_sub(1));
        self.put_values(&format!("A1:{last}1"), std::slice::from_ref(&titles))
            .await?;
        info!(worksheet = %self.worksheet, columns = titles.len(), "Updated sheet header");
        self.cache_header(HeaderMap::from_row(&titles));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sheet(worksheet: &str) -> GoogleSheet {
        GoogleSheet::new(SecretString::from("token"), "sheet-id", worksheet).unwrap()
    }

    #[test]
    fn range_quotes_worksheet_name() {
        let s = sheet("Filtered Jobs");
        assert_eq!(s.range("A1:Z"), "'Filtered Jobs'!A1:Z");
        assert_eq!(sheet("Bob's").range("A1"), "'Bob''s'!A1");
    }

    #[test]
    fn values_url_encodes_range() {
        let s = sheet("Filtered Jobs");
        let url = s.values_url(&s.range("A1:Z")).unwrap();
        let text = url.as_str();
        assert!(text.starts_with(
            "https://sheets.googleapis.com/v4/spreadsheets/sheet-id/values/"
        ));
        assert!(text.contains("Filtered%20Jobs"));
        assert!(!text.contains(' '));
    }

    #[test]
    fn values_url_respects_base_path() {
        let s = sheet("Jobs").with_base_url("http://localhost:8080/proxy/");
        let url = s.values_url("Jobs!A1").unwrap();
        assert!(url.as_str().starts_with("http://localhost:8080/proxy/v4/spreadsheets/"));
    }

    #[test]
    fn typed_cells_become_text() {
        assert_eq!(cell_text(serde_json::json!(42)), "42");
        assert_eq!(cell_text(serde_json::json!("x")), "x");
        assert_eq!(cell_text(serde_json::Value::Null), "");
    }
}
