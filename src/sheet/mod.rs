//! Spreadsheet access.
//!
//! Rows are addressed by header name, not position: the header row is read,
//! each cell normalized (trim, lowercase, spaces → `_`) and matched against
//! [`Column::key`]. Hand-edited sheets with reordered or extra columns keep
//! working.

pub mod google;
pub mod memory;

pub use google::GoogleSheet;
pub use memory::MemorySheet;

use std::collections::HashMap;

use async_trait::async_trait;
use regex::Regex;

use crate::error::SheetError;
use crate::pipeline::types::{JobRecord, SheetRow};

/// A spreadsheet holding job rows.
#[async_trait]
pub trait SheetService: Send + Sync {
    /// All data rows (header excluded), in sheet order.
    async fn read_all_rows(&self) -> Result<Vec<SheetRow>, SheetError>;

    /// Append one job row.
    async fn append_row(&self, record: &JobRecord) -> Result<(), SheetError>;

    /// Overwrite one cell. `row_number` is 1-based, header is row 1.
    async fn update_cell(
        &self,
        row_number: usize,
        column: Column,
        value: &str,
    ) -> Result<(), SheetError>;

    /// Make sure every known column has a header cell.
    async fn ensure_header(&self) -> Result<(), SheetError>;
}

// ── Columns ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Column {
    Date,
    Company,
    Role,
    Location,
    Experience,
    Skills,
    ContactEmail,
    OutreachStatus,
    OutreachSentAt,
    OutreachError,
}

impl Column {
    pub const ALL: [Column; 10] = [
        Column::Date,
        Column::Company,
        Column::Role,
        Column::Location,
        Column::Experience,
        Column::Skills,
        Column::ContactEmail,
        Column::OutreachStatus,
        Column::OutreachSentAt,
        Column::OutreachError,
    ];

    /// Columns written on append, in `JobRecord::to_cells` order.
    pub const DATA: [Column; 7] = [
        Column::Date,
        Column::Company,
        Column::Role,
        Column::Location,
        Column::Experience,
        Column::Skills,
        Column::ContactEmail,
    ];

    /// Header text as written to a fresh sheet.
    pub fn title(self) -> &'static str {
        match self {
            Column::Date => "Date",
            Column::Company => "Company",
            Column::Role => "Role",
            Column::Location => "Location",
            Column::Experience => "Experience",
            Column::Skills => "Skills",
            Column::ContactEmail => "Contact Email",
            Column::OutreachStatus => "Outreach Status",
            Column::OutreachSentAt => "Outreach Sent At",
            Column::OutreachError => "Outreach Error",
        }
    }

    /// Normalized header key.
    pub fn key(self) -> &'static str {
        match self {
            Column::Date => "date",
            Column::Company => "company",
            Column::Role => "role",
            Column::Location => "location",
            Column::Experience => "experience",
            Column::Skills => "skills",
            Column::ContactEmail => "contact_email",
            Column::OutreachStatus => "outreach_status",
            Column::OutreachSentAt => "outreach_sent_at",
            Column::OutreachError => "outreach_error",
        }
    }
}

pub fn normalize_header(name: &str) -> String {
    name.trim().to_lowercase().replace(' ', "_")
}

// ── Header layout ───────────────────────────────────────────────────

/// Column positions (0-based) resolved from a header row.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderMap {
    titles: Vec<String>,
    positions: HashMap<String, usize>,
}

impl HeaderMap {
    pub fn from_row(row: &[String]) -> Self {
        let mut positions = HashMap::new();
        for (i, cell) in row.iter().enumerate() {
            // First occurrence wins on duplicate headers.
            positions.entry(normalize_header(cell)).or_insert(i);
        }
        Self {
            titles: row.to_vec(),
            positions,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.titles.iter().all(|t| t.trim().is_empty())
    }

    pub fn titles(&self) -> &[String] {
        &self.titles
    }

    pub fn position(&self, column: Column) -> Option<usize> {
        self.positions.get(column.key()).copied()
    }

    pub fn require(&self, column: Column) -> Result<usize, SheetError> {
        self.position(column)
            .ok_or_else(|| SheetError::MissingColumn(column.title().to_string()))
    }

    /// Header row with any missing known columns appended on the right.
    /// `None` when nothing is missing.
    pub fn completed(&self) -> Option<Vec<String>> {
        if self.is_empty() {
            return Some(Column::ALL.iter().map(|c| c.title().to_string()).collect());
        }
        let missing: Vec<String> = Column::ALL
            .iter()
            .filter(|c| self.position(**c).is_none())
            .map(|c| c.title().to_string())
            .collect();
        if missing.is_empty() {
            return None;
        }
        let mut titles = self.titles.clone();
        // Trailing blank header cells would push new columns too far right.
        while titles.last().is_some_and(|t| t.trim().is_empty()) {
            titles.pop();
        }
        titles.extend(missing);
        Some(titles)
    }

    /// Cells for an appended record, laid out under this header.
    pub fn cells_for(&self, record: &JobRecord) -> Result<Vec<String>, SheetError> {
        let values = record.to_cells();
        let mut positioned = Vec::with_capacity(Column::DATA.len());
        for column in Column::DATA {
            positioned.push(self.require(column)?);
        }
        let width = positioned.iter().max().map(|max| max + 1).unwrap_or(0);
        let mut cells = vec![String::new(); width];
        for (idx, value) in positioned.into_iter().zip(values) {
            cells[idx] = value;
        }
        Ok(cells)
    }

    /// Build a `SheetRow` from raw cell values.
    pub fn parse_row(&self, row_number: usize, values: &[String]) -> SheetRow {
        let cell = |column: Column| {
            self.position(column)
                .and_then(|i| values.get(i))
                .map(|v| v.trim().to_string())
                .unwrap_or_default()
        };
        SheetRow {
            row_number,
            date: cell(Column::Date),
            company: cell(Column::Company),
            role: cell(Column::Role),
            location: cell(Column::Location),
            experience: cell(Column::Experience),
            skills: cell(Column::Skills),
            contact_email: cell(Column::ContactEmail),
            outreach_status: cell(Column::OutreachStatus),
            outreach_sent_at: cell(Column::OutreachSentAt),
            outreach_error: cell(Column::OutreachError),
        }
    }
}

/// Parse a full value grid (header first). Blank rows are skipped but keep
/// their place in the row numbering.
pub fn parse_grid(grid: &[Vec<String>]) -> Vec<SheetRow> {
    let Some((header, data)) = grid.split_first() else {
        return Vec::new();
    };
    let header = HeaderMap::from_row(header);
    data.iter()
        .enumerate()
        .filter(|(_, values)| values.iter().any(|v| !v.trim().is_empty()))
        .map(|(i, values)| header.parse_row(i + 2, values))
        .collect()
}

/// A1 column letters for a 0-based column index (`0 → A`, `26 → AA`).
pub fn column_letters(index: usize) -> String {
    let mut n = index + 1;
    let mut letters = Vec::new();
    while n > 0 {
        let rem = (n - 1) % 26;
        letters.push(b'A' + rem as u8);
        n = (n - 1) / 26;
    }
    letters.reverse();
    String::from_utf8_lossy(&letters).into_owned()
}

/// Read the sheet once. Returns the data row count.
pub async fn check_access(sheet: &dyn SheetService) -> Result<usize, SheetError> {
    Ok(sheet.read_all_rows().await?.len())
}

/// Accept a bare spreadsheet id or a full `.../spreadsheets/d/<id>/...` URL.
pub fn parse_sheet_id(input: &str) -> String {
    let input = input.trim();
    match Regex::new(r"/spreadsheets/d/([a-zA-Z0-9_-]+)") {
        Ok(re) => re
            .captures(input)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_string())
            .unwrap_or_else(|| input.to_string()),
        Err(_) => input.to_string(),
    }
}
