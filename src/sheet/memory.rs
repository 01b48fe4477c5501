//! In-memory sheet with fault injection, for tests and dry runs.

use std::sync::Mutex;

use async_trait::async_trait;

use super::{Column, HeaderMap, SheetService, parse_grid};
use crate::error::SheetError;
use crate::pipeline::types::{JobRecord, SheetRow};

#[derive(Debug, Default)]
struct State {
    /// Row 0 is the header.
    grid: Vec<Vec<String>>,
    appends: usize,
    fail_appends_after: Option<usize>,
    fail_reads: bool,
    fail_updates: bool,
}

#[derive(Debug, Default)]
pub struct MemorySheet {
    state: Mutex<State>,
}

impl MemorySheet {
    /// A sheet holding only the seven data-column headers.
    pub fn new() -> Self {
        let header = Column::DATA.iter().map(|c| c.title().to_string()).collect();
        Self::from_grid(vec![header])
    }

    /// A sheet with no header row at all.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn from_grid(grid: Vec<Vec<String>>) -> Self {
        Self {
            state: Mutex::new(State {
                grid,
                ..Default::default()
            }),
        }
    }

    /// Appends beyond the first `n` fail.
    pub fn fail_appends_after(self, n: usize) -> Self {
        self.with_state(|s| s.fail_appends_after = Some(n));
        self
    }

    pub fn fail_reads(self) -> Self {
        self.with_state(|s| s.fail_reads = true);
        self
    }

    pub fn fail_updates(self) -> Self {
        self.with_state(|s| s.fail_updates = true);
        self
    }

    /// Clear any injected faults.
    pub fn heal(&self) {
        self.with_state(|s| {
            s.fail_appends_after = None;
            s.fail_reads = false;
            s.fail_updates = false;
        });
    }

    /// Snapshot of the data rows.
    pub fn rows(&self) -> Vec<SheetRow> {
        self.with_state(|s| parse_grid(&s.grid))
    }

    /// Raw grid, header first.
    pub fn grid(&self) -> Vec<Vec<String>> {
        self.with_state(|s| s.grid.clone())
    }

    fn with_state<R>(&self, f: impl FnOnce(&mut State) -> R) -> R {
        let mut guard = match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&mut guard)
    }
}

fn header_of(grid: &[Vec<String>]) -> HeaderMap {
    HeaderMap::from_row(grid.first().map(Vec::as_slice).unwrap_or(&[]))
}

fn injected(what: &str) -> SheetError {
    SheetError::Api {
        status: 503,
        body: format!("injected {what} failure"),
    }
}

#[async_trait]
impl SheetService for MemorySheet {
    async fn read_all_rows(&self) -> Result<Vec<SheetRow>, SheetError> {
        self.with_state(|s| {
            if s.fail_reads {
                return Err(injected("read"));
            }
            Ok(parse_grid(&s.grid))
        })
    }

    async fn append_row(&self, record: &JobRecord) -> Result<(), SheetError> {
        self.with_state(|s| {
            if s.fail_appends_after.is_some_and(|n| s.appends >= n) {
                return Err(injected("append"));
            }
            let mut header = header_of(&s.grid);
            if header.is_empty() {
                if let Some(titles) = header.completed() {
                    header = HeaderMap::from_row(&titles);
                    if s.grid.is_empty() {
                        s.grid.push(titles);
                    } else {
                        s.grid[0] = titles;
                    }
                }
            }
            let cells = header.cells_for(record)?;
            s.grid.push(cells);
            s.appends += 1;
            Ok(())
        })
    }

    async fn update_cell(
        &self,
        row_number: usize,
        column: Column,
        value: &str,
    ) -> Result<(), SheetError> {
        self.with_state(|s| {
            if s.fail_updates {
                return Err(injected("update"));
            }
            let index = header_of(&s.grid).require(column)?;
            let row = row_number
                .checked_sub(1)
                .and_then(|i| s.grid.get_mut(i))
                .ok_or_else(|| {
                    SheetError::InvalidResponse(format!("row {row_number} out of range"))
                })?;
            if row.len() <= index {
                row.resize(index + 1, String::new());
            }
            row[index] = value.to_string();
            Ok(())
        })
    }

    async fn ensure_header(&self) -> Result<(), SheetError> {
        self.with_state(|s| {
            if s.fail_reads {
                return Err(injected("read"));
            }
            if let Some(titles) = header_of(&s.grid).completed() {
                if s.grid.is_empty() {
                    s.grid.push(titles);
                } else {
                    s.grid[0] = titles;
                }
            }
            Ok(())
        })
    }
}
