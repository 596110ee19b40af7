use serde::{Deserialize, Serialize};
use std::collections::HashSet;

pub const DEFAULT_ROWS: usize = 5;
pub const DEFAULT_COLS: usize = 6;

/// Errors raised by seating-plan transitions. Stale persisted data is never
/// an error; it is normalized away on load.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LayoutError {
    InvalidDimensions { rows: i64, cols: i64 },
    OutOfBounds { row: usize, col: usize },
    UnknownStudent { student_id: String },
}

impl LayoutError {
    pub fn code(&self) -> &'static str {
        match self {
            LayoutError::InvalidDimensions { .. } => "invalid_dimensions",
            LayoutError::OutOfBounds { .. } => "out_of_bounds",
            LayoutError::UnknownStudent { .. } => "unknown_student",
        }
    }

    pub fn message(&self) -> String {
        match self {
            LayoutError::InvalidDimensions { rows, cols } => {
                format!("grid dimensions must be at least 1x1, got {}x{}", rows, cols)
            }
            LayoutError::OutOfBounds { row, col } => {
                format!("seat ({}, {}) is outside the grid", row, col)
            }
            LayoutError::UnknownStudent { student_id } => {
                format!("student {} is not in the classroom roster", student_id)
            }
        }
    }
}

impl std::fmt::Display for LayoutError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message())
    }
}

impl std::error::Error for LayoutError {}

/// Persistence-neutral form of a layout: the `layout_json` blob stored in
/// `seat_maps`. Versionless; loaded best-effort via `SeatingPlan::from_saved`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SavedLayout {
    pub rows: i64,
    pub cols: i64,
    pub seats: Vec<Vec<Option<String>>>,
}

/// In-memory seating chart for one classroom editing session.
///
/// Holds the grid, the seat occupancy, and a snapshot of the active roster.
/// At most one seat holds any given student id; the engine never invents,
/// mutates, or drops roster entries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeatingPlan {
    rows: usize,
    cols: usize,
    seats: Vec<Vec<Option<String>>>,
    roster: Vec<String>,
}

impl SeatingPlan {
    pub fn new<I, S>(rows: i64, cols: i64, roster: I) -> Result<Self, LayoutError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        if rows < 1 || cols < 1 {
            return Err(LayoutError::InvalidDimensions { rows, cols });
        }
        let rows = rows as usize;
        let cols = cols as usize;
        Ok(SeatingPlan {
            rows,
            cols,
            seats: vec![vec![None; cols]; rows],
            roster: roster.into_iter().map(Into::into).collect(),
        })
    }

    /// Rebuild a plan from a persisted blob against the *current* roster.
    ///
    /// Entries outside the saved grid bounds, entries naming students no
    /// longer on the roster, and repeat placements of the same student are
    /// silently dropped — persisted layouts legitimately outlive roster and
    /// grid changes. Only non-positive saved dimensions fail.
    pub fn from_saved<I, S>(saved: &SavedLayout, roster: I) -> Result<Self, LayoutError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut plan = SeatingPlan::new(saved.rows, saved.cols, roster)?;
        let known: HashSet<&str> = plan.roster.iter().map(String::as_str).collect();
        let mut placed: HashSet<&str> = HashSet::new();
        for (r, saved_row) in saved.seats.iter().enumerate().take(plan.rows) {
            for (c, occupant) in saved_row.iter().enumerate().take(plan.cols) {
                let Some(id) = occupant.as_deref() else {
                    continue;
                };
                if !known.contains(id) || !placed.insert(id) {
                    continue;
                }
                plan.seats[r][c] = Some(id.to_string());
            }
        }
        Ok(plan)
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn roster(&self) -> &[String] {
        &self.roster
    }

    pub fn seat(&self, row: usize, col: usize) -> Option<&str> {
        self.seats
            .get(row)
            .and_then(|r| r.get(col))
            .and_then(|s| s.as_deref())
    }

    pub fn seats(&self) -> &[Vec<Option<String>>] {
        &self.seats
    }

    fn check_bounds(&self, row: usize, col: usize) -> Result<(), LayoutError> {
        if row >= self.rows || col >= self.cols {
            return Err(LayoutError::OutOfBounds { row, col });
        }
        Ok(())
    }

    /// Place a student at `(row, col)`. The student leaves whatever seat it
    /// held before; a different student already at the destination is
    /// evicted and becomes unplaced. Last drop wins — nothing relocates.
    pub fn assign(&mut self, student_id: &str, row: usize, col: usize) -> Result<(), LayoutError> {
        if !self.roster.iter().any(|s| s == student_id) {
            return Err(LayoutError::UnknownStudent {
                student_id: student_id.to_string(),
            });
        }
        self.check_bounds(row, col)?;
        for seat_row in &mut self.seats {
            for seat in seat_row.iter_mut() {
                if seat.as_deref() == Some(student_id) {
                    *seat = None;
                }
            }
        }
        self.seats[row][col] = Some(student_id.to_string());
        Ok(())
    }

    /// Clear one seat. Clearing an empty seat is a no-op, not an error.
    pub fn unassign(&mut self, row: usize, col: usize) -> Result<(), LayoutError> {
        self.check_bounds(row, col)?;
        self.seats[row][col] = None;
        Ok(())
    }

    /// Change the grid dimensions, carrying occupants in the overlapping
    /// region. Occupants outside the new bounds become unplaced; they are
    /// not relocated.
    pub fn resize(&mut self, new_rows: i64, new_cols: i64) -> Result<(), LayoutError> {
        if new_rows < 1 || new_cols < 1 {
            return Err(LayoutError::InvalidDimensions {
                rows: new_rows,
                cols: new_cols,
            });
        }
        let new_rows = new_rows as usize;
        let new_cols = new_cols as usize;
        let mut seats = vec![vec![None; new_cols]; new_rows];
        for r in 0..self.rows.min(new_rows) {
            for c in 0..self.cols.min(new_cols) {
                seats[r][c] = self.seats[r][c].take();
            }
        }
        self.rows = new_rows;
        self.cols = new_cols;
        self.seats = seats;
        Ok(())
    }

    /// Empty every seat; dimensions are unchanged.
    pub fn clear(&mut self) {
        for row in &mut self.seats {
            for seat in row.iter_mut() {
                *seat = None;
            }
        }
    }

    /// Roster members with no seat, in roster order.
    pub fn unplaced_students(&self) -> Vec<&str> {
        let seated: HashSet<&str> = self
            .seats
            .iter()
            .flatten()
            .filter_map(|s| s.as_deref())
            .collect();
        self.roster
            .iter()
            .map(String::as_str)
            .filter(|id| !seated.contains(id))
            .collect()
    }

    pub fn to_saved(&self) -> SavedLayout {
        SavedLayout {
            rows: self.rows as i64,
            cols: self.cols as i64,
            seats: self.seats.clone(),
        }
    }
}
