use crate::seating::SeatingPlan;
use serde::Serialize;
use std::collections::HashMap;

/// Display metadata for one roster member, supplied by the roster lookup.
#[derive(Debug, Clone)]
pub struct SeatStudent {
    pub display_name: String,
    pub is_leader: bool,
    pub is_vice_leader: bool,
    pub photo_ref: Option<String>,
}

/// Resolves a stored photo reference to something the document emitter can
/// embed. Failures degrade the affected cell to its name-only form.
pub trait PhotoResolver {
    fn resolve(&self, photo_ref: &str) -> anyhow::Result<String>;
}

/// Page geometry in millimetres. Defaults to A4 landscape, the paper the
/// seating chart has always been printed on.
#[derive(Debug, Clone, Copy)]
pub struct PageConfig {
    pub width: f64,
    pub height: f64,
}

impl Default for PageConfig {
    fn default() -> Self {
        PageConfig {
            width: 297.0,
            height: 210.0,
        }
    }
}

const NAME_CHAR_BUDGET: usize = 18;
const SIDE_MARGIN: f64 = 15.0;
const GRID_TOP: f64 = 32.0;
const BOTTOM_MARGIN: f64 = 15.0;
const MAX_CELL_W: f64 = 35.0;
const MAX_CELL_H: f64 = 30.0;
const MIN_CELL_W: f64 = 8.0;
const MIN_CELL_H: f64 = 7.0;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SeatingDocument {
    pub title: String,
    pub subtitle: String,
    pub page_width: f64,
    pub page_height: f64,
    pub board: BoardStrip,
    pub rows: usize,
    pub cols: usize,
    pub grid_x: f64,
    pub grid_y: f64,
    pub cell_width: f64,
    pub cell_height: f64,
    pub cells: Vec<SeatCell>,
}

/// The "QUADRO" strip marking the front of the room.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BoardStrip {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
    pub label: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SeatCell {
    pub row: usize,
    pub col: usize,
    pub x: f64,
    pub y: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub occupant: Option<SeatOccupant>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SeatOccupant {
    pub student_id: String,
    pub label: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub annotation: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub photo: Option<String>,
}

pub fn truncate_name(name: &str) -> String {
    if name.chars().count() > NAME_CHAR_BUDGET {
        let head: String = name.chars().take(NAME_CHAR_BUDGET).collect();
        format!("{}...", head)
    } else {
        name.to_string()
    }
}

fn leader_annotation(student: &SeatStudent) -> Option<String> {
    if student.is_leader {
        Some("(L)".to_string())
    } else if student.is_vice_leader {
        Some("(VL)".to_string())
    } else {
        None
    }
}

/// Project a seating plan onto a fixed-size page.
///
/// Pure walk of the grid in row-major order. Cell dimensions shrink to fit
/// the printable area (clamped to stay legible) rather than overflow; the
/// grid block is horizontally centered. A photo the resolver cannot load
/// degrades that one cell to its name-only form.
pub fn render_seating(
    plan: &SeatingPlan,
    students: &HashMap<String, SeatStudent>,
    photos: &dyn PhotoResolver,
    config: &PageConfig,
    title: &str,
    subtitle: &str,
) -> SeatingDocument {
    let rows = plan.rows();
    let cols = plan.cols();

    let avail_w = config.width - 2.0 * SIDE_MARGIN;
    let avail_h = config.height - GRID_TOP - BOTTOM_MARGIN;
    let cell_width = (avail_w / cols as f64).min(MAX_CELL_W).max(MIN_CELL_W);
    let cell_height = (avail_h / rows as f64).min(MAX_CELL_H).max(MIN_CELL_H);
    let grid_x = (config.width - cols as f64 * cell_width) / 2.0;

    let mut cells = Vec::with_capacity(rows * cols);
    for row in 0..rows {
        for col in 0..cols {
            let occupant = plan.seat(row, col).and_then(|id| {
                let student = students.get(id)?;
                let photo = student
                    .photo_ref
                    .as_deref()
                    .and_then(|p| photos.resolve(p).ok());
                Some(SeatOccupant {
                    student_id: id.to_string(),
                    label: truncate_name(&student.display_name),
                    annotation: leader_annotation(student),
                    photo,
                })
            });
            cells.push(SeatCell {
                row,
                col,
                x: grid_x + col as f64 * cell_width,
                y: GRID_TOP + row as f64 * cell_height,
                occupant,
            });
        }
    }

    SeatingDocument {
        title: title.to_string(),
        subtitle: subtitle.to_string(),
        page_width: config.width,
        page_height: config.height,
        board: BoardStrip {
            x: config.width / 2.0 - 40.0,
            y: 22.0,
            width: 80.0,
            height: 6.0,
            label: "QUADRO".to_string(),
        },
        rows,
        cols,
        grid_x,
        grid_y: GRID_TOP,
        cell_width,
        cell_height,
        cells,
    }
}
