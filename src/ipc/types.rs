use std::collections::HashMap;
use std::path::PathBuf;

use rusqlite::Connection;
use serde::Deserialize;

use crate::seating::SeatingPlan;

#[derive(Debug, Deserialize, Clone)]
pub struct Request {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

pub struct AppState {
    pub workspace: Option<PathBuf>,
    pub db: Option<Connection>,
    /// Open seating editing sessions, one per classroom. In-memory only;
    /// nothing is persisted until an explicit seating.save.
    pub seating_sessions: HashMap<String, SeatingPlan>,
}

impl AppState {
    pub fn new() -> Self {
        AppState {
            workspace: None,
            db: None,
            seating_sessions: HashMap::new(),
        }
    }
}
