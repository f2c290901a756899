//! Request and response types for tpx-daemon HTTP endpoints.
//!
//! No business logic lives here.

use serde::{Deserialize, Serialize};

use tpx_execution::PlaceOutcome;

// ---------------------------------------------------------------------------
// /v1/health
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub ok: bool,
    pub service: String,
    pub version: String,
}

// ---------------------------------------------------------------------------
// POST /place
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaceRequest {
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaceResponse {
    /// Stable machine-readable outcome: "accepted", "rejected_positions_exist", ...
    pub outcome: String,
    pub message: String,
}

impl PlaceResponse {
    pub fn from_outcome(outcome: &PlaceOutcome) -> Self {
        let (code, message) = match outcome {
            PlaceOutcome::Accepted => ("accepted", "Buy filled; take-profit sell placed".to_string()),
            PlaceOutcome::RejectedOpenOrdersPending => {
                ("rejected_open_orders_pending", "Previous buy hasn't finished yet".to_string())
            }
            PlaceOutcome::RejectedPositionsExist => {
                ("rejected_positions_exist", "Positions already exist".to_string())
            }
            PlaceOutcome::RejectedDailyCapReached => {
                ("rejected_daily_cap_reached", "Daily win cap reached".to_string())
            }
            PlaceOutcome::RejectedCycleInProgress => {
                ("rejected_cycle_in_progress", "State is not ready to buy".to_string())
            }
            PlaceOutcome::Aborted => ("aborted", "Buy not filled in time; cycle aborted".to_string()),
            PlaceOutcome::Error(detail) => ("error", detail.clone()),
        };
        Self {
            outcome: code.to_string(),
            message,
        }
    }

    pub fn relayed() -> Self {
        Self {
            outcome: "relayed".to_string(),
            message: "Message relayed".to_string(),
        }
    }

    pub fn malformed(detail: impl Into<String>) -> Self {
        Self {
            outcome: "error".to_string(),
            message: detail.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// GET /?password=
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PasswordQuery {
    pub password: Option<String>,
}
