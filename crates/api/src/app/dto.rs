use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{Value as JsonValue, json};

use creditgate_ledger::{Account, CreditAdjustment, Job};

use crate::app::errors;

// -------------------------
// Request DTOs
// -------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestJobBody {
    pub business_id: Option<String>,
    pub payload: JsonValue,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AwaitQuery {
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    pub limit: Option<usize>,
    pub since: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateAccountBody {
    #[serde(default = "default_role")]
    pub role: String,
    #[serde(default)]
    pub initial_credits: i64,
    pub token_ttl_days: Option<i64>,
}

fn default_role() -> String {
    "user".to_string()
}

#[derive(Debug, Deserialize)]
pub struct AdjustCreditsBody {
    /// `grant` or `reset`
    pub mode: String,
    pub amount: i64,
    pub note: Option<String>,
}

impl AdjustCreditsBody {
    pub fn adjustment(&self) -> Result<CreditAdjustment, axum::response::Response> {
        match self.mode.to_ascii_lowercase().as_str() {
            "grant" => Ok(CreditAdjustment::Grant(self.amount)),
            "reset" => Ok(CreditAdjustment::Reset(self.amount)),
            _ => Err(errors::invalid_argument("mode must be one of: grant, reset")),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockBody {
    pub reason: String,
    /// Absent means the block lasts until lifted.
    pub duration_secs: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IssueTokenBody {
    pub ttl_days: Option<i64>,
}

// -------------------------
// Response mapping
// -------------------------

pub fn job_to_json(job: &Job) -> JsonValue {
    json!({
        "id": job.id.to_string(),
        "ownerId": job.owner_id.to_string(),
        "businessId": job.business_id.as_ref().map(|b| b.as_str().to_string()),
        "status": job.status.as_str(),
        "request": job.request,
        "result": job.result,
        "error": job.error,
        "createdAt": job.created_at,
        "processingStartedAt": job.processing_started_at,
        "completedAt": job.completed_at,
    })
}

pub fn account_to_json(account: &Account) -> JsonValue {
    json!({
        "id": account.id.to_string(),
        "role": account.role.as_str(),
        "available": account.credits.available,
        "used": account.credits.used,
        "block": account.block.as_ref().map(|b| json!({
            "reason": b.reason,
            "blockedAt": b.blocked_at,
            "blockedUntil": b.blocked_until,
        })),
        "createdAt": account.created_at,
        "updatedAt": account.updated_at,
    })
}
