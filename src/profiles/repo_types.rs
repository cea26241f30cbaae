use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

/// Profile row as stored in `profiles`.
#[derive(Debug, Clone, FromRow)]
pub struct ProfileRow {
    pub id: Uuid,
    pub email: Option<String>,
    pub name: Option<String>,
    pub plan: Option<String>,
    pub scans_used: Option<i32>,
    pub created_at: Option<OffsetDateTime>,
}

/// Subscription tier of a user.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Plan {
    #[default]
    Free,
    Pro,
    Yearly,
    Other,
}

impl Plan {
    pub fn parse(raw: Option<&str>) -> Self {
        match raw.map(|s| s.trim().to_ascii_lowercase()).as_deref() {
            None | Some("") | Some("free") => Plan::Free,
            Some("pro") => Plan::Pro,
            Some("yearly") => Plan::Yearly,
            Some(_) => Plan::Other,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Plan::Free => "free",
            Plan::Pro => "pro",
            Plan::Yearly => "yearly",
            Plan::Other => "other",
        }
    }
}

/// Cached copy of a user's profile.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UserProfile {
    pub id: Uuid,
    pub email: Option<String>,
    pub display_name: Option<String>,
    pub plan: Plan,
    pub scans_used: Option<i64>, // written only by the analysis pipeline
    pub created_at: Option<OffsetDateTime>,
}

impl From<ProfileRow> for UserProfile {
    fn from(r: ProfileRow) -> Self {
        Self {
            id: r.id,
            email: r.email,
            display_name: r.name,
            plan: Plan::parse(r.plan.as_deref()),
            scans_used: r.scans_used.map(i64::from),
            created_at: r.created_at,
        }
    }
}

/// Values written when a missing profile is bootstrapped.
#[derive(Debug, Clone, PartialEq)]
pub struct ProfileDefaults {
    pub plan: Plan,
    /// Same width as the `scans_used` column.
    pub scans_used: i32,
}

impl Default for ProfileDefaults {
    fn default() -> Self {
        Self {
            plan: Plan::Free,
            scans_used: 0,
        }
    }
}

/// One completed product scan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct AnalysisRecord {
    pub id: Uuid,
    pub user_id: Uuid,
    pub product_name: Option<String>,
    pub health_score: Option<f64>, // 0..=100 when well formed
    pub created_at: OffsetDateTime,
}
