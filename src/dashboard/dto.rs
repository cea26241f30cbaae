use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::sync::DashboardState;

#[derive(Debug, Serialize)]
pub struct DashboardView {
    pub user_id: Uuid,
    #[serde(flatten)]
    pub state: DashboardState,
}

#[derive(Debug, Deserialize)]
pub struct ChangesQuery {
    #[serde(default)]
    pub after: u64,
}

#[derive(Debug, Deserialize)]
pub struct VisibilityRequest {
    pub visible: bool,
}
