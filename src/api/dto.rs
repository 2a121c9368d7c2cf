use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::store::models::TerrariumPatch;

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct HealthDto {
    pub status: String,
}

/// Body of `POST /terraria/{id}/devices/{series}`.
#[derive(Debug, Deserialize, ToSchema)]
pub struct ToggleRequest {
    /// Desired switch state.
    pub on: bool,
}

/// Body of `POST /terraria/{id}/readings`.
#[derive(Debug, Deserialize, ToSchema)]
pub struct ManualReadingRequest {
    /// Degrees Celsius, 0 to 50.
    pub temperature: f64,
    /// Relative humidity percentage, 0 to 100.
    pub humidity: f64,
}

#[derive(Debug, Deserialize)]
pub struct RecentParams {
    /// Maximum number of entries, newest first. Defaults to 10.
    pub limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct HistoryParams {
    /// Return every row instead of the first page.
    #[serde(default)]
    pub all: bool,
}

/// Body of `PATCH /terraria/{id}`. Absent fields are left unchanged.
#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct UpdateTerrariumRequest {
    pub name: Option<String>,
    /// Whether the global simulation advances this terrarium.
    pub active: Option<bool>,
    pub avatar: Option<String>,
    pub color: Option<String>,
    pub species: Option<String>,
}

impl From<UpdateTerrariumRequest> for TerrariumPatch {
    fn from(req: UpdateTerrariumRequest) -> Self {
        Self {
            name: req.name,
            active: req.active,
            avatar: req.avatar,
            color: req.color,
            species: req.species,
            updated_at: None,
        }
    }
}
