pub mod dto;
pub mod errors;
pub mod handlers;

use axum::{
    routing::{delete, get, post},
    Router,
};
use utoipa::OpenApi;
use utoipa_axum::router::OpenApiRouter;

use handlers::ApiDoc;

use crate::{
    control::ControlService,
    history::{ConcurrencyMode, DeviceLog},
    sensors::{SensorService, SensorSimulator},
    standards::Standards,
    store::StoreBackend,
};

/// Shared handler state. Every field is a cheap clone over the same store.
#[derive(Debug, Clone)]
pub struct AppState {
    pub store: StoreBackend,
    pub control: ControlService<StoreBackend>,
    pub standards: Standards,
}

impl AppState {
    pub fn new(
        store: StoreBackend,
        mode: ConcurrencyMode,
        simulator: SensorSimulator,
        standards: Standards,
    ) -> Self {
        let log = DeviceLog::new(store.clone(), mode);
        let sensors = SensorService::new(log.clone(), simulator);
        Self {
            store,
            control: ControlService::new(log, sensors),
            standards,
        }
    }
}

pub fn router(state: AppState) -> Router {
    let (router, api) = OpenApiRouter::with_openapi(ApiDoc::openapi())
        .route(
            "/terraria",
            get(handlers::list_terraria).post(handlers::create_terrarium),
        )
        .route(
            "/terraria/{id}",
            delete(handlers::delete_terrarium).patch(handlers::update_terrarium),
        )
        .route("/terraria/{id}/control", get(handlers::control_view))
        .route("/terraria/{id}/monitor", get(handlers::monitor_view))
        .route("/terraria/{id}/history", get(handlers::history_view))
        .route("/terraria/{id}/readings", post(handlers::record_reading))
        .route("/terraria/{id}/simulate", post(handlers::simulate))
        .route(
            "/terraria/{id}/devices/{series}",
            post(handlers::toggle_device),
        )
        .route("/terraria/{id}/{series}", get(handlers::recent_entries))
        .route("/terraria/{id}/{series}/latest", get(handlers::latest_entry))
        .with_state(state)
        .split_for_parts();

    router
        .route("/health", get(handlers::health))
        .route(
            "/api-docs/openapi.json",
            get(move || async move { axum::Json(api) }),
        )
}
