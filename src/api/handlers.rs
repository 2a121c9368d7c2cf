use axum::{
    extract::{rejection::PathRejection, Path, Query, State},
    http::StatusCode,
    Json,
};
use utoipa::OpenApi;

use super::{
    dto::{
        HealthDto, HistoryParams, ManualReadingRequest, RecentParams, ToggleRequest,
        UpdateTerrariumRequest,
    },
    errors::AppError,
    AppState,
};
use crate::{
    control::ToggleOutcome,
    projection::{
        self, ActivitySummary, ChartPoint, ComfortGauge, ComfortLevel, ControlPanel,
        DeviceTimelineEntry, HistoryReport, HistoryRow, HistoryStats, MonitorCharts, SeriesEntry,
        TerrariumSummary, RECENT_LIMIT,
    },
    standards::{Advisory, AdvisoryKind},
    store::{
        models::{Device, DeviceEvent, NewTerrarium, SensorReading, SeriesKey, Terrarium},
        TerrariumStore,
    },
};

// ---------------------------------------------------------------------------
// Terraria
// ---------------------------------------------------------------------------

/// Summary card for every terrarium in the collection.
#[utoipa::path(
    get,
    path = "/terraria",
    responses(
        (status = 200, description = "Terrarium list", body = Vec<TerrariumSummary>),
        (status = 502, description = "Store unavailable"),
    ),
    tag = "terraria"
)]
pub async fn list_terraria(
    State(state): State<AppState>,
) -> Result<Json<Vec<TerrariumSummary>>, AppError> {
    let terraria = state.store.list().await?;
    Ok(Json(terraria.iter().map(projection::summarize).collect()))
}

/// Create a terrarium with empty history and both devices off.
#[utoipa::path(
    post,
    path = "/terraria",
    request_body = NewTerrarium,
    responses(
        (status = 201, description = "Terrarium created", body = Terrarium),
        (status = 400, description = "Invalid terrarium"),
        (status = 502, description = "Store unavailable"),
    ),
    tag = "terraria"
)]
pub async fn create_terrarium(
    State(state): State<AppState>,
    Json(body): Json<NewTerrarium>,
) -> Result<(StatusCode, Json<Terrarium>), AppError> {
    let created = state.control.create_terrarium(body).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

/// Rename, restyle or (de)activate a terrarium. Histories are left as they are.
#[utoipa::path(
    patch,
    path = "/terraria/{id}",
    params(("id" = String, Path, description = "Terrarium ID")),
    request_body = UpdateTerrariumRequest,
    responses(
        (status = 200, description = "Terrarium updated", body = Terrarium),
        (status = 400, description = "Invalid terrarium"),
        (status = 404, description = "Terrarium not found"),
    ),
    tag = "terraria"
)]
pub async fn update_terrarium(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<UpdateTerrariumRequest>,
) -> Result<Json<Terrarium>, AppError> {
    Ok(Json(state.control.update_terrarium(&id, body.into()).await?))
}

#[utoipa::path(
    delete,
    path = "/terraria/{id}",
    params(("id" = String, Path, description = "Terrarium ID")),
    responses(
        (status = 204, description = "Terrarium deleted"),
        (status = 404, description = "Terrarium not found"),
    ),
    tag = "terraria"
)]
pub async fn delete_terrarium(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    state.control.delete_terrarium(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

// ---------------------------------------------------------------------------
// Views
// ---------------------------------------------------------------------------

/// Latest value of each series and the advisories it raises.
#[utoipa::path(
    get,
    path = "/terraria/{id}/control",
    params(("id" = String, Path, description = "Terrarium ID")),
    responses(
        (status = 200, description = "Control panel", body = ControlPanel),
        (status = 404, description = "Terrarium not found"),
    ),
    tag = "views"
)]
pub async fn control_view(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ControlPanel>, AppError> {
    let terrarium = state.store.get(&id).await?;
    Ok(Json(projection::control_panel(&terrarium, &state.standards)))
}

/// Chart data: recent readings oldest first, comfort gauge, device timeline.
#[utoipa::path(
    get,
    path = "/terraria/{id}/monitor",
    params(("id" = String, Path, description = "Terrarium ID")),
    responses(
        (status = 200, description = "Monitor charts", body = MonitorCharts),
        (status = 404, description = "Terrarium not found"),
    ),
    tag = "views"
)]
pub async fn monitor_view(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<MonitorCharts>, AppError> {
    let terrarium = state.store.get(&id).await?;
    Ok(Json(projection::monitor_charts(&terrarium, &state.standards)))
}

/// Merged history of all three series, newest first, with statistics.
#[utoipa::path(
    get,
    path = "/terraria/{id}/history",
    params(
        ("id" = String, Path, description = "Terrarium ID"),
        ("all" = Option<bool>, Query, description = "Return every row instead of the first page"),
    ),
    responses(
        (status = 200, description = "History report", body = HistoryReport),
        (status = 404, description = "Terrarium not found"),
    ),
    tag = "views"
)]
pub async fn history_view(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(params): Query<HistoryParams>,
) -> Result<Json<HistoryReport>, AppError> {
    let terrarium = state.store.get(&id).await?;
    Ok(Json(projection::history_report(&terrarium, params.all)))
}

// ---------------------------------------------------------------------------
// Series
// ---------------------------------------------------------------------------

/// Newest entry of one series; `null` when the series is empty.
#[utoipa::path(
    get,
    path = "/terraria/{id}/{series}/latest",
    params(
        ("id" = String, Path, description = "Terrarium ID"),
        ("series" = SeriesKey, Path, description = "Series"),
    ),
    responses(
        (status = 200, description = "Latest entry", body = SeriesEntry),
        (status = 404, description = "Terrarium not found"),
    ),
    tag = "series"
)]
pub async fn latest_entry(
    State(state): State<AppState>,
    path: Result<Path<(String, SeriesKey)>, PathRejection>,
) -> Result<Json<Option<SeriesEntry>>, AppError> {
    let Path((id, series)) = path?;
    let terrarium = state.store.get(&id).await?;
    Ok(Json(projection::get_latest(&terrarium, series)))
}

/// Newest entries of one series, newest first.
#[utoipa::path(
    get,
    path = "/terraria/{id}/{series}",
    params(
        ("id" = String, Path, description = "Terrarium ID"),
        ("series" = SeriesKey, Path, description = "Series"),
        ("limit" = Option<usize>, Query, description = "Maximum entries (default 10)"),
    ),
    responses(
        (status = 200, description = "Recent entries", body = Vec<SeriesEntry>),
        (status = 404, description = "Terrarium not found"),
    ),
    tag = "series"
)]
pub async fn recent_entries(
    State(state): State<AppState>,
    path: Result<Path<(String, SeriesKey)>, PathRejection>,
    Query(params): Query<RecentParams>,
) -> Result<Json<Vec<SeriesEntry>>, AppError> {
    let Path((id, series)) = path?;
    let terrarium = state.store.get(&id).await?;
    let limit = params.limit.unwrap_or(RECENT_LIMIT);
    Ok(Json(projection::get_recent(&terrarium, series, limit)))
}

// ---------------------------------------------------------------------------
// Actions
// ---------------------------------------------------------------------------

/// Switch the lamp or the humidifier. Switching on also records one
/// simulated reading showing the device's effect.
#[utoipa::path(
    post,
    path = "/terraria/{id}/devices/{series}",
    params(
        ("id" = String, Path, description = "Terrarium ID"),
        ("series" = SeriesKey, Path, description = "`lamp` or `humidifier`"),
    ),
    request_body = ToggleRequest,
    responses(
        (status = 200, description = "Device switched", body = ToggleOutcome),
        (status = 400, description = "Series is not a device"),
        (status = 404, description = "Terrarium not found"),
        (status = 409, description = "Concurrent update detected"),
    ),
    tag = "actions"
)]
pub async fn toggle_device(
    State(state): State<AppState>,
    path: Result<Path<(String, SeriesKey)>, PathRejection>,
    Json(body): Json<ToggleRequest>,
) -> Result<Json<ToggleOutcome>, AppError> {
    let Path((id, series)) = path?;
    Ok(Json(state.control.toggle_device(&id, series, body.on).await?))
}

#[utoipa::path(
    post,
    path = "/terraria/{id}/readings",
    params(("id" = String, Path, description = "Terrarium ID")),
    request_body = ManualReadingRequest,
    responses(
        (status = 201, description = "Reading recorded", body = SensorReading),
        (status = 400, description = "Value out of range"),
        (status = 404, description = "Terrarium not found"),
        (status = 409, description = "Concurrent update detected"),
    ),
    tag = "actions"
)]
pub async fn record_reading(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<ManualReadingRequest>,
) -> Result<(StatusCode, Json<SensorReading>), AppError> {
    let reading = state
        .control
        .record_manual_reading(&id, body.temperature, body.humidity)
        .await?;
    Ok((StatusCode::CREATED, Json(reading)))
}

/// Run one simulation tick for a single terrarium.
#[utoipa::path(
    post,
    path = "/terraria/{id}/simulate",
    params(("id" = String, Path, description = "Terrarium ID")),
    responses(
        (status = 200, description = "Simulated reading", body = SensorReading),
        (status = 404, description = "Terrarium not found"),
    ),
    tag = "actions"
)]
pub async fn simulate(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<SensorReading>, AppError> {
    Ok(Json(state.control.sensors().simulate_terrarium(&id).await?))
}

// ---------------------------------------------------------------------------
// Health check
// ---------------------------------------------------------------------------

/// Returns `200 OK` with `{"status":"ok"}` when the server is running.
#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Service is healthy", body = HealthDto),
    ),
    tag = "system"
)]
pub async fn health() -> Json<HealthDto> {
    Json(HealthDto {
        status: "ok".to_owned(),
    })
}

// ---------------------------------------------------------------------------
// OpenAPI document
// ---------------------------------------------------------------------------

#[derive(OpenApi)]
#[openapi(
    paths(
        list_terraria,
        create_terrarium,
        update_terrarium,
        delete_terrarium,
        control_view,
        monitor_view,
        history_view,
        latest_entry,
        recent_entries,
        toggle_device,
        record_reading,
        simulate,
        health,
    ),
    components(schemas(
        Terrarium,
        NewTerrarium,
        SensorReading,
        DeviceEvent,
        SeriesKey,
        Device,
        SeriesEntry,
        TerrariumSummary,
        ControlPanel,
        Advisory,
        AdvisoryKind,
        MonitorCharts,
        ChartPoint,
        ComfortGauge,
        ComfortLevel,
        DeviceTimelineEntry,
        HistoryReport,
        HistoryRow,
        HistoryStats,
        ActivitySummary,
        ToggleOutcome,
        ToggleRequest,
        ManualReadingRequest,
        UpdateTerrariumRequest,
        HealthDto,
    )),
    tags(
        (name = "terraria", description = "Terrarium collection"),
        (name = "views",    description = "Dashboard view projections"),
        (name = "series",   description = "Raw series access"),
        (name = "actions",  description = "Device switches, manual readings and simulation"),
        (name = "system",   description = "System endpoints"),
    ),
    info(
        title = "Terrarium Service API",
        version = "0.1.0",
        description = "Simulated terrarium devices and their dashboard views"
    )
)]
pub struct ApiDoc;

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
