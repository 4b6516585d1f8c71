use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::CubeError;
use crate::logic::evaluate::{Coordinate, Output};
use crate::logic::{permissions, BranchOperations};
use crate::model::app_id::{ApplicationId, ReleaseStatus};
use crate::model::cube_info::{CubeInfo, SearchOptions};
use crate::model::{format, UserContext};
use crate::store::registry::Registry;

pub type AppState = Arc<Registry>;

/// Five path segments addressing an application coordinate.
type AppPath = (String, String, String, String, String);

fn app_id(path: &AppPath) -> Result<ApplicationId, ApiError> {
    let (tenant, app, version, status, branch) = path;
    Ok(ApplicationId::new(
        tenant.clone(),
        app.clone(),
        version.clone(),
        ReleaseStatus::parse(status)?,
        branch.clone(),
    )?)
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// CubeError carried across the HTTP boundary with its taxonomy mapped to
/// status codes.
pub struct ApiError(pub CubeError);

impl From<CubeError> for ApiError {
    fn from(e: CubeError) -> Self {
        ApiError(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            CubeError::IllegalArgument(_) => StatusCode::BAD_REQUEST,
            CubeError::CoordinateNotFound(_) => StatusCode::NOT_FOUND,
            CubeError::AxisOverlap(_) => StatusCode::CONFLICT,
            CubeError::Security(_) => StatusCode::FORBIDDEN,
            CubeError::IllegalState(_) | CubeError::Store(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        (
            status,
            Json(ErrorResponse {
                error: self.0.to_string(),
            }),
        )
            .into_response()
    }
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: String,
}

pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        timestamp: chrono::Utc::now().to_rfc3339(),
    })
}

#[derive(Debug, Serialize)]
pub struct ListResponse<T> {
    pub items: Vec<T>,
    pub total: usize,
}

pub async fn get_app_names(
    State(reg): State<AppState>,
    Path(tenant): Path<String>,
) -> Result<Json<ListResponse<String>>, ApiError> {
    let items = reg
        .persister()
        .get_app_names(&tenant)
        .await
        .map_err(CubeError::from)?;
    let total = items.len();
    Ok(Json(ListResponse { items, total }))
}

pub async fn get_versions(
    State(reg): State<AppState>,
    Path((tenant, app)): Path<(String, String)>,
) -> Result<Json<HashMap<ReleaseStatus, Vec<String>>>, ApiError> {
    let versions = reg
        .persister()
        .get_versions(&tenant, &app)
        .await
        .map_err(CubeError::from)?;
    Ok(Json(versions))
}

pub async fn get_branches(
    State(reg): State<AppState>,
    Path(path): Path<AppPath>,
) -> Result<Json<ListResponse<String>>, ApiError> {
    let id = app_id(&path)?;
    let mut items: Vec<String> = reg
        .persister()
        .get_branches(&id)
        .await
        .map_err(CubeError::from)?
        .into_iter()
        .collect();
    items.sort();
    let total = items.len();
    Ok(Json(ListResponse { items, total }))
}

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    pub name: Option<String>,
    pub content: Option<String>,
    #[serde(default)]
    pub active_only: bool,
    #[serde(default)]
    pub include_cube_data: bool,
}

pub async fn search_cubes(
    State(reg): State<AppState>,
    user: UserContext,
    Path(path): Path<AppPath>,
    Query(query): Query<SearchQuery>,
) -> Result<Json<ListResponse<CubeInfo>>, ApiError> {
    let id = app_id(&path)?;
    let options = SearchOptions {
        active_records_only: query.active_only,
        include_cube_data: query.include_cube_data,
        ..Default::default()
    };
    let items = reg
        .search(
            &user,
            &id,
            query.name.as_deref(),
            query.content.as_deref(),
            &options,
        )
        .await?;
    let total = items.len();
    Ok(Json(ListResponse { items, total }))
}

#[derive(Debug, Deserialize)]
pub struct CubeFormatQuery {
    #[serde(default)]
    pub index_format: bool,
}

pub async fn get_cube(
    State(reg): State<AppState>,
    user: UserContext,
    Path((tenant, app, version, status, branch, name)): Path<(
        String,
        String,
        String,
        String,
        String,
        String,
    )>,
    Query(query): Query<CubeFormatQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let path = (tenant, app, version, status, branch);
    let id = app_id(&path)?;
    permissions::assert_permissions(&reg, &user, &id, Some(&name), permissions::Action::Read)
        .await?;
    let cube = reg
        .get_cube(&id, &name)
        .await?
        .ok_or_else(|| CubeError::coordinate_not_found(format!("cube '{}' in {}", name, id)))?;
    Ok(Json(format::to_json(&cube, query.index_format)))
}

pub async fn put_cube(
    State(reg): State<AppState>,
    user: UserContext,
    Path((tenant, app, version, status, branch, name)): Path<(
        String,
        String,
        String,
        String,
        String,
        String,
    )>,
    Json(body): Json<serde_json::Value>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let path = (tenant, app, version, status, branch);
    let id = app_id(&path)?;
    let cube = format::from_json(&body, id.clone())?;
    if !cube.name().eq_ignore_ascii_case(&name) {
        return Err(CubeError::illegal_argument(format!(
            "cube payload is named '{}', path says '{}'",
            cube.name(),
            name
        ))
        .into());
    }
    reg.update_cube(&user, &cube).await?;
    Ok(Json(serde_json::json!({ "sha1": cube.sha1() })))
}

pub async fn delete_cube(
    State(reg): State<AppState>,
    user: UserContext,
    Path((tenant, app, version, status, branch, name)): Path<(
        String,
        String,
        String,
        String,
        String,
        String,
    )>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let path = (tenant, app, version, status, branch);
    let id = app_id(&path)?;
    let deleted = reg.delete_cubes(&user, &id, &[name], false).await?;
    Ok(Json(serde_json::json!({ "deleted": deleted })))
}

/// Coordinate lookup: body is a map of axis name → value; the response
/// carries the bound value plus the output map (rule info included).
pub async fn get_cell(
    State(reg): State<AppState>,
    user: UserContext,
    Path((tenant, app, version, status, branch, name)): Path<(
        String,
        String,
        String,
        String,
        String,
        String,
    )>,
    Json(coord): Json<Coordinate>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let path = (tenant, app, version, status, branch);
    let id = app_id(&path)?;
    permissions::assert_permissions(&reg, &user, &id, Some(&name), permissions::Action::Read)
        .await?;
    let cube = reg
        .get_cube(&id, &name)
        .await?
        .ok_or_else(|| CubeError::coordinate_not_found(format!("cube '{}' in {}", name, id)))?;
    let mut output = Output::new();
    let value = cube.get_cell(&coord, &mut output, reg.evaluator())?;
    Ok(Json(serde_json::json!({ "value": value, "output": output })))
}

#[derive(Debug, Deserialize)]
pub struct CopyBranchRequest {
    pub target_branch: String,
    #[serde(default)]
    pub with_history: bool,
}

pub async fn copy_branch(
    State(reg): State<AppState>,
    user: UserContext,
    Path(path): Path<AppPath>,
    Json(body): Json<CopyBranchRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let src = app_id(&path)?;
    let dst = src.with_branch(&body.target_branch);
    let copied = BranchOperations::copy_branch(&reg, &user, &src, &dst, body.with_history).await?;
    Ok(Json(serde_json::json!({ "copied": copied })))
}

pub async fn delete_branch(
    State(reg): State<AppState>,
    user: UserContext,
    Path(path): Path<AppPath>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let id = app_id(&path)?;
    let deleted = BranchOperations::delete_branch(&reg, &user, &id).await?;
    Ok(Json(serde_json::json!({ "deleted": deleted })))
}

#[derive(Debug, Deserialize)]
pub struct ReleaseRequest {
    pub new_version: String,
}

pub async fn release_version(
    State(reg): State<AppState>,
    user: UserContext,
    Path(path): Path<AppPath>,
    Json(body): Json<ReleaseRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let id = app_id(&path)?;
    let released = BranchOperations::release_version(&reg, &user, &id, &body.new_version).await?;
    Ok(Json(serde_json::json!({ "released": released })))
}

pub async fn lock_app(
    State(reg): State<AppState>,
    user: UserContext,
    Path(path): Path<AppPath>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let id = app_id(&path)?;
    let acquired = permissions::lock_app(&reg, &user, &id).await?;
    Ok(Json(serde_json::json!({ "locked": true, "acquired": acquired })))
}

pub async fn unlock_app(
    State(reg): State<AppState>,
    user: UserContext,
    Path(path): Path<AppPath>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let id = app_id(&path)?;
    permissions::unlock_app(&reg, &user, &id).await?;
    Ok(Json(serde_json::json!({ "locked": false })))
}

pub async fn get_lock_holder(
    State(reg): State<AppState>,
    Path(path): Path<AppPath>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let id = app_id(&path)?;
    let holder = permissions::lock_holder(&reg, &id).await?;
    Ok(Json(serde_json::json!({ "holder": holder })))
}
