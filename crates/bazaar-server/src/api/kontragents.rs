//! A user's kontragents (billing entities) and their delivery addresses.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Extension, Json,
};
use bazaar_core::{KontragentIdentity, OwnershipForm};
use bazaar_db::{KontragentAddressRow, KontragentRow};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::middleware::{CurrentUser, RequestId};

use super::{map_db_error, ApiError, ApiResponse, AppState};

#[derive(Debug, Serialize)]
pub(super) struct KontragentItem {
    id: i64,
    ownership_form: String,
    name: String,
    inn: Option<String>,
    pinfl: Option<String>,
    is_favorite: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<KontragentRow> for KontragentItem {
    fn from(row: KontragentRow) -> Self {
        Self {
            id: row.id,
            ownership_form: row.ownership_form,
            name: row.name,
            inn: row.inn,
            pinfl: row.pinfl,
            is_favorite: row.is_favorite,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub(super) struct AddressItem {
    id: i64,
    kontragent_id: i64,
    address: String,
    is_main: bool,
    created_at: DateTime<Utc>,
}

impl From<KontragentAddressRow> for AddressItem {
    fn from(row: KontragentAddressRow) -> Self {
        Self {
            id: row.id,
            kontragent_id: row.kontragent_id,
            address: row.address,
            is_main: row.is_main,
            created_at: row.created_at,
        }
    }
}

#[derive(Debug, Deserialize)]
pub(super) struct CreateKontragentRequest {
    pub ownership_form: String,
    pub name: String,
    pub inn: Option<String>,
    pub pinfl: Option<String>,
    #[serde(default)]
    pub is_favorite: bool,
}

/// Absent fields keep their current value.
#[derive(Debug, Deserialize)]
pub(super) struct UpdateKontragentRequest {
    pub ownership_form: Option<String>,
    pub name: Option<String>,
    pub inn: Option<String>,
    pub pinfl: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(super) struct CreateAddressRequest {
    pub address: String,
    #[serde(default)]
    pub is_main: bool,
}

fn parse_form(rid: &str, raw: &str) -> Result<OwnershipForm, ApiError> {
    raw.trim()
        .parse()
        .map_err(|e: bazaar_core::KontragentError| ApiError::new(rid, "validation_error", e.to_string()))
}

fn identity(
    rid: &str,
    form: OwnershipForm,
    name: &str,
    inn: Option<&str>,
    pinfl: Option<&str>,
) -> Result<KontragentIdentity, ApiError> {
    KontragentIdentity::new(form, name, inn, pinfl)
        .map_err(|e| ApiError::new(rid, "validation_error", e.to_string()))
}

/// GET /kontragents
pub(super) async fn list_kontragents(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
) -> Result<Json<ApiResponse<Vec<KontragentItem>>>, ApiError> {
    let rows = bazaar_db::list_kontragents(&state.pool, user.id)
        .await
        .map_err(|e| map_db_error(req_id.0.clone(), &e))?;
    let data = rows.into_iter().map(KontragentItem::from).collect();
    Ok(Json(ApiResponse::new(req_id.0, data)))
}

/// POST /kontragents
pub(super) async fn create_kontragent(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Json(body): Json<CreateKontragentRequest>,
) -> Result<(StatusCode, Json<ApiResponse<KontragentItem>>), ApiError> {
    let rid = &req_id.0;
    let form = parse_form(rid, &body.ownership_form)?;
    let identity = identity(
        rid,
        form,
        &body.name,
        body.inn.as_deref(),
        body.pinfl.as_deref(),
    )?;

    let row = bazaar_db::create_kontragent(&state.pool, user.id, &identity, body.is_favorite)
        .await
        .map_err(|e| map_db_error(rid.clone(), &e))?;

    tracing::info!(user_id = user.id, kontragent_id = row.id, "kontragent created");
    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::new(req_id.0.clone(), row.into())),
    ))
}

/// INN and PINFL for a PATCH as `(inn, pinfl)`. Request values win and
/// stored ones carry over, except that a change of ownership form drops the
/// stored identifier the new form does not use. A blank request value clears.
fn patched_identifiers<'a>(
    form: OwnershipForm,
    stored_form: OwnershipForm,
    requested: (Option<&'a str>, Option<&'a str>),
    stored: (Option<&'a str>, Option<&'a str>),
) -> (Option<&'a str>, Option<&'a str>) {
    let (inn, pinfl) = requested;
    let (stored_inn, stored_pinfl) = stored;
    let form_changed = form != stored_form;
    let keep_inn = !form_changed || form.requires_inn();
    let keep_pinfl = !form_changed || !form.requires_inn();
    (
        inn.or(stored_inn.filter(|_| keep_inn)),
        pinfl.or(stored_pinfl.filter(|_| keep_pinfl)),
    )
}

/// PATCH /kontragents/{id}
pub(super) async fn update_kontragent(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Path(id): Path<i64>,
    Json(body): Json<UpdateKontragentRequest>,
) -> Result<Json<ApiResponse<KontragentItem>>, ApiError> {
    let rid = &req_id.0;
    let current = bazaar_db::get_kontragent(&state.pool, user.id, id)
        .await
        .map_err(|e| map_db_error(rid.clone(), &e))?
        .ok_or_else(|| ApiError::new(rid, "not_found", format!("kontragent {id} not found")))?;

    let stored_form = parse_form(rid, &current.ownership_form)?;
    let form = match body.ownership_form.as_deref() {
        Some(raw) => parse_form(rid, raw)?,
        None => stored_form,
    };
    let (inn, pinfl) = patched_identifiers(
        form,
        stored_form,
        (body.inn.as_deref(), body.pinfl.as_deref()),
        (current.inn.as_deref(), current.pinfl.as_deref()),
    );
    let identity = identity(
        rid,
        form,
        body.name.as_deref().unwrap_or(&current.name),
        inn,
        pinfl,
    )?;

    let row = bazaar_db::update_kontragent(&state.pool, user.id, id, &identity)
        .await
        .map_err(|e| map_db_error(rid.clone(), &e))?;
    Ok(Json(ApiResponse::new(req_id.0.clone(), row.into())))
}

/// DELETE /kontragents/{id}
pub(super) async fn delete_kontragent(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Path(id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    bazaar_db::soft_delete_kontragent(&state.pool, user.id, id)
        .await
        .map_err(|e| map_db_error(req_id.0, &e))?;
    Ok(StatusCode::NO_CONTENT)
}

/// PUT /kontragents/{id}/favorite
pub(super) async fn set_favorite(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Path(id): Path<i64>,
) -> Result<Json<ApiResponse<KontragentItem>>, ApiError> {
    let row = bazaar_db::set_favorite_kontragent(&state.pool, user.id, id)
        .await
        .map_err(|e| map_db_error(req_id.0.clone(), &e))?;
    Ok(Json(ApiResponse::new(req_id.0, row.into())))
}

/// GET /kontragents/{id}/addresses
pub(super) async fn list_addresses(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Path(id): Path<i64>,
) -> Result<Json<ApiResponse<Vec<AddressItem>>>, ApiError> {
    let rows = bazaar_db::list_addresses(&state.pool, user.id, id)
        .await
        .map_err(|e| map_db_error(req_id.0.clone(), &e))?;
    let data = rows.into_iter().map(AddressItem::from).collect();
    Ok(Json(ApiResponse::new(req_id.0, data)))
}

/// POST /kontragents/{id}/addresses
pub(super) async fn create_address(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Path(id): Path<i64>,
    Json(body): Json<CreateAddressRequest>,
) -> Result<(StatusCode, Json<ApiResponse<AddressItem>>), ApiError> {
    let rid = &req_id.0;
    let address = body.address.trim();
    if address.is_empty() {
        return Err(ApiError::new(rid, "validation_error", "address must be non-empty"));
    }

    let row = bazaar_db::create_address(&state.pool, user.id, id, address, body.is_main)
        .await
        .map_err(|e| map_db_error(rid.clone(), &e))?;
    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::new(req_id.0.clone(), row.into())),
    ))
}

/// DELETE /kontragents/{id}/addresses/{address_id}
pub(super) async fn delete_address(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Path((id, address_id)): Path<(i64, i64)>,
) -> Result<StatusCode, ApiError> {
    bazaar_db::soft_delete_address(&state.pool, user.id, id, address_id)
        .await
        .map_err(|e| map_db_error(req_id.0, &e))?;
    Ok(StatusCode::NO_CONTENT)
}

/// PUT /kontragents/{id}/addresses/{address_id}/main
pub(super) async fn set_main_address(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Path((id, address_id)): Path<(i64, i64)>,
) -> Result<Json<ApiResponse<AddressItem>>, ApiError> {
    let row = bazaar_db::set_main_address(&state.pool, user.id, id, address_id)
        .await
        .map_err(|e| map_db_error(req_id.0.clone(), &e))?;
    Ok(Json(ApiResponse::new(req_id.0, row.into())))
}
