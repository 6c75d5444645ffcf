//! Read-only object lookup.
//!
//! `GET /objects/{contenthash}` returns the registry record next to the
//! location the tiers actually report, so an operator can spot drift.

use axum::{
    Json,
    extract::{Path, State},
    response::IntoResponse,
};
use serde::Serialize;

use super::AppState;
use crate::{
    errors::AppError,
    models::{ContentHash, ObjectLocation, ObjectRecord},
};

#[derive(Serialize, Debug)]
pub struct ObjectStatus {
    pub record: ObjectRecord,
    /// Location as recorded, with NULL read as LOCAL.
    pub recorded_location: ObjectLocation,
    /// Location observed by probing both tiers.
    pub actual_location: ObjectLocation,
    pub in_sync: bool,
}

pub async fn get_object_status(
    State(state): State<AppState>,
    Path(contenthash): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let hash = ContentHash::parse(&contenthash)?;
    let record = state
        .registry
        .get(&hash)
        .await?
        .ok_or_else(|| AppError::not_found(format!("no record for {}", hash)))?;

    let expected_size = record.filesize.and_then(|size| u64::try_from(size).ok());
    let actual_location = state.fs.get_actual_location(&hash, expected_size).await?;
    let recorded_location = record.effective_location();

    Ok(Json(ObjectStatus {
        in_sync: recorded_location == actual_location,
        record,
        recorded_location,
        actual_location,
    }))
}
