use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{delete, get, post},
    Json, Router,
};
use chrono::Utc;
use serde::Deserialize;
use std::sync::Arc;
use uuid::Uuid;

use crate::error::Result;
use crate::middleware::AuthUser;
use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/reservations", post(create_reservation))
        .route("/reservations", get(get_user_reservations))
        .route("/reservations/{reservation_id}", delete(cancel_reservation))
}

// POST /api/reservations
#[derive(Debug, Deserialize)]
struct CreateReservationRequest {
    showtime_id: Uuid,
    seat_ids: Vec<Uuid>,
}

async fn create_reservation(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Json(req): Json<CreateReservationRequest>,
) -> Result<impl IntoResponse> {
    let reservation = state
        .reservations
        .allocate(req.showtime_id, user.user_id, &req.seat_ids)
        .await?;

    tracing::info!(
        "reservation {} created for user {} ({} seats)",
        reservation.booking_reference,
        user.user_id,
        reservation.seats.len()
    );

    Ok((StatusCode::CREATED, Json(reservation)))
}

// GET /api/reservations
async fn get_user_reservations(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
) -> Result<impl IntoResponse> {
    let reservations = state.reservations.list_for_user(user.user_id).await?;
    Ok((StatusCode::OK, Json(reservations)))
}

// DELETE /api/reservations/{reservation_id}
async fn cancel_reservation(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(reservation_id): Path<Uuid>,
) -> Result<impl IntoResponse> {
    state
        .reservations
        .cancel(reservation_id, user.user_id, Utc::now().naive_utc())
        .await?;

    Ok((
        StatusCode::OK,
        Json(serde_json::json!({ "message": "Reservation cancelled successfully" })),
    ))
}
