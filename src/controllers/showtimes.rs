use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{delete, get, post},
    Json, Router,
};
use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::sync::Arc;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::middleware::AdminUser;
use crate::models::Showtime;
use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/showtimes", get(list_showtimes))
        .route("/showtimes", post(create_showtime))
        .route("/showtimes/{showtime_id}", delete(deactivate_showtime))
        .route("/showtimes/{showtime_id}/seats", get(get_showtime_seats))
}

/* ---------- SHOWTIME REGISTRY ---------- */

#[derive(Debug, Deserialize)]
struct ShowtimesQuery {
    movie_id: Option<Uuid>,
    show_date: Option<NaiveDate>,
}

#[derive(Debug, Serialize, FromRow)]
struct ShowtimeResponse {
    id: Uuid,
    movie_id: Uuid,
    theater_id: Uuid,
    show_date: NaiveDate,
    show_time: NaiveTime,
    price: f64,
    is_active: bool,
    movie_title: String,
    theater_name: String,
    available_seats: i64,
}

// GET /api/showtimes
async fn list_showtimes(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ShowtimesQuery>,
) -> Result<impl IntoResponse> {
    let mut q = String::from(
        r#"
        SELECT
            sh.id, sh.movie_id, sh.theater_id, sh.show_date, sh.show_time,
            sh.price, sh.is_active,
            m.title AS movie_title,
            t.name AS theater_name,
            t.total_seats::bigint - COUNT(rs.seat_id) AS available_seats
        FROM showtimes sh
        JOIN movies m ON sh.movie_id = m.id
        JOIN theaters t ON sh.theater_id = t.id
        LEFT JOIN reservation_seats rs ON sh.id = rs.showtime_id
            AND rs.reservation_id IN (
                SELECT id FROM reservations WHERE status = 'confirmed'
            )
        WHERE sh.is_active = TRUE
        "#,
    );

    let mut bind_idx = 1;
    if params.movie_id.is_some() {
        q.push_str(&format!(" AND sh.movie_id = ${}", bind_idx));
        bind_idx += 1;
    }
    if params.show_date.is_some() {
        q.push_str(&format!(" AND sh.show_date = ${}", bind_idx));
    }
    q.push_str(
        r#"
        GROUP BY sh.id, sh.movie_id, sh.theater_id, sh.show_date, sh.show_time,
                 sh.price, sh.is_active, m.title, t.name, t.total_seats
        ORDER BY sh.show_date, sh.show_time
        "#,
    );

    let mut dbq = sqlx::query_as::<_, ShowtimeResponse>(&q);
    if let Some(movie_id) = params.movie_id {
        dbq = dbq.bind(movie_id);
    }
    if let Some(show_date) = params.show_date {
        dbq = dbq.bind(show_date);
    }

    let showtimes = dbq.fetch_all(&state.db.pool).await?;

    Ok((StatusCode::OK, Json(showtimes)))
}

// POST /api/showtimes
#[derive(Debug, Deserialize)]
struct CreateShowtimeRequest {
    movie_id: Uuid,
    theater_id: Uuid,
    show_date: NaiveDate,
    show_time: NaiveTime,
    price: f64,
}

async fn create_showtime(
    State(state): State<Arc<AppState>>,
    _admin: AdminUser,
    Json(req): Json<CreateShowtimeRequest>,
) -> Result<impl IntoResponse> {
    if req.price <= 0.0 {
        return Err(Error::InvalidRequest("price must be positive"));
    }

    let created = sqlx::query_as::<_, Showtime>(
        r#"
        INSERT INTO showtimes (movie_id, theater_id, show_date, show_time, price)
        VALUES ($1, $2, $3, $4, $5)
        RETURNING id, movie_id, theater_id, show_date, show_time, price, is_active
        "#,
    )
    .bind(req.movie_id)
    .bind(req.theater_id)
    .bind(req.show_date)
    .bind(req.show_time)
    .bind(req.price)
    .fetch_one(&state.db.pool)
    .await
    .map_err(|e| {
        if slot_taken(&e) {
            Error::InvalidState("theater already has an active showtime at this time")
        } else {
            Error::Database(e)
        }
    })?;

    Ok((StatusCode::CREATED, Json(created)))
}

fn slot_taken(err: &sqlx::Error) -> bool {
    err.as_database_error()
        .and_then(|db| db.constraint())
        .is_some_and(|name| name == "showtimes_active_slot_key")
}

// DELETE /api/showtimes/{showtime_id}
async fn deactivate_showtime(
    State(state): State<Arc<AppState>>,
    _admin: AdminUser,
    Path(showtime_id): Path<Uuid>,
) -> Result<impl IntoResponse> {
    // Soft delete: historical reservations stay valid.
    let updated = sqlx::query(
        "UPDATE showtimes SET is_active = FALSE WHERE id = $1 AND is_active = TRUE",
    )
    .bind(showtime_id)
    .execute(&state.db.pool)
    .await?
    .rows_affected();

    if updated == 0 {
        return Err(Error::NotFound("showtime not found"));
    }

    Ok((
        StatusCode::OK,
        Json(serde_json::json!({ "message": "Showtime deactivated" })),
    ))
}

/* ---------- AVAILABILITY ---------- */

// GET /api/showtimes/{showtime_id}/seats
async fn get_showtime_seats(
    State(state): State<Arc<AppState>>,
    Path(showtime_id): Path<Uuid>,
) -> Result<impl IntoResponse> {
    let seats = state.reservations.resolve_availability(showtime_id).await?;
    Ok((StatusCode::OK, Json(seats)))
}
