//! The seat reservation core: availability resolution, transactional seat
//! allocation, and reservation lifecycle (cancellation, listing).
//!
//! All coordination between concurrent allocation attempts happens in
//! Postgres. The allocator takes exclusive row locks on the showtime and on
//! the requested seats inside one transaction, so two overlapping requests
//! are linearized by the database and at most one of them commits the
//! contested seats. There is no in-process lock state anywhere.

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use rand::Rng;
use serde::Serialize;
use sqlx::{FromRow, PgPool};
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

use crate::error::{Error, Result};

const BOOKING_REFERENCE_LEN: usize = 10;
const BOOKING_REFERENCE_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// A collision on the booking-reference unique constraint is the only
/// failure the allocator retries: regenerating a fresh token is free of
/// side effects, and at 36^10 references a retry budget of 3 is already
/// far beyond what will ever be consumed.
const REFERENCE_RETRY_BUDGET: u32 = 3;

#[derive(Clone)]
pub struct ReservationService {
    pool: PgPool,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct SeatAvailability {
    pub id: Uuid,
    pub row_label: String,
    pub seat_number: i32,
    pub seat_type: String,
    pub is_available: bool,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct ReservedSeat {
    pub id: Uuid,
    pub row_label: String,
    pub seat_number: i32,
    pub seat_type: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReservationDetails {
    pub id: Uuid,
    pub booking_reference: String,
    pub showtime_id: Uuid,
    pub movie_title: String,
    pub show_date: NaiveDate,
    pub show_time: NaiveTime,
    pub theater_name: String,
    pub seats: Vec<ReservedSeat>,
    pub total_price: f64,
    pub status: String,
    pub created_at: DateTime<Utc>,
}

// Showtime row as seen by the allocator, locked FOR UPDATE.
#[derive(FromRow)]
struct ShowtimeContext {
    id: Uuid,
    theater_id: Uuid,
    price: f64,
    show_date: NaiveDate,
    show_time: NaiveTime,
    movie_title: String,
    theater_name: String,
}

#[derive(FromRow)]
struct ReservationRow {
    id: Uuid,
    booking_reference: String,
    showtime_id: Uuid,
    total_price: f64,
    status: String,
    created_at: DateTime<Utc>,
    movie_title: String,
    show_date: NaiveDate,
    show_time: NaiveTime,
    theater_name: String,
}

impl ReservationService {
    pub fn new(pool: PgPool) -> Self {
        ReservationService { pool }
    }

    /// Availability Resolver: every seat of the showtime's theater, tagged
    /// available/unavailable. A seat is unavailable iff a confirmed
    /// reservation holds it for this showtime; cancelled reservations keep
    /// their assignment rows but no longer count.
    pub async fn resolve_availability(&self, showtime_id: Uuid) -> Result<Vec<SeatAvailability>> {
        let exists = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS(SELECT 1 FROM showtimes WHERE id = $1 AND is_active = TRUE)",
        )
        .bind(showtime_id)
        .fetch_one(&self.pool)
        .await?;

        if !exists {
            return Err(Error::NotFound("showtime not found"));
        }

        let seats = sqlx::query_as::<_, SeatAvailability>(
            r#"
            SELECT
                s.id, s.row_label, s.seat_number, s.seat_type,
                (rs.seat_id IS NULL) AS is_available
            FROM seats s
            JOIN showtimes sh ON s.theater_id = sh.theater_id
            LEFT JOIN reservation_seats rs ON rs.seat_id = s.id
                AND rs.showtime_id = sh.id
                AND rs.reservation_id IN (
                    SELECT id FROM reservations WHERE status = 'confirmed'
                )
            WHERE sh.id = $1
            ORDER BY s.row_label, s.seat_number
            "#,
        )
        .bind(showtime_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(seats)
    }

    /// Reservation Allocator: claim every requested seat for the showtime
    /// on behalf of `user_id`, or fail with zero effect.
    pub async fn allocate(
        &self,
        showtime_id: Uuid,
        user_id: Uuid,
        seat_ids: &[Uuid],
    ) -> Result<ReservationDetails> {
        validate_seat_request(seat_ids)?;

        // The whole transaction restarts on a booking-reference collision;
        // nothing has committed yet, so a rerun with a fresh token is safe.
        for attempt in 1..=REFERENCE_RETRY_BUDGET {
            match self.try_allocate(showtime_id, user_id, seat_ids).await {
                Err(Error::Database(e)) if violates_constraint(&e, "reservations_booking_reference_key") => {
                    tracing::warn!(
                        "booking reference collision on attempt {}, regenerating",
                        attempt
                    );
                    continue;
                }
                Err(Error::Database(e)) if is_unique_violation(&e) => {
                    // A concurrent writer slipped a conflicting row past us.
                    // The transaction is already rolled back.
                    return Err(Error::SeatUnavailable);
                }
                other => return other,
            }
        }

        Err(Error::ReferenceExhausted)
    }

    async fn try_allocate(
        &self,
        showtime_id: Uuid,
        user_id: Uuid,
        seat_ids: &[Uuid],
    ) -> Result<ReservationDetails> {
        let mut tx = self.pool.begin().await?;

        // 1. Lock the showtime row. Serializes allocation attempts per
        //    showtime for the rest of this transaction.
        let showtime = sqlx::query_as::<_, ShowtimeContext>(
            r#"
            SELECT sh.id, sh.theater_id, sh.price, sh.show_date, sh.show_time,
                   m.title AS movie_title, t.name AS theater_name
            FROM showtimes sh
            JOIN movies m ON sh.movie_id = m.id
            JOIN theaters t ON sh.theater_id = t.id
            WHERE sh.id = $1 AND sh.is_active = TRUE
            FOR UPDATE OF sh
            "#,
        )
        .bind(showtime_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(Error::NotFound("showtime not found"))?;

        // 2. Resolve and lock the requested seats in one statement: only
        //    seats of this theater that are not held by a confirmed
        //    reservation match, and the matching rows are locked until
        //    commit. A separate check-then-act read would let two requests
        //    both observe "free" and both proceed. Ascending id is the
        //    canonical lock order, so overlapping seat sets acquired in
        //    different request orders cannot deadlock.
        let seats = sqlx::query_as::<_, ReservedSeat>(
            r#"
            SELECT s.id, s.row_label, s.seat_number, s.seat_type
            FROM seats s
            WHERE s.id = ANY($1)
              AND s.theater_id = $2
              AND NOT EXISTS (
                  SELECT 1 FROM reservation_seats rs
                  JOIN reservations r ON rs.reservation_id = r.id
                  WHERE rs.seat_id = s.id
                    AND rs.showtime_id = $3
                    AND r.status = 'confirmed'
              )
            ORDER BY s.id
            FOR UPDATE OF s
            "#,
        )
        .bind(seat_ids)
        .bind(showtime.theater_id)
        .bind(showtime_id)
        .fetch_all(&mut *tx)
        .await?;

        // 3. All-or-nothing: any invalid, foreign, or taken seat aborts the
        //    whole request. Dropping the transaction rolls it back.
        if seats.len() != seat_ids.len() {
            return Err(Error::SeatUnavailable);
        }

        let total_price = total_price(showtime.price, seats.len());
        let booking_reference = generate_booking_reference();

        let (reservation_id, created_at) = sqlx::query_as::<_, (Uuid, DateTime<Utc>)>(
            r#"
            INSERT INTO reservations (user_id, showtime_id, total_price, booking_reference, status)
            VALUES ($1, $2, $3, $4, 'confirmed')
            RETURNING id, created_at
            "#,
        )
        .bind(user_id)
        .bind(showtime.id)
        .bind(total_price)
        .bind(&booking_reference)
        .fetch_one(&mut *tx)
        .await?;

        let locked_ids: Vec<Uuid> = seats.iter().map(|s| s.id).collect();
        sqlx::query(
            r#"
            INSERT INTO reservation_seats (reservation_id, showtime_id, seat_id)
            SELECT $1, $2, UNNEST($3::uuid[])
            "#,
        )
        .bind(reservation_id)
        .bind(showtime.id)
        .bind(&locked_ids)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(ReservationDetails {
            id: reservation_id,
            booking_reference,
            showtime_id: showtime.id,
            movie_title: showtime.movie_title,
            show_date: showtime.show_date,
            show_time: showtime.show_time,
            theater_name: showtime.theater_name,
            seats,
            total_price,
            status: "confirmed".to_string(),
            created_at,
        })
    }

    /// Lifecycle Manager: cancel a confirmed reservation owned by
    /// `user_id`, provided its showtime is still in the future at `now`.
    /// The seat assignments stay behind as history; the status flip alone
    /// makes the seats available again, because occupancy is derived from
    /// confirmed status.
    pub async fn cancel(
        &self,
        reservation_id: Uuid,
        user_id: Uuid,
        now: NaiveDateTime,
    ) -> Result<()> {
        // Ownership and status failures both collapse into NotFound so the
        // response does not reveal other users' reservations.
        let row = sqlx::query_as::<_, (Uuid, NaiveDate, NaiveTime)>(
            r#"
            SELECT r.id, sh.show_date, sh.show_time
            FROM reservations r
            JOIN showtimes sh ON r.showtime_id = sh.id
            WHERE r.id = $1 AND r.user_id = $2 AND r.status = 'confirmed'
            "#,
        )
        .bind(reservation_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(Error::NotFound("reservation not found"))?;

        let show_starts_at = row.1.and_time(row.2);
        if !cancellation_window_open(show_starts_at, now) {
            return Err(Error::InvalidState("cannot cancel past reservations"));
        }

        // Single-row status flip; no seat locking needed. The status guard
        // makes a lost race with another cancel a no-op.
        let updated = sqlx::query(
            r#"
            UPDATE reservations
            SET status = 'cancelled', cancelled_at = NOW()
            WHERE id = $1 AND status = 'confirmed'
            "#,
        )
        .bind(reservation_id)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if updated == 0 {
            return Err(Error::NotFound("reservation not found"));
        }

        Ok(())
    }

    /// All reservations of a user, any status, newest first, each with its
    /// seat set.
    pub async fn list_for_user(&self, user_id: Uuid) -> Result<Vec<ReservationDetails>> {
        let rows = sqlx::query_as::<_, ReservationRow>(
            r#"
            SELECT r.id, r.booking_reference, r.showtime_id, r.total_price,
                   r.status, r.created_at,
                   m.title AS movie_title,
                   sh.show_date, sh.show_time,
                   t.name AS theater_name
            FROM reservations r
            JOIN showtimes sh ON r.showtime_id = sh.id
            JOIN movies m ON sh.movie_id = m.id
            JOIN theaters t ON sh.theater_id = t.id
            WHERE r.user_id = $1
            ORDER BY r.created_at DESC
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        let reservation_ids: Vec<Uuid> = rows.iter().map(|r| r.id).collect();
        let seat_rows = sqlx::query_as::<_, (Uuid, Uuid, String, i32, String)>(
            r#"
            SELECT rs.reservation_id, s.id, s.row_label, s.seat_number, s.seat_type
            FROM reservation_seats rs
            JOIN seats s ON rs.seat_id = s.id
            WHERE rs.reservation_id = ANY($1)
            ORDER BY s.row_label, s.seat_number
            "#,
        )
        .bind(&reservation_ids)
        .fetch_all(&self.pool)
        .await?;

        let mut seats_by_reservation: HashMap<Uuid, Vec<ReservedSeat>> = HashMap::new();
        for (reservation_id, id, row_label, seat_number, seat_type) in seat_rows {
            seats_by_reservation
                .entry(reservation_id)
                .or_default()
                .push(ReservedSeat {
                    id,
                    row_label,
                    seat_number,
                    seat_type,
                });
        }

        Ok(rows
            .into_iter()
            .map(|r| {
                let seats = seats_by_reservation.remove(&r.id).unwrap_or_default();
                ReservationDetails {
                    id: r.id,
                    booking_reference: r.booking_reference,
                    showtime_id: r.showtime_id,
                    movie_title: r.movie_title,
                    show_date: r.show_date,
                    show_time: r.show_time,
                    theater_name: r.theater_name,
                    seats,
                    total_price: r.total_price,
                    status: r.status,
                    created_at: r.created_at,
                }
            })
            .collect())
    }
}

fn validate_seat_request(seat_ids: &[Uuid]) -> Result<()> {
    if seat_ids.is_empty() {
        return Err(Error::InvalidRequest("seat_ids must not be empty"));
    }
    let distinct: HashSet<&Uuid> = seat_ids.iter().collect();
    if distinct.len() != seat_ids.len() {
        return Err(Error::InvalidRequest("duplicate seat ids in request"));
    }
    Ok(())
}

fn total_price(unit_price: f64, seat_count: usize) -> f64 {
    unit_price * seat_count as f64
}

/// Cancellation is allowed only while the showtime is strictly in the
/// future.
fn cancellation_window_open(show_starts_at: NaiveDateTime, now: NaiveDateTime) -> bool {
    show_starts_at > now
}

fn generate_booking_reference() -> String {
    let mut rng = rand::thread_rng();
    (0..BOOKING_REFERENCE_LEN)
        .map(|_| {
            let idx = rng.gen_range(0..BOOKING_REFERENCE_ALPHABET.len());
            BOOKING_REFERENCE_ALPHABET[idx] as char
        })
        .collect()
}

fn violates_constraint(err: &sqlx::Error, constraint: &str) -> bool {
    err.as_database_error()
        .and_then(|db| db.constraint())
        .is_some_and(|name| name == constraint)
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    err.as_database_error()
        .is_some_and(|db| matches!(db.kind(), sqlx::error::ErrorKind::UniqueViolation))
}
