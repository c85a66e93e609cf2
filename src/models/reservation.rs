use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Reservation {
    pub id: Uuid,
    pub user_id: Uuid,
    pub showtime_id: Uuid,
    pub total_price: f64,
    pub booking_reference: String,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub cancelled_at: Option<DateTime<Utc>>,
}

/// One seat held against one showtime by one reservation. Rows are written
/// once by the allocator and never touched again; whether the seat counts
/// as occupied is derived from the owning reservation's status.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct SeatAssignment {
    pub reservation_id: Uuid,
    pub showtime_id: Uuid,
    pub seat_id: Uuid,
}
