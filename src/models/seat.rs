use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Seat {
    pub id: Uuid,
    pub theater_id: Uuid,
    pub row_label: String,
    pub seat_number: i32,
    pub seat_type: String,
}
