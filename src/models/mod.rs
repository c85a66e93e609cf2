pub mod seat;
pub mod showtime;
pub mod reservation;

pub use seat::Seat;
pub use showtime::Showtime;
pub use reservation::{Reservation, SeatAssignment};
