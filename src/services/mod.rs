pub mod reservations;

pub use reservations::ReservationService;
