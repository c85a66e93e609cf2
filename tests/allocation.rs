//! Transactional properties of the reservation core, exercised against a
//! real Postgres. These tests need DATABASE_URL and are ignored by default:
//!
//!     DATABASE_URL=postgres://... cargo test -- --ignored

use chrono::{Duration, Utc};
use cinema_reservations::error::Error;
use cinema_reservations::models::{Reservation, Seat, SeatAssignment};
use cinema_reservations::services::ReservationService;
use sqlx::PgPool;
use uuid::Uuid;

struct Fixture {
    pool: PgPool,
    service: ReservationService,
    showtime_id: Uuid,
    theater_id: Uuid,
    /// Seats A1, A2, A3 in order.
    seats: Vec<Seat>,
}

async fn test_pool() -> PgPool {
    let url = std::env::var("DATABASE_URL")
        .expect("DATABASE_URL must be set for integration tests");
    let pool = PgPool::connect(&url).await.unwrap();
    sqlx::migrate!("./src/migrations").run(&pool).await.unwrap();
    pool
}

/// Seeds a fresh three-seat theater with one showtime at `now + offset`,
/// price 10.00. Every call uses new rows, so tests do not interfere.
async fn seed(pool: &PgPool, offset: Duration) -> Fixture {
    let theater_id: Uuid = sqlx::query_scalar(
        "INSERT INTO theaters (name, total_seats) VALUES ($1, 3) RETURNING id",
    )
    .bind(format!("theater-{}", Uuid::new_v4()))
    .fetch_one(pool)
    .await
    .unwrap();

    for number in 1..=3 {
        sqlx::query(
            "INSERT INTO seats (theater_id, row_label, seat_number) VALUES ($1, 'A', $2)",
        )
        .bind(theater_id)
        .bind(number)
        .execute(pool)
        .await
        .unwrap();
    }

    let movie_id: Uuid = sqlx::query_scalar(
        "INSERT INTO movies (title) VALUES ($1) RETURNING id",
    )
    .bind(format!("movie-{}", Uuid::new_v4()))
    .fetch_one(pool)
    .await
    .unwrap();

    let starts_at = Utc::now().naive_utc() + offset;
    let showtime_id: Uuid = sqlx::query_scalar(
        r#"
        INSERT INTO showtimes (movie_id, theater_id, show_date, show_time, price)
        VALUES ($1, $2, $3, $4, 10.0)
        RETURNING id
        "#,
    )
    .bind(movie_id)
    .bind(theater_id)
    .bind(starts_at.date())
    .bind(starts_at.time())
    .fetch_one(pool)
    .await
    .unwrap();

    let seats = sqlx::query_as::<_, Seat>(
        "SELECT * FROM seats WHERE theater_id = $1 ORDER BY seat_number",
    )
    .bind(theater_id)
    .fetch_all(pool)
    .await
    .unwrap();

    Fixture {
        pool: pool.clone(),
        service: ReservationService::new(pool.clone()),
        showtime_id,
        theater_id,
        seats,
    }
}

async fn confirmed_holders(fx: &Fixture, seat_id: Uuid) -> i64 {
    sqlx::query_scalar(
        r#"
        SELECT COUNT(*)
        FROM reservation_seats rs
        JOIN reservations r ON rs.reservation_id = r.id
        WHERE rs.showtime_id = $1 AND rs.seat_id = $2 AND r.status = 'confirmed'
        "#,
    )
    .bind(fx.showtime_id)
    .bind(seat_id)
    .fetch_one(&fx.pool)
    .await
    .unwrap()
}

async fn availability_of(fx: &Fixture, seat_id: Uuid) -> bool {
    fx.service
        .resolve_availability(fx.showtime_id)
        .await
        .unwrap()
        .into_iter()
        .find(|s| s.id == seat_id)
        .unwrap()
        .is_available
}

#[tokio::test]
#[ignore = "requires a running Postgres"]
async fn concurrent_overlapping_requests_never_double_book() {
    let pool = test_pool().await;
    let fx = seed(&pool, Duration::days(1)).await;
    let (a1, a2, a3) = (fx.seats[0].id, fx.seats[1].id, fx.seats[2].id);

    let user_x = Uuid::new_v4();
    let user_y = Uuid::new_v4();

    let seats_x = [a1, a2];
    let seats_y = [a2, a3];
    let (res_x, res_y) = tokio::join!(
        fx.service.allocate(fx.showtime_id, user_x, &seats_x),
        fx.service.allocate(fx.showtime_id, user_y, &seats_y),
    );

    // Exactly one of the overlapping requests commits, fully.
    assert_ne!(res_x.is_ok(), res_y.is_ok());
    let winner = res_x.or(res_y).unwrap();
    assert_eq!(winner.seats.len(), 2);
    assert_eq!(winner.total_price, 20.0);

    // The contested seat is held by exactly one confirmed reservation.
    assert_eq!(confirmed_holders(&fx, a2).await, 1);
    assert!(!availability_of(&fx, a2).await);

    // The loser left nothing behind: exactly one reservation exists.
    let reservations: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM reservations WHERE showtime_id = $1")
            .bind(fx.showtime_id)
            .fetch_one(&fx.pool)
            .await
            .unwrap();
    assert_eq!(reservations, 1);
}

#[tokio::test]
#[ignore = "requires a running Postgres"]
async fn allocation_is_all_or_nothing() {
    let pool = test_pool().await;
    let fx = seed(&pool, Duration::days(1)).await;
    let (a1, a2) = (fx.seats[0].id, fx.seats[1].id);

    let first = Uuid::new_v4();
    fx.service
        .allocate(fx.showtime_id, first, &[a2])
        .await
        .unwrap();

    // A2 is taken, so a request for {A1, A2} must book neither.
    let second = Uuid::new_v4();
    let err = fx
        .service
        .allocate(fx.showtime_id, second, &[a1, a2])
        .await
        .unwrap_err();
    assert!(matches!(err, Error::SeatUnavailable));

    assert!(availability_of(&fx, a1).await);
    let loser_rows: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM reservations WHERE user_id = $1")
            .bind(second)
            .fetch_one(&fx.pool)
            .await
            .unwrap();
    assert_eq!(loser_rows, 0);
}

#[tokio::test]
#[ignore = "requires a running Postgres"]
async fn seats_of_another_theater_are_rejected() {
    let pool = test_pool().await;
    let fx = seed(&pool, Duration::days(1)).await;
    let other = seed(&pool, Duration::days(1)).await;

    let err = fx
        .service
        .allocate(fx.showtime_id, Uuid::new_v4(), &[other.seats[0].id])
        .await
        .unwrap_err();
    assert!(matches!(err, Error::SeatUnavailable));
    assert_ne!(fx.theater_id, other.theater_id);
}

#[tokio::test]
#[ignore = "requires a running Postgres"]
async fn cancellation_restores_availability_but_keeps_history() {
    let pool = test_pool().await;
    let fx = seed(&pool, Duration::days(1)).await;
    let (a1, a2) = (fx.seats[0].id, fx.seats[1].id);

    let user = Uuid::new_v4();
    let created = fx
        .service
        .allocate(fx.showtime_id, user, &[a1, a2])
        .await
        .unwrap();

    fx.service
        .cancel(created.id, user, Utc::now().naive_utc())
        .await
        .unwrap();

    // Seats are free again...
    assert!(availability_of(&fx, a1).await);
    assert!(availability_of(&fx, a2).await);

    // ...but the reservation and its assignments survive as history.
    let reservation = sqlx::query_as::<_, Reservation>(
        "SELECT * FROM reservations WHERE id = $1",
    )
    .bind(created.id)
    .fetch_one(&fx.pool)
    .await
    .unwrap();
    assert_eq!(reservation.status, "cancelled");
    assert!(reservation.cancelled_at.is_some());

    let assignments = sqlx::query_as::<_, SeatAssignment>(
        "SELECT * FROM reservation_seats WHERE reservation_id = $1",
    )
    .bind(created.id)
    .fetch_all(&fx.pool)
    .await
    .unwrap();
    assert_eq!(assignments.len(), 2);

    // A freed seat can be booked again by someone else.
    let rebooker = Uuid::new_v4();
    let rebooked = fx
        .service
        .allocate(fx.showtime_id, rebooker, &[a1])
        .await
        .unwrap();
    assert_eq!(rebooked.total_price, 10.0);
}

#[tokio::test]
#[ignore = "requires a running Postgres"]
async fn cancelling_someone_elses_reservation_is_not_found() {
    let pool = test_pool().await;
    let fx = seed(&pool, Duration::days(1)).await;

    let owner = Uuid::new_v4();
    let created = fx
        .service
        .allocate(fx.showtime_id, owner, &[fx.seats[0].id])
        .await
        .unwrap();

    let stranger = Uuid::new_v4();
    let err = fx
        .service
        .cancel(created.id, stranger, Utc::now().naive_utc())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::NotFound(_)));

    // No state change.
    let status: String =
        sqlx::query_scalar("SELECT status FROM reservations WHERE id = $1")
            .bind(created.id)
            .fetch_one(&fx.pool)
            .await
            .unwrap();
    assert_eq!(status, "confirmed");
}

#[tokio::test]
#[ignore = "requires a running Postgres"]
async fn past_showtime_cannot_be_cancelled() {
    let pool = test_pool().await;
    let fx = seed(&pool, Duration::days(-1)).await;

    let user = Uuid::new_v4();
    let created = fx
        .service
        .allocate(fx.showtime_id, user, &[fx.seats[0].id])
        .await
        .unwrap();

    let err = fx
        .service
        .cancel(created.id, user, Utc::now().naive_utc())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidState(_)));
}

#[tokio::test]
#[ignore = "requires a running Postgres"]
async fn already_cancelled_reservation_is_not_found() {
    let pool = test_pool().await;
    let fx = seed(&pool, Duration::days(1)).await;

    let user = Uuid::new_v4();
    let created = fx
        .service
        .allocate(fx.showtime_id, user, &[fx.seats[0].id])
        .await
        .unwrap();

    let now = Utc::now().naive_utc();
    fx.service.cancel(created.id, user, now).await.unwrap();
    let err = fx.service.cancel(created.id, user, now).await.unwrap_err();
    assert!(matches!(err, Error::NotFound(_)));
}

#[tokio::test]
#[ignore = "requires a running Postgres"]
async fn availability_is_idempotent_without_writes() {
    let pool = test_pool().await;
    let fx = seed(&pool, Duration::days(1)).await;

    fx.service
        .allocate(fx.showtime_id, Uuid::new_v4(), &[fx.seats[1].id])
        .await
        .unwrap();

    let first = fx.service.resolve_availability(fx.showtime_id).await.unwrap();
    let second = fx.service.resolve_availability(fx.showtime_id).await.unwrap();

    let snapshot = |seats: Vec<cinema_reservations::services::reservations::SeatAvailability>| {
        seats
            .into_iter()
            .map(|s| (s.id, s.is_available))
            .collect::<Vec<_>>()
    };
    assert_eq!(snapshot(first), snapshot(second));
}

#[tokio::test]
#[ignore = "requires a running Postgres"]
async fn unknown_or_inactive_showtime_is_not_found() {
    let pool = test_pool().await;
    let fx = seed(&pool, Duration::days(1)).await;

    let missing = Uuid::new_v4();
    assert!(matches!(
        fx.service.resolve_availability(missing).await.unwrap_err(),
        Error::NotFound(_)
    ));

    sqlx::query("UPDATE showtimes SET is_active = FALSE WHERE id = $1")
        .bind(fx.showtime_id)
        .execute(&fx.pool)
        .await
        .unwrap();

    assert!(matches!(
        fx.service.resolve_availability(fx.showtime_id).await.unwrap_err(),
        Error::NotFound(_)
    ));
    assert!(matches!(
        fx.service
            .allocate(fx.showtime_id, Uuid::new_v4(), &[fx.seats[0].id])
            .await
            .unwrap_err(),
        Error::NotFound(_)
    ));
}

#[tokio::test]
#[ignore = "requires a running Postgres"]
async fn reservations_are_listed_newest_first_with_seats() {
    let pool = test_pool().await;
    let fx = seed(&pool, Duration::days(1)).await;

    let user = Uuid::new_v4();
    let first = fx
        .service
        .allocate(fx.showtime_id, user, &[fx.seats[0].id])
        .await
        .unwrap();
    let second = fx
        .service
        .allocate(fx.showtime_id, user, &[fx.seats[1].id, fx.seats[2].id])
        .await
        .unwrap();
    fx.service
        .cancel(first.id, user, Utc::now().naive_utc())
        .await
        .unwrap();

    let listed = fx.service.list_for_user(user).await.unwrap();
    assert_eq!(listed.len(), 2);
    assert_eq!(listed[0].id, second.id);
    assert_eq!(listed[0].seats.len(), 2);
    assert_eq!(listed[0].status, "confirmed");
    assert_eq!(listed[1].id, first.id);
    assert_eq!(listed[1].status, "cancelled");
    assert_eq!(listed[1].seats.len(), 1);
}
