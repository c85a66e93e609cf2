pub mod config;
pub mod database;
pub mod error;
pub mod models;
pub mod controllers;
pub mod middleware;
pub mod services;

// Shared state for the whole application
#[derive(Clone)]
pub struct AppState {
    pub db: database::Database,
    pub config: config::Config,
    pub reservations: services::ReservationService,
}

impl AppState {
    pub async fn new(config: config::Config) -> Result<Self, sqlx::Error> {
        let db = database::Database::connect(&config.database).await?;
        let reservations = services::ReservationService::new(db.pool.clone());
        Ok(AppState {
            db,
            config,
            reservations,
        })
    }
}
