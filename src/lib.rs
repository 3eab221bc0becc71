// Text Jobs - asynchronous text-processing jobs over a queue and an object store

pub mod config;
pub mod models;
pub mod types;
pub mod storage;
pub mod queue;
pub mod routes;
pub mod utils;

// Re-exports for convenience
pub use config::Config;
pub use models::AppState;

pub fn create_router(state: AppState) -> axum::Router {
    routes::create_router(state)
}
