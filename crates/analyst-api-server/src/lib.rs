pub mod app;
pub mod config;
pub mod handlers;
pub mod models;
pub mod services;
pub mod sessions;
pub mod state;
pub mod utils;

pub use app::{build_router, build_state};
pub use state::AppState;
