pub mod error;
pub mod routes;
pub mod server;

pub use error::ErrorResponse;
pub use server::{ApiServer, AppState};
