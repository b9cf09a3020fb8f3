//! HTTP surface (components I, L, Q, R): webhook front door, mini-app
//! invoice issuance, admin management, and the public fairness endpoints.

pub mod error;
pub mod ip;
pub mod routes;
pub mod server;
pub mod state;

pub use error::ApiError;
pub use server::router;
pub use state::AppState;
