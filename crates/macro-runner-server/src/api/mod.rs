//! HTTP surface: `/run-macro/`, `/run-macro-upload/`, `/health`.

pub mod dto;
pub mod error;
pub mod handlers;
pub mod routes;

pub use routes::router;
