//! HTTP Server
//!
//! REST API and height event stream in front of the desk registry.

mod auth;
mod error;
mod handler;
mod router;
mod state;

pub use auth::generate_token;
pub use error::*;
pub use handler::*;
pub use router::*;
pub use state::*;
