/// REST API module for the panel daemon
///
/// Exposes the user roster, credential management and per-user
/// subscription links over HTTP.

pub mod handlers;
pub mod responses;
pub mod server;

pub use server::{router, ApiServer};
pub use responses::*;
