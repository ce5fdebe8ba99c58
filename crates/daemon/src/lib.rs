//! xpanel daemon library
//!
//! The HTTP management API and the command-line surface around a
//! [`xpanel_core::Panel`].

pub mod api;
pub mod cli;

pub use api::ApiServer;
