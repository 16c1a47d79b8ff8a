//! HTTP binding for the node registry: routes, payload codecs, and the
//! fixed domain-error to status-code mapping.

pub mod server;


pub use server::{start_server, AppState, NodeListResponse};
