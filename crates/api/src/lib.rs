//! Herald HTTP API: template management, notification creation and dispatch.

pub mod routes;
pub mod state;
