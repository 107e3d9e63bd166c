//! WebAPI - HTTP endpoints for both roles
//!
//! ## Responsibilities
//!
//! - Camera node surface (capture, images, status, preview control)
//! - Central surface (fan-out capture, gallery, node registry, preview relay)
//! - Request validation and JSON error mapping via `crate::Error`

mod central_routes;
mod node_routes;

pub use central_routes::create_central_router;
pub use node_routes::create_node_router;
