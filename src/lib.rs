//! camfleet - camera fleet coordinator
//!
//! ## Architecture
//!
//! Camera node role:
//!
//! 1. NodeStore - bounded, self-evicting image store with exclusive capture
//! 2. CaptureDevice - libcamera capture primitive (+ NoIR red channel)
//! 3. PreviewSource - MJPEG preview pushed to the central relay
//!
//! Central role:
//!
//! 4. NodeRegistry - node address book and health FSM
//! 5. CaptureOrchestrator - fan-out / fan-in capture across nodes
//! 6. SetAggregator - timestamp-keyed capture sets (SQLite backed)
//! 7. PreviewRelay - one publisher, many bounded-queue subscribers
//! 8. WebAPI - HTTP surface of both roles

pub mod capture_device;
pub mod capture_orchestrator;
pub mod error;
pub mod metrics;
pub mod models;
pub mod node_client;
pub mod node_registry;
pub mod node_store;
pub mod preview_relay;
pub mod preview_source;
pub mod session;
pub mod set_aggregator;
pub mod state;
pub mod web_api;

pub use error::{Error, Result};
pub use state::{CentralAppState, NodeAppState};
