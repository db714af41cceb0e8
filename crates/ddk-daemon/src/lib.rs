//! ddk-daemon: HTTP control plane for the DrawDesk pipeline.
//!
//! The binary entry point lives in `main.rs`; everything else is exported
//! here so the scenario tests in `tests/` can build the router in-process.

pub mod api_types;
pub mod routes;
pub mod state;
