//! The `idb-engine` demonstration binary's command implementations.

pub mod app;
pub mod demo;
pub mod info;
