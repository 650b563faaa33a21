//! rpcdeck - a terminal console for a gRPC reflection gateway.
//!
//! The gateway dials gRPC targets on our behalf and exposes their reflection
//! data over HTTP. This crate lists services and methods, fetches request
//! templates, invokes or load tests methods, and tracks the gateway's open
//! backend connections.

pub mod backend;
pub mod bootstrap;
pub mod config;
pub mod console;
pub mod discovery;
pub mod editor;
pub mod invoke;
pub mod monitor;
pub mod query;
pub mod session;
pub mod target;
pub mod view;
