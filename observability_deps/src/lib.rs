//! Observability ecosystem dependencies for the hypercube proxy, to ensure consistent
//! versions and unified updates across the workspace.

pub use tracing;
