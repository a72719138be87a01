// SPDX-License-Identifier: MIT OR Apache-2.0
//! Skillport: a multi-tenant skill protocol server.
//!
//! Skills are small, versioned code artifacts (Python, TypeScript, or Go)
//! registered over HTTP, validated with JSON-Schema, executed inside
//! subprocess sandboxes, and composable into DAG workflows with
//! `${node.field}` data dependencies.
//!
//! This facade crate re-exports the workspace members; the `sp-daemon`
//! binary is the serving entry point.

#![deny(unsafe_code)]

pub use sp_config as config;
pub use sp_core as core;
pub use sp_daemon as daemon;
pub use sp_discovery as discovery;
pub use sp_error as error;
pub use sp_registry as registry;
pub use sp_sandbox as sandbox;
pub use sp_schema as schema;
pub use sp_scheduler as scheduler;
pub use sp_store as store;
pub use sp_workflow as workflow;
