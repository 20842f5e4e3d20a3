//! petstore-stack - provisioning pipeline for the pet-store gateway demo
//!
//! This crate deploys and tears down a small demo stack: a serverless backend
//! function, a REST façade in front of it, an identity pool issuing bearer
//! tokens, and a protocol gateway exposing the façade's routes as callable
//! tools over JSON-RPC.
//!
//! ## Modules
//!
//! - [`step`]: step registry and per-step outcome types
//! - [`provision`]: forward pipeline (create resources, build the manifest)
//! - [`teardown`]: reverse pipeline (best-effort deletion with confirmation gate)
//! - [`manifest`]: persisted key-value record of everything a run created
//! - [`cloud`]: the capability handle steps call into, plus a local emulation
//! - [`stack`]: the concrete pet-store stack definition (seven steps)
//! - [`wait`]: bounded readiness polling
//! - [`mcp`]: JSON-RPC tool-invocation client for the deployed gateway

pub mod cloud;
pub mod config;
pub mod manifest;
pub mod mcp;
pub mod provision;
pub mod stack;
pub mod step;
pub mod teardown;
pub mod testing;
pub mod wait;

pub use config::StackConfig;
pub use manifest::Manifest;
pub use provision::Provisioner;
pub use teardown::Decommissioner;
