//! Planner and rate-adaptive batch orchestrator for compressed NFT mints.
//!
//! [`planner`] sizes the Merkle tree, [`gateway`] shapes every remote call,
//! [`dispatcher`] fans a batch out through the gateway and
//! [`orchestrator`] owns job lifecycles on top of a [`store::JobStore`].

pub mod accountant;
pub mod cli;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod gateway;
pub mod ledger;
pub mod orchestrator;
pub mod planner;
pub mod state_machine;
pub mod store;
pub mod ui;

pub use error::{GatewayError, JobError, PlanError, StoreError};
pub use orchestrator::{Orchestrator, OrchestratorConfig};
