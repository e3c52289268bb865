//! Infrastructure Acceptance Test Suite
//!
//! This crate provisions the Erdtree Terraform environments with the real
//! engine, reads the resulting resources back from Azure Resource Manager and
//! asserts they match what was requested. Every deployment that reached apply
//! is destroyed again, whatever the outcome.
//!
//! # Features
//!
//! - `live`: Apply real Terraform against an Azure subscription and verify the
//!   deployed resources (10-20min, billable)
//!
//! # Prerequisites
//!
//! 1. `terraform` in PATH (or `TERRAFORM_BINARY`)
//! 2. `TERRAFORM_ROOT` pointing at the Erdtree Terraform tree (the directory
//!    holding `environments/` and `modules/`). The tree is not part of this
//!    repository, so live runs require it.
//! 3. Service principal in the environment: `ARM_SUBSCRIPTION_ID`,
//!    `ARM_TENANT_ID`, `ARM_CLIENT_ID`, `ARM_CLIENT_SECRET` (or the `AZURE_*`
//!    equivalents)
//! 4. `TEST_SSH_PUBLIC_KEY` for the Linux VM scenario
//!
//! # Usage
//!
//! ```bash
//! # From repo root - harness unit and property tests, nothing is provisioned
//! cargo test
//!
//! # Live scenarios (Windows VM, Linux VM, storage account) in parallel
//! TERRAFORM_ROOT=/path/to/erdtree/terraform cargo test -p infra-tests --features live
//!
//! # More verbose harness logs
//! RUST_LOG=infra_tests=debug cargo test -p infra-tests --features live
//! ```

pub mod catalog;
pub mod config;
pub mod driver;
pub mod engine;
pub mod fixtures;
pub mod naming;
pub mod orchestrator;
pub mod outputs;
pub mod retry;
pub mod sanitize;
pub mod scenario;
pub mod verifier;
pub mod workdir;
