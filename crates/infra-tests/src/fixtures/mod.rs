//! Test fixtures for reading deployed resources back from the cloud.

pub mod arm_client;

pub use arm_client::ArmClient;
