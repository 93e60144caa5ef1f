//! Integration test suite for cloudsqlctl
//!
//! End-to-end tests that drive the update pipelines against a local
//! `wiremock` server standing in for GitHub and the proxy download bucket.
//! No test touches the network or the real install locations.
//!
//! # Running Integration Tests
//!
//! ```bash
//! cargo test --test integration
//! ```
//!
//! # Test Organization
//!
//! - **cli**: Binary-level behavior (`--help`, `--json` error output)
//! - **proxy**: Cloud SQL Proxy install and checksum enforcement
//! - **transport**: Retry boundaries seen by callers
//! - **upgrade_flow**: Self-update scenarios from resolve to handoff

mod common;

mod cli;
mod proxy;
mod transport;
mod upgrade_flow;
