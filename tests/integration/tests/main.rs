//! End-to-End Integration Tests
//!
//! These tests run the service provider on an ephemeral port and drive it
//! with an HTTP client, playing both the browser and the identity provider.

mod common;
mod endpoints;
mod login_flow;
mod logout;
