//! Scenario harness for end-to-end forwarding tests.

pub mod scenarios;
