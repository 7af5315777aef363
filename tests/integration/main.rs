//! Integration test driver for `tests/integration/` submodule.
//!
//! Each `mod` below maps to a file that exercises a specific subsystem
//! through the public `Client` against mock adapters. All tests run on
//! the host with no broker or flash required.

mod dispatch_tests;
mod provisioning_flow_tests;
