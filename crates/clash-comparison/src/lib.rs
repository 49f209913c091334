//! Clash client comparison harness
//!
//! Runs a fixed clash detection scenario through both the typed (RC) and
//! the raw (WSG) client, timing every call and diffing the canonical
//! outputs of the two.
//!
//! ```text
//!   ComparisonConfig ──► ScenarioRunner ──► Driver ──┬──► RC  ──► RMS / RAS
//!                                                    └──► WSG ──► RMS / RAS
//!                              │
//!                              ▼
//!                       ScenarioReport (timings + parity)
//! ```

pub mod auth;
pub mod compare;
pub mod config;
pub mod driver;
pub mod runner;

pub use auth::{acquire_token, AuthError};
pub use compare::{compare_outputs, CompareOptions, ComparisonResult, DiffCategory, Difference};
pub use config::{AuthConfig, ComparisonConfig, ConfigError, OrderingPolicy, PollSettings};
pub use driver::{DualMeasurement, Driver, Slot, SlotSummary};
pub use runner::{
    ScenarioError, ScenarioReport, ScenarioRunner, ScenarioState, Step, StepOutcome, StepRecord,
};
