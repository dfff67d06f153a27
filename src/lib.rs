//! Crash Multiplier Prediction Engine
//!
//! Combines an ensemble of opaque estimators with a deterministic
//! pattern-rule engine to turn a stream of resolved round multipliers into
//! actionable recommendations.
//!
//! ## Architecture
//!
//! ```text
//! Outcome stream → History → Ensemble (estimators × accuracy weights) ┐
//!                     │                                               ├→ Fusion → Decision
//!                     └────→ Rule Engine (phase, burst probability) ──┘
//!                     ↑
//!            Validator (grades prior cycle, re-weights estimators)
//! ```
//!
//! Screen capture, bet actuation, dashboards and persistence are external
//! collaborators; this crate only consumes outcomes and produces decisions.

pub mod config;
pub mod engine;
pub mod ensemble;
pub mod error;
pub mod estimator;
pub mod fusion;
pub mod history;
pub mod rules;
pub mod validator;

#[cfg(test)]
mod integration_tests;
