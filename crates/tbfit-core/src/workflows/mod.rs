//! # Workflows Module
//!
//! Top-level entry points. Each workflow loads its inputs, validates them before
//! any solver process is started, reports progress, and writes its artifacts.
//!
//! - **Fit Workflow** ([`fit`]) - Full parameter fit: optimization, best-result
//!   persistence, a confirmatory evaluation and a report.
//! - **Evaluate Workflow** ([`evaluate`]) - One evaluation of a given parameter set.

pub mod evaluate;
pub mod fit;
mod problem;
