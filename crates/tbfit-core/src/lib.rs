//! # tbfit Core Library
//!
//! Derivative-free fitting of tight-binding parameters: a black-box band-structure
//! solver is driven by a population-based search until its output matches a
//! reference band structure.
//!
//! ## Architectural Philosophy
//!
//! The library follows a strict three-layer architecture.
//!
//! - **[`core`]: The Foundation.** Stateless pieces: the parameter codec with its
//!   linked-twin rule, XML and CSV document I/O, and the RMS loss.
//!
//! - **[`engine`]: The Logic Core.** The stateful evaluation loop. It owns trial
//!   sandboxes, launches the external solver, evaluates candidate batches
//!   (optionally in parallel) and drives a pluggable ask/tell optimizer.
//!
//! - **[`workflows`]: The Public API.** Complete procedures built from the two
//!   layers below: a full fit with artifact persistence, and a one-shot
//!   evaluation of a single parameter set.

pub mod core;
pub mod engine;
pub mod workflows;
