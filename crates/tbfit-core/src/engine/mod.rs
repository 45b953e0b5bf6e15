//! # Engine Module
//!
//! The optimization-evaluation loop: sandboxed solver runs, batch evaluation of
//! candidate parameter vectors, and the ask/tell driver around a pluggable search.
//!
//! ## Architecture
//!
//! - **Configuration** ([`config`]) - Paths, solver invocation, optimizer and execution settings
//! - **Error Handling** ([`error`]) - Engine-level error aggregation, including per-candidate failures
//! - **Progress Monitoring** ([`progress`]) - Progress events and the reporter callback
//! - **Cancellation** ([`cancel`]) - Cooperative cancellation with an optional wall-clock deadline
//! - **Sandboxes** ([`sandbox`]) - Uniquely named scratch directories, one per trial
//! - **Solver** ([`solver`]) - The [`solver::Solver`] boundary and the external-process implementation
//! - **Evaluation** ([`evaluation`]) - Codec, sandbox, solver and loss chained for one candidate or a batch
//! - **Search** ([`optimizer`]) - The ask/tell [`optimizer::Optimizer`] trait and CMA-ES
//! - **Driver** ([`driver`]) - Generation loop, best-ever tracking and checkpoints
//!
//! A candidate flows `ParameterCodec -> Sandbox -> Solver -> BandStructure -> LossEvaluator`;
//! every candidate of a generation is evaluated before the losses are handed back
//! to the optimizer.

pub mod cancel;
pub mod config;
pub mod driver;
pub mod error;
pub mod evaluation;
pub mod optimizer;
pub mod progress;
pub mod sandbox;
pub mod solver;
