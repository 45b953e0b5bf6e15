//! # Core Module
//!
//! Stateless building blocks shared by the engine and the workflows.
//!
//! - **Parameters** ([`params`]) - Mapping between flat parameter vectors and named
//!   tight-binding parameters, including the anion/cation twin rule.
//! - **File I/O** ([`io`]) - Parameter database and solver input documents (XML),
//!   band-structure datasets (CSV) and binary parameter vectors (NPY).
//! - **Scoring** ([`loss`]) - RMS energy mismatch between a trial and the reference.

pub mod io;
pub mod loss;
pub mod params;
