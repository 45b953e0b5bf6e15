//! # I/O Module
//!
//! Readers and writers for every file that crosses the solver's process boundary.
//!
//! - [`xml`] - A small order-preserving XML element tree shared by the documents below
//! - [`materials`] - The parameter database (`<materials><material name=..>`)
//! - [`user_input`] - The solver input template and its rendering
//! - [`bandstructure`] - Header-less band-structure CSV datasets
//! - [`npy`] - One-dimensional `f8` arrays in NumPy's `.npy` format

pub mod bandstructure;
pub mod materials;
pub mod npy;
pub mod user_input;
pub mod xml;
