//! Named tight-binding parameters and their flat-vector encoding.
//!
//! The optimizer only ever sees a `&[f64]`; [`codec::ParameterCodec`] assigns a
//! parameter name to every position and produces a [`map::ParameterMap`], which is
//! what gets written into the parameter database consumed by the solver.

pub mod codec;
pub mod map;
pub mod names;

pub use codec::{CodecError, ParameterCodec};
pub use map::{ParameterEntry, ParameterMap, twin_of};
pub use names::SP3D5S_STAR_PARAMETERS;
