//! Numerical primitives for the fringe-tracking pipeline.
//!
//! Everything here is stateless apart from the PSD ring handed in by the
//! caller.

pub mod combine;
pub mod fft;
pub mod filter;
pub mod flux;
pub mod iota;
pub mod linalg;
pub mod opl;
pub mod phase;
