//! Minimum energy paths with the nudged elastic band method.
//!
//! A [chain::Chain] of images is relaxed under the sum of the true forces
//! perpendicular to the path and artificial spring forces along it. The true
//! energies and gradients come from a [pes::Calculator], evaluated in parallel
//! over the images by the [scheduler::Scheduler], and [optimize::Neb] drives
//! the iterations until every image's effective force drops below the
//! tolerance.

use std::{error::Error, fmt::Display};

use pes::CalcError;

pub mod chain;
pub mod config;
pub mod force;
pub mod integrator;
pub mod optimize;
pub mod path;
pub mod scheduler;
pub mod snapshot;
pub mod tangent;


pub use chain::{Chain, Image};
pub use config::Config;
pub use optimize::{Neb, Outcome, Status};

/// Fatal errors of an optimization run. Every variant tied to an image carries
/// the image index and the iteration it happened on.
#[derive(Debug)]
pub enum NebError {
    /// the calculator failed to produce an energy and gradient
    Calculator {
        image: usize,
        iteration: usize,
        error: CalcError,
    },
    /// the raw tangent vector had zero length
    ZeroTangent { image: usize, iteration: usize },
    /// an energy or gradient needed for the force was never computed
    MissingData { image: usize, iteration: usize },
    /// the chain could not be built from its input geometries
    Chain(String),
    Io(std::io::Error),
}

impl Display for NebError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NebError::Calculator {
                image,
                iteration,
                error,
            } => write!(
                f,
                "calculation for image {image} failed on iteration \
                 {iteration}: {error}"
            ),
            NebError::ZeroTangent { image, iteration } => write!(
                f,
                "zero-length tangent at image {image} on iteration {iteration}"
            ),
            NebError::MissingData { image, iteration } => write!(
                f,
                "image {image} has no energy or gradient on iteration \
                 {iteration}"
            ),
            NebError::Chain(msg) => write!(f, "invalid chain: {msg}"),
            NebError::Io(e) => write!(f, "{e}"),
        }
    }
}

impl Error for NebError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            NebError::Calculator { error, .. } => Some(error),
            NebError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for NebError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}
