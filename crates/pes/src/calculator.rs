//! The interface to the external electronic-structure programs that supply
//! energies and gradients.

use std::{error::Error, fmt::Display, path::Path};

use nalgebra::DVector;
use serde::{Deserialize, Serialize};

use crate::geom::Geom;

mod script;
pub use script::Script;


/// the processor and memory budget handed to a single calculation
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resources {
    pub nprocs: usize,
    pub mem: String,
}

impl Default for Resources {
    fn default() -> Self {
        Self {
            nprocs: 1,
            mem: "6Gb".to_owned(),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct CalcResult {
    pub energy: f64,
    /// dE/dx for every Cartesian coordinate. the force is the negative of
    /// this
    pub gradient: DVector<f64>,
}

#[derive(Debug, PartialEq, Eq)]
pub enum CalcError {
    /// failed to prepare the working directory or its input files
    Io(String, std::io::ErrorKind),
    /// failed to start the program at all
    Spawn(String, std::io::ErrorKind),
    /// the program ran in the directory but exited unsuccessfully
    Exit(String, Option<i32>),
    OutputNotFound(String),
    EnergyParse(String),
    GradientParse(String, String),
    WrongSize { want: usize, got: usize },
}

impl Display for CalcError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CalcError::Io(dir, kind) => {
                write!(f, "failed to prepare {dir}: {kind}")
            }
            CalcError::Spawn(cmd, kind) => {
                write!(f, "failed to run `{cmd}`: {kind}")
            }
            CalcError::Exit(dir, Some(code)) => {
                write!(f, "calculation in {dir} exited with status {code}")
            }
            CalcError::Exit(dir, None) => {
                write!(f, "calculation in {dir} was terminated by a signal")
            }
            CalcError::OutputNotFound(path) => {
                write!(f, "output file {path} not found")
            }
            CalcError::EnergyParse(path) => {
                write!(f, "failed to read the energy from {path}")
            }
            CalcError::GradientParse(path, line) => {
                write!(f, "failed to read gradient line `{line}` in {path}")
            }
            CalcError::WrongSize { want, got } => write!(
                f,
                "gradient has {got} components, expected {want}"
            ),
        }
    }
}

impl Error for CalcError {}

/// Anything that can turn a geometry into an energy and a gradient.
///
/// Implementations are shared by reference across the worker threads of one
/// evaluation batch, so they must be [Sync]. `dir` is private to one image and
/// is handed back on every iteration, so implementations can keep restart
/// files there.
pub trait Calculator: Sync {
    fn evaluate(
        &self,
        geom: &Geom,
        dir: &Path,
        res: &Resources,
    ) -> Result<CalcResult, CalcError>;
}
