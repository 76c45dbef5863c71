//! Potential energy surface plumbing: atoms, XYZ geometries, and the
//! calculators that turn a geometry into an energy and gradient.

pub mod atom;
pub mod calculator;
pub mod geom;


pub use atom::Atom;
pub use calculator::{CalcError, CalcResult, Calculator, Resources, Script};
pub use geom::{Geom, GeomError};
