//! Per-image update rules that turn an effective force into a displacement.

use nalgebra::DVector;

mod bfgs;
mod verlet;

pub use bfgs::Bfgs;
pub use verlet::Verlet;

/// The integrator chosen for the whole chain, along with its parameters. Each
/// image gets its own [Stepper] built from this.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Integrator {
    Verlet { dt: f64, friction: f64, mass: f64 },
    Bfgs { max_step: f64 },
}

impl Integrator {
    /// a fresh stepper with no history
    pub fn stepper(&self) -> Stepper {
        match *self {
            Integrator::Verlet { dt, friction, mass } => {
                Stepper::Verlet(Verlet::new(dt, friction, mass))
            }
            Integrator::Bfgs { max_step } => {
                Stepper::Bfgs(Bfgs::new(max_step))
            }
        }
    }
}

pub trait Step {
    /// return the displacement to apply to `pos` under the effective force
    /// `force`, recording whatever history the method needs for the next call
    fn step(&mut self, pos: &DVector<f64>, force: &DVector<f64>)
    -> DVector<f64>;
}

/// the optimizer state owned by a single image
#[derive(Clone, Debug)]
pub enum Stepper {
    Verlet(Verlet),
    Bfgs(Bfgs),
}

impl Step for Stepper {
    fn step(
        &mut self,
        pos: &DVector<f64>,
        force: &DVector<f64>,
    ) -> DVector<f64> {
        match self {
            Stepper::Verlet(v) => v.step(pos, force),
            Stepper::Bfgs(b) => b.step(pos, force),
        }
    }
}
