use nalgebra::DVector;

use super::Step;

/// Damped Verlet dynamics. `friction` runs from 0 (undamped) toward 1
/// (overdamped).
#[derive(Clone, Debug)]
pub struct Verlet {
    dt: f64,
    friction: f64,
    mass: f64,
    /// R(t - dt)
    last: Option<DVector<f64>>,
}

impl Verlet {
    pub fn new(dt: f64, friction: f64, mass: f64) -> Self {
        Self {
            dt,
            friction,
            mass,
            last: None,
        }
    }
}

impl Step for Verlet {
    fn step(
        &mut self,
        pos: &DVector<f64>,
        force: &DVector<f64>,
    ) -> DVector<f64> {
        let accel = force * (self.dt * self.dt / self.mass);
        let next = match &self.last {
            // Euler kick from rest
            None => pos + accel * 0.5,
            Some(last) => {
                pos * (2.0 - self.friction) - last * (1.0 - self.friction)
                    + accel
            }
        };
        self.last = Some(pos.clone());
        next - pos
    }
}
