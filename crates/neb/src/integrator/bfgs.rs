use nalgebra::{DMatrix, DVector};

use super::Step;

/// displacements shorter than this are treated as a restart and do not update
/// the Hessian
const MIN_DISPLACEMENT: f64 = 1e-7;

/// smallest denominator accepted in the Hessian update, and the smallest
/// eigenvalue magnitude divided through in the step
const EPS: f64 = 1e-12;

/// Quasi-Newton optimizer for a single image. The Hessian approximation lives
/// in the full Cartesian space of the image and is updated with the BFGS
/// formula on every step after the first.
#[derive(Clone, Debug)]
pub struct Bfgs {
    max_step: f64,
    hessian: Option<DMatrix<f64>>,
    /// position and force from the previous call
    last: Option<(DVector<f64>, DVector<f64>)>,
}

impl Bfgs {
    pub fn new(max_step: f64) -> Self {
        Self {
            max_step,
            hessian: None,
            last: None,
        }
    }

    pub fn hessian(&self) -> Option<&DMatrix<f64>> {
        self.hessian.as_ref()
    }

    /// BFGS update of `hessian` from the change in position and force since
    /// the last step. returns false if the update was skipped
    fn update(
        hessian: &mut DMatrix<f64>,
        pos: &DVector<f64>,
        force: &DVector<f64>,
        last_pos: &DVector<f64>,
        last_force: &DVector<f64>,
    ) -> bool {
        let dr = pos - last_pos;
        if dr.norm() < MIN_DISPLACEMENT {
            return false;
        }
        let df = force - last_force;
        let a = dr.dot(&df);
        let dg = &*hessian * &dr;
        let b = dr.dot(&dg);
        if a.abs() < EPS || b.abs() < EPS {
            log::debug!("skipping Hessian update: a = {a:e}, b = {b:e}");
            return false;
        }
        *hessian -= &df * df.transpose() / a + &dg * dg.transpose() / b;
        true
    }

    /// Newton step in the eigenbasis of `hessian`, dividing by the absolute
    /// value of each eigenvalue so negative curvature still moves downhill
    fn newton(hessian: &DMatrix<f64>, force: &DVector<f64>) -> DVector<f64> {
        let eigen = hessian.clone().symmetric_eigen();
        let v = &eigen.eigenvectors;
        let mut proj = v.transpose() * force;
        for (p, w) in proj.iter_mut().zip(eigen.eigenvalues.iter()) {
            *p = if w.abs() < EPS { 0.0 } else { *p / w.abs() };
        }
        v * proj
    }

    /// the largest per-atom norm of `v`
    fn largest_atom(v: &DVector<f64>) -> f64 {
        v.as_slice()
            .chunks(3)
            .map(|c| c.iter().map(|x| x * x).sum::<f64>().sqrt())
            .fold(0.0, f64::max)
    }

    /// scale `dr` uniformly so that no atom moves further than `max_step`
    pub fn limit(dr: DVector<f64>, max_step: f64) -> DVector<f64> {
        let longest = Self::largest_atom(&dr);
        if longest > max_step {
            dr * (max_step / longest)
        } else {
            dr
        }
    }
}

impl Step for Bfgs {
    fn step(
        &mut self,
        pos: &DVector<f64>,
        force: &DVector<f64>,
    ) -> DVector<f64> {
        let fmax = Self::largest_atom(force);
        let hessian = self.hessian.get_or_insert_with(|| {
            let n = pos.len();
            DMatrix::identity(n, n) * (fmax / self.max_step)
        });
        if let Some((last_pos, last_force)) = &self.last {
            Self::update(hessian, pos, force, last_pos, last_force);
        }
        self.last = Some((pos.clone(), force.clone()));
        if fmax == 0.0 {
            return DVector::zeros(pos.len());
        }
        Self::limit(Self::newton(hessian, force), self.max_step)
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_abs_diff_eq;
    use nalgebra::{dmatrix, dvector};

    use super::*;

    fn atom_steps(dr: &DVector<f64>) -> Vec<f64> {
        dr.as_slice()
            .chunks(3)
            .map(|c| c.iter().map(|x| x * x).sum::<f64>().sqrt())
            .collect()
    }

    #[test]
    fn first_step_is_max_step() {
        let mut b = Bfgs::new(0.2);
        let f = dvector![3.0, 0.0, 4.0];
        let got = b.step(&dvector![0.0, 0.0, 0.0], &f);
        assert_abs_diff_eq!(got, dvector![0.12, 0.0, 0.16], epsilon = 1e-12);
        assert_abs_diff_eq!(got.norm(), 0.2, epsilon = 1e-12);
        assert_abs_diff_eq!(
            b.hessian().unwrap(),
            &(DMatrix::identity(3, 3) * 25.0),
            epsilon = 1e-12
        );
    }

    #[test]
    fn first_step_moves_worst_atom_max_step() {
        let mut b = Bfgs::new(0.1);
        let f = dvector![1.0, 0.0, 0.0, 1.0, 0.0, 0.0];
        let got = b.step(&DVector::zeros(6), &f);
        for s in atom_steps(&got) {
            assert_abs_diff_eq!(s, 0.1, epsilon = 1e-12);
        }

        // unequal forces: only the worst atom reaches max_step
        let mut b = Bfgs::new(0.1);
        let f = dvector![0.0, 3.0, 4.0, 1.0, 0.0, 0.0, 0.0, 0.0, 0.0];
        let got = b.step(&DVector::zeros(9), &f);
        assert_abs_diff_eq!(
            got,
            dvector![0.0, 0.06, 0.08, 0.02, 0.0, 0.0, 0.0, 0.0, 0.0],
            epsilon = 1e-12
        );
        assert_abs_diff_eq!(atom_steps(&got)[0], 0.1, epsilon = 1e-12);
    }

    #[test]
    fn step_bounded_for_many_atoms() {
        let max_step = 0.05;
        let mut b = Bfgs::new(max_step);
        let mut pos = dvector![0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 2.0, 0.0, 0.0];
        let forces = [
            dvector![0.3, -1.0, 0.2, 0.0, 0.0, 2.5, -0.1, 0.1, 0.0],
            dvector![0.1, -0.4, 0.2, 0.0, 0.2, 1.5, -0.1, 0.0, 0.3],
            dvector![-0.2, 0.3, 0.0, 0.1, 0.0, -0.5, 0.4, 0.0, 0.1],
        ];
        for f in &forces {
            let dr = b.step(&pos, f);
            for s in atom_steps(&dr) {
                assert!(s <= max_step + 1e-12, "{s} > {max_step}");
            }
            pos += dr;
        }
    }

    #[test]
    fn limit_preserves_direction() {
        let dr = dvector![0.3, 0.4, 0.0, 0.0, 0.1, 0.0];
        let got = Bfgs::limit(dr.clone(), 0.1);
        assert_abs_diff_eq!(got, dr * 0.2, epsilon = 1e-14);
        assert_abs_diff_eq!(atom_steps(&got)[0], 0.1, epsilon = 1e-14);

        // already short enough
        let dr = dvector![0.01, 0.0, 0.0];
        assert_eq!(Bfgs::limit(dr.clone(), 0.1), dr);
    }

    #[test]
    fn update_formula() {
        let mut h = DMatrix::identity(2, 2) * 2.0;
        let applied = Bfgs::update(
            &mut h,
            &dvector![1.0, 0.0],
            &dvector![-1.0, 0.5],
            &dvector![0.0, 0.0],
            &dvector![1.0, 1.0],
        );
        assert!(applied);
        // dr = (1, 0), df = (-2, -0.5), a = -2, dg = H dr = (2, 0), b = 2
        // H - df df^T / a - dg dg^T / b
        let want = dmatrix![
            2.0, 0.5;
            0.5, 2.125;
        ];
        assert_abs_diff_eq!(h, want, epsilon = 1e-14);
    }

    #[test]
    fn update_skipped_on_tiny_step() {
        let mut h = DMatrix::identity(2, 2);
        let applied = Bfgs::update(
            &mut h,
            &dvector![1.0, 1.0],
            &dvector![0.5, 0.0],
            &dvector![1.0, 1.0 + 1e-9],
            &dvector![1.0, 0.0],
        );
        assert!(!applied);
        assert_eq!(h, DMatrix::identity(2, 2));
    }

    #[test]
    fn update_skipped_on_zero_denominator() {
        // the force did not change, so dr . df = 0
        let mut h = DMatrix::identity(2, 2);
        let applied = Bfgs::update(
            &mut h,
            &dvector![1.0, 0.0],
            &dvector![0.5, 0.5],
            &dvector![0.0, 0.0],
            &dvector![0.5, 0.5],
        );
        assert!(!applied);
        assert_eq!(h, DMatrix::identity(2, 2));
    }

    #[test]
    fn negative_curvature_moves_along_force() {
        let h = dmatrix![
            -4.0, 0.0;
            0.0, 2.0;
        ];
        let got = Bfgs::newton(&h, &dvector![1.0, 1.0]);
        assert_abs_diff_eq!(got, dvector![0.25, 0.5], epsilon = 1e-12);
    }

    #[test]
    fn zero_force_is_no_step() {
        let mut b = Bfgs::new(0.1);
        let got = b.step(&dvector![1.0, 2.0, 3.0], &dvector![0.0, 0.0, 0.0]);
        assert_eq!(got, dvector![0.0, 0.0, 0.0]);
    }

    #[test]
    fn converges_on_quadratic() {
        // E = x² + 4y², F = (-2x, -8y), one atom
        let force = |r: &DVector<f64>| dvector![-2.0 * r[0], -8.0 * r[1], 0.0];
        let mut b = Bfgs::new(0.2);
        let mut r = dvector![1.0, 0.5, 0.0];
        for _ in 0..50 {
            let f = force(&r);
            if f.norm() < 1e-8 {
                break;
            }
            r += b.step(&r, &f);
        }
        assert_abs_diff_eq!(r, dvector![0.0, 0.0, 0.0], epsilon = 1e-6);
    }
}
