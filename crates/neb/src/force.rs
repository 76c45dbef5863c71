//! Effective NEB forces: springs along the tangent plus the true force
//! perpendicular to it.

use nalgebra::DVector;

/// The data from one image that enters the force on its neighbors.
#[derive(Clone, Copy, Debug)]
pub struct Site<'a> {
    pub r: &'a DVector<f64>,
    pub energy: f64,
    /// true force, -gradient
    pub force: &'a DVector<f64>,
    pub state: usize,
}

/// Spring constants for segments within one electronic state and for
/// segments that cross between states.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Springs {
    pub k: f64,
    pub k_switch: f64,
}

impl Springs {
    pub fn new(k: f64, k_switch: f64) -> Self {
        Self { k, k_switch }
    }

    /// Spring force on `cur` from its two neighbors.
    ///
    /// Within one state this is `k (|R+ - R| - |R - R-|) tau`. If the forward
    /// segment crosses to another state, its contribution is replaced by one
    /// built from the energy gap and the projections of both images' true
    /// forces on the displacement, scaled by `k_switch`. A crossing backward
    /// segment contributes the projection of `k_switch (R - R-)` on the
    /// tangent.
    pub fn spring(
        &self,
        prev: &Site,
        cur: &Site,
        next: &Site,
        tau: &DVector<f64>,
    ) -> DVector<f64> {
        let mut f = if cur.state != next.state {
            let dr = next.r - cur.r;
            let de = next.energy - cur.energy;
            let f1 = &dr + next.force * (de - next.force.dot(&dr));
            let f2 = -&dr + cur.force * (cur.force.dot(&dr) - de);
            (f1 + f2) * self.k_switch
        } else {
            tau * (self.k * (next.r - cur.r).norm())
        };
        if cur.state != prev.state {
            let dr = cur.r - prev.r;
            f -= tau * (self.k_switch * dr.dot(tau));
        } else {
            f -= tau * (self.k * (cur.r - prev.r).norm());
        }
        f
    }

    /// spring force plus the perpendicular part of the true force on `cur`
    pub fn effective(
        &self,
        prev: &Site,
        cur: &Site,
        next: &Site,
        tau: &DVector<f64>,
    ) -> DVector<f64> {
        self.spring(prev, cur, next, tau) + perpendicular(cur.force, tau)
    }
}

/// the part of `f` perpendicular to the unit vector `tau`
pub fn perpendicular(f: &DVector<f64>, tau: &DVector<f64>) -> DVector<f64> {
    f - tau * f.dot(tau)
}

/// Endpoints either descend freely along their true force or stay pinned.
pub fn endpoint(force: &DVector<f64>, optimize: bool) -> DVector<f64> {
    if optimize {
        force.clone()
    } else {
        DVector::zeros(force.len())
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_abs_diff_eq;
    use nalgebra::dvector;

    use super::*;

    const SPRINGS: Springs = Springs {
        k: 2.0,
        k_switch: 5.0,
    };

    fn site<'a>(
        r: &'a DVector<f64>,
        energy: f64,
        force: &'a DVector<f64>,
        state: usize,
    ) -> Site<'a> {
        Site {
            r,
            energy,
            force,
            state,
        }
    }

    #[test]
    fn even_spacing_has_no_spring() {
        let (rm, ri, rp) =
            (dvector![0.0, 0.0, 0.0], dvector![1.0, 0.0, 0.0], dvector![2.0, 0.0, 0.0]);
        let f = dvector![0.0, 0.0, 0.0];
        let tau = dvector![1.0, 0.0, 0.0];
        let got = SPRINGS.spring(
            &site(&rm, 0.0, &f, 0),
            &site(&ri, 1.0, &f, 0),
            &site(&rp, 2.0, &f, 0),
            &tau,
        );
        assert_abs_diff_eq!(got, dvector![0.0, 0.0, 0.0], epsilon = 1e-14);
    }

    #[test]
    fn uneven_spacing_pulls_toward_longer_segment() {
        // |R+ - R| = 3, |R - R-| = 1
        let (rm, ri, rp) =
            (dvector![0.0, 0.0, 0.0], dvector![1.0, 0.0, 0.0], dvector![4.0, 0.0, 0.0]);
        let f = dvector![0.0, 0.0, 0.0];
        let tau = dvector![1.0, 0.0, 0.0];
        let got = SPRINGS.spring(
            &site(&rm, 0.0, &f, 0),
            &site(&ri, 1.0, &f, 0),
            &site(&rp, 2.0, &f, 0),
            &tau,
        );
        assert_abs_diff_eq!(got, dvector![4.0, 0.0, 0.0], epsilon = 1e-14);
    }

    #[test]
    fn perpendicular_removes_tangent_part() {
        let tau = dvector![0.6, 0.8, 0.0];
        let f = dvector![1.0, 2.0, 3.0];
        let got = perpendicular(&f, &tau);
        assert_abs_diff_eq!(got.dot(&tau), 0.0, epsilon = 1e-14);
        assert_abs_diff_eq!(got, f - &tau * 2.2, epsilon = 1e-14);
    }

    #[test]
    fn effective_is_spring_plus_perpendicular() {
        let (rm, ri, rp) =
            (dvector![0.0, 0.0, 0.0], dvector![1.0, 0.0, 0.0], dvector![4.0, 0.0, 0.0]);
        let zero = dvector![0.0, 0.0, 0.0];
        let fi = dvector![-1.0, 0.5, 0.0];
        let tau = dvector![1.0, 0.0, 0.0];
        let got = SPRINGS.effective(
            &site(&rm, 0.0, &zero, 0),
            &site(&ri, 1.0, &fi, 0),
            &site(&rp, 2.0, &zero, 0),
            &tau,
        );
        // the tangential -1.0 of the true force is dropped
        assert_abs_diff_eq!(got, dvector![4.0, 0.5, 0.0], epsilon = 1e-14);
    }

    #[test]
    fn forward_crossing() {
        let rm = dvector![0.0, 0.0];
        let ri = dvector![1.0, 0.0];
        let rp = dvector![2.0, 0.0];
        let zero = dvector![0.0, 0.0];
        let fi = dvector![0.5, 1.0];
        let fp = dvector![-1.0, 2.0];
        let tau = dvector![1.0, 0.0];
        let got = SPRINGS.spring(
            &site(&rm, 0.0, &zero, 0),
            &site(&ri, 1.0, &fi, 0),
            &site(&rp, 3.0, &fp, 1),
            &tau,
        );
        // dr = (1, 0), de = 2
        // f1 = dr + (de - fp.dr) fp = (1, 0) + 3 (-1, 2) = (-2, 6)
        // f2 = -dr + (fi.dr - de) fi = (-1, 0) - 1.5 (0.5, 1) = (-1.75, -1.5)
        // k_switch (f1 + f2) = 5 (-3.75, 4.5), minus k |R - R-| tau
        let want = dvector![-18.75 - 2.0, 22.5];
        assert_abs_diff_eq!(got, want, epsilon = 1e-12);
    }

    #[test]
    fn backward_crossing() {
        let rm = dvector![0.0, 1.0];
        let ri = dvector![2.0, 0.0];
        let rp = dvector![3.0, 0.0];
        let zero = dvector![0.0, 0.0];
        let tau = dvector![1.0, 0.0];
        let got = SPRINGS.spring(
            &site(&rm, 0.0, &zero, 1),
            &site(&ri, 1.0, &zero, 0),
            &site(&rp, 2.0, &zero, 0),
            &tau,
        );
        // k |R+ - R| tau - k_switch ((R - R-) . tau) tau
        let want = dvector![2.0 * 1.0 - 5.0 * 2.0, 0.0];
        assert_abs_diff_eq!(got, want, epsilon = 1e-12);
    }

    #[test]
    fn endpoints() {
        let f = dvector![1.0, -2.0, 3.0];
        assert_eq!(endpoint(&f, true), f);
        assert_eq!(endpoint(&f, false), dvector![0.0, 0.0, 0.0]);
    }
}
