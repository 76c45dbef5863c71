//! Improved tangent estimate of Henkelman and Jónsson, J. Chem. Phys. 113,
//! 9978 (2000).

use nalgebra::DVector;

/// Unit tangent at an interior image from the energies `v` and positions `r`
/// of the previous image, the image itself, and the next image.
///
/// Along a monotonic stretch of the path the tangent points toward the higher
/// neighbor. At an extremum the forward and backward differences are mixed,
/// weighting the one toward the higher neighbor by the larger energy change.
/// When both neighbors have exactly the same energy the symmetric difference
/// `r[2] - r[0]` is used instead.
///
/// Returns `None` if the raw tangent has zero length.
pub fn tangent(v: [f64; 3], r: [&DVector<f64>; 3]) -> Option<DVector<f64>> {
    let [vm, vi, vp] = v;
    let [rm, ri, rp] = r;
    let tau = if vm <= vi && vi <= vp {
        rp - ri
    } else if vp < vi && vi < vm {
        ri - rm
    } else {
        let dp = (vp - vi).abs();
        let dm = (vm - vi).abs();
        let (dmax, dmin) = (dp.max(dm), dp.min(dm));
        let taup = rp - ri;
        let taum = ri - rm;
        if vp > vm {
            taup * dmax + taum * dmin
        } else if vp < vm {
            taup * dmin + taum * dmax
        } else {
            // TODO the mixed tangents above have no case for equal
            // neighbors. check whether the bisector of the unit differences
            // behaves better than this on symmetric barriers
            rp - rm
        }
    };
    let norm = tau.norm();
    if norm == 0.0 || !norm.is_finite() {
        return None;
    }
    Some(tau / norm)
}
