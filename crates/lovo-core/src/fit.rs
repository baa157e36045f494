use nalgebra::{Matrix3, Vector3};

use crate::frame::Frame;

/// Rigid-body least-squares superposition of `frame` onto `reference`,
/// fitted over the matched `subset` indices and applied to every atom.
///
/// Panics if the two frames differ in atom count or a subset index is out
/// of bounds. Those conditions cannot arise from malformed trajectory
/// data, only from stale subset bookkeeping, so they are unrecoverable
/// programming faults rather than typed errors.
pub fn superpose(frame: &Frame, reference: &Frame, subset: &[usize]) -> Frame {
    assert_eq!(
        frame.n_atoms(),
        reference.n_atoms(),
        "superpose: frame and reference atom counts differ"
    );
    let n_atoms = frame.n_atoms();
    for &idx in subset {
        assert!(
            idx < n_atoms,
            "superpose: subset index {idx} out of bounds for {n_atoms} atoms"
        );
    }

    let (r, cx, cy) = kabsch_rotation(frame.coords(), reference.coords(), subset);
    let t = cy - r * cx;

    let mut out = Frame::zeros(n_atoms);
    for (dst, src) in out.coords_mut().iter_mut().zip(frame.coords().iter()) {
        let p = Vector3::new(src[0] as f64, src[1] as f64, src[2] as f64);
        let q = r * p + t;
        *dst = [q[0] as f32, q[1] as f32, q[2] as f32];
    }
    out
}

/// Per-atom squared deviation between two equal-sized coordinate sets.
///
/// Panics on a size mismatch, for the same reason as [`superpose`].
pub fn per_atom_sq_dev(a: &Frame, b: &Frame) -> Vec<f64> {
    assert_eq!(
        a.n_atoms(),
        b.n_atoms(),
        "per_atom_sq_dev: coordinate set sizes differ"
    );
    a.coords()
        .iter()
        .zip(b.coords().iter())
        .map(|(p, q)| {
            let dx = p[0] as f64 - q[0] as f64;
            let dy = p[1] as f64 - q[1] as f64;
            let dz = p[2] as f64 - q[2] as f64;
            dx * dx + dy * dy + dz * dz
        })
        .collect()
}

fn centroid(points: &[[f32; 3]], subset: &[usize]) -> Vector3<f64> {
    if subset.is_empty() {
        return Vector3::zeros();
    }
    let mut sum = Vector3::zeros();
    for &idx in subset {
        sum[0] += points[idx][0] as f64;
        sum[1] += points[idx][1] as f64;
        sum[2] += points[idx][2] as f64;
    }
    sum / subset.len() as f64
}

fn kabsch_rotation(
    frame: &[[f32; 3]],
    reference: &[[f32; 3]],
    subset: &[usize],
) -> (Matrix3<f64>, Vector3<f64>, Vector3<f64>) {
    let cx = centroid(frame, subset);
    let cy = centroid(reference, subset);

    let mut h = Matrix3::zeros();
    for &idx in subset {
        let xr = Vector3::new(
            frame[idx][0] as f64 - cx[0],
            frame[idx][1] as f64 - cx[1],
            frame[idx][2] as f64 - cx[2],
        );
        let yr = Vector3::new(
            reference[idx][0] as f64 - cy[0],
            reference[idx][1] as f64 - cy[1],
            reference[idx][2] as f64 - cy[2],
        );
        h += xr * yr.transpose();
    }

    let svd = h.svd(true, true);
    let (u, v_t) = match (svd.u, svd.v_t) {
        (Some(u), Some(v_t)) => (u, v_t),
        _ => return (Matrix3::identity(), cx, cy),
    };
    let mut r = v_t.transpose() * u.transpose();
    if r.determinant() < 0.0 {
        let mut v_t_adj = v_t;
        v_t_adj.row_mut(2).neg_mut();
        r = v_t_adj.transpose() * u.transpose();
    }
    (r, cx, cy)
}
