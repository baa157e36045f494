/// One time-step's coordinates, one `[x, y, z]` triple per atom in
/// topology index order.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    coords: Vec<[f32; 3]>,
}

impl Frame {
    pub fn zeros(n_atoms: usize) -> Self {
        Self {
            coords: vec![[0.0; 3]; n_atoms],
        }
    }

    pub fn from_coords(coords: Vec<[f32; 3]>) -> Self {
        Self { coords }
    }

    pub fn n_atoms(&self) -> usize {
        self.coords.len()
    }

    pub fn coords(&self) -> &[[f32; 3]] {
        &self.coords
    }

    pub fn coords_mut(&mut self) -> &mut [[f32; 3]] {
        &mut self.coords
    }
}

/// Decoded-but-unmaterialized coordinates for one record: per-axis float32
/// payloads straight off the wire plus the unit scale to apply on
/// materialization (1.0 for DCD, 10.0 for the XTC nm to Angstrom
/// conversion).
///
/// Raw buffers are pooled by the batch dispatcher and reused across
/// batches; readers resize them as needed.
#[derive(Debug, Clone)]
pub struct RawFrame {
    pub x: Vec<f32>,
    pub y: Vec<f32>,
    pub z: Vec<f32>,
    pub scale: f32,
}

impl RawFrame {
    pub fn zeros(n_atoms: usize) -> Self {
        Self {
            x: vec![0.0; n_atoms],
            y: vec![0.0; n_atoms],
            z: vec![0.0; n_atoms],
            scale: 1.0,
        }
    }

    pub fn n_atoms(&self) -> usize {
        self.x.len()
    }

    /// Interleave the axis payloads into `dest`, applying the unit scale.
    ///
    /// Panics on an atom-count mismatch: buffers are sized from the same
    /// trajectory handle, so a mismatch is a programming error, not a data
    /// fault.
    pub fn materialize(&self, dest: &mut Frame) {
        let n = self.n_atoms();
        assert!(
            self.y.len() == n && self.z.len() == n && dest.n_atoms() == n,
            "raw frame / frame buffer atom count mismatch"
        );
        let coords = dest.coords_mut();
        if self.scale == 1.0 {
            for i in 0..n {
                coords[i] = [self.x[i], self.y[i], self.z[i]];
            }
        } else {
            let scale = self.scale;
            for i in 0..n {
                coords[i] = [self.x[i] * scale, self.y[i] * scale, self.z[i] * scale];
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn materialize_interleaves_axes() {
        let raw = RawFrame {
            x: vec![1.0, 4.0],
            y: vec![2.0, 5.0],
            z: vec![3.0, 6.0],
            scale: 1.0,
        };
        let mut frame = Frame::zeros(2);
        raw.materialize(&mut frame);
        assert_eq!(frame.coords(), &[[1.0, 2.0, 3.0], [4.0, 5.0, 6.0]]);
    }

    #[test]
    fn materialize_applies_scale() {
        let raw = RawFrame {
            x: vec![0.1],
            y: vec![0.2],
            z: vec![0.3],
            scale: 10.0,
        };
        let mut frame = Frame::zeros(1);
        raw.materialize(&mut frame);
        let p = frame.coords()[0];
        assert!((p[0] - 1.0).abs() < 1e-6);
        assert!((p[1] - 2.0).abs() < 1e-6);
        assert!((p[2] - 3.0).abs() < 1e-6);
    }

    #[test]
    #[should_panic(expected = "atom count mismatch")]
    fn materialize_rejects_size_mismatch() {
        let raw = RawFrame::zeros(3);
        let mut frame = Frame::zeros(2);
        raw.materialize(&mut frame);
    }
}
