use crate::error::{TrajError, TrajResult};

/// Running per-atom squared-deviation sums for one trajectory pass.
///
/// Only frames that were actually materialized contribute; discarded
/// frames are invisible here, so the final normalization divides by the
/// number of `add` calls.
#[derive(Debug, Clone)]
pub struct MsdAccumulator {
    sums: Vec<f64>,
    frames: usize,
}

impl MsdAccumulator {
    pub fn new(n_atoms: usize) -> Self {
        Self {
            sums: vec![0.0; n_atoms],
            frames: 0,
        }
    }

    /// Add one frame's per-atom squared deviations.
    ///
    /// Panics on a length mismatch; the deviation vector comes from the
    /// same pass that sized this accumulator.
    pub fn add(&mut self, sq_dev: &[f64]) {
        assert_eq!(
            sq_dev.len(),
            self.sums.len(),
            "squared-deviation length does not match accumulator"
        );
        for (sum, d) in self.sums.iter_mut().zip(sq_dev.iter()) {
            *sum += d;
        }
        self.frames += 1;
    }

    pub fn frames(&self) -> usize {
        self.frames
    }

    /// Normalize by the number of accumulated frames, consuming the
    /// accumulator. A pass that materialized no frames has no mean.
    pub fn finish(self) -> TrajResult<(Vec<f64>, usize)> {
        if self.frames == 0 {
            return Err(TrajError::Invalid(
                "no frames accumulated; begin/skip may exceed the trajectory length".into(),
            ));
        }
        let frames = self.frames;
        let inv = 1.0 / frames as f64;
        let msd = self.sums.into_iter().map(|s| s * inv).collect();
        Ok((msd, frames))
    }
}
