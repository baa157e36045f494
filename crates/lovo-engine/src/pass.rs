use std::sync::Arc;

use rayon::prelude::*;
use tracing::debug;

use lovo_core::error::TrajError;
use lovo_core::fit::{per_atom_sq_dev, superpose};
use lovo_core::frame::Frame;
use lovo_core::msd::MsdAccumulator;
use lovo_io::{DcdWriter, TrajRead};

use crate::dispatch::BatchDispatcher;
use crate::error::LovoResult;
use crate::options::Options;

/// Superpose one frame onto the reference over the anchor `subset` and
/// report the squared deviation of every atom, anchors or not.
pub fn process_frame(frame: &Frame, reference: &Frame, subset: &[usize]) -> (Vec<f64>, Frame) {
    let fitted = superpose(frame, reference, subset);
    let dev = per_atom_sq_dev(&fitted, reference);
    (dev, fitted)
}

/// Result of one full-trajectory accumulation pass.
#[derive(Debug)]
pub struct PassOutput {
    /// Mean squared deviation per atom, averaged over materialized frames.
    pub msd: Vec<f64>,
    /// Frames actually materialized and accumulated. Passed-over stretches
    /// contribute nothing to either the sums or this count.
    pub frames_read: usize,
}

/// One full pass: batched concurrent decode, per-frame superposition onto
/// `reference` over `subset`, and MSD accumulation across the whole
/// trajectory.
///
/// Batches are `opts.cpus` frames. `begin` and `skip` apply at whole-batch
/// granularity: with `B = cpus`, batch `i` is materialized iff
/// `i >= begin/B` and `(i - begin/B) % (skip/B + 1) == 0`; every other
/// batch is passed over with discarding reads. A short final batch is
/// materialized and counted like any other.
///
/// When `writer` is present every fitted frame is appended to it, in
/// trajectory order.
pub fn msd_pass(
    reader: Box<dyn TrajRead>,
    reference: &Frame,
    subset: &[usize],
    opts: &Options,
    pool: &Arc<rayon::ThreadPool>,
    mut writer: Option<&mut DcdWriter>,
) -> LovoResult<PassOutput> {
    let n_atoms = reader.n_atoms();
    if n_atoms != reference.n_atoms() {
        return Err(TrajError::Mismatch(format!(
            "trajectory has {n_atoms} atoms, reference has {}",
            reference.n_atoms()
        ))
        .into());
    }
    let batch_size = opts.cpus.max(1);
    let begin_batches = opts.begin / batch_size;
    let stride = opts.skip / batch_size + 1;

    let mut dispatcher = BatchDispatcher::new(reader, batch_size, Arc::clone(pool));
    let mut acc = MsdAccumulator::new(n_atoms);
    let mut spare: Vec<Frame> = (0..batch_size).map(|_| Frame::zeros(n_atoms)).collect();
    let mut frames: Vec<Frame> = Vec::with_capacity(batch_size);

    let mut batch_idx = 0usize;
    let end = loop {
        let keep = batch_idx >= begin_batches && (batch_idx - begin_batches) % stride == 0;
        batch_idx += 1;

        if !keep {
            let batch = dispatcher.next_batch((0..batch_size).map(|_| None).collect());
            if let Some(err) = batch.end {
                break err;
            }
            continue;
        }

        let buffers = spare.drain(..).map(Some).collect();
        let batch = dispatcher.next_batch(buffers);
        frames.clear();
        for rx in batch.slots.into_iter().flatten() {
            frames.push(rx.recv().expect("materialization worker disappeared"));
        }

        let results: Vec<(Vec<f64>, Frame)> = pool.install(|| {
            frames
                .par_iter()
                .map(|frame| process_frame(frame, reference, subset))
                .collect()
        });
        for (dev, fitted) in &results {
            acc.add(dev);
            if let Some(w) = writer.as_deref_mut() {
                w.write_next(fitted)?;
            }
        }

        spare.append(&mut frames);
        while spare.len() < batch_size {
            spare.push(Frame::zeros(n_atoms));
        }

        if let Some(err) = batch.end {
            break err;
        }
    };

    if !end.is_eof() {
        return Err(end.into());
    }
    let (msd, frames_read) = acc.finish()?;
    debug!(frames_read, batches = batch_idx, "trajectory pass complete");
    Ok(PassOutput { msd, frames_read })
}
