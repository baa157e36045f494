use std::sync::Arc;
use std::sync::mpsc::{Receiver, Sender, channel};

use lovo_core::error::TrajError;
use lovo_core::frame::{Frame, RawFrame};
use lovo_io::TrajRead;

/// One dispatched batch: a receiver per materialized slot, in input order,
/// plus the error that cut the batch short, if any. `end` of
/// [`TrajError::Eof`] is normal termination; anything else poisons the
/// reader and the dispatcher with it.
pub struct Batch {
    pub slots: Vec<Option<Receiver<Frame>>>,
    pub end: Option<TrajError>,
}

impl Batch {
    pub fn is_eof(&self) -> bool {
        matches!(self.end, Some(TrajError::Eof))
    }
}

/// Reads batches of `batch` consecutive records from a single reader and
/// materializes them on a shared worker pool.
///
/// The record reads themselves are strictly sequential (the codecs are
/// stream-based, single-cursor), only the decode-to-coordinates step runs
/// concurrently. Raw axis buffers come from a pool sized to the batch and
/// are reclaimed through a return channel, so a caller must drain every
/// `Some` slot of a batch before asking for the next one; until then the
/// dispatcher blocks waiting for its buffers.
pub struct BatchDispatcher {
    reader: Box<dyn TrajRead>,
    pool: Arc<rayon::ThreadPool>,
    batch: usize,
    raw_pool: Vec<RawFrame>,
    raw_return_tx: Sender<RawFrame>,
    raw_return_rx: Receiver<RawFrame>,
    outstanding: usize,
}

impl BatchDispatcher {
    pub fn new(reader: Box<dyn TrajRead>, batch: usize, pool: Arc<rayon::ThreadPool>) -> Self {
        assert!(batch > 0, "batch size must be at least one");
        let n_atoms = reader.n_atoms();
        let raw_pool = (0..batch).map(|_| RawFrame::zeros(n_atoms)).collect();
        let (raw_return_tx, raw_return_rx) = channel();
        Self {
            reader,
            pool,
            batch,
            raw_pool,
            raw_return_tx,
            raw_return_rx,
            outstanding: 0,
        }
    }

    pub fn n_atoms(&self) -> usize {
        self.reader.n_atoms()
    }

    pub fn batch_size(&self) -> usize {
        self.batch
    }

    /// Read the next `batch` records. A `Some(frame)` slot is decoded into
    /// that buffer on the worker pool and delivered through the matching
    /// receiver; a `None` slot advances the cursor without touching a
    /// buffer. `buffers` must have exactly `batch` slots.
    ///
    /// On a read failure mid-batch the receivers produced so far are
    /// returned together with the error; the remaining slots are `None`.
    pub fn next_batch(&mut self, mut buffers: Vec<Option<Frame>>) -> Batch {
        assert_eq!(
            buffers.len(),
            self.batch,
            "buffer slots do not match the dispatcher batch size"
        );
        self.reclaim_raw_buffers();

        let mut slots: Vec<Option<Receiver<Frame>>> = Vec::with_capacity(self.batch);
        let mut end = None;
        for slot in buffers.iter_mut() {
            match slot.take() {
                None => {
                    if let Err(err) = self.reader.skip_raw() {
                        end = Some(err);
                        break;
                    }
                    slots.push(None);
                }
                Some(mut frame) => {
                    let mut raw = self
                        .raw_pool
                        .pop()
                        .unwrap_or_else(|| RawFrame::zeros(self.reader.n_atoms()));
                    if let Err(err) = self.reader.read_raw(&mut raw) {
                        self.raw_pool.push(raw);
                        end = Some(err);
                        break;
                    }
                    let (tx, rx) = channel();
                    let raw_return = self.raw_return_tx.clone();
                    self.outstanding += 1;
                    self.pool.spawn(move || {
                        raw.materialize(&mut frame);
                        // The raw buffer goes home before the frame is
                        // published; the next next_batch call reclaims it
                        // while the caller is still draining.
                        let _ = raw_return.send(raw);
                        let _ = tx.send(frame);
                    });
                    slots.push(Some(rx));
                }
            }
        }
        slots.resize_with(self.batch, || None);
        Batch { slots, end }
    }

    fn reclaim_raw_buffers(&mut self) {
        while self.outstanding > 0 {
            let raw = self
                .raw_return_rx
                .recv()
                .expect("materialization worker dropped its raw buffer");
            self.raw_pool.push(raw);
            self.outstanding -= 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lovo_io::DcdWriter;
    use std::path::Path;

    fn write_counting_dcd(path: &Path, n_atoms: usize, n_frames: usize) {
        let mut writer = DcdWriter::create(path, n_atoms).unwrap();
        for f in 0..n_frames {
            let coords = (0..n_atoms)
                .map(|a| [f as f32, a as f32, f as f32 + a as f32])
                .collect();
            writer.write_next(&Frame::from_coords(coords)).unwrap();
        }
        writer.finish().unwrap();
    }

    fn test_pool(threads: usize) -> Arc<rayon::ThreadPool> {
        Arc::new(
            rayon::ThreadPoolBuilder::new()
                .num_threads(threads)
                .build()
                .unwrap(),
        )
    }

    #[test]
    fn batches_deliver_frames_in_slot_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("seq.dcd");
        write_counting_dcd(&path, 3, 8);

        let reader = lovo_io::open_trajectory(&path).unwrap();
        let mut dispatcher = BatchDispatcher::new(reader, 4, test_pool(4));

        let mut seen = Vec::new();
        loop {
            let buffers = (0..4).map(|_| Some(Frame::zeros(3))).collect();
            let batch = dispatcher.next_batch(buffers);
            for rx in batch.slots.into_iter().flatten() {
                let frame = rx.recv().unwrap();
                seen.push(frame.coords()[0][0]);
            }
            if let Some(err) = batch.end {
                assert!(err.is_eof());
                break;
            }
        }
        assert_eq!(seen, (0..8).map(|f| f as f32).collect::<Vec<_>>());
    }

    #[test]
    fn partial_final_batch_is_delivered() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("partial.dcd");
        write_counting_dcd(&path, 2, 10);

        let reader = lovo_io::open_trajectory(&path).unwrap();
        let mut dispatcher = BatchDispatcher::new(reader, 4, test_pool(2));

        let mut total = 0usize;
        let mut batches = 0usize;
        loop {
            let buffers = (0..4).map(|_| Some(Frame::zeros(2))).collect();
            let batch = dispatcher.next_batch(buffers);
            let delivered = batch.slots.iter().filter(|s| s.is_some()).count();
            for rx in batch.slots.into_iter().flatten() {
                rx.recv().unwrap();
            }
            total += delivered;
            batches += 1;
            if let Some(err) = batch.end {
                assert!(err.is_eof());
                assert_eq!(delivered, 2, "final batch should hold the leftover frames");
                break;
            }
        }
        assert_eq!(total, 10);
        assert_eq!(batches, 3);
    }

    #[test]
    fn none_slots_skip_without_disturbing_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("skip.dcd");
        write_counting_dcd(&path, 1, 6);

        let reader = lovo_io::open_trajectory(&path).unwrap();
        let mut dispatcher = BatchDispatcher::new(reader, 3, test_pool(2));

        // Batch of [keep, skip, keep]: frames 0 and 2 come back, 1 is
        // passed over.
        let buffers = vec![Some(Frame::zeros(1)), None, Some(Frame::zeros(1))];
        let batch = dispatcher.next_batch(buffers);
        assert!(batch.end.is_none());
        let mut got = Vec::new();
        for rx in batch.slots.into_iter().flatten() {
            got.push(rx.recv().unwrap().coords()[0][0]);
        }
        assert_eq!(got, vec![0.0, 2.0]);

        // The cursor advanced past the skipped frame too.
        let buffers = vec![Some(Frame::zeros(1)), None, None];
        let batch = dispatcher.next_batch(buffers);
        let rx = batch.slots.into_iter().flatten().next().unwrap();
        assert_eq!(rx.recv().unwrap().coords()[0][0], 3.0);
    }

    #[test]
    fn all_none_batch_advances_the_cursor() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("advance.dcd");
        write_counting_dcd(&path, 1, 5);

        let reader = lovo_io::open_trajectory(&path).unwrap();
        let mut dispatcher = BatchDispatcher::new(reader, 2, test_pool(2));

        let batch = dispatcher.next_batch(vec![None, None]);
        assert!(batch.end.is_none());
        assert!(batch.slots.iter().all(|s| s.is_none()));

        let batch = dispatcher.next_batch(vec![Some(Frame::zeros(1)), None]);
        let rx = batch.slots.into_iter().flatten().next().unwrap();
        assert_eq!(rx.recv().unwrap().coords()[0][0], 2.0);
    }
}
