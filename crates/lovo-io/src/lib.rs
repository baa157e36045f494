pub mod dcd;
pub mod dcd_write;
pub mod xtc;

use std::path::Path;

use lovo_core::error::{TrajError, TrajResult};
use lovo_core::frame::{Frame, RawFrame};

pub use dcd::DcdReader;
pub use dcd_write::DcdWriter;
pub use xtc::XtcReader;

/// Forward-only trajectory decode. One record per call; the handle owns
/// the cursor and is not safe for concurrent reads.
pub trait TrajRead {
    /// Atom count, fixed for the life of the handle.
    fn n_atoms(&self) -> usize;

    /// Decode the next record into `raw`, resizing it as needed. Returns
    /// [`TrajError::Eof`] at a clean end of the trajectory; anything else
    /// is fatal and the handle must be discarded.
    fn read_raw(&mut self, raw: &mut RawFrame) -> TrajResult<()>;

    /// Advance past the next record without materializing coordinates
    /// (and, for DCD, without touching a payload buffer at all).
    fn skip_raw(&mut self) -> TrajResult<()>;

    /// Decode the next record into `dest`, or discard it when `dest` is
    /// `None` while still advancing the cursor.
    fn read_next(&mut self, raw: &mut RawFrame, dest: Option<&mut Frame>) -> TrajResult<()> {
        match dest {
            Some(frame) => {
                self.read_raw(raw)?;
                raw.materialize(frame);
                Ok(())
            }
            None => self.skip_raw(),
        }
    }
}

type OpenFn = fn(&Path) -> TrajResult<Box<dyn TrajRead>>;

/// Extension-tag to constructor mapping, resolved once per `open` call.
pub struct FormatRegistry {
    entries: Vec<(&'static str, OpenFn)>,
}

impl FormatRegistry {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register("dcd", open_dcd);
        registry.register("xtc", open_xtc);
        registry
    }

    pub fn register(&mut self, tag: &'static str, open: OpenFn) {
        self.entries.push((tag, open));
    }

    pub fn open(&self, path: &Path) -> TrajResult<Box<dyn TrajRead>> {
        let tag = path
            .extension()
            .and_then(|ext| ext.to_str())
            .unwrap_or("")
            .to_ascii_lowercase();
        for (known, open) in &self.entries {
            if *known == tag {
                return open(path);
            }
        }
        Err(TrajError::Unsupported(format!(
            "no registered trajectory format for extension '{tag}'"
        )))
    }
}

impl Default for FormatRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

fn open_dcd(path: &Path) -> TrajResult<Box<dyn TrajRead>> {
    Ok(Box::new(DcdReader::open(path)?))
}

fn open_xtc(path: &Path) -> TrajResult<Box<dyn TrajRead>> {
    Ok(Box::new(XtcReader::open(path)?))
}

/// Open a trajectory with the default format registry.
pub fn open_trajectory(path: impl AsRef<Path>) -> TrajResult<Box<dyn TrajRead>> {
    FormatRegistry::with_defaults().open(path.as_ref())
}
