use std::path::PathBuf;

use lovo_core::error::{TrajError, TrajResult};
use lovo_core::frame::RawFrame;
use xdrfile::{Frame as XdrFrame, Trajectory, XTCTrajectory};

use crate::TrajRead;

const NM_TO_ANGSTROM: f32 = 10.0;

/// GROMACS XTC reader. Decompression is delegated to the xdrfile codec;
/// this type only deinterleaves into the per-axis raw layout and tags the
/// nm to Angstrom scale for materialization.
pub struct XtcReader {
    traj: XTCTrajectory,
    n_atoms: usize,
    frame: XdrFrame,
}

impl XtcReader {
    pub fn open(path: impl Into<PathBuf>) -> TrajResult<Self> {
        let path = path.into();
        let mut traj = XTCTrajectory::open_read(&path).map_err(map_xtc_err)?;
        let n_atoms = traj.get_num_atoms().map_err(map_xtc_err)?;
        let frame = XdrFrame::with_len(n_atoms);
        Ok(Self {
            traj,
            n_atoms,
            frame,
        })
    }
}

impl TrajRead for XtcReader {
    fn n_atoms(&self) -> usize {
        self.n_atoms
    }

    fn read_raw(&mut self, raw: &mut RawFrame) -> TrajResult<()> {
        self.traj.read(&mut self.frame).map_err(map_xtc_err)?;
        raw.scale = NM_TO_ANGSTROM;
        for axis in [&mut raw.x, &mut raw.y, &mut raw.z] {
            if axis.len() != self.n_atoms {
                axis.resize(self.n_atoms, 0.0);
            }
        }
        for (i, src) in self.frame.coords.iter().enumerate() {
            raw.x[i] = src[0];
            raw.y[i] = src[1];
            raw.z[i] = src[2];
        }
        Ok(())
    }

    fn skip_raw(&mut self) -> TrajResult<()> {
        // The codec has no positioned skip; decode and drop.
        self.traj.read(&mut self.frame).map_err(map_xtc_err)
    }
}

fn map_xtc_err(err: xdrfile::Error) -> TrajError {
    if err.is_eof() {
        TrajError::Eof
    } else {
        TrajError::Parse(format!("xtc error: {err}"))
    }
}
