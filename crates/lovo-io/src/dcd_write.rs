use std::fs::File;
use std::io::{BufWriter, Seek, SeekFrom, Write};
use std::path::PathBuf;

use lovo_core::error::{TrajError, TrajResult};
use lovo_core::frame::Frame;

const DCD_IO_BUFFER_BYTES: usize = 1024 * 1024;

/// Little-endian CHARMM-flavoured DCD writer. Frames are appended one at a
/// time; [`DcdWriter::finish`] patches the frame count back into the header
/// and flushes. A writer dropped without `finish` leaves a readable file
/// whose header claims zero frames.
#[derive(Debug)]
pub struct DcdWriter {
    file: BufWriter<File>,
    n_atoms: usize,
    frames_written: u32,
    payload: Vec<u8>,
}

impl DcdWriter {
    pub fn create(path: impl Into<PathBuf>, n_atoms: usize) -> TrajResult<Self> {
        if n_atoms == 0 {
            return Err(TrajError::Invalid(
                "cannot write a DCD for zero atoms".into(),
            ));
        }
        let path = path.into();
        let file = File::create(&path)?;
        let mut file = BufWriter::with_capacity(DCD_IO_BUFFER_BYTES, file);

        let mut header = Vec::with_capacity(84);
        header.extend_from_slice(b"CORD");
        let mut icntrl = [0i32; 20];
        // NFILE and NSTEP are patched in finish(); DELTA is a dummy 1.0
        // since the source time step is not tracked through alignment.
        icntrl[9] = f32::to_bits(1.0) as i32;
        icntrl[19] = 2;
        for value in icntrl {
            header.extend_from_slice(&value.to_le_bytes());
        }
        write_record(&mut file, &header)?;

        let mut title = Vec::with_capacity(84);
        title.extend_from_slice(&1i32.to_le_bytes());
        let mut line = [b' '; 80];
        let text = b"Aligned trajectory written by lovo";
        line[..text.len()].copy_from_slice(text);
        title.extend_from_slice(&line);
        write_record(&mut file, &title)?;

        write_record(&mut file, &(n_atoms as i32).to_le_bytes())?;

        Ok(Self {
            file,
            n_atoms,
            frames_written: 0,
            payload: Vec::with_capacity(n_atoms * 4),
        })
    }

    pub fn n_atoms(&self) -> usize {
        self.n_atoms
    }

    pub fn frames_written(&self) -> u32 {
        self.frames_written
    }

    /// Append one frame as three axis records.
    pub fn write_next(&mut self, frame: &Frame) -> TrajResult<()> {
        if frame.n_atoms() != self.n_atoms {
            return Err(TrajError::Mismatch(format!(
                "frame has {} atoms, writer was created for {}",
                frame.n_atoms(),
                self.n_atoms
            )));
        }
        for axis in 0..3 {
            self.payload.clear();
            for p in frame.coords() {
                self.payload.extend_from_slice(&p[axis].to_le_bytes());
            }
            write_record(&mut self.file, &self.payload)?;
        }
        self.frames_written += 1;
        Ok(())
    }

    /// Patch the frame count into the header and flush everything to disk.
    pub fn finish(mut self) -> TrajResult<u32> {
        self.file.flush()?;
        let file = self.file.get_mut();
        // NFILE (icntrl[0]) and NSTEP (icntrl[3]), past the 4-byte record
        // marker and the CORD magic.
        let count = self.frames_written as i32;
        file.seek(SeekFrom::Start(8))?;
        file.write_all(&count.to_le_bytes())?;
        file.seek(SeekFrom::Start(8 + 4 * 3))?;
        file.write_all(&count.to_le_bytes())?;
        file.flush()?;
        Ok(self.frames_written)
    }
}

fn write_record(file: &mut impl Write, payload: &[u8]) -> TrajResult<()> {
    let len = u32::try_from(payload.len())
        .map_err(|_| TrajError::Invalid("record payload too large for DCD".into()))?;
    file.write_all(&len.to_le_bytes())?;
    file.write_all(payload)?;
    file.write_all(&len.to_le_bytes())?;
    Ok(())
}
