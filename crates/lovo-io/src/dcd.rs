use std::fs::File;
use std::io::{BufReader, Read};
use std::path::PathBuf;

use lovo_core::error::{TrajError, TrajResult};
use lovo_core::frame::RawFrame;

use crate::TrajRead;

const DCD_IO_BUFFER_BYTES: usize = 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Endian {
    Little,
    Big,
}

/// CHARMM-flavoured DCD reader.
///
/// The header record is always 84 bytes, so the leading record marker
/// doubles as the endianness probe: whichever byte order decodes it as 84
/// is the file's order for every integer and float that follows. X-plor
/// files (CHARMM version field of zero) and files with fixed atoms are
/// rejected up front.
#[derive(Debug)]
pub struct DcdReader {
    file: BufReader<File>,
    endian: Endian,
    n_atoms: usize,
    has_unitcell: bool,
    has_fourdim: bool,
    delta: f32,
}

impl DcdReader {
    pub fn open(path: impl Into<PathBuf>) -> TrajResult<Self> {
        let path = path.into();
        let file = File::open(&path)?;
        let mut file = BufReader::with_capacity(DCD_IO_BUFFER_BYTES, file);

        let endian = detect_endianness(&mut file)?;
        let mut header = [0u8; 84];
        file.read_exact(&mut header)?;
        let trailer = read_marker(&mut file, endian)?;
        if trailer != 84 {
            return Err(TrajError::Parse("DCD header record length mismatch".into()));
        }
        if &header[0..4] != b"CORD" {
            return Err(TrajError::Parse("missing CORD magic in DCD header".into()));
        }

        // icntrl lives after the magic; field i sits at header[4 + 4*i..].
        let charmm_version = read_i32_at(&header, 4 + 4 * 19, endian);
        if charmm_version == 0 {
            return Err(TrajError::Unsupported(
                "X-plor format DCD files are not supported".into(),
            ));
        }
        let fixed = read_i32_at(&header, 4 + 4 * 8, endian);
        if fixed != 0 {
            return Err(TrajError::Unsupported(format!(
                "DCD files with {fixed} fixed atoms are not supported"
            )));
        }
        let delta = read_f32_at(&header, 4 + 4 * 9, endian);
        let has_unitcell = read_i32_at(&header, 4 + 4 * 10, endian) != 0;
        let has_fourdim = read_i32_at(&header, 4 + 4 * 11, endian) != 0;

        skip_title_record(&mut file, endian)?;

        let natoms_len = read_marker(&mut file, endian)?;
        if natoms_len != 4 {
            return Err(TrajError::Parse("unexpected natoms record length".into()));
        }
        let natoms = read_i32(&mut file, endian)?;
        let natoms_end = read_marker(&mut file, endian)?;
        if natoms_end != natoms_len {
            return Err(TrajError::Parse("natoms record length mismatch".into()));
        }
        if natoms <= 0 {
            return Err(TrajError::Parse(format!("invalid natoms {natoms}")));
        }

        Ok(Self {
            file,
            endian,
            n_atoms: natoms as usize,
            has_unitcell,
            has_fourdim,
            delta,
        })
    }

    /// Integration time step from the header, in whatever unit the
    /// producer used (AKMA for CHARMM).
    pub fn delta(&self) -> f32 {
        self.delta
    }

    /// Position the cursor at the start of the coordinate payload,
    /// consuming the unit-cell record when one precedes it. `None` means a
    /// clean end of trajectory.
    fn start_frame(&mut self) -> TrajResult<Option<u32>> {
        let expected_len = (self.n_atoms * 4) as u32;
        let mut len = match read_marker_opt(&mut self.file, self.endian)? {
            Some(l) => l,
            None => return Ok(None),
        };
        // A frame may open with a unit-cell record; it is distinguished
        // from the X payload purely by its length.
        if self.has_unitcell && len != expected_len {
            skip_payload(&mut self.file, self.endian, len)?;
            len = read_marker(&mut self.file, self.endian)?;
        }
        if len != expected_len {
            return Err(TrajError::Parse(format!(
                "unexpected DCD coordinate record length {len}, want {expected_len}"
            )));
        }
        Ok(Some(len))
    }

    fn finish_frame(&mut self) -> TrajResult<()> {
        if self.has_fourdim {
            // The last frame of a four-dimension trajectory omits the 4-D
            // block; EOF at its marker means the frame just decoded was
            // the final one, and the next read reports Eof.
            if let Some(len) = read_marker_opt(&mut self.file, self.endian)? {
                skip_payload(&mut self.file, self.endian, len)?;
            }
        }
        Ok(())
    }
}

impl TrajRead for DcdReader {
    fn n_atoms(&self) -> usize {
        self.n_atoms
    }

    fn read_raw(&mut self, raw: &mut RawFrame) -> TrajResult<()> {
        let len = match self.start_frame()? {
            Some(len) => len,
            None => return Err(TrajError::Eof),
        };
        raw.scale = 1.0;
        read_axis_payload(&mut self.file, self.endian, self.n_atoms, len, &mut raw.x)?;
        let len_y = read_marker(&mut self.file, self.endian)?;
        read_axis_payload(&mut self.file, self.endian, self.n_atoms, len_y, &mut raw.y)?;
        let len_z = read_marker(&mut self.file, self.endian)?;
        read_axis_payload(&mut self.file, self.endian, self.n_atoms, len_z, &mut raw.z)?;
        self.finish_frame()
    }

    fn skip_raw(&mut self) -> TrajResult<()> {
        let len = match self.start_frame()? {
            Some(len) => len,
            None => return Err(TrajError::Eof),
        };
        skip_payload(&mut self.file, self.endian, len)?;
        for _ in 0..2 {
            let axis_len = read_marker(&mut self.file, self.endian)?;
            if axis_len != len {
                return Err(TrajError::Parse(
                    "unexpected DCD coordinate record length".into(),
                ));
            }
            skip_payload(&mut self.file, self.endian, axis_len)?;
        }
        self.finish_frame()
    }
}

fn detect_endianness(file: &mut impl Read) -> TrajResult<Endian> {
    let mut buf = [0u8; 4];
    file.read_exact(&mut buf)?;
    if u32::from_le_bytes(buf) == 84 {
        Ok(Endian::Little)
    } else if u32::from_be_bytes(buf) == 84 {
        Ok(Endian::Big)
    } else {
        Err(TrajError::Parse(
            "leading record marker is not 84; not a DCD file".into(),
        ))
    }
}

fn read_i32_at(buf: &[u8], offset: usize, endian: Endian) -> i32 {
    let mut raw = [0u8; 4];
    raw.copy_from_slice(&buf[offset..offset + 4]);
    match endian {
        Endian::Little => i32::from_le_bytes(raw),
        Endian::Big => i32::from_be_bytes(raw),
    }
}

fn read_f32_at(buf: &[u8], offset: usize, endian: Endian) -> f32 {
    let mut raw = [0u8; 4];
    raw.copy_from_slice(&buf[offset..offset + 4]);
    match endian {
        Endian::Little => f32::from_le_bytes(raw),
        Endian::Big => f32::from_be_bytes(raw),
    }
}

fn read_marker(file: &mut impl Read, endian: Endian) -> TrajResult<u32> {
    let mut buf = [0u8; 4];
    file.read_exact(&mut buf)?;
    Ok(match endian {
        Endian::Little => u32::from_le_bytes(buf),
        Endian::Big => u32::from_be_bytes(buf),
    })
}

/// Like [`read_marker`], but a clean end-of-file at the marker position
/// yields `None` instead of an error. Only the opening marker of a frame
/// may legitimately hit EOF.
fn read_marker_opt(file: &mut impl Read, endian: Endian) -> TrajResult<Option<u32>> {
    let mut buf = [0u8; 4];
    match file.read_exact(&mut buf) {
        Ok(()) => Ok(Some(match endian {
            Endian::Little => u32::from_le_bytes(buf),
            Endian::Big => u32::from_be_bytes(buf),
        })),
        Err(err) if err.kind() == std::io::ErrorKind::UnexpectedEof => Ok(None),
        Err(err) => Err(err.into()),
    }
}

fn read_i32(file: &mut impl Read, endian: Endian) -> TrajResult<i32> {
    let mut buf = [0u8; 4];
    file.read_exact(&mut buf)?;
    Ok(match endian {
        Endian::Little => i32::from_le_bytes(buf),
        Endian::Big => i32::from_be_bytes(buf),
    })
}

fn read_axis_payload(
    file: &mut impl Read,
    endian: Endian,
    count: usize,
    len: u32,
    axis: &mut Vec<f32>,
) -> TrajResult<()> {
    let expected_len = (count * 4) as u32;
    if len != expected_len {
        return Err(TrajError::Parse(format!(
            "unexpected float record length {len}, want {expected_len}"
        )));
    }
    if axis.len() != count {
        axis.resize(count, 0.0);
    }
    if cfg!(target_endian = "little") && endian == Endian::Little {
        let dst: &mut [u8] = bytemuck::cast_slice_mut(&mut axis[..count]);
        file.read_exact(dst)?;
    } else {
        let mut buf = [0u8; 4];
        for value in axis.iter_mut() {
            file.read_exact(&mut buf)?;
            *value = match endian {
                Endian::Little => f32::from_le_bytes(buf),
                Endian::Big => f32::from_be_bytes(buf),
            };
        }
    }
    let end_len = read_marker(file, endian)?;
    if end_len != len {
        return Err(TrajError::Parse("float record length mismatch".into()));
    }
    Ok(())
}

/// Discard `len` payload bytes and the trailing marker without allocating
/// a payload-sized buffer.
fn skip_payload(file: &mut impl Read, endian: Endian, len: u32) -> TrajResult<()> {
    let mut remain = len as usize;
    let mut scratch = [0u8; 256];
    while remain > 0 {
        let take = remain.min(scratch.len());
        file.read_exact(&mut scratch[..take])?;
        remain -= take;
    }
    let end_len = read_marker(file, endian)?;
    if end_len != len {
        return Err(TrajError::Parse("record length mismatch".into()));
    }
    Ok(())
}

fn skip_title_record(file: &mut impl Read, endian: Endian) -> TrajResult<()> {
    let len = read_marker(file, endian)?;
    if len < 4 || (len - 4) % 80 != 0 {
        return Err(TrajError::Parse(format!(
            "malformed DCD title record of length {len}"
        )));
    }
    let ntitle = read_i32(file, endian)?;
    if ntitle as u32 != (len - 4) / 80 {
        return Err(TrajError::Parse(
            "DCD title count disagrees with record length".into(),
        ));
    }
    let mut line = [0u8; 80];
    for _ in 0..ntitle {
        file.read_exact(&mut line)?;
    }
    let end_len = read_marker(file, endian)?;
    if end_len != len {
        return Err(TrajError::Parse("title record length mismatch".into()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use lovo_core::frame::Frame;
    use std::io::Write;
    use std::path::Path;

    fn write_record(file: &mut File, payload: &[u8]) {
        let len = u32::try_from(payload.len()).unwrap();
        file.write_all(&len.to_le_bytes()).unwrap();
        file.write_all(payload).unwrap();
        file.write_all(&len.to_le_bytes()).unwrap();
    }

    fn write_f32_record(file: &mut File, values: &[f32]) {
        let mut payload = Vec::with_capacity(values.len() * 4);
        for value in values {
            payload.extend_from_slice(&value.to_le_bytes());
        }
        write_record(file, &payload);
    }

    fn write_test_dcd(path: &Path, n_atoms: usize, frames: &[(Vec<f32>, Vec<f32>, Vec<f32>)]) {
        write_test_dcd_opts(path, n_atoms, frames, 1, None);
    }

    fn write_test_dcd_opts(
        path: &Path,
        n_atoms: usize,
        frames: &[(Vec<f32>, Vec<f32>, Vec<f32>)],
        charmm_version: i32,
        unitcell: Option<[f64; 6]>,
    ) {
        let mut file = File::create(path).unwrap();

        let mut header = Vec::with_capacity(84);
        header.extend_from_slice(b"CORD");
        let mut icntrl = [0i32; 20];
        icntrl[0] = frames.len() as i32;
        icntrl[9] = f32::to_bits(1.0) as i32;
        if unitcell.is_some() {
            icntrl[10] = 1;
        }
        icntrl[19] = charmm_version;
        for value in icntrl {
            header.extend_from_slice(&value.to_le_bytes());
        }
        write_record(&mut file, &header);

        let mut title = Vec::with_capacity(84);
        title.extend_from_slice(&1i32.to_le_bytes());
        let mut line = [b' '; 80];
        let text = b"LOVO_TEST_DCD";
        line[..text.len()].copy_from_slice(text);
        title.extend_from_slice(&line);
        write_record(&mut file, &title);

        write_record(&mut file, &(n_atoms as i32).to_le_bytes());

        for (x, y, z) in frames {
            if let Some(cell) = unitcell {
                let mut payload = Vec::with_capacity(48);
                for value in cell {
                    payload.extend_from_slice(&value.to_le_bytes());
                }
                write_record(&mut file, &payload);
            }
            write_f32_record(&mut file, x);
            write_f32_record(&mut file, y);
            write_f32_record(&mut file, z);
        }
    }

    #[test]
    fn reject_bad_leading_marker() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.dcd");
        let mut file = File::create(&path).unwrap();
        file.write_all(&[1, 2, 3, 4, 5, 6, 7, 8]).unwrap();
        let err = DcdReader::open(&path).unwrap_err();
        assert!(matches!(err, TrajError::Parse(_)));
    }

    #[test]
    fn reject_xplor_variant() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("xplor.dcd");
        write_test_dcd_opts(&path, 1, &[(vec![1.0], vec![2.0], vec![3.0])], 0, None);
        let err = DcdReader::open(&path).unwrap_err();
        assert!(matches!(err, TrajError::Unsupported(_)));
    }

    #[test]
    fn read_frames_then_clean_eof() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("two_frames.dcd");
        write_test_dcd(
            &path,
            2,
            &[
                (vec![1.0, 4.0], vec![2.0, 5.0], vec![3.0, 6.0]),
                (vec![7.0, 10.0], vec![8.0, 11.0], vec![9.0, 12.0]),
            ],
        );

        let mut reader = DcdReader::open(&path).unwrap();
        assert_eq!(reader.n_atoms(), 2);

        let mut raw = RawFrame::zeros(2);
        let mut frame = Frame::zeros(2);
        reader.read_next(&mut raw, Some(&mut frame)).unwrap();
        assert_eq!(frame.coords(), &[[1.0, 2.0, 3.0], [4.0, 5.0, 6.0]]);
        reader.read_next(&mut raw, Some(&mut frame)).unwrap();
        assert_eq!(frame.coords(), &[[7.0, 8.0, 9.0], [10.0, 11.0, 12.0]]);

        let err = reader.read_raw(&mut raw).unwrap_err();
        assert!(err.is_eof());
    }

    #[test]
    fn unitcell_record_is_transparent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("with_cell.dcd");
        write_test_dcd_opts(
            &path,
            1,
            &[(vec![1.5], vec![2.5], vec![3.5])],
            1,
            Some([30.0, 90.0, 30.0, 90.0, 90.0, 30.0]),
        );

        let mut reader = DcdReader::open(&path).unwrap();
        let mut raw = RawFrame::zeros(1);
        reader.read_raw(&mut raw).unwrap();
        assert_eq!((raw.x[0], raw.y[0], raw.z[0]), (1.5, 2.5, 3.5));
        assert!(reader.read_raw(&mut raw).unwrap_err().is_eof());
    }

    #[test]
    fn skip_advances_exactly_one_frame() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("skip.dcd");
        write_test_dcd(
            &path,
            1,
            &[
                (vec![1.0], vec![1.0], vec![1.0]),
                (vec![2.0], vec![2.0], vec![2.0]),
                (vec![3.0], vec![3.0], vec![3.0]),
            ],
        );

        let mut reader = DcdReader::open(&path).unwrap();
        let mut raw = RawFrame::zeros(1);
        reader.skip_raw().unwrap();
        reader.read_raw(&mut raw).unwrap();
        assert_eq!(raw.x[0], 2.0);
        reader.skip_raw().unwrap();
        assert!(reader.skip_raw().unwrap_err().is_eof());
    }

    #[test]
    fn fourdim_trajectory_ends_cleanly_without_final_block() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fourdim.dcd");
        let mut file = File::create(&path).unwrap();

        let mut header = Vec::with_capacity(84);
        header.extend_from_slice(b"CORD");
        let mut icntrl = [0i32; 20];
        icntrl[0] = 2;
        icntrl[11] = 1;
        icntrl[19] = 1;
        for value in icntrl {
            header.extend_from_slice(&value.to_le_bytes());
        }
        write_record(&mut file, &header);

        let mut title = Vec::with_capacity(84);
        title.extend_from_slice(&1i32.to_le_bytes());
        title.extend_from_slice(&[b' '; 80]);
        write_record(&mut file, &title);

        write_record(&mut file, &1i32.to_le_bytes());

        // First frame carries its 4-D block, the final frame omits it.
        write_f32_record(&mut file, &[1.0]);
        write_f32_record(&mut file, &[2.0]);
        write_f32_record(&mut file, &[3.0]);
        write_f32_record(&mut file, &[0.5]);
        write_f32_record(&mut file, &[4.0]);
        write_f32_record(&mut file, &[5.0]);
        write_f32_record(&mut file, &[6.0]);
        drop(file);

        let mut reader = DcdReader::open(&path).unwrap();
        let mut raw = RawFrame::zeros(1);
        reader.read_raw(&mut raw).unwrap();
        assert_eq!((raw.x[0], raw.y[0], raw.z[0]), (1.0, 2.0, 3.0));
        reader.read_raw(&mut raw).unwrap();
        assert_eq!((raw.x[0], raw.y[0], raw.z[0]), (4.0, 5.0, 6.0));
        assert!(reader.read_raw(&mut raw).unwrap_err().is_eof());
    }

    #[test]
    fn big_endian_file_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("big.dcd");
        let mut file = File::create(&path).unwrap();

        let write_be_record = |file: &mut File, payload: &[u8]| {
            let len = u32::try_from(payload.len()).unwrap();
            file.write_all(&len.to_be_bytes()).unwrap();
            file.write_all(payload).unwrap();
            file.write_all(&len.to_be_bytes()).unwrap();
        };

        let mut header = Vec::with_capacity(84);
        header.extend_from_slice(b"CORD");
        let mut icntrl = [0i32; 20];
        icntrl[0] = 1;
        icntrl[19] = 1;
        for value in icntrl {
            header.extend_from_slice(&value.to_be_bytes());
        }
        write_be_record(&mut file, &header);

        let mut title = Vec::with_capacity(84);
        title.extend_from_slice(&1i32.to_be_bytes());
        title.extend_from_slice(&[b' '; 80]);
        write_be_record(&mut file, &title);

        write_be_record(&mut file, &1i32.to_be_bytes());

        for axis in [1.25f32, 2.5, 5.0] {
            write_be_record(&mut file, &axis.to_be_bytes());
        }
        drop(file);

        let mut reader = DcdReader::open(&path).unwrap();
        let mut raw = RawFrame::zeros(1);
        reader.read_raw(&mut raw).unwrap();
        assert_eq!((raw.x[0], raw.y[0], raw.z[0]), (1.25, 2.5, 5.0));
    }
}
