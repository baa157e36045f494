#![forbid(unsafe_code)]

pub mod atoms;
pub mod error;
pub mod fit;
pub mod frame;
pub mod msd;

pub use atoms::{AtomTable, Atomer};
pub use error::{TrajError, TrajResult};
pub use fit::{per_atom_sq_dev, superpose};
pub use frame::{Frame, RawFrame};
pub use msd::MsdAccumulator;
