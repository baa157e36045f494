pub mod dispatch;
pub mod error;
pub mod lovo;
pub mod options;
pub mod pass;

pub use dispatch::{Batch, BatchDispatcher};
pub use error::{LovoError, LovoResult};
pub use lovo::{LovoReturn, lovo};
pub use options::Options;
pub use pass::{PassOutput, msd_pass, process_frame};
