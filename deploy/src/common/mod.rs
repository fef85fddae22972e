mod blob;
mod diff;
mod error;

pub use blob::Blob;
pub(crate) use diff::{Diff, ErrorCollector};
pub use error::{functions::*, Error, ErrorKind};
