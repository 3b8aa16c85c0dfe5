pub mod error;
pub mod value;

pub use error::{ErrorKind, Result, SqlError};
pub use value::{Record, Value, record};
