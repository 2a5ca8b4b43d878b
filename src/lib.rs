mod buffer;
pub mod constant;
pub mod error;
mod opts;
pub mod protocol;
pub mod record;
pub mod result_set;
mod session;

#[cfg(feature = "sync")]
pub mod sync;

#[cfg(feature = "tokio")]
pub mod tokio;

#[cfg(test)]
mod constant_test;
#[cfg(test)]
mod opts_test;

pub use error::{Error, Result};
pub use opts::Opts;
pub use protocol::connection::Negotiated;
pub use protocol::query::{Query, QueryType};
pub use record::{Record, RecordDecoder};
pub use result_set::{Fetched, ResultSet};
pub use session::SessionState;
