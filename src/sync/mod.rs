mod conn;
mod stream;

pub use conn::{Conn, read_pdu};
pub use stream::{Stream, Transport};
