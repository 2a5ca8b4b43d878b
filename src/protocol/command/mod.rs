pub mod close;
pub mod delete;
pub mod present;
pub mod search;

use crate::error::{Error, Result};
use crate::protocol::pdu::{Pdu, Records, decode};

/// Bib-1 "(unspecified) error", reported when a server signals failure
/// without a diagnostic
const UNSPECIFIED_CONDITION: i64 = 100;

/// Decode a response PDU. A Close from the server ends the session.
fn read_response(payload: &[u8]) -> Result<Pdu> {
    match decode(payload)? {
        Pdu::Close(close) => Err(Error::ClosedByPeer {
            reason: close.reason,
            message: close.message,
        }),
        pdu => Ok(pdu),
    }
}

/// Condition code and addinfo of the operation-level diagnostic
fn failure(records: Option<&Records>) -> (i64, Option<String>) {
    match records.and_then(Records::diagnostic) {
        Some(diag) => (diag.code, diag.info().map(str::to_string)),
        None => (UNSPECIFIED_CONDITION, None),
    }
}
