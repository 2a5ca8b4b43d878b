use crate::protocol::pdu::{Close, CloseReason, Pdu, write_pdu};

/// Write a Close PDU. The origin does not wait for the peer's Close.
pub fn write_close(out: &mut Vec<u8>, reason: CloseReason) {
    write_pdu(
        out,
        &Pdu::Close(Close {
            reference_id: None,
            reason,
            message: None,
        }),
    );
}
