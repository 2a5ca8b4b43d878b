use crate::error::{Error, Result};
use crate::protocol::pdu::{
    DeleteFunction, DeleteResultSetRequest, DeleteResultSetResponse, Pdu, write_pdu,
};

use super::read_response;

/// Write a DeleteResultSetRequest for the named result sets
pub fn write_delete(out: &mut Vec<u8>, result_sets: &[&str]) {
    let request = DeleteResultSetRequest {
        reference_id: None,
        function: DeleteFunction::List,
        result_sets: result_sets.iter().map(|name| (*name).to_string()).collect(),
    };
    write_pdu(out, &Pdu::DeleteResultSetRequest(request));
}

pub fn read_delete_response(payload: &[u8]) -> Result<DeleteResultSetResponse> {
    match read_response(payload)? {
        Pdu::DeleteResultSetResponse(response) => Ok(response),
        other => Err(Error::UnexpectedPdu {
            expected: "DeleteResultSetResponse",
            actual: other.name(),
        }),
    }
}
