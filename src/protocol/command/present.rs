use crate::error::{Error, Result};
use crate::protocol::ber::Oid;
use crate::protocol::pdu::{Pdu, PresentRequest, PresentResponse, PresentStatus, write_pdu};

use super::{failure, read_response};

/// Parameters of one presentRequest
#[derive(Debug, Clone, Copy)]
pub struct PresentParams<'a> {
    pub result_set_name: &'a str,
    /// 0-based position of the first record
    pub start: usize,
    pub count: usize,
    pub syntax: Option<&'a Oid>,
    pub element_set_name: Option<&'a str>,
}

/// Write a PresentRequest. Positions are converted to the 1-based wire form.
pub fn write_present(out: &mut Vec<u8>, params: PresentParams<'_>) {
    let request = PresentRequest {
        reference_id: None,
        result_set_id: params.result_set_name.to_string(),
        start_point: to_wire(params.start.saturating_add(1)),
        number_requested: to_wire(params.count),
        element_set_name: params.element_set_name.map(str::to_string),
        preferred_record_syntax: params.syntax.cloned(),
    };
    write_pdu(out, &Pdu::PresentRequest(request));
}

fn to_wire(value: usize) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

/// Read the PresentResponse. An operation-level diagnostic becomes
/// `PresentFailed`; per-record diagnostics are left in the records.
pub fn read_present_response(payload: &[u8]) -> Result<PresentResponse> {
    let response = match read_response(payload)? {
        Pdu::PresentResponse(response) => response,
        other => {
            return Err(Error::UnexpectedPdu {
                expected: "PresentResponse",
                actual: other.name(),
            });
        }
    };

    let has_diagnostic = response
        .records
        .as_ref()
        .is_some_and(|records| records.diagnostic().is_some());
    let failed_empty =
        response.present_status == PresentStatus::Failure && response.records.is_none();
    if has_diagnostic || failed_empty {
        let (code, add_info) = failure(response.records.as_ref());
        return Err(Error::PresentFailed { code, add_info });
    }

    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::pdu::{
        Diagnostic, External, NamePlusRecord, RecordPayload, Records, decode, encode,
    };

    fn response(status: PresentStatus, records: Option<Records>) -> Vec<u8> {
        encode(&Pdu::PresentResponse(PresentResponse {
            reference_id: None,
            number_of_records_returned: 1,
            next_result_set_position: 2,
            present_status: status,
            records,
        }))
    }

    #[test]
    fn positions_are_one_based() {
        let mut out = Vec::new();
        write_present(
            &mut out,
            PresentParams {
                result_set_name: "default",
                start: 0,
                count: 3,
                syntax: None,
                element_set_name: Some("B"),
            },
        );
        let Pdu::PresentRequest(request) = decode(&out).unwrap() else {
            panic!("expected PresentRequest");
        };
        assert_eq!(request.start_point, 1);
        assert_eq!(request.number_requested, 3);
        assert_eq!(request.result_set_id, "default");
        assert_eq!(request.element_set_name.as_deref(), Some("B"));
    }

    #[test]
    fn records_pass_through() {
        let records = Records::ResponseRecords(vec![NamePlusRecord {
            database: None,
            record: RecordPayload::Retrieval(External::octets(
                "1.2.840.10003.5.10".parse().unwrap(),
                b"00714cam".to_vec(),
            )),
        }]);
        let payload = response(PresentStatus::Success, Some(records.clone()));
        let response = read_present_response(&payload).unwrap();
        assert_eq!(response.records, Some(records));
    }

    #[test]
    fn operation_diagnostic_fails() {
        let payload = response(
            PresentStatus::Failure,
            Some(Records::NonSurrogateDiagnostic(Diagnostic::bib1(13, None))),
        );
        assert!(matches!(
            read_present_response(&payload),
            Err(Error::PresentFailed { code: 13, .. })
        ));
        assert!(matches!(
            read_present_response(&response(PresentStatus::Failure, None)),
            Err(Error::PresentFailed { code: 100, .. })
        ));
    }
}
