use crate::error::{Error, Result};
use crate::protocol::ber::Oid;
use crate::protocol::pdu::{Pdu, ResultSetStatus, SearchRequest, SearchResponse, write_pdu};
use crate::protocol::query::StructuredQuery;

use super::{failure, read_response};

/// Parameters of one searchRequest
#[derive(Debug, Clone, Copy)]
pub struct SearchParams<'a> {
    pub query: &'a StructuredQuery,
    pub result_set_name: &'a str,
    pub database: &'a str,
    pub syntax: Option<&'a Oid>,
    pub element_set_name: Option<&'a str>,
}

/// Write a SearchRequest. No records are asked for in the response; they are
/// fetched with present.
pub fn write_search(out: &mut Vec<u8>, params: SearchParams<'_>) {
    let element_set_name = params.element_set_name.map(str::to_string);
    let request = SearchRequest {
        reference_id: None,
        small_set_upper_bound: 0,
        large_set_lower_bound: 1,
        medium_set_present_number: 0,
        replace_indicator: true,
        result_set_name: params.result_set_name.to_string(),
        database_names: vec![params.database.to_string()],
        small_set_element_set_name: element_set_name.clone(),
        medium_set_element_set_name: element_set_name,
        preferred_record_syntax: params.syntax.cloned(),
        query: params.query.clone(),
    };
    write_pdu(out, &Pdu::SearchRequest(request));
}

/// Read the SearchResponse. `searchStatus = false` becomes `SearchFailed`
/// unless the server kept a subset or interim result set, which is returned
/// as it stands.
pub fn read_search_response(payload: &[u8]) -> Result<SearchResponse> {
    let response = match read_response(payload)? {
        Pdu::SearchResponse(response) => response,
        other => {
            return Err(Error::UnexpectedPdu {
                expected: "SearchResponse",
                actual: other.name(),
            });
        }
    };

    if !response.search_status {
        let (code, add_info) = failure(response.records.as_ref());
        if let Some(status @ (ResultSetStatus::Subset | ResultSetStatus::Interim)) =
            response.result_set_status
        {
            tracing::warn!(
                ?status,
                code,
                hits = response.result_count,
                "search ended early, keeping partial result set"
            );
            return Ok(response);
        }
        return Err(Error::SearchFailed { code, add_info });
    }

    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::pdu::{
        Close, CloseReason, Diagnostic, PresentResponse, PresentStatus, Records, decode, encode,
    };
    use crate::protocol::query::{QueryType, build};

    fn response(status: bool, records: Option<Records>) -> Vec<u8> {
        encode(&Pdu::SearchResponse(SearchResponse {
            reference_id: None,
            result_count: if status { 12 } else { 0 },
            number_of_records_returned: 0,
            next_result_set_position: 1,
            search_status: status,
            result_set_status: None,
            present_status: None,
            records,
        }))
    }

    #[test]
    fn request_fields() {
        let query = build("@attr 1=7 0253333490", QueryType::Prefix).unwrap();
        let syntax: Oid = "1.2.840.10003.5.10".parse().unwrap();
        let mut out = Vec::new();
        write_search(
            &mut out,
            SearchParams {
                query: &query,
                result_set_name: "rs1",
                database: "voyager",
                syntax: Some(&syntax),
                element_set_name: Some("F"),
            },
        );
        let Pdu::SearchRequest(request) = decode(&out).unwrap() else {
            panic!("expected SearchRequest");
        };
        assert_eq!(request.result_set_name, "rs1");
        assert_eq!(request.database_names, ["voyager"]);
        assert_eq!(request.preferred_record_syntax, Some(syntax));
        assert_eq!(request.small_set_element_set_name.as_deref(), Some("F"));
        assert_eq!(request.query, query);
    }

    #[test]
    fn successful_search() {
        let response = read_search_response(&response(true, None)).unwrap();
        assert_eq!(response.result_count, 12);
    }

    #[test]
    fn failed_search_carries_diagnostic() {
        let payload = response(
            false,
            Some(Records::NonSurrogateDiagnostic(Diagnostic::bib1(
                109,
                Some("voyager"),
            ))),
        );
        assert!(matches!(
            read_search_response(&payload),
            Err(Error::SearchFailed { code: 109, add_info: Some(info) }) if info == "voyager"
        ));
    }

    #[test]
    fn failed_search_without_diagnostic() {
        assert!(matches!(
            read_search_response(&response(false, None)),
            Err(Error::SearchFailed { code: 100, add_info: None })
        ));
    }

    #[test]
    fn partial_result_set_is_kept() {
        for status in [ResultSetStatus::Subset, ResultSetStatus::Interim] {
            let payload = encode(&Pdu::SearchResponse(SearchResponse {
                reference_id: None,
                result_count: 5,
                number_of_records_returned: 0,
                next_result_set_position: 1,
                search_status: false,
                result_set_status: Some(status),
                present_status: None,
                records: Some(Records::NonSurrogateDiagnostic(Diagnostic::bib1(
                    11,
                    None,
                ))),
            }));
            let response = read_search_response(&payload).unwrap();
            assert_eq!(response.result_count, 5);
            assert_eq!(response.result_set_status, Some(status));
        }

        let payload = encode(&Pdu::SearchResponse(SearchResponse {
            reference_id: None,
            result_count: 0,
            number_of_records_returned: 0,
            next_result_set_position: 1,
            search_status: false,
            result_set_status: Some(ResultSetStatus::Empty),
            present_status: None,
            records: None,
        }));
        assert!(matches!(
            read_search_response(&payload),
            Err(Error::SearchFailed { code: 100, .. })
        ));
    }

    #[test]
    fn wrong_pdu_is_unexpected() {
        let payload = encode(&Pdu::PresentResponse(PresentResponse {
            reference_id: None,
            number_of_records_returned: 0,
            next_result_set_position: 1,
            present_status: PresentStatus::Success,
            records: None,
        }));
        assert!(matches!(
            read_search_response(&payload),
            Err(Error::UnexpectedPdu { expected: "SearchResponse", actual: "PresentResponse" })
        ));
    }

    #[test]
    fn close_from_server() {
        let payload = encode(&Pdu::Close(Close {
            reference_id: None,
            reason: CloseReason::LackOfActivity,
            message: None,
        }));
        assert!(matches!(
            read_search_response(&payload),
            Err(Error::ClosedByPeer { reason: CloseReason::LackOfActivity, .. })
        ));
    }
}
