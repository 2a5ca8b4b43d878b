//! An in-process Z39.50 server used by the session tests

#![allow(dead_code)]

use zero_z3950::constant::{InitOptions, ProtocolVersion};
use zero_z3950::protocol::ber::Oid;
use zero_z3950::protocol::pdu::{
    Close, CloseReason, DeleteResultSetResponse, Diagnostic, External, InitResponse,
    NamePlusRecord, Pdu, PresentResponse, PresentStatus, RecordPayload, Records, SearchResponse,
    decode, encode,
};

pub const USMARC: &str = "1.2.840.10003.5.10";

/// Condition sent in place of a record at `MockServer::surrogate_at`
pub const RECORD_DIAGNOSTIC: i64 = 1028;

#[derive(Debug)]
pub struct MockServer {
    pub hits: usize,
    pub grant_named_result_sets: bool,
    /// Searches of this database fail with diagnostic 109
    pub unavailable_database: Option<String>,
    /// Records returned with the SearchResponse
    pub piggyback: usize,
    pub max_per_present: usize,
    pub surrogate_at: Option<usize>,
    pub close_on_present: bool,
    /// Never answer the InitRequest
    pub hang_up_on_init: bool,
    /// Never answer anything after init
    pub silent_after_init: bool,

    pub bytes_received: usize,
    pub requests: Vec<Pdu>,
}

impl MockServer {
    pub fn new(hits: usize) -> Self {
        Self {
            hits,
            grant_named_result_sets: true,
            unavailable_database: None,
            piggyback: 0,
            max_per_present: usize::MAX,
            surrogate_at: None,
            close_on_present: false,
            hang_up_on_init: false,
            silent_after_init: false,
            bytes_received: 0,
            requests: Vec::new(),
        }
    }

    /// Number of requests of the given PDU type received so far
    pub fn count(&self, name: &str) -> usize {
        self.requests.iter().filter(|pdu| pdu.name() == name).count()
    }

    /// The body of the record at 0-based `position`
    pub fn body(position: usize) -> Vec<u8> {
        format!("record {position}").into_bytes()
    }

    /// Answer one encoded request. `None` means no reply is sent.
    pub fn respond(&mut self, request: &[u8]) -> Option<Vec<u8>> {
        let pdu = decode(request).expect("client sent a malformed PDU");
        self.requests.push(pdu.clone());

        let reply = match pdu {
            Pdu::InitRequest(request) => {
                if self.hang_up_on_init {
                    return None;
                }
                let mut options = request.options;
                if !self.grant_named_result_sets {
                    options.remove(InitOptions::NAMED_RESULT_SETS);
                }
                Pdu::InitResponse(InitResponse {
                    reference_id: request.reference_id,
                    protocol_version: ProtocolVersion::V2 | ProtocolVersion::V3,
                    options,
                    preferred_message_size: request.preferred_message_size,
                    exceptional_record_size: request.exceptional_record_size,
                    result: true,
                    implementation_id: Some("mock".to_string()),
                    implementation_name: Some("Mock Z39.50 server".to_string()),
                    implementation_version: Some("1.0".to_string()),
                })
            }
            _ if self.silent_after_init => return None,
            Pdu::SearchRequest(request) => {
                let database = request.database_names.first().cloned().unwrap_or_default();
                if self.unavailable_database.as_deref() == Some(database.as_str()) {
                    Pdu::SearchResponse(SearchResponse {
                        reference_id: request.reference_id,
                        result_count: 0,
                        number_of_records_returned: 0,
                        next_result_set_position: 0,
                        search_status: false,
                        result_set_status: None,
                        present_status: None,
                        records: Some(Records::NonSurrogateDiagnostic(Diagnostic::bib1(
                            109,
                            Some(&database),
                        ))),
                    })
                } else {
                    let count = self.piggyback.min(self.hits);
                    let records = (count > 0).then(|| {
                        self.records(0, count, request.preferred_record_syntax.as_ref())
                    });
                    Pdu::SearchResponse(SearchResponse {
                        reference_id: request.reference_id,
                        result_count: self.hits as i64,
                        number_of_records_returned: count as i64,
                        next_result_set_position: count as i64 + 1,
                        search_status: true,
                        result_set_status: None,
                        present_status: records.as_ref().map(|_| PresentStatus::Success),
                        records,
                    })
                }
            }
            Pdu::PresentRequest(request) => {
                if self.close_on_present {
                    Pdu::Close(Close {
                        reference_id: None,
                        reason: CloseReason::SystemProblem,
                        message: Some("shutting down".to_string()),
                    })
                } else {
                    let start = request.start_point as usize - 1;
                    if start >= self.hits {
                        Pdu::PresentResponse(PresentResponse {
                            reference_id: request.reference_id,
                            number_of_records_returned: 0,
                            next_result_set_position: request.start_point,
                            present_status: PresentStatus::Failure,
                            records: Some(Records::NonSurrogateDiagnostic(Diagnostic::bib1(
                                13, None,
                            ))),
                        })
                    } else {
                        let requested = request.number_requested as usize;
                        let count = requested
                            .min(self.max_per_present)
                            .min(self.hits - start);
                        let records =
                            self.records(start, count, request.preferred_record_syntax.as_ref());
                        Pdu::PresentResponse(PresentResponse {
                            reference_id: request.reference_id,
                            number_of_records_returned: count as i64,
                            next_result_set_position: (start + count + 1) as i64,
                            present_status: if count < requested {
                                PresentStatus::Partial4
                            } else {
                                PresentStatus::Success
                            },
                            records: Some(records),
                        })
                    }
                }
            }
            Pdu::DeleteResultSetRequest(request) => {
                Pdu::DeleteResultSetResponse(DeleteResultSetResponse {
                    reference_id: request.reference_id,
                    status: 0,
                    number_not_deleted: None,
                    message: None,
                })
            }
            Pdu::Close(_) => return None,
            other => panic!("mock server cannot answer {}", other.name()),
        };
        Some(encode(&reply))
    }

    fn records(&self, start: usize, count: usize, syntax: Option<&Oid>) -> Records {
        let syntax = syntax
            .cloned()
            .unwrap_or_else(|| USMARC.parse().expect("valid OID"));
        Records::ResponseRecords(
            (start..start + count)
                .map(|position| NamePlusRecord {
                    database: Some("Default".to_string()),
                    record: if self.surrogate_at == Some(position) {
                        RecordPayload::SurrogateDiagnostic(Diagnostic::bib1(
                            RECORD_DIAGNOSTIC,
                            None,
                        ))
                    } else {
                        RecordPayload::Retrieval(External::octets(
                            syntax.clone(),
                            Self::body(position),
                        ))
                    },
                })
                .collect(),
        )
    }
}
