use crate::constant::{IMPLEMENTATION_ID, InitOptions, OPTIONS_ALWAYS_REQUESTED, ProtocolVersion};
use crate::error::{Error, Result};
use crate::opts::Opts;
use crate::protocol::pdu::{Authentication, InitRequest, InitResponse, Pdu, decode, encode};

/// Parameters sent in the InitializeRequest
#[derive(Debug, Clone)]
pub struct InitConfig {
    pub protocol_version: ProtocolVersion,
    pub options: InitOptions,
    pub preferred_message_size: i64,
    pub exceptional_record_size: i64,
    pub authentication: Option<Authentication>,
    pub implementation_name: String,
}

impl From<&Opts> for InitConfig {
    fn from(opts: &Opts) -> Self {
        let mut options = OPTIONS_ALWAYS_REQUESTED;
        if opts.named_result_sets {
            options |= InitOptions::NAMED_RESULT_SETS;
        }

        let authentication = match (&opts.user, &opts.password) {
            (Some(user), None) if opts.group.is_none() => Some(Authentication::Open(user.clone())),
            (None, None) if opts.group.is_none() => None,
            (user, password) => Some(Authentication::IdPass {
                group: opts.group.clone(),
                user: user.clone(),
                password: password.clone(),
            }),
        };

        Self {
            protocol_version: ProtocolVersion::V2 | ProtocolVersion::V3,
            options,
            preferred_message_size: opts.preferred_message_size,
            exceptional_record_size: opts.exceptional_record_size,
            authentication,
            implementation_name: opts.implementation_name.clone(),
        }
    }
}

/// What the server agreed to during init
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Negotiated {
    /// Highest protocol version both sides support (2 or 3)
    pub protocol_version: u8,
    /// Requested options the server granted
    pub options: InitOptions,
    pub preferred_message_size: i64,
    pub exceptional_record_size: i64,
    pub implementation_id: Option<String>,
    pub implementation_name: Option<String>,
    pub implementation_version: Option<String>,
}

impl Negotiated {
    pub fn named_result_sets(&self) -> bool {
        self.options.contains(InitOptions::NAMED_RESULT_SETS)
    }
}

/// Result of driving the init state machine
#[derive(Debug)]
pub enum InitResult {
    /// Write this PDU to the server, then read the response
    Write(Vec<u8>),
    /// Init complete, session established
    Connected(Negotiated),
}

/// State machine for the Z39.50 Init exchange
///
/// Pure PDU generation and interpretation without I/O dependencies.
#[derive(Debug)]
pub enum Init {
    /// Nothing sent yet
    Start { config: InitConfig },
    /// InitializeRequest sent, waiting for the response
    WaitingResponse {
        protocol_version: ProtocolVersion,
        options: InitOptions,
    },
    /// Connected (terminal state)
    Connected,
}

impl Init {
    pub fn new(config: InitConfig) -> Self {
        Self::Start { config }
    }

    /// Drive the state machine. The first call ignores `payload`; later calls
    /// take the PDU just read from the server.
    pub fn drive(&mut self, payload: &[u8]) -> Result<InitResult> {
        match std::mem::replace(self, Self::Connected) {
            Self::Start { config } => {
                let request = InitRequest {
                    reference_id: None,
                    protocol_version: config.protocol_version,
                    options: config.options,
                    preferred_message_size: config.preferred_message_size,
                    exceptional_record_size: config.exceptional_record_size,
                    authentication: config.authentication,
                    implementation_id: Some(IMPLEMENTATION_ID.to_string()),
                    implementation_name: Some(config.implementation_name),
                    implementation_version: Some(env!("CARGO_PKG_VERSION").to_string()),
                };
                *self = Self::WaitingResponse {
                    protocol_version: request.protocol_version,
                    options: request.options,
                };
                Ok(InitResult::Write(encode(&Pdu::InitRequest(request))))
            }
            Self::WaitingResponse {
                protocol_version,
                options,
            } => match decode(payload)? {
                Pdu::InitResponse(response) => {
                    negotiate(protocol_version, options, response).map(InitResult::Connected)
                }
                Pdu::Close(close) => Err(Error::ConnectionRejected {
                    message: close.message,
                }),
                other => Err(Error::UnexpectedPdu {
                    expected: "InitResponse",
                    actual: other.name(),
                }),
            },
            Self::Connected => Err(Error::malformed("init already completed")),
        }
    }
}

fn negotiate(
    requested_version: ProtocolVersion,
    requested_options: InitOptions,
    response: InitResponse,
) -> Result<Negotiated> {
    if !response.result {
        return Err(Error::ConnectionRejected {
            message: response.implementation_name.map(|name| format!("refused by {name}")),
        });
    }

    let Some(protocol_version) = (requested_version & response.protocol_version).highest() else {
        return Err(Error::ConnectionRejected {
            message: Some("no common protocol version".to_string()),
        });
    };

    Ok(Negotiated {
        protocol_version,
        options: requested_options & response.options,
        preferred_message_size: response.preferred_message_size,
        exceptional_record_size: response.exceptional_record_size,
        implementation_id: response.implementation_id,
        implementation_name: response.implementation_name,
        implementation_version: response.implementation_version,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::pdu::{Close, CloseReason};

    fn response(result: bool, version: ProtocolVersion, options: InitOptions) -> Vec<u8> {
        encode(&Pdu::InitResponse(InitResponse {
            reference_id: None,
            protocol_version: version,
            options,
            preferred_message_size: 4096,
            exceptional_record_size: 8192,
            result,
            implementation_id: Some("81".to_string()),
            implementation_name: Some("Test server".to_string()),
            implementation_version: None,
        }))
    }

    fn started(opts: &Opts) -> Init {
        let mut init = Init::new(InitConfig::from(opts));
        let InitResult::Write(bytes) = init.drive(&[]).unwrap() else {
            panic!("expected a request");
        };
        let Pdu::InitRequest(request) = decode(&bytes).unwrap() else {
            panic!("expected InitRequest");
        };
        assert!(request.options.contains(InitOptions::SEARCH | InitOptions::PRESENT));
        init
    }

    #[test]
    fn negotiates_highest_common_version() {
        let mut init = started(&Opts::default());
        let reply = response(
            true,
            ProtocolVersion::V1 | ProtocolVersion::V2,
            InitOptions::SEARCH | InitOptions::PRESENT | InitOptions::SCAN,
        );
        let InitResult::Connected(negotiated) = init.drive(&reply).unwrap() else {
            panic!("expected Connected");
        };
        assert_eq!(negotiated.protocol_version, 2);
        // Unrequested options are not granted
        assert_eq!(negotiated.options, InitOptions::SEARCH | InitOptions::PRESENT);
        assert!(!negotiated.named_result_sets());
        assert_eq!(negotiated.preferred_message_size, 4096);
    }

    #[test]
    fn refused_init() {
        let mut init = started(&Opts::default());
        let reply = response(false, ProtocolVersion::V3, InitOptions::empty());
        assert!(matches!(
            init.drive(&reply),
            Err(Error::ConnectionRejected { .. })
        ));
    }

    #[test]
    fn close_instead_of_response() {
        let mut init = started(&Opts::default());
        let reply = encode(&Pdu::Close(Close {
            reference_id: None,
            reason: CloseReason::SecurityViolation,
            message: Some("bad password".to_string()),
        }));
        assert!(matches!(
            init.drive(&reply),
            Err(Error::ConnectionRejected { message: Some(m) }) if m == "bad password"
        ));
    }

    #[test]
    fn authentication_forms() {
        let mut opts = Opts::default();
        assert_eq!(InitConfig::from(&opts).authentication, None);

        opts.user = Some("token".to_string());
        assert_eq!(
            InitConfig::from(&opts).authentication,
            Some(Authentication::Open("token".to_string()))
        );

        opts.password = Some("pw".to_string());
        assert_eq!(
            InitConfig::from(&opts).authentication,
            Some(Authentication::IdPass {
                group: None,
                user: Some("token".to_string()),
                password: Some("pw".to_string()),
            })
        );
    }
}
