use std::time::Duration;

use percent_encoding::percent_decode_str;
use smart_default::SmartDefault;

use crate::constant::{
    DEFAULT_DATABASE, DEFAULT_EXCEPTIONAL_RECORD_SIZE, DEFAULT_MAX_PDU_SIZE, DEFAULT_PORT,
    DEFAULT_PREFERRED_MESSAGE_SIZE, IMPLEMENTATION_NAME, SYNTAXES, resolve,
};
use crate::error::Error;
use crate::protocol::ber::Oid;

/// A configuration for a Z39.50 session
///
/// ```rs
/// let mut opts1 = Opts::default();
/// opts1.host = Some("z3950.loc.gov".to_string());
/// opts1.port = 7090;
///
/// let mut opts2 = Opts::try_from("z3950.loc.gov:7090/voyager")?;
/// opts2.syntax = Some("usmarc".to_string());
/// ```
#[derive(Debug, Clone, SmartDefault)]
pub struct Opts {
    /// Hostname or IP address
    pub host: Option<String>,

    #[default(DEFAULT_PORT)]
    pub port: u16,

    /// Database searched by every request
    #[default(DEFAULT_DATABASE.to_string())]
    pub database: String,

    /// Unix socket path. Takes precedence over `host`.
    pub socket: Option<String>,

    /// With a password this is sent as idPass; alone it is an open
    /// authentication string.
    pub user: Option<String>,

    pub password: Option<String>,

    pub group: Option<String>,

    /// Preferred record syntax: a registry name (`usmarc`) or a dotted OID
    pub syntax: Option<String>,

    /// Element set name for presents (`F`, `B`, ...)
    pub element_set_name: Option<String>,

    /// Deadline for connecting and for each request/response exchange
    #[default(Some(Duration::from_secs(30)))]
    pub timeout: Option<Duration>,

    /// Enable TCP_NODELAY socket option to disable Nagle's algorithm
    /// Unix socket is not affected
    #[default(true)]
    pub tcp_nodelay: bool,

    #[default(DEFAULT_PREFERRED_MESSAGE_SIZE)]
    pub preferred_message_size: i64,

    #[default(DEFAULT_EXCEPTIONAL_RECORD_SIZE)]
    pub exceptional_record_size: i64,

    #[default(IMPLEMENTATION_NAME.to_string())]
    pub implementation_name: String,

    /// How many adjacent uncached records a single fetch asks for
    #[default(1)]
    pub present_chunk: usize,

    /// Request the namedResultSets option during init
    #[default(true)]
    pub named_result_sets: bool,

    /// Largest PDU accepted from the server
    #[default(DEFAULT_MAX_PDU_SIZE)]
    pub max_pdu_size: usize,
}

impl Opts {
    /// OID of the preferred record syntax, if one is set
    pub fn syntax_oid(&self) -> Result<Option<Oid>, Error> {
        match &self.syntax {
            None => Ok(None),
            Some(name) => resolve(SYNTAXES, name)
                .map(Some)
                .ok_or_else(|| Error::UnknownSyntax(name.clone())),
        }
    }

    pub(crate) fn validate(&self) -> Result<(), Error> {
        self.syntax_oid()?;
        if self.present_chunk == 0 {
            return Err(Error::BadConfigError(
                "present_chunk must be at least 1".to_string(),
            ));
        }
        if self.database.is_empty() {
            return Err(Error::BadConfigError("database name is empty".to_string()));
        }
        Ok(())
    }
}

/// Parse a target descriptor:
///
/// ```text
/// [tcp:|z3950://][user[:password]@]host[:port][/database][?syntax=..&element_set=..&timeout=..&present_chunk=..]
/// unix:/path/to/socket
/// ```
impl TryFrom<&str> for Opts {
    type Error = Error;

    fn try_from(target: &str) -> Result<Self, Self::Error> {
        let target = target.trim();

        if let Some(path) = target.strip_prefix("unix:") {
            if path.is_empty() {
                return Err(Error::BadConfigError(
                    "Missing socket path in target".to_string(),
                ));
            }
            return Ok(Self {
                socket: Some(path.to_string()),
                ..Default::default()
            });
        }

        let rest = target
            .strip_prefix("z3950://")
            .or_else(|| target.strip_prefix("tcp:"))
            .unwrap_or(target);

        let parsed = url::Url::parse(&format!("z3950://{rest}"))
            .map_err(|e| Error::BadConfigError(format!("Failed to parse target '{target}': {e}")))?;

        let host = match parsed.host() {
            Some(url::Host::Domain(domain)) if !domain.is_empty() => domain.to_string(),
            Some(url::Host::Ipv4(addr)) => addr.to_string(),
            // without the brackets, as a socket address wants it
            Some(url::Host::Ipv6(addr)) => addr.to_string(),
            _ => {
                return Err(Error::BadConfigError(format!(
                    "Missing host in target '{target}'"
                )));
            }
        };

        let mut opts = Self {
            host: Some(host),
            port: parsed.port().unwrap_or(DEFAULT_PORT),
            user: Some(parsed.username())
                .filter(|user| !user.is_empty())
                .map(ToString::to_string),
            password: parsed.password().map(ToString::to_string),
            ..Default::default()
        };

        if let Some(database) = parsed
            .path()
            .strip_prefix('/')
            .filter(|database| !database.is_empty())
        {
            opts.database = percent_decode_str(database)
                .decode_utf8()
                .map_err(|e| {
                    Error::BadConfigError(format!("Invalid database name '{database}': {e}"))
                })?
                .into_owned();
        }

        for (key, value) in parsed.query_pairs() {
            match key.as_ref() {
                "syntax" => opts.syntax = Some(value.into_owned()),
                "element_set" | "elementSetName" => {
                    opts.element_set_name = Some(value.into_owned());
                }
                "timeout" => {
                    let seconds = value.parse::<u64>().map_err(|e| {
                        Error::BadConfigError(format!("Invalid timeout '{value}': {e}"))
                    })?;
                    opts.timeout = (seconds > 0).then_some(Duration::from_secs(seconds));
                }
                "present_chunk" => {
                    opts.present_chunk = value.parse::<usize>().map_err(|e| {
                        Error::BadConfigError(format!("Invalid present_chunk '{value}': {e}"))
                    })?;
                }
                other => {
                    return Err(Error::BadConfigError(format!(
                        "Unknown target parameter '{other}'"
                    )));
                }
            }
        }

        opts.validate()?;
        Ok(opts)
    }
}

impl TryFrom<String> for Opts {
    type Error = Error;

    fn try_from(target: String) -> Result<Self, Self::Error> {
        Self::try_from(target.as_str())
    }
}

impl TryFrom<&String> for Opts {
    type Error = Error;

    fn try_from(target: &String) -> Result<Self, Self::Error> {
        Self::try_from(target.as_str())
    }
}
