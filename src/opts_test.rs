use std::time::Duration;

use crate::Opts;
use crate::error::Error;

#[test]
fn default_opts() {
    let opts = Opts::default();
    assert!(opts.host.is_none());
    assert_eq!(opts.port, 210);
    assert_eq!(opts.database, "Default");
    assert!(opts.socket.is_none());
    assert!(opts.user.is_none());
    assert!(opts.password.is_none());
    assert!(opts.syntax.is_none());
    assert_eq!(opts.timeout, Some(Duration::from_secs(30)));
    assert!(opts.tcp_nodelay);
    assert_eq!(opts.present_chunk, 1);
    assert!(opts.named_result_sets);
    assert_eq!(opts.preferred_message_size, 1024 * 1024);
}

#[test]
fn parse_host_port_database() {
    let opts = Opts::try_from("z3950.loc.gov:7090/voyager").unwrap();
    assert_eq!(opts.host.as_deref(), Some("z3950.loc.gov"));
    assert_eq!(opts.port, 7090);
    assert_eq!(opts.database, "voyager");
}

#[test]
fn parse_percent_encoded_database() {
    let opts = Opts::try_from("localhost/My%20Books").unwrap();
    assert_eq!(opts.database, "My Books");
    let opts = Opts::try_from("localhost/caf%C3%A9").unwrap();
    assert_eq!(opts.database, "caf\u{e9}");
    assert!(matches!(
        Opts::try_from("localhost/%FF"),
        Err(Error::BadConfigError(_))
    ));
}

#[test]
fn parse_ipv6_host() {
    let opts = Opts::try_from("[::1]:2100/db").unwrap();
    assert_eq!(opts.host.as_deref(), Some("::1"));
    assert_eq!(opts.port, 2100);
    assert_eq!(opts.database, "db");

    let opts = Opts::try_from("z3950://127.0.0.1").unwrap();
    assert_eq!(opts.host.as_deref(), Some("127.0.0.1"));
}

#[test]
fn parse_bare_host() {
    let opts = Opts::try_from("lx2.loc.gov").unwrap();
    assert_eq!(opts.host.as_deref(), Some("lx2.loc.gov"));
    assert_eq!(opts.port, 210);
    assert_eq!(opts.database, "Default");
}

#[test]
fn parse_prefixes() {
    let opts = Opts::try_from("tcp:localhost:9999/Books").unwrap();
    assert_eq!(opts.host.as_deref(), Some("localhost"));
    assert_eq!(opts.port, 9999);
    assert_eq!(opts.database, "Books");

    let opts = Opts::try_from("z3950://localhost/Books").unwrap();
    assert_eq!(opts.port, 210);
    assert_eq!(opts.database, "Books");
}

#[test]
fn parse_empty_database() {
    let opts = Opts::try_from("localhost:210/").unwrap();
    assert_eq!(opts.database, "Default");
}

#[test]
fn parse_credentials() {
    let opts = Opts::try_from("alice:secret@localhost/db").unwrap();
    assert_eq!(opts.user.as_deref(), Some("alice"));
    assert_eq!(opts.password.as_deref(), Some("secret"));

    let opts = Opts::try_from("token@localhost").unwrap();
    assert_eq!(opts.user.as_deref(), Some("token"));
    assert!(opts.password.is_none());
}

#[test]
fn parse_unix_socket() {
    let opts = Opts::try_from("unix:/var/run/z3950.sock").unwrap();
    assert_eq!(opts.socket.as_deref(), Some("/var/run/z3950.sock"));
    assert!(opts.host.is_none());

    assert!(matches!(
        Opts::try_from("unix:"),
        Err(Error::BadConfigError(_))
    ));
}

#[test]
fn parse_parameters() {
    let opts =
        Opts::try_from("localhost/db?syntax=sutrs&element_set=B&timeout=5&present_chunk=10")
            .unwrap();
    assert_eq!(opts.syntax.as_deref(), Some("sutrs"));
    assert_eq!(opts.element_set_name.as_deref(), Some("B"));
    assert_eq!(opts.timeout, Some(Duration::from_secs(5)));
    assert_eq!(opts.present_chunk, 10);

    let opts = Opts::try_from("localhost?timeout=0").unwrap();
    assert!(opts.timeout.is_none());
}

#[test]
fn parse_rejects_bad_parameters() {
    assert!(matches!(
        Opts::try_from("localhost?syntax=nonsense"),
        Err(Error::UnknownSyntax(name)) if name == "nonsense"
    ));
    assert!(matches!(
        Opts::try_from("localhost?present_chunk=0"),
        Err(Error::BadConfigError(_))
    ));
    assert!(matches!(
        Opts::try_from("localhost?timeout=soon"),
        Err(Error::BadConfigError(_))
    ));
    assert!(matches!(
        Opts::try_from("localhost?colour=blue"),
        Err(Error::BadConfigError(_))
    ));
}

#[test]
fn parse_rejects_missing_host() {
    assert!(Opts::try_from("").is_err());
    assert!(Opts::try_from(":210/db").is_err());
}

#[test]
fn syntax_oid_accepts_names_and_oids() {
    let mut opts = Opts::default();
    opts.syntax = Some("USMARC".to_string());
    assert_eq!(
        opts.syntax_oid().unwrap().unwrap().to_string(),
        "1.2.840.10003.5.10"
    );
    opts.syntax = Some("1.2.840.10003.5.109.10".to_string());
    assert_eq!(
        opts.syntax_oid().unwrap().unwrap().to_string(),
        "1.2.840.10003.5.109.10"
    );
}
