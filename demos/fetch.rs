//! Search a Z39.50 target and print the first few records
//!
//! ```text
//! cargo run --example fetch -- 'z3950.loc.gov:7090/voyager?syntax=usmarc' '@attr 1=4 dinosaur' 3
//! ```

use color_eyre::eyre::{Result, eyre};
use zero_z3950::QueryType;
use zero_z3950::sync::Conn;

fn main() -> Result<()> {
    color_eyre::install()?;
    tracing_subscriber::fmt::init();

    let mut args = std::env::args().skip(1);
    let target = args
        .next()
        .ok_or_else(|| eyre!("usage: fetch <target> <pqf query> [count]"))?;
    let query = args.next().ok_or_else(|| eyre!("missing query"))?;
    let count: usize = args.next().as_deref().unwrap_or("3").parse()?;

    let mut conn = Conn::new(target.as_str())?;
    conn.connect()?;
    if let Some(negotiated) = conn.negotiated() {
        println!(
            "connected: Z39.50 v{} to {}",
            negotiated.protocol_version,
            negotiated.implementation_name.as_deref().unwrap_or("unknown server")
        );
    }

    let mut rs = conn.search(&query, QueryType::Prefix)?;
    println!("{} hits in result set {:?}", rs.size(), rs.name());

    for position in 0..count.min(rs.size()) {
        let record = conn.record(&mut rs, position)?;
        println!("--- {} ({}, {} bytes)", position, record.syntax(), record.raw_bytes().len());
        match record.as_text() {
            Some(text) => println!("{text}"),
            None => println!("{:?}", record.raw_bytes()),
        }
    }

    conn.release(rs)?;
    conn.close()?;
    Ok(())
}
