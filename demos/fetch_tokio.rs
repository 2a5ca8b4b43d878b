//! Async version of `fetch`, with the query type as an argument
//!
//! ```text
//! cargo run --example fetch_tokio -- 'z3950.loc.gov:7090/voyager' cql 'dinosaur'
//! ```

use color_eyre::eyre::{Result, eyre};
use zero_z3950::QueryType;
use zero_z3950::tokio::Conn;

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    tracing_subscriber::fmt::init();

    let mut args = std::env::args().skip(1);
    let usage = || eyre!("usage: fetch_tokio <target> <pqf|cql|ccl> <query>");
    let target = args.next().ok_or_else(usage)?;
    let query_type: QueryType = args.next().ok_or_else(usage)?.parse()?;
    let query = args.next().ok_or_else(usage)?;

    let mut conn = Conn::new(target.as_str())?;
    conn.connect().await?;

    let mut rs = conn.search(&query, query_type).await?;
    println!("{} hits", rs.size());
    if rs.is_empty() {
        return Ok(());
    }

    let fetched = conn.fetch(&mut rs, 0, 5).await?;
    println!("fetched {} of {}", fetched.delivered, fetched.requested);
    for (position, record) in rs.cached_records() {
        println!(
            "{position}: {} {}",
            record.syntax(),
            record.as_text().unwrap_or("<binary>")
        );
    }

    conn.close().await?;
    Ok(())
}
