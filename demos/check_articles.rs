//! Check (or fetch) a list of message ids with a small connection pool.
//!
//! Usage:
//!
//! ```text
//! cargo run --example check_articles -- <host> <group[,group...]> <message-id>...
//! ```
//!
//! Environment:
//! - `NNTP_PORT`: server port (default 119, or 563 with TLS)
//! - `NNTP_TLS=1`: connect over TLS
//! - `NNTP_USER` / `NNTP_PASS`: credentials
//! - `NNTP_FETCH=1`: fetch bodies instead of checking existence
//! - `NNTP_CONNECTIONS`: pool size (default 4)
//! - `RUST_LOG`: log filter, e.g. `nntp_pool=debug`

use std::collections::HashSet;

use nntp_pool::{ConnectionPool, Operation, Request, ServerTarget, DEFAULT_PORT, DEFAULT_TLS_PORT};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "nntp_pool=info".into()),
        )
        .init();

    let mut args = std::env::args().skip(1);
    let (Some(host), Some(groups)) = (args.next(), args.next()) else {
        eprintln!("usage: check_articles <host> <group[,group...]> <message-id>...");
        std::process::exit(2);
    };
    let groups: Vec<String> = groups.split(',').map(str::to_string).collect();
    let ids: Vec<String> = args.collect();

    let tls = flag("NNTP_TLS");
    let default_port = if tls { DEFAULT_TLS_PORT } else { DEFAULT_PORT };
    let port = match std::env::var("NNTP_PORT") {
        Ok(port) => port.parse()?,
        Err(_) => default_port,
    };
    let mut target = ServerTarget::new(host, port).with_tls(tls);
    if let (Ok(user), Ok(pass)) = (std::env::var("NNTP_USER"), std::env::var("NNTP_PASS")) {
        target = target.with_credentials(user, pass);
    }
    let operation = if flag("NNTP_FETCH") {
        Operation::FetchContent
    } else {
        Operation::CheckExistence
    };
    let size = match std::env::var("NNTP_CONNECTIONS") {
        Ok(size) => size.parse()?,
        Err(_) => 4,
    };

    let (requests, inbound) = flume::bounded(size * 2);
    let mut pool = ConnectionPool::new(target, inbound, size);
    pool.start();
    let mut responses = pool.collect();

    let submit = {
        let ids = ids.clone();
        tokio::spawn(async move {
            for id in ids {
                if requests
                    .send_async(Request::new(id, groups.clone(), operation))
                    .await
                    .is_err()
                {
                    break;
                }
            }
        })
    };

    // Responses arrive in completion order.
    let mut pending: HashSet<String> = ids.into_iter().collect();
    while !pending.is_empty() {
        let Some(response) = responses.recv().await else {
            break;
        };
        pending.remove(&response.article.id);
        match (&response.error, &response.article.content) {
            (Some(err), _) => println!("{} error: {err}", response.article),
            (None, Some(content)) => println!("{} {} bytes", response.article, content.len()),
            (None, None) => println!("{} exists: {}", response.article, response.article.exists),
        }
    }

    submit.await?;
    pool.stop();

    let stats = pool.stats();
    println!(
        "{} requests, {} failed, peak concurrency {}",
        stats.completed(),
        stats.failed(),
        stats.peak_busy()
    );
    Ok(())
}

fn flag(name: &str) -> bool {
    matches!(std::env::var(name).as_deref(), Ok("1") | Ok("true"))
}
