#![forbid(unsafe_code)]

//! `status-relay-ctl`: command-line client for `status-relay`.
//!
//! Tails a status stream and prints each payload as it arrives, or probes
//! the server's health endpoint.

use clap::{Parser, Subcommand};

use status_relay::stream::codec::{Frame, FrameReader};

#[derive(Debug, Parser)]
#[command(
    name = "status-relay-ctl",
    about = "Command-line client for status-relay",
    version,
    long_about = None
)]
struct Cli {
    /// Base URL of the server.
    #[arg(long, default_value = "http://127.0.0.1:3000")]
    url: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Stream status frames for an id until the server closes the stream.
    Watch {
        /// Stream identifier.
        id: String,

        /// Print payloads as received instead of pretty JSON.
        #[arg(long)]
        raw: bool,
    },

    /// Check that the server is up.
    Health,
}

/// Why a watch ended without a close frame.
enum WatchError {
    Request(reqwest::Error),
    Truncated,
}

fn main() {
    let args = Cli::parse();
    let base = args.url.trim_end_matches('/').to_owned();

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(err) => {
            eprintln!("Failed to start runtime: {err}");
            std::process::exit(1);
        }
    };

    let code = runtime.block_on(async {
        match args.command {
            Command::Watch { id, raw } => match watch(&base, &id, raw).await {
                Ok(()) => 0,
                Err(WatchError::Request(err)) => {
                    eprintln!("Failed to read stream: {err}");
                    eprintln!("Is status-relay running at {base}?");
                    1
                }
                Err(WatchError::Truncated) => {
                    eprintln!("Stream ended without a close frame");
                    2
                }
            },
            Command::Health => match health(&base).await {
                Ok(body) => {
                    println!("{body}");
                    0
                }
                Err(err) => {
                    eprintln!("Health check failed: {err}");
                    1
                }
            },
        }
    });

    std::process::exit(code);
}

async fn watch(base: &str, id: &str, raw: bool) -> Result<(), WatchError> {
    let mut response = reqwest::get(format!("{base}/sse/{id}"))
        .await
        .and_then(reqwest::Response::error_for_status)
        .map_err(WatchError::Request)?;

    let mut reader = FrameReader::new();
    while let Some(chunk) = response.chunk().await.map_err(WatchError::Request)? {
        reader.push(&chunk);
        while let Some(frame) = reader.next_frame() {
            match frame {
                Frame::Close => {
                    println!("close");
                    return Ok(());
                }
                Frame::Status(payload) => print_payload(&payload, raw),
            }
        }
    }

    Err(WatchError::Truncated)
}

fn print_payload(payload: &str, raw: bool) {
    if raw {
        println!("{payload}");
        return;
    }
    match serde_json::from_str::<serde_json::Value>(payload) {
        Ok(value) => println!("{}", serde_json::to_string_pretty(&value).unwrap_or_default()),
        Err(_) => println!("{payload}"),
    }
}

async fn health(base: &str) -> Result<String, reqwest::Error> {
    reqwest::get(format!("{base}/health"))
        .await?
        .error_for_status()?
        .text()
        .await
}
