//! incrserved - daemon wiring for the incremental streaming server
//!
//! Binds, accepts a single connection, opens the files to serve in
//! file-id order and hands everything to the server core.

use anyhow::{Context, Result};
use clap::Parser;
use incrserve::file::SourceFile;
use incrserve::log::{SessionLog, SessionLogEntry, SessionOutcome};
use incrserve::logger::{NoopLogger, ServeLogger, TextLogger};
use incrserve::protocol::FileId;
use incrserve::server::IncrementalServer;
use std::fs::File;
use std::io::{self, Write};
use std::net::TcpListener;
use std::path::PathBuf;
use std::time::Instant;

#[derive(Parser, Debug)]
#[command(
    name = "incrserved",
    about = "Streams file blocks to a device on demand, with background prefetch"
)]
struct Args {
    /// Bind address (host:port)
    #[arg(long, default_value = "127.0.0.1:9031")]
    bind: String,

    /// Where interleaved client log text is written (default: stdout)
    #[arg(long)]
    output: Option<PathBuf>,

    /// Append timestamped serve events to this file
    #[arg(long)]
    log_file: Option<PathBuf>,

    /// Append one JSON session record per served connection
    #[arg(long)]
    session_log: Option<PathBuf>,

    /// Files to serve, in file-id order
    #[arg(required = true)]
    files: Vec<PathBuf>,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let listener =
        TcpListener::bind(&args.bind).with_context(|| format!("bind {}", args.bind))?;
    eprintln!(
        "incrserved listening on {} files={}",
        args.bind,
        args.files.len()
    );

    let (stream, peer) = listener.accept().context("accept")?;
    eprintln!("conn from {}", peer);

    let mut files = Vec::with_capacity(args.files.len());
    for (id, path) in args.files.iter().enumerate() {
        files.push(SourceFile::open(id as FileId, path)?);
    }

    let sink: Box<dyn Write> = match &args.output {
        Some(path) => Box::new(
            File::create(path).with_context(|| format!("create {}", path.display()))?,
        ),
        None => Box::new(io::stdout()),
    };
    let logger: Box<dyn ServeLogger> = match &args.log_file {
        Some(path) => Box::new(TextLogger::new(path)?),
        None => Box::new(NoopLogger),
    };

    let file_count = files.len();
    let mut server = IncrementalServer::new(stream, sink, files).with_logger(logger);

    eprintln!("serving...");
    let started = Instant::now();
    let result = server.serve();
    let seconds = started.elapsed().as_secs_f64();

    if let Some(path) = &args.session_log {
        let outcome = if result.is_ok() {
            SessionOutcome::Completed
        } else {
            SessionOutcome::Failed
        };
        let entry = SessionLogEntry::new(outcome, file_count, seconds, server.stats());
        if let Err(e) = SessionLog::new(path).add_entry(&entry) {
            eprintln!("failed to record session: {}", e);
        }
    }

    result
}
