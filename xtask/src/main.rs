use anyhow::{bail, ensure, Result};
use bytes::Bytes;
use clap::{Parser, Subcommand};
use futures::StreamExt;
use tokio::runtime::Runtime;
use tokio::sync::mpsc;
use tracing::info;
use tracing_subscriber::EnvFilter;
use triage_core::{
    telemetry, ClientResult, ReplyAccumulator, SessionUpdate, StreamEvent, StreamEventParser,
    StreamSession,
};

#[derive(Parser, Debug)]
#[command(name = "xtask", version, about = "Automation helpers for the triage client")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Replay a recorded chat stream through the parser at many split points.
    Smoke {
        /// Largest chunk size to try when slicing the transcript.
        #[arg(long, default_value_t = 64)]
        max_chunk: usize,
    },
}

/// A reply as the backend sends it, including a CRLF line and multibyte text.
const TRANSCRIPT: &str = concat!(
    "data: {\"type\":\"session_info\",\"data\":{\"session_id\":\"smoke\",\"title\":\"Smoke\"}}\n\n",
    "data: {\"type\":\"user_message\",\"data\":{\"id\":1,\"content\":\"胸痛两小时\"}}\n\n",
    "data: {\"type\":\"thinking\",\"content\":\"Reviewing vitals… \"}\r\n\r\n",
    "data: {\"type\":\"thinking\",\"content\":\"ruling out ACS\"}\n\n",
    "data: {\"type\":\"answer_start\",\"message_id\":\"m-7\"}\n\n",
    "data: {\"type\":\"answer\",\"content\":\"Triage level 2 🚑 \"}\n\n",
    "data: {\"type\":\"answer\",\"content\":\"(emergent).\"}\n\n",
    "data: {\"type\":\"usage\",\"data\":{\"prompt_tokens\":80,\"completion_tokens\":40}}\n\n",
    "data: {\"type\":\"done\"}\n\n",
);

const EXPECTED_ANSWER: &str = "Triage level 2 🚑 (emergent).";

fn main() -> Result<()> {
    telemetry::init_tracing(EnvFilter::new("info"))?;
    let cli = Cli::parse();

    match cli.command {
        Commands::Smoke { max_chunk } => smoke_test(max_chunk),
    }
}

fn smoke_test(max_chunk: usize) -> Result<()> {
    ensure!(max_chunk > 0, "--max-chunk must be positive");
    let reference = parse_in_chunks(TRANSCRIPT.as_bytes(), TRANSCRIPT.len())?;
    ensure!(reference.len() == 9, "expected 9 events, got {}", reference.len());

    let mut runs = 0usize;
    for size in 1..=max_chunk {
        let events = parse_in_chunks(TRANSCRIPT.as_bytes(), size)?;
        if events != reference {
            bail!("chunk size {size} produced a different event sequence");
        }
        runs += 1;
    }
    for split in 1..TRANSCRIPT.len() {
        let (head, tail) = TRANSCRIPT.as_bytes().split_at(split);
        let mut parser = StreamEventParser::new();
        let mut events = collect(parser.feed_bytes(head))?;
        events.extend(collect(parser.feed_bytes(tail))?);
        events.extend(parser.flush());
        if events != reference {
            bail!("split at byte {split} produced a different event sequence");
        }
        runs += 1;
    }
    info!(runs, events = reference.len(), "parser replay matched");

    let runtime = Runtime::new()?;
    let reply = runtime.block_on(replay_session(7))?;
    ensure!(reply.answer == EXPECTED_ANSWER, "unexpected answer `{}`", reply.answer);
    ensure!(reply.finished, "session never finished");
    info!(answer = %reply.answer, "session replay matched");

    Ok(())
}

fn parse_in_chunks(bytes: &[u8], size: usize) -> Result<Vec<StreamEvent>> {
    let mut parser = StreamEventParser::new();
    let mut events = Vec::new();
    for chunk in bytes.chunks(size) {
        events.extend(collect(parser.feed_bytes(chunk))?);
    }
    events.extend(parser.flush());
    Ok(events)
}

fn collect(results: Vec<ClientResult<StreamEvent>>) -> Result<Vec<StreamEvent>> {
    Ok(results.into_iter().collect::<Result<_, _>>()?)
}

async fn replay_session(chunk_size: usize) -> Result<ReplyAccumulator> {
    let chunks: Vec<ClientResult<Bytes>> = TRANSCRIPT
        .as_bytes()
        .chunks(chunk_size)
        .map(|chunk| Ok(Bytes::copy_from_slice(chunk)))
        .collect();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let handle = StreamSession::start(futures::stream::iter(chunks).boxed(), tx);

    let mut reply = ReplyAccumulator::new();
    while let Some(update) = rx.recv().await {
        match update {
            SessionUpdate::Event(event) => reply.apply(&event),
            SessionUpdate::Failed(err) => bail!("session failed: {err}"),
            SessionUpdate::Completed => {}
        }
    }
    handle.closed().await;
    Ok(reply)
}
