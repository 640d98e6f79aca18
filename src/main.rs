//! Loopback demonstration of `wirestream`.
//!
//! Connects two sessions over an in-memory duplex pipe, sends one request
//! carrying the requested content streams, and reports what each side saw.

mod cli;

use std::{io::Cursor, sync::Arc, time::Instant};

use bytes::Bytes;
use clap::Parser;
use tracing::info;
use wirestream::{
    ContentStream,
    ReceivedRequest,
    SerializationFormat,
    SessionConfig,
    StreamingRequest,
    StreamingResponse,
    StreamingSession,
};

fn pattern(len: usize, seed: usize) -> Bytes {
    (0..=250u8).cycle().skip(seed).take(len).collect()
}

async fn summarise(request: ReceivedRequest) -> StreamingResponse {
    let mut total = 0usize;
    for stream in &request.streams {
        match stream.read_to_end().await {
            Ok(bytes) => total += bytes.len(),
            Err(e) => {
                return StreamingResponse::internal_error().with_body(format!("stream {}: {e}", stream.id));
            }
        }
    }
    StreamingResponse::ok().with_body(format!(
        "received {total} bytes across {} streams",
        request.streams.len()
    ))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Applications embedding the library should install their own subscriber.
    tracing_subscriber::fmt::init();

    let cli = cli::Cli::parse();
    let format = match cli.format {
        cli::Format::Json => SerializationFormat::Json,
        cli::Format::Bincode => SerializationFormat::Bincode,
    };
    let config = SessionConfig::default()
        .with_max_frame_payload(cli.frame_size)
        .with_unknown_length_chunk(cli.frame_size)
        .with_metadata_format(format);

    let (client_io, server_io) = tokio::io::duplex(64 * 1024);
    let (server, incoming) = StreamingSession::connect(server_io, config);
    let serving = tokio::spawn({
        let server = server.clone();
        async move { server.serve(incoming, Arc::new(summarise)).await }
    });
    let (client, _incoming) = StreamingSession::connect(client_io, config);

    let mut request = StreamingRequest::post("/demo");
    for seed in 0..cli.streams {
        let data = pattern(cli.body_size, seed);
        let stream = if cli.unknown_length {
            ContentStream::from_reader(Cursor::new(data), None)
        } else {
            ContentStream::from_bytes(data)
        };
        request = request.with_stream(stream.with_content_type("application/octet-stream"));
    }

    let started = Instant::now();
    let response = client.send_request(request).await?;
    let summary = match response.body() {
        Some(body) => body.read_to_string().await?,
        None => String::new(),
    };
    info!(elapsed = ?started.elapsed(), "exchange finished");

    println!("status {}: {summary}", response.status_code);
    println!(
        "client sent {} frames, server sent {} frames (max {} bytes per frame)",
        client.frames_sent(),
        server.frames_sent(),
        config.max_frame_payload()
    );

    client.close();
    client.closed().await;
    server.closed().await;
    serving.await?;
    Ok(())
}
