//! Serve one file to every HTTP client by piping it into the socket.
//!
//! Run with: cargo run --example serve_file -- <path> [addr]
//!
//! Then: curl http://127.0.0.1:8000/

use std::env;
use std::process;

use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};

use chunkweld::prelude::*;

const HEADER: &[u8] = b"HTTP/1.1 200 OK\r\nContent-Type: application/octet-stream\r\nConnection: close\r\n\r\n";

async fn serve(mut socket: TcpStream, path: String) -> Result<PipelineReport> {
    socket.write_all(HEADER).await?;
    Pipeline::builder()
        .source(FileSource::open(&path).await?)
        .channel_config(ChannelConfig::new(4))
        .sink(ByteStreamSink::new(ByteWriter::new(socket)))
        .build()?
        .run()
        .await
}

#[tokio::main]
async fn main() -> Result<()> {
    let mut args = env::args().skip(1);
    let Some(path) = args.next() else {
        eprintln!("usage: serve_file <path> [addr]");
        process::exit(2);
    };
    let addr = args.next().unwrap_or_else(|| "127.0.0.1:8000".to_string());

    let listener = TcpListener::bind(&addr).await?;
    println!("serving {} on http://{}/", path, addr);

    loop {
        let (socket, peer) = listener.accept().await?;
        let path = path.clone();
        tokio::spawn(async move {
            match serve(socket, path).await {
                Ok(report) => println!("{}: sent {} chunks", peer, report.sink().chunks_in),
                Err(e) => eprintln!("{}: {}", peer, e),
            }
        });
    }
}
