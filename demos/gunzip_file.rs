//! Decompress a gzip file, with each stage on its own task.
//!
//! Run with: cargo run --example gunzip_file -- <input.gz> <output> [timeout-secs]

use std::env;
use std::process;
use std::time::Duration;

use chunkweld::prelude::*;

#[tokio::main]
async fn main() -> Result<()> {
    let args: Vec<String> = env::args().skip(1).collect();
    if args.len() < 2 {
        eprintln!("usage: gunzip_file <input.gz> <output> [timeout-secs]");
        process::exit(2);
    }
    let timeout = args
        .get(2)
        .and_then(|s| s.parse().ok())
        .map(Duration::from_secs)
        .unwrap_or(Duration::from_secs(60));

    let pipeline = Pipeline::builder()
        .source(FileSource::open(&args[0]).await?)
        .channel_config(ChannelConfig::new(8))
        .transform(gzip_decompress())
        .sink(FileSink::create(&args[1]).await?)
        .build()?;
    let handle = pipeline.handle();
    handle.cancel_after(timeout);

    match pipeline.run_concurrent().await {
        Ok(report) => {
            for stage in &report.stages {
                println!(
                    "{:<40} {:>8} in {:>8} out  {}",
                    stage.name, stage.chunks_in, stage.chunks_out, stage.status
                );
            }
            Ok(())
        }
        Err(e) => {
            eprintln!("gunzip failed ({}): {}", e.kind(), e);
            eprintln!("stages: {:?}", handle.stage_statuses());
            Err(e)
        }
    }
}
