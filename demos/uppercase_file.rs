//! Upper-case a text file into another file.
//!
//! Run with: cargo run --example uppercase_file -- <input> <output>

use std::env;
use std::process;

use chunkweld::prelude::*;

#[tokio::main]
async fn main() -> Result<()> {
    let args: Vec<String> = env::args().skip(1).collect();
    let [input, output] = args.as_slice() else {
        eprintln!("usage: uppercase_file <input> <output>");
        process::exit(2);
    };

    let report = Pipeline::builder()
        .source(FileSource::open(input).await?)
        .transform(Utf8Transform::new())
        .transform(uppercase())
        .sink(FileSink::create(output).await?)
        .build()?
        .run()
        .await?;

    println!(
        "{} -> {}: {} chunks, {:?}",
        input,
        output,
        report.sink().chunks_in,
        report.status
    );
    Ok(())
}
