//! The task-per-stage driver.
//!
//! Every stage runs on its own tokio task and talks to its neighbours only
//! through the awaiting [`Channel::push`] and [`Channel::pull`]. A paused
//! channel suspends the producing task until the consumer drains it to the
//! low watermark.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use futures::FutureExt;
use tokio_util::sync::CancellationToken;

use super::{sink_ready, PipelineConfig, Shared};
use crate::channel::Channel;
use crate::core::{Chunk, Error, Result, Sink, Source, StageStatus, Transform};
use crate::util::{panicked, CancellableExt};

/// Push one chunk, reporting the stage as paused while the channel holds it back
async fn forward(shared: &Shared, index: usize, out: &Channel, chunk: Chunk) -> Result<()> {
    if out.is_paused() {
        shared.set_stage(index, StageStatus::Paused);
        out.push(chunk).await?;
        shared.set_stage(index, StageStatus::Running);
    } else {
        out.push(chunk).await?;
    }
    shared.count_out(index, 1);
    Ok(())
}

async fn run_source(
    mut source: Box<dyn Source>,
    out: Channel,
    shared: Arc<Shared>,
    token: CancellationToken,
) -> Result<()> {
    shared.set_stage(0, StageStatus::Running);
    while let Some(chunk) = source.produce().cancellable(token.clone()).await?? {
        forward(&shared, 0, &out, chunk).await?;
    }
    out.close();
    Ok(())
}

async fn run_transform(
    index: usize,
    mut transform: Box<dyn Transform>,
    input: Channel,
    out: Channel,
    shared: Arc<Shared>,
    token: CancellationToken,
) -> Result<()> {
    shared.set_stage(index, StageStatus::Running);
    while let Some(chunk) = input.pull().await? {
        shared.count_in(index);
        let output = transform.process(chunk).cancellable(token.clone()).await??;
        for chunk in output {
            forward(&shared, index, &out, chunk).await?;
        }
    }

    shared.set_stage(index, StageStatus::Draining);
    let output = transform.flush().cancellable(token.clone()).await??;
    for chunk in output {
        forward(&shared, index, &out, chunk).await?;
    }
    out.close();
    Ok(())
}

async fn run_sink(
    index: usize,
    mut sink: Box<dyn Sink>,
    input: Channel,
    shared: Arc<Shared>,
    token: CancellationToken,
    poll_interval: Duration,
) -> Result<()> {
    shared.set_stage(index, StageStatus::Running);
    loop {
        while !sink_ready(&*sink)? {
            shared.set_stage(index, StageStatus::Paused);
            tokio::select! {
                _ = token.cancelled() => return Err(shared.failure()),
                _ = tokio::time::sleep(poll_interval) => {}
            }
        }
        shared.set_stage(index, StageStatus::Running);

        match input.pull().await? {
            Some(chunk) => {
                shared.count_in(index);
                sink.consume(chunk).cancellable(token.clone()).await??;
            }
            None => break,
        }
    }

    shared.set_stage(index, StageStatus::Draining);
    sink.finish().cancellable(token.clone()).await??;
    Ok(())
}

/// Run one stage task to the end and settle it into its final status.
///
/// A panic anywhere in the task fails the stage like any other error, which
/// unblocks its neighbours through the failed channels.
async fn supervise<F>(shared: Arc<Shared>, index: usize, stage: F)
where
    F: Future<Output = Result<()>>,
{
    let outcome = match AssertUnwindSafe(stage).catch_unwind().await {
        Ok(outcome) => outcome,
        Err(payload) => Err(panicked(payload)),
    };
    match outcome {
        Ok(()) => shared.set_stage(index, StageStatus::Completed),
        Err(error) => shared.fail_stage(index, error),
    }
}

pub(super) async fn run(
    source: Box<dyn Source>,
    transforms: Vec<Box<dyn Transform>>,
    sink: Box<dyn Sink>,
    shared: Arc<Shared>,
    config: &PipelineConfig,
) -> Result<()> {
    let token = shared.token().clone();
    if token.is_cancelled() {
        return Err(shared.failure());
    }

    let channels = shared.channels.clone();
    let sink_index = transforms.len() + 1;
    let mut tasks = Vec::with_capacity(sink_index + 1);

    {
        let (out, shared, token) = (channels[0].clone(), shared.clone(), token.clone());
        let stage = run_source(source, out, shared.clone(), token);
        tasks.push(tokio::spawn(supervise(shared, 0, stage)));
    }

    for (i, transform) in transforms.into_iter().enumerate() {
        let index = i + 1;
        let (input, out) = (channels[i].clone(), channels[i + 1].clone());
        let (shared, token) = (shared.clone(), token.clone());
        let stage = run_transform(index, transform, input, out, shared.clone(), token);
        tasks.push(tokio::spawn(supervise(shared, index, stage)));
    }

    {
        let input = channels[channels.len() - 1].clone();
        let (shared, token) = (shared.clone(), token.clone());
        let poll_interval = config.poll_interval;
        let stage = run_sink(sink_index, sink, input, shared.clone(), token, poll_interval);
        tasks.push(tokio::spawn(supervise(shared, sink_index, stage)));
    }

    for (index, joined) in join_all(tasks).await.into_iter().enumerate() {
        if let Err(e) = joined {
            shared.fail_stage(index, Error::from(e));
        }
    }

    match shared.first_failure() {
        Some(error) => Err(error),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use crate::channel::ChannelConfig;
    use crate::core::{Chunk, ErrorKind, PipelineStatus, Result, StageStatus, Transform};
    use crate::pipeline::Pipeline;
    use crate::sinks::CollectSink;
    use crate::sources::MemorySource;
    use crate::transforms::{gzip_compress, gzip_decompress, uppercase};
    use std::time::Duration;

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_concurrent_run_preserves_order() {
        let items: Vec<String> = (0..200).map(|i| format!("{i:03}")).collect();
        let sink = CollectSink::new();
        let pipeline = Pipeline::builder()
            .source(MemorySource::new(items.clone()))
            .channel_config(ChannelConfig::new(2))
            .transform(uppercase())
            .sink(sink.clone())
            .build()
            .unwrap();
        let handle = pipeline.handle();

        let report = pipeline.run_concurrent().await.unwrap();
        assert_eq!(report.status, PipelineStatus::Completed);
        assert_eq!(sink.payloads().await, items);
        assert_eq!(sink.finish_count(), 1);
        assert_eq!(handle.stage_statuses(), vec![StageStatus::Completed; 3]);
    }

    #[tokio::test]
    async fn test_concurrent_codec_chain() {
        let data: Vec<u8> = (0..50_000u32).map(|i| (i * 7 % 256) as u8).collect();
        let sink = CollectSink::new();
        let pipeline = Pipeline::builder()
            .source(MemorySource::new(data.chunks(4096).map(|c| c.to_vec())))
            .transform(gzip_compress())
            .transform(gzip_decompress())
            .sink(sink.clone())
            .build()
            .unwrap();

        pipeline.run_concurrent().await.unwrap();
        assert_eq!(sink.concat().await, data);
    }

    #[tokio::test]
    async fn test_cancel_before_run() {
        let pipeline =
            Pipeline::wire(MemorySource::new(["a"]), vec![], CollectSink::new()).unwrap();
        let handle = pipeline.handle();
        handle.cancel();
        handle.cancel();

        let err = pipeline.run_concurrent().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Cancelled);
        assert_eq!(handle.status(), PipelineStatus::Cancelled);
    }

    struct Boom;

    #[async_trait]
    impl Transform for Boom {
        async fn process(&mut self, _chunk: Chunk) -> Result<Vec<Chunk>> {
            panic!("transform exploded");
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_panicking_stage_fails_instead_of_hanging() {
        let sink = CollectSink::new();
        let pipeline = Pipeline::builder()
            .source(MemorySource::new(["a", "b"]))
            .transform(Boom)
            .sink(sink.clone())
            .build()
            .unwrap();
        let handle = pipeline.handle();

        let err = tokio::time::timeout(Duration::from_secs(5), pipeline.run_concurrent())
            .await
            .expect("pipeline should not hang")
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Unknown);
        assert!(err.to_string().contains("transform exploded"));
        assert_eq!(handle.status(), PipelineStatus::Failed);
        assert_eq!(handle.stage_statuses()[1], StageStatus::Failed);
        assert_eq!(sink.finish_count(), 0);
    }
}
