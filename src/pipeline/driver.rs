//! The cooperative single-loop driver.
//!
//! Each tick polls every unfinished stage once, in chain order. A stage that
//! cannot move (output paused, input empty, sink not ready) is skipped and
//! reported as `Paused`. When a whole tick makes no progress the loop parks
//! until a channel changes, the pipeline is cancelled, or the poll interval
//! elapses.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::trace;

use super::{sink_ready, PipelineConfig, Shared};
use crate::channel::{Channel, PullOutcome, PushOutcome};
use crate::core::{Chunk, Error, Result, Sink, Source, StageStatus, Transform};
use crate::util::CancellableExt;

/// Push as much of `pending` as the channel accepts; returns how many went in
fn deliver(out: &Channel, pending: &mut VecDeque<Chunk>) -> Result<usize> {
    let mut sent = 0;
    while let Some(chunk) = pending.pop_front() {
        match out.try_push(chunk)? {
            PushOutcome::Accepted => sent += 1,
            PushOutcome::Rejected { chunk, signal } => {
                trace!(channel = out.label(), occupied = signal.occupied, "push rejected");
                pending.push_front(chunk);
                break;
            }
        }
    }
    Ok(sent)
}

struct SourceStage {
    source: Box<dyn Source>,
    out: Channel,
    pending: VecDeque<Chunk>,
    done: bool,
}

struct TransformStage {
    index: usize,
    transform: Box<dyn Transform>,
    input: Channel,
    out: Channel,
    pending: VecDeque<Chunk>,
    flushed: bool,
    done: bool,
}

struct SinkStage {
    index: usize,
    sink: Box<dyn Sink>,
    input: Channel,
    done: bool,
}

impl SourceStage {
    async fn step(&mut self, shared: &Shared, token: &CancellationToken) -> Result<bool> {
        let progressed = deliver(&self.out, &mut self.pending)? > 0;
        if !self.pending.is_empty() || self.out.is_paused() {
            shared.set_stage(0, StageStatus::Paused);
            return Ok(progressed);
        }

        shared.set_stage(0, StageStatus::Running);
        match self.source.produce().cancellable(token.clone()).await?? {
            Some(chunk) => {
                shared.count_out(0, 1);
                self.pending.push_back(chunk);
                deliver(&self.out, &mut self.pending)?;
            }
            None => {
                self.out.close();
                self.done = true;
                shared.set_stage(0, StageStatus::Completed);
            }
        }
        Ok(true)
    }
}

impl TransformStage {
    async fn step(&mut self, shared: &Shared, token: &CancellationToken) -> Result<bool> {
        let mut progressed = deliver(&self.out, &mut self.pending)? > 0;
        if !self.pending.is_empty() {
            shared.set_stage(self.index, StageStatus::Paused);
            return Ok(progressed);
        }
        if self.flushed {
            self.finish(shared);
            return Ok(true);
        }
        if self.out.is_paused() {
            shared.set_stage(self.index, StageStatus::Paused);
            return Ok(progressed);
        }

        match self.input.try_pull()? {
            PullOutcome::Chunk(chunk) => {
                shared.count_in(self.index);
                shared.set_stage(self.index, StageStatus::Running);
                let output = self
                    .transform
                    .process(chunk)
                    .cancellable(token.clone())
                    .await??;
                shared.count_out(self.index, output.len());
                self.pending.extend(output);
                deliver(&self.out, &mut self.pending)?;
                progressed = true;
            }
            PullOutcome::Empty => {
                if !progressed {
                    shared.set_stage(self.index, StageStatus::Paused);
                }
            }
            PullOutcome::Closed => {
                shared.set_stage(self.index, StageStatus::Draining);
                let output = self.transform.flush().cancellable(token.clone()).await??;
                shared.count_out(self.index, output.len());
                self.pending.extend(output);
                self.flushed = true;
                deliver(&self.out, &mut self.pending)?;
                if self.pending.is_empty() {
                    self.finish(shared);
                }
                progressed = true;
            }
        }
        Ok(progressed)
    }

    fn finish(&mut self, shared: &Shared) {
        self.out.close();
        self.done = true;
        shared.set_stage(self.index, StageStatus::Completed);
    }
}

impl SinkStage {
    async fn step(&mut self, shared: &Shared, token: &CancellationToken) -> Result<bool> {
        if !sink_ready(&*self.sink)? {
            shared.set_stage(self.index, StageStatus::Paused);
            return Ok(false);
        }

        match self.input.try_pull()? {
            PullOutcome::Chunk(chunk) => {
                shared.count_in(self.index);
                shared.set_stage(self.index, StageStatus::Running);
                self.sink.consume(chunk).cancellable(token.clone()).await??;
                Ok(true)
            }
            PullOutcome::Empty => {
                shared.set_stage(self.index, StageStatus::Paused);
                Ok(false)
            }
            PullOutcome::Closed => {
                shared.set_stage(self.index, StageStatus::Draining);
                self.sink.finish().cancellable(token.clone()).await??;
                self.done = true;
                shared.set_stage(self.index, StageStatus::Completed);
                Ok(true)
            }
        }
    }
}

pub(super) struct Driver {
    source: SourceStage,
    transforms: Vec<TransformStage>,
    sink: SinkStage,
    shared: Arc<Shared>,
    poll_interval: Duration,
}

impl Driver {
    pub(super) fn new(
        source: Box<dyn Source>,
        transforms: Vec<Box<dyn Transform>>,
        sink: Box<dyn Sink>,
        shared: Arc<Shared>,
        config: &PipelineConfig,
    ) -> Self {
        let channels = &shared.channels;
        let transforms = transforms
            .into_iter()
            .enumerate()
            .map(|(i, transform)| TransformStage {
                index: i + 1,
                transform,
                input: channels[i].clone(),
                out: channels[i + 1].clone(),
                pending: VecDeque::new(),
                flushed: false,
                done: false,
            })
            .collect::<Vec<_>>();
        let last = channels.len() - 1;

        Self {
            source: SourceStage {
                source,
                out: channels[0].clone(),
                pending: VecDeque::new(),
                done: false,
            },
            sink: SinkStage {
                index: transforms.len() + 1,
                sink,
                input: channels[last].clone(),
                done: false,
            },
            transforms,
            shared: shared.clone(),
            poll_interval: config.poll_interval,
        }
    }

    pub(super) async fn run(mut self) -> Result<()> {
        let token = self.shared.token().clone();
        loop {
            if token.is_cancelled() {
                return Err(self.shared.failure());
            }

            let progressed = match self.tick(&token).await {
                Ok(progressed) => progressed,
                Err((index, error)) => {
                    self.shared.fail_stage(index, error);
                    return Err(self.shared.failure());
                }
            };
            if self.sink.done {
                return Ok(());
            }

            if !progressed {
                tokio::select! {
                    _ = self.shared.activity().notified() => {}
                    _ = token.cancelled() => {}
                    _ = tokio::time::sleep(self.poll_interval) => {}
                }
            }
        }
    }

    /// Poll every unfinished stage once. Errors carry the failing stage index.
    async fn tick(
        &mut self,
        token: &CancellationToken,
    ) -> std::result::Result<bool, (usize, Error)> {
        let shared = &*self.shared;
        let mut progressed = false;

        if !self.source.done {
            progressed |= self.source.step(shared, token).await.map_err(|e| (0, e))?;
        }
        for stage in self.transforms.iter_mut().filter(|s| !s.done) {
            let index = stage.index;
            progressed |= stage.step(shared, token).await.map_err(|e| (index, e))?;
        }
        if !self.sink.done {
            let index = self.sink.index;
            progressed |= self.sink.step(shared, token).await.map_err(|e| (index, e))?;
        }
        Ok(progressed)
    }
}
