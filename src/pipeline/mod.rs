//! Pipeline wiring and execution.
//!
//! A pipeline is one source, any number of transforms, and one sink, joined
//! by [`Channel`]s. [`Pipeline::run`] drives every stage from a single
//! cooperative loop; [`Pipeline::run_concurrent`] gives each stage its own
//! task and lets the channels do the synchronisation. Both honour the same
//! channel contract and report the same way.
//!
//! A run either completes or fails with exactly one error: the first stage
//! failure wins, later ones are logged at `debug` and dropped.

mod concurrent;
mod driver;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::channel::{Channel, ChannelConfig};
use crate::core::{Error, PipelineStatus, Result, Sink, Source, StageStatus, Transform};

/// Default idle re-check interval for the cooperative driver
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Configuration for pipeline execution
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PipelineConfig {
    /// Configuration for every channel without an explicit override
    pub channel: ChannelConfig,
    /// How long an idle driver waits before re-polling stages that cannot
    /// signal readiness through a channel (such as a sink that is not ready)
    pub poll_interval: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            channel: ChannelConfig::default(),
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

impl PipelineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the default channel configuration
    pub fn channel(mut self, channel: ChannelConfig) -> Self {
        self.channel = channel;
        self
    }

    /// Set the idle poll interval
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }
}

/// Final counters for one stage
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageReport {
    pub name: &'static str,
    pub status: StageStatus,
    /// Chunks taken from the input channel
    pub chunks_in: u64,
    /// Chunks handed to the output channel
    pub chunks_out: u64,
}

/// Summary of a completed run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineReport {
    pub status: PipelineStatus,
    /// Stages in chain order, source first
    pub stages: Vec<StageReport>,
}

impl PipelineReport {
    pub fn source(&self) -> &StageReport {
        &self.stages[0]
    }

    pub fn sink(&self) -> &StageReport {
        &self.stages[self.stages.len() - 1]
    }
}

/// State shared by the driver, the stages and every [`PipelineHandle`].
///
/// Stage `i` writes into `channels[i]`; stage `i + 1` reads from it.
pub(crate) struct Shared {
    token: CancellationToken,
    activity: Arc<Notify>,
    channels: Vec<Channel>,
    status: watch::Sender<PipelineStatus>,
    stages: Mutex<Vec<StageReport>>,
    first_error: Mutex<Option<Error>>,
}

impl Shared {
    fn stage_name(&self, index: usize) -> &'static str {
        self.stages.lock()[index].name
    }

    /// Move a stage to `status`. Terminal statuses are final.
    pub(crate) fn set_stage(&self, index: usize, status: StageStatus) {
        let mut stages = self.stages.lock();
        let stage = &mut stages[index];
        if stage.status == status || stage.status.is_terminal() {
            return;
        }
        debug!(stage = stage.name, from = %stage.status, to = %status, "stage status");
        stage.status = status;
    }

    pub(crate) fn count_in(&self, index: usize) {
        self.stages.lock()[index].chunks_in += 1;
    }

    pub(crate) fn count_out(&self, index: usize, chunks: usize) {
        self.stages.lock()[index].chunks_out += chunks as u64;
    }

    /// Record a failure of stage `index`.
    ///
    /// The first failure is forwarded down the chain on every channel from
    /// the failing stage onwards; channels upstream of it are cancelled.
    /// Later failures only mark their stage.
    pub(crate) fn fail_stage(&self, index: usize, error: Error) {
        self.set_stage(index, StageStatus::Failed);
        let name = self.stage_name(index);
        {
            let mut first = self.first_error.lock();
            if first.is_some() {
                debug!(stage = name, %error, "suppressed secondary failure");
                return;
            }
            *first = Some(error.clone());
        }

        if error.is_cancelled() {
            info!(stage = name, "pipeline cancelled");
        } else {
            warn!(stage = name, kind = %error.kind(), %error, "stage failed");
        }
        for (i, channel) in self.channels.iter().enumerate() {
            if i >= index {
                channel.fail(error.clone());
            } else {
                channel.fail(Error::Cancelled);
            }
        }
        self.token.cancel();
    }

    pub(crate) fn first_failure(&self) -> Option<Error> {
        self.first_error.lock().clone()
    }

    /// The error a stopped run reports: the first failure, or cancellation
    pub(crate) fn failure(&self) -> Error {
        self.first_failure().unwrap_or(Error::Cancelled)
    }

    pub(crate) fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub(crate) fn activity(&self) -> &Notify {
        &self.activity
    }

    fn start(&self) {
        let stages = self.stages.lock().len();
        debug!(stages, "pipeline running");
        self.status.send_if_modified(|status| {
            if *status == PipelineStatus::Building {
                *status = PipelineStatus::Running;
                true
            } else {
                false
            }
        });
    }

    fn complete(&self, outcome: Result<()>) -> Result<PipelineReport> {
        let status = PipelineStatus::from_outcome(&outcome);
        let stages = {
            let mut stages = self.stages.lock();
            if outcome.is_err() {
                for stage in stages.iter_mut().filter(|s| !s.status.is_terminal()) {
                    stage.status = StageStatus::Failed;
                }
            }
            stages.clone()
        };
        self.status.send_replace(status);

        #[cfg(feature = "metrics")]
        crate::metrics::record_pipeline_outcome(status);

        match outcome {
            Ok(()) => {
                info!(chunks = stages[stages.len() - 1].chunks_in, "pipeline completed");
                Ok(PipelineReport { status, stages })
            }
            Err(error) => {
                debug!(%status, %error, "pipeline stopped");
                Err(error)
            }
        }
    }
}

/// A cloneable remote control for a pipeline.
///
/// Obtain one with [`Pipeline::handle`] before running the pipeline.
#[derive(Clone)]
pub struct PipelineHandle {
    shared: Arc<Shared>,
}

impl PipelineHandle {
    /// Cancel the pipeline.
    ///
    /// Every channel fails with [`Error::Cancelled`] and running stages stop
    /// at their next channel interaction. Idempotent, and a no-op once the
    /// pipeline has finished.
    pub fn cancel(&self) {
        if self.status().is_terminal() || self.shared.token.is_cancelled() {
            return;
        }
        debug!("cancelling pipeline");
        self.shared.token.cancel();
        for channel in &self.shared.channels {
            channel.fail(Error::Cancelled);
        }
    }

    pub fn status(&self) -> PipelineStatus {
        *self.shared.status.borrow()
    }

    /// Current status of every stage, source first
    pub fn stage_statuses(&self) -> Vec<StageStatus> {
        self.shared.stages.lock().iter().map(|s| s.status).collect()
    }

    /// Wait until the pipeline reaches a terminal status
    pub async fn wait_terminal(&self) -> PipelineStatus {
        let mut rx = self.shared.status.subscribe();
        let status = match rx.wait_for(|status| status.is_terminal()).await {
            Ok(status) => *status,
            Err(_) => self.status(),
        };
        status
    }

    /// Cancel the pipeline if it is still running after `timeout`
    pub fn cancel_after(&self, timeout: Duration) -> JoinHandle<()> {
        let handle = self.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(timeout) => {
                    debug!(?timeout, "pipeline timed out");
                    handle.cancel();
                }
                _ = handle.wait_terminal() => {}
            }
        })
    }
}

/// A wired chain of stages, ready to run once.
pub struct Pipeline {
    source: Box<dyn Source>,
    transforms: Vec<Box<dyn Transform>>,
    sink: Box<dyn Sink>,
    config: PipelineConfig,
    shared: Arc<Shared>,
}

impl Pipeline {
    /// Wire a source, transforms and a sink with the default configuration
    pub fn wire<S, K>(source: S, transforms: Vec<Box<dyn Transform>>, sink: K) -> Result<Self>
    where
        S: Source + 'static,
        K: Sink + 'static,
    {
        Self::assemble(
            Box::new(source),
            transforms,
            Box::new(sink),
            PipelineConfig::default(),
            HashMap::new(),
        )
    }

    /// Create a pipeline builder
    pub fn builder() -> PipelineBuilder {
        PipelineBuilder::default()
    }

    fn assemble(
        source: Box<dyn Source>,
        transforms: Vec<Box<dyn Transform>>,
        sink: Box<dyn Sink>,
        config: PipelineConfig,
        overrides: HashMap<usize, ChannelConfig>,
    ) -> Result<Self> {
        let mut names = Vec::with_capacity(transforms.len() + 2);
        names.push(short_name(source.name()));
        names.extend(transforms.iter().map(|t| short_name(t.name())));
        names.push(short_name(sink.name()));

        if let Some(&index) = overrides.keys().find(|&&i| i > transforms.len()) {
            return Err(Error::configuration(format!(
                "channel override {} has no producing stage",
                index
            )));
        }

        let activity = Arc::new(Notify::new());
        let channels = names
            .windows(2)
            .enumerate()
            .map(|(i, pair)| {
                let channel_config = overrides.get(&i).unwrap_or(&config.channel).clone();
                let label = format!("{}->{}", pair[0], pair[1]);
                Channel::with_activity(channel_config, label, activity.clone())
            })
            .collect::<Result<Vec<_>>>()?;

        let stages = names
            .iter()
            .map(|&name| StageReport {
                name,
                status: StageStatus::Idle,
                chunks_in: 0,
                chunks_out: 0,
            })
            .collect();

        let (status, _) = watch::channel(PipelineStatus::Building);
        let shared = Arc::new(Shared {
            token: CancellationToken::new(),
            activity,
            channels,
            status,
            stages: Mutex::new(stages),
            first_error: Mutex::new(None),
        });

        Ok(Self {
            source,
            transforms,
            sink,
            config,
            shared,
        })
    }

    /// A handle for observing and cancelling this pipeline
    pub fn handle(&self) -> PipelineHandle {
        PipelineHandle {
            shared: self.shared.clone(),
        }
    }

    /// The channels between stages, in chain order
    pub fn channels(&self) -> &[Channel] {
        &self.shared.channels
    }

    /// Run every stage from one cooperative loop on the current task
    pub async fn run(self) -> Result<PipelineReport> {
        let Pipeline {
            source,
            transforms,
            sink,
            config,
            shared,
        } = self;
        shared.start();
        let outcome = driver::Driver::new(source, transforms, sink, shared.clone(), &config)
            .run()
            .await;
        shared.complete(outcome)
    }

    /// Run each stage on its own tokio task
    pub async fn run_concurrent(self) -> Result<PipelineReport> {
        let Pipeline {
            source,
            transforms,
            sink,
            config,
            shared,
        } = self;
        shared.start();
        let outcome = concurrent::run(source, transforms, sink, shared.clone(), &config).await;
        shared.complete(outcome)
    }
}

/// Ask a sink for readiness, turning a panic into a stage error
fn sink_ready(sink: &dyn Sink) -> Result<bool> {
    std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| sink.is_ready()))
        .map_err(crate::util::panicked)
}

/// `chunkweld::transforms::MapTransform<..>` → `MapTransform<..>`
fn short_name(name: &str) -> &str {
    let base = name.split('<').next().unwrap_or(name);
    match base.rfind("::") {
        Some(pos) => &name[pos + 2..],
        None => name,
    }
}

/// Builder for [`Pipeline`]
#[derive(Default)]
pub struct PipelineBuilder {
    source: Option<Box<dyn Source>>,
    transforms: Vec<Box<dyn Transform>>,
    sink: Option<Box<dyn Sink>>,
    config: PipelineConfig,
    overrides: HashMap<usize, ChannelConfig>,
    last_output: Option<usize>,
    misplaced_override: bool,
}

impl PipelineBuilder {
    pub fn source<S: Source + 'static>(mut self, source: S) -> Self {
        self.source = Some(Box::new(source));
        self.last_output = Some(0);
        self
    }

    /// Append a transform to the chain
    pub fn transform<T: Transform + 'static>(mut self, transform: T) -> Self {
        self.transforms.push(Box::new(transform));
        self.last_output = Some(self.transforms.len());
        self
    }

    pub fn sink<K: Sink + 'static>(mut self, sink: K) -> Self {
        self.sink = Some(Box::new(sink));
        self.last_output = None;
        self
    }

    /// Configure the output channel of the most recently added stage
    pub fn channel_config(mut self, channel: ChannelConfig) -> Self {
        match self.last_output {
            Some(index) => {
                self.overrides.insert(index, channel);
            }
            None => self.misplaced_override = true,
        }
        self
    }

    /// Replace the whole pipeline configuration
    pub fn config(mut self, config: PipelineConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the idle poll interval
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.config.poll_interval = interval;
        self
    }

    pub fn build(self) -> Result<Pipeline> {
        let source = self
            .source
            .ok_or_else(|| Error::configuration("pipeline has no source"))?;
        let sink = self
            .sink
            .ok_or_else(|| Error::configuration("pipeline has no sink"))?;
        if self.misplaced_override {
            return Err(Error::configuration(
                "channel_config must follow a source or transform",
            ));
        }
        Pipeline::assemble(source, self.transforms, sink, self.config, self.overrides)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ErrorKind;
    use crate::sinks::CollectSink;
    use crate::sources::MemorySource;
    use crate::transforms::uppercase;

    #[test]
    fn test_builder_requires_source_and_sink() {
        let err = Pipeline::builder()
            .source(MemorySource::new(["a"]))
            .build()
            .err()
            .unwrap();
        assert_eq!(err.kind(), ErrorKind::Configuration);

        let err = Pipeline::builder()
            .sink(CollectSink::new())
            .build()
            .err()
            .unwrap();
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }

    #[test]
    fn test_channel_config_targets_last_stage() {
        let pipeline = Pipeline::builder()
            .source(MemorySource::new(["a"]))
            .channel_config(ChannelConfig::new(4))
            .transform(uppercase())
            .sink(CollectSink::new())
            .build()
            .unwrap();

        let capacities: Vec<_> = pipeline
            .channels()
            .iter()
            .map(|c| c.watermarks().capacity)
            .collect();
        assert_eq!(capacities, vec![4, 16]);
        assert!(pipeline.channels()[0]
            .label()
            .starts_with("MemorySource->MapTransform"));
    }

    #[test]
    fn test_channel_config_after_sink_is_rejected() {
        let err = Pipeline::builder()
            .source(MemorySource::new(["a"]))
            .sink(CollectSink::new())
            .channel_config(ChannelConfig::new(4))
            .build()
            .err()
            .unwrap();
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }

    #[test]
    fn test_invalid_channel_config_fails_wiring() {
        let config = PipelineConfig::new().channel(ChannelConfig::new(4).low_watermark(4));
        let err = Pipeline::builder()
            .source(MemorySource::new(["a"]))
            .sink(CollectSink::new())
            .config(config)
            .build()
            .err()
            .unwrap();
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }

    #[test]
    fn test_short_name() {
        assert_eq!(short_name("chunkweld::sinks::CollectSink"), "CollectSink");
        assert_eq!(short_name("a::B<c::D>"), "B<c::D>");
        assert_eq!(short_name("Plain"), "Plain");
    }

    #[tokio::test]
    async fn test_handle_tracks_status() {
        let pipeline = Pipeline::wire(MemorySource::new(["a"]), vec![], CollectSink::new()).unwrap();
        let handle = pipeline.handle();
        assert_eq!(handle.status(), PipelineStatus::Building);
        assert_eq!(handle.stage_statuses(), vec![StageStatus::Idle; 2]);

        let report = pipeline.run().await.unwrap();
        assert_eq!(report.status, PipelineStatus::Completed);
        assert_eq!(handle.wait_terminal().await, PipelineStatus::Completed);
        assert_eq!(handle.stage_statuses(), vec![StageStatus::Completed; 2]);

        // cancelling a finished pipeline changes nothing
        handle.cancel();
        assert_eq!(handle.status(), PipelineStatus::Completed);
    }
}
