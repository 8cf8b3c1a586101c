// Encoding pipeline
//
// - State: run counters, stage states, queue and outcome types
// - Events: everything the state machine reacts to
// - Sequencer: the synchronous stage state machine
// - Pipeline: async driver feeding events to the sequencer

pub mod events;
pub mod sequencer;
pub mod state;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{Instrument, debug, info, info_span, warn};
use uuid::Uuid;

pub use events::*;
pub use sequencer::*;
pub use state::*;

use crate::checksum::{BackgroundChecksum, ChecksumRunner};
use crate::command::ToolCommands;
use crate::metadata::MetadataProvider;
use crate::output_log::OutputLog;
use crate::process::{ProcessRunner, TokioProcessRunner};
use crate::profile::JobConfig;

/// Longest wait for a track language lookup before muxing without languages.
pub const METADATA_TIMEOUT: Duration = Duration::from_secs(30);

/// Summary of a finished run.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub run_id: Uuid,
    pub outcome: RunOutcome,
    pub state: PipelineState,
    /// Renamed output files
    pub encoded: Vec<PathBuf>,
    pub skipped: Vec<SkippedFile>,
    /// Queued files never started
    pub remaining: Vec<PathBuf>,
}

impl RunReport {
    pub fn completed(&self) -> bool {
        self.outcome == RunOutcome::Completed
    }
}

/// Cloneable control surface of a running [`Pipeline`].
#[derive(Debug, Clone)]
pub struct PipelineHandle {
    events: mpsc::UnboundedSender<PipelineEvent>,
}

impl PipelineHandle {
    pub fn pause(&self) -> bool {
        self.send(ControlRequest::Pause)
    }

    pub fn resume(&self) -> bool {
        self.send(ControlRequest::Resume)
    }

    pub fn halt(&self) -> bool {
        self.send(ControlRequest::Halt)
    }

    fn send(&self, request: ControlRequest) -> bool {
        self.events.send(PipelineEvent::Control(request)).is_ok()
    }
}

/// Channel every pipeline collaborator reports on.
pub struct EventChannel {
    pub sender: mpsc::UnboundedSender<PipelineEvent>,
    pub receiver: mpsc::UnboundedReceiver<PipelineEvent>,
}

impl EventChannel {
    pub fn new() -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self { sender, receiver }
    }
}

impl Default for EventChannel {
    fn default() -> Self {
        Self::new()
    }
}

/// Drives a [`StageSequencer`] from its event channel until the run
/// completes or halts.
pub struct Pipeline {
    run_id: Uuid,
    sequencer: StageSequencer,
    metadata: Arc<dyn MetadataProvider>,
    metadata_timeout: Duration,
    sender: mpsc::UnboundedSender<PipelineEvent>,
    receiver: mpsc::UnboundedReceiver<PipelineEvent>,
}

impl Pipeline {
    /// Pipeline on real processes and the background checksum pass.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: Arc<JobConfig>,
        commands: ToolCommands,
        queue: InputQueue,
        metadata: Arc<dyn MetadataProvider>,
        log: Box<dyn OutputLog>,
        settings: SequencerSettings,
        checksum_block_size: usize,
    ) -> Self {
        let channel = EventChannel::new();
        let runner = Box::new(TokioProcessRunner::new(channel.sender.clone()));
        let checksum = Box::new(BackgroundChecksum::new(
            channel.sender.clone(),
            checksum_block_size,
        ));
        Self::with_runners(
            channel, config, commands, queue, runner, checksum, metadata, log, settings,
        )
    }

    /// Pipeline on caller-supplied runners reporting on `channel`.
    #[allow(clippy::too_many_arguments)]
    pub fn with_runners(
        channel: EventChannel,
        config: Arc<JobConfig>,
        commands: ToolCommands,
        queue: InputQueue,
        runner: Box<dyn ProcessRunner>,
        checksum: Box<dyn ChecksumRunner>,
        metadata: Arc<dyn MetadataProvider>,
        log: Box<dyn OutputLog>,
        settings: SequencerSettings,
    ) -> Self {
        let sequencer =
            StageSequencer::new(config, commands, queue, runner, checksum, log, settings);
        Self {
            run_id: Uuid::new_v4(),
            sequencer,
            metadata,
            metadata_timeout: METADATA_TIMEOUT,
            sender: channel.sender,
            receiver: channel.receiver,
        }
    }

    pub fn with_metadata_timeout(mut self, timeout: Duration) -> Self {
        self.metadata_timeout = timeout;
        self
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn handle(&self) -> PipelineHandle {
        PipelineHandle {
            events: self.sender.clone(),
        }
    }

    pub async fn run(mut self) -> RunReport {
        let span = info_span!("run", run_id = %self.run_id);
        async move {
            info!("Pipeline started");
            self.sequencer.start();
            self.dispatch_metadata();

            while !self.sequencer.is_finished() {
                let Some(event) = self.receiver.recv().await else {
                    warn!("Event channel closed before the run finished");
                    self.sequencer.halt(HaltReason::UserRequest);
                    break;
                };
                self.sequencer.handle(event);
                self.dispatch_metadata();
            }

            let report = self.report();
            info!("Pipeline finished: {:?}", report.outcome);
            report
        }
        .instrument(span)
        .await
    }

    /// Look up track languages off the event loop.
    fn dispatch_metadata(&mut self) {
        let Some((file_index, path)) = self.sequencer.take_metadata_request() else {
            return;
        };
        let provider = self.metadata.clone();
        let sender = self.sender.clone();
        let timeout = self.metadata_timeout;

        tokio::spawn(async move {
            let lookup = tokio::time::timeout(timeout, provider.track_languages(&path)).await;
            let languages = match lookup {
                Ok(Ok(languages)) => languages,
                Ok(Err(e)) => {
                    warn!("No track languages for {}: {}", path.display(), e);
                    Default::default()
                }
                Err(_) => {
                    warn!(
                        "Track language lookup for {} timed out after {:?}",
                        path.display(),
                        timeout
                    );
                    Default::default()
                }
            };
            debug!("Track languages of {}: {:?}", path.display(), languages);
            let _ = sender.send(PipelineEvent::MetadataReady {
                file_index,
                languages,
            });
        });
    }

    fn report(&self) -> RunReport {
        RunReport {
            run_id: self.run_id,
            outcome: self
                .sequencer
                .outcome()
                .cloned()
                .unwrap_or(RunOutcome::Halted(HaltReason::UserRequest)),
            state: self.sequencer.state().clone(),
            encoded: self.sequencer.encoded().to_vec(),
            skipped: self.sequencer.skipped().to_vec(),
            remaining: self
                .sequencer
                .queue()
                .iter()
                .map(|p| p.to_path_buf())
                .collect(),
        }
    }
}
