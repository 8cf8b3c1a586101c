use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::audio::{AudioTrackPlan, AudioTrackPlanner};
use crate::checksum::ChecksumRunner;
use crate::command::{MuxAudio, MuxTrack, StageCommand, StageRole, ToolCommands};
use crate::error::GxsError;
use crate::metadata::TrackLanguages;
use crate::output_log::{OutputLog, StatusLevel};
use crate::process::{ProcessHandle, ProcessRunner};
use crate::profile::JobConfig;

use super::events::{ControlRequest, PipelineEvent, StageCompletion};
use super::state::{
    ExitCodePolicy, HaltReason, InputQueue, PipelineState, RunOutcome, SkippedFile, StageState,
};

#[derive(Debug, Clone, Copy)]
pub struct SequencerSettings {
    pub exit_policy: ExitCodePolicy,
    pub invalid_invocation_exit_code: i32,
}

impl SequencerSettings {
    /// Whether `code` is the invalid-invocation sentinel. Unix reports only
    /// the low 8 bits of an exit status, so `-1` arrives as `255`.
    pub fn is_invalid_invocation(&self, code: i32) -> bool {
        let sentinel = self.invalid_invocation_exit_code;
        if cfg!(unix) {
            code & 0xFF == sentinel & 0xFF
        } else {
            code == sentinel
        }
    }
}

impl Default for SequencerSettings {
    fn default() -> Self {
        Self {
            exit_policy: ExitCodePolicy::Strict,
            invalid_invocation_exit_code: -1,
        }
    }
}

/// The stage state machine of one run.
///
/// Every transition goes through [`StageSequencer::handle`]. The sequencer
/// never blocks: it launches stages through the [`ProcessRunner`] and the
/// [`ChecksumRunner`] and waits for their completion events.
pub struct StageSequencer {
    state: PipelineState,
    config: Arc<JobConfig>,
    commands: ToolCommands,
    settings: SequencerSettings,
    queue: InputQueue,
    runner: Box<dyn ProcessRunner>,
    checksum: Box<dyn ChecksumRunner>,
    log: Box<dyn OutputLog>,

    current_input: Option<PathBuf>,
    plan: AudioTrackPlan,
    languages: Option<TrackLanguages>,
    mux_waiting: bool,
    metadata_request: Option<(usize, PathBuf)>,
    live: Option<ProcessHandle>,

    outcome: Option<RunOutcome>,
    encoded: Vec<PathBuf>,
    skipped: Vec<SkippedFile>,
}

impl StageSequencer {
    pub fn new(
        config: Arc<JobConfig>,
        commands: ToolCommands,
        queue: InputQueue,
        runner: Box<dyn ProcessRunner>,
        checksum: Box<dyn ChecksumRunner>,
        log: Box<dyn OutputLog>,
        settings: SequencerSettings,
    ) -> Self {
        Self {
            state: PipelineState::new(queue.len()),
            config,
            commands,
            settings,
            queue,
            runner,
            checksum,
            log,
            current_input: None,
            plan: AudioTrackPlan::default(),
            languages: None,
            mux_waiting: false,
            metadata_request: None,
            live: None,
            outcome: None,
            encoded: Vec::new(),
            skipped: Vec::new(),
        }
    }

    pub fn state(&self) -> &PipelineState {
        &self.state
    }

    pub fn queue(&self) -> &InputQueue {
        &self.queue
    }

    pub fn outcome(&self) -> Option<&RunOutcome> {
        self.outcome.as_ref()
    }

    pub fn is_finished(&self) -> bool {
        self.state.stage.is_terminal()
    }

    /// Renamed output files, in completion order.
    pub fn encoded(&self) -> &[PathBuf] {
        &self.encoded
    }

    pub fn skipped(&self) -> &[SkippedFile] {
        &self.skipped
    }

    /// Language lookup the driver should perform for the file just started.
    pub fn take_metadata_request(&mut self) -> Option<(usize, PathBuf)> {
        self.metadata_request.take()
    }

    /// Leave `Idle` and start the first file.
    pub fn start(&mut self) {
        if self.state.stage != StageState::Idle {
            return;
        }
        info!("Starting run of {} file(s)", self.state.total_files);
        self.purge_intermediates();
        self.next_file();
    }

    pub fn handle(&mut self, event: PipelineEvent) {
        match event {
            PipelineEvent::Control(ControlRequest::Pause) => self.pause(),
            PipelineEvent::Control(ControlRequest::Resume) => self.resume(),
            PipelineEvent::Control(ControlRequest::Halt) => self.halt(HaltReason::UserRequest),
            PipelineEvent::StageOutput { role, segment } => {
                if !self.state.halt_requested && self.live_role() == Some(role) {
                    self.log.progress(&segment);
                }
            }
            PipelineEvent::StageFinished(completion) => self.on_stage_finished(completion),
            PipelineEvent::ChecksumFinished(result) => self.on_checksum_finished(result),
            PipelineEvent::MetadataReady {
                file_index,
                languages,
            } => self.on_metadata(file_index, languages),
        }
    }

    fn live_role(&self) -> Option<StageRole> {
        self.live.as_ref().map(|handle| handle.role)
    }

    fn status(&mut self, level: StatusLevel, message: &str) {
        self.log.status(level, message);
    }

    fn on_stage_finished(&mut self, completion: StageCompletion) {
        if self.state.halt_requested || self.is_finished() {
            debug!("Ignoring late {} completion", completion.role);
            return;
        }
        if self.state.stage.role() != Some(completion.role)
            || self.live_role() != Some(completion.role)
        {
            debug!(
                "Ignoring {} completion in {} while {:?} is live",
                completion.role,
                self.state.stage,
                self.live_role()
            );
            return;
        }
        self.live = None;
        self.state.paused = false;

        let role = completion.role;
        match completion.exit_code {
            Some(0) => {}
            Some(code) if self.settings.is_invalid_invocation(code) => {
                let message = match role {
                    StageRole::VideoEncode => "Invalid Custom Command Line Input".to_string(),
                    _ => GxsError::InvalidInvocation { role }.to_string(),
                };
                self.status(StatusLevel::Error, &message);
                self.halt(HaltReason::InvalidInvocation(role));
                return;
            }
            code => {
                let failure = GxsError::StageFailed { role, code };
                match self.settings.exit_policy {
                    ExitCodePolicy::Strict => {
                        self.status(StatusLevel::Error, &failure.to_string());
                        self.skip_current(failure.to_string());
                        return;
                    }
                    ExitCodePolicy::Lenient => {
                        self.status(StatusLevel::Warning, &format!("{}, continuing", failure));
                    }
                }
            }
        }

        match role {
            StageRole::VideoEncode => {
                self.status(StatusLevel::Info, "Video Encode Complete");
                if self.config.misc.use_source_audio {
                    self.status(StatusLevel::Info, "Using Source Audio");
                    self.begin_mux();
                } else {
                    self.begin_audio_analysis();
                }
            }
            StageRole::Probe => self.on_probe_output(&completion.output),
            StageRole::AudioExtract => self.launch_audio_encode(),
            StageRole::AudioEncode => {
                self.status(StatusLevel::Info, "Finished Encoding Audio Stream");
                if self.state.current_track_number < self.state.total_tracks {
                    self.state.current_track_number += 1;
                    self.launch_audio_extract();
                } else {
                    self.begin_mux();
                }
            }
            StageRole::Mux => self.begin_checksum(),
        }
    }

    fn on_probe_output(&mut self, output: &str) {
        let Some(input) = self.current_input.clone() else {
            return;
        };
        self.plan = AudioTrackPlanner::new(&self.commands).plan(
            output,
            &input,
            self.config.misc.audio_quality,
        );
        self.state.total_tracks = self.plan.len();

        if self.plan.is_empty() {
            self.status(StatusLevel::Warning, "No audio streams found, muxing video only");
            self.begin_mux();
        } else {
            self.state.current_track_number = 1;
            self.launch_audio_extract();
        }
    }

    fn on_checksum_finished(&mut self, result: crate::error::Result<PathBuf>) {
        if self.state.halt_requested || self.state.stage != StageState::Checksumming {
            debug!("Ignoring checksum result outside the checksum stage");
            return;
        }

        match result {
            Ok(path) => {
                info!("Finished {}", path.display());
                self.state.last_encoded_output_path = Some(path.clone());
                self.encoded.push(path);
                self.next_file();
            }
            Err(GxsError::Cancelled) => {}
            Err(e) => {
                let message = format!("Checksum failed: {}", e);
                self.status(StatusLevel::Error, &message);
                self.skip_current(message);
            }
        }
    }

    fn on_metadata(&mut self, file_index: usize, languages: TrackLanguages) {
        if file_index != self.state.current_file_index || self.is_finished() {
            return;
        }
        self.languages = Some(languages);
        if self.mux_waiting && !self.state.halt_requested {
            self.launch_mux();
        }
    }

    /// Advance to the next queued file that still exists, or complete.
    fn next_file(&mut self) {
        while !self.state.halt_requested {
            let Some(path) = self.queue.pop_front() else {
                self.complete();
                return;
            };
            self.state.current_file_index += 1;

            if !path.exists() {
                let error = GxsError::MissingInputFile(path.clone());
                warn!("{}", error);
                self.status(
                    StatusLevel::Error,
                    &format!("Error - file not found: {}", path.display()),
                );
                self.skipped.push(SkippedFile {
                    path,
                    reason: error.to_string(),
                });
                continue;
            }

            self.begin_file(path);
            return;
        }
    }

    fn begin_file(&mut self, path: PathBuf) {
        self.purge_intermediates();
        self.plan = AudioTrackPlan::default();
        self.languages = None;
        self.mux_waiting = false;
        self.state.current_track_number = 0;
        self.state.total_tracks = 0;
        self.state.last_encoded_output_path = None;

        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| path.display().to_string());
        let header = format!(
            "Encoding file {}/{}  -  {}...",
            self.state.current_file_index, self.state.total_files, name
        );
        self.status(StatusLevel::Info, &header);

        self.metadata_request = Some((self.state.current_file_index, path.clone()));
        let command = self.commands.video_encode(&self.config, &path);
        self.current_input = Some(path);
        self.state.stage = StageState::VideoEncoding;
        self.launch(command);
    }

    fn begin_audio_analysis(&mut self) {
        let Some(input) = self.current_input.clone() else {
            return;
        };
        self.state.stage = StageState::AudioAnalyzing;
        self.log.progress("Analyzing audio streams...");
        self.status(StatusLevel::Info, "Analyzing Audio Streams...");
        let command = self.commands.probe(&input);
        self.launch(command);
    }

    fn launch_audio_extract(&mut self) {
        let number = self.state.current_track_number;
        let Some(track) = self.plan.get(number) else {
            self.begin_mux();
            return;
        };
        let command = track.extract.clone();

        let progress = format!(
            "Encoding audio stream {}/{}...",
            number, self.state.total_tracks
        );
        self.log.progress(&progress);
        self.status(
            StatusLevel::Info,
            &format!("Encoding Audio Stream {}/{}...", number, self.state.total_tracks),
        );
        self.state.stage = StageState::AudioExtracting;
        self.launch(command);
    }

    fn launch_audio_encode(&mut self) {
        let Some(track) = self.plan.get(self.state.current_track_number) else {
            self.begin_mux();
            return;
        };
        let command = track.encode.clone();
        let message = format!(
            "Audio Stream {}/{} Extracted, Converting to AAC...",
            self.state.current_track_number, self.state.total_tracks
        );
        self.status(StatusLevel::Info, &message);
        self.state.stage = StageState::AudioEncoding;
        self.launch(command);
    }

    fn begin_mux(&mut self) {
        self.state.stage = StageState::Muxing;
        self.log.progress("Merging files.");
        self.status(StatusLevel::Info, "Merging Files...");

        if self.languages.is_some() {
            self.launch_mux();
        } else {
            debug!("Waiting for track languages before muxing");
            self.mux_waiting = true;
        }
    }

    fn launch_mux(&mut self) {
        self.mux_waiting = false;
        let Some(input) = self.current_input.clone() else {
            return;
        };
        let languages = self.languages.clone().unwrap_or_default();

        let audio = if self.config.misc.use_source_audio {
            MuxAudio::Source
        } else {
            MuxAudio::Encoded {
                tracks: self
                    .plan
                    .tracks()
                    .iter()
                    .map(|track| MuxTrack {
                        sequence: track.sequence,
                        language: languages.audio(track.sequence - 1).map(str::to_string),
                    })
                    .collect(),
                quality: self.config.misc.audio_quality,
            }
        };

        let command = self
            .commands
            .mux(&input, languages.video.as_deref(), &audio);
        self.state.last_encoded_output_path = Some(self.commands.encoded_output(&input));
        self.launch(command);
    }

    fn begin_checksum(&mut self) {
        let Some(output) = self.state.last_encoded_output_path.clone() else {
            return;
        };
        self.state.stage = StageState::Checksumming;
        self.log.progress("Generating CRC...");
        self.status(StatusLevel::Info, "Generating CRC...");
        self.checksum.start(output);
    }

    fn launch(&mut self, command: StageCommand) {
        debug!("{}: {}", command.description, command.display_line());
        match self.runner.launch(&command) {
            Ok(handle) => self.live = Some(handle),
            Err(e) => {
                self.status(StatusLevel::Error, &e.to_string());
                self.halt(HaltReason::LaunchFailed(e.to_string()));
            }
        }
    }

    /// Drop the current file and continue with the queue.
    fn skip_current(&mut self, reason: String) {
        if let Some(path) = self.current_input.take() {
            self.skipped.push(SkippedFile { path, reason });
        }
        self.purge_intermediates();
        self.next_file();
    }

    fn complete(&mut self) {
        self.purge_intermediates();
        self.current_input = None;
        self.state.stage = StageState::Completed;
        self.log.progress("");
        self.status(StatusLevel::Info, "Encoding Complete");
        self.outcome = Some(RunOutcome::Completed);
    }

    /// Stop the run. Remaining queued files are left unprocessed.
    pub fn halt(&mut self, reason: HaltReason) {
        if self.is_finished() {
            return;
        }
        self.state.halt_requested = true;

        if let Some(handle) = self.live.take() {
            if let Err(e) = self.runner.terminate(&handle) {
                warn!("Failed to terminate {} process: {}", handle.role, e);
            }
        }
        if self.state.stage == StageState::Checksumming {
            self.checksum.cancel();
        }

        if reason == HaltReason::UserRequest {
            self.status(StatusLevel::Warning, "Process Stopped");
        }
        self.status(StatusLevel::Warning, "Stopping Encode");

        self.purge_intermediates();
        self.mux_waiting = false;
        self.state.paused = false;
        self.state.stage = StageState::Halted;
        self.log.progress("");
        self.outcome = Some(RunOutcome::Halted(reason));
    }

    fn pause(&mut self) {
        if self.state.paused {
            self.status(StatusLevel::Warning, "Process is already paused");
            return;
        }
        let Some(handle) = self.live.clone() else {
            self.status(StatusLevel::Warning, "No running process to pause");
            return;
        };
        match self.runner.suspend(&handle) {
            Ok(()) => {
                self.state.paused = true;
                self.status(StatusLevel::Info, "Process Paused");
            }
            Err(e) => self.status(StatusLevel::Warning, &format!("Pause failed: {}", e)),
        }
    }

    fn resume(&mut self) {
        if !self.state.paused {
            self.status(StatusLevel::Warning, "Process is not paused");
            return;
        }
        let Some(handle) = self.live.clone() else {
            self.state.paused = false;
            return;
        };
        match self.runner.resume(&handle) {
            Ok(()) => {
                self.state.paused = false;
                self.status(StatusLevel::Info, "Process Resumed");
            }
            Err(e) => self.status(StatusLevel::Warning, &format!("Resume failed: {}", e)),
        }
    }

    fn purge_intermediates(&self) {
        if let Err(e) = purge_directory(self.commands.scratch_dir()) {
            warn!(
                "Failed to purge {}: {}",
                self.commands.scratch_dir().display(),
                e
            );
        }
    }
}

/// Remove every file in `dir`, creating it when missing.
pub fn purge_directory(dir: &Path) -> std::io::Result<()> {
    std::fs::create_dir_all(dir)?;
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_file() {
            std::fs::remove_file(&path)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checksum::MockChecksumRunner;
    use crate::command::ToolPaths;
    use crate::config::ToolsConfig;
    use crate::output_log::MemoryLog;
    use crate::process::MockProcessRunner;
    use crate::profile::Architecture;
    use assert_fs::prelude::*;
    use std::sync::Mutex;

    const IDENTIFY_TWO_AUDIO: &str = "File 'D.mkv': container: Matroska\n\
        Track ID 0: video (V_MPEG4/ISO/AVC)\n\
        Track ID 1: audio (A_FLAC)\n\
        Track ID 2: audio (A_AC3)\n";

    /// Runner that records launches and terminations.
    #[derive(Clone, Default)]
    struct RecordingRunner {
        launched: Arc<Mutex<Vec<StageCommand>>>,
        terminated: Arc<Mutex<Vec<StageRole>>>,
        fail_launch: bool,
    }

    impl RecordingRunner {
        fn launched(&self) -> Vec<StageCommand> {
            self.launched.lock().unwrap().clone()
        }

        fn roles(&self) -> Vec<StageRole> {
            self.launched().iter().map(|c| c.role).collect()
        }
    }

    impl ProcessRunner for RecordingRunner {
        fn launch(&mut self, command: &StageCommand) -> crate::error::Result<ProcessHandle> {
            if self.fail_launch {
                return Err(GxsError::Launch {
                    program: command.program.clone(),
                    source: std::io::Error::new(std::io::ErrorKind::NotFound, "missing"),
                });
            }
            let mut launched = self.launched.lock().unwrap();
            launched.push(command.clone());
            Ok(ProcessHandle {
                id: launched.len() as u64,
                role: command.role,
                program: command.program.clone(),
                pid: None,
            })
        }

        fn suspend(&mut self, _handle: &ProcessHandle) -> crate::error::Result<()> {
            Ok(())
        }

        fn resume(&mut self, _handle: &ProcessHandle) -> crate::error::Result<()> {
            Ok(())
        }

        fn terminate(&mut self, handle: &ProcessHandle) -> crate::error::Result<()> {
            self.terminated.lock().unwrap().push(handle.role);
            Ok(())
        }
    }

    #[derive(Clone, Default)]
    struct RecordingChecksum {
        started: Arc<Mutex<Vec<PathBuf>>>,
        cancelled: Arc<Mutex<usize>>,
    }

    impl ChecksumRunner for RecordingChecksum {
        fn start(&mut self, path: PathBuf) {
            self.started.lock().unwrap().push(path);
        }

        fn cancel(&mut self) {
            *self.cancelled.lock().unwrap() += 1;
        }
    }

    struct Fixture {
        temp: assert_fs::TempDir,
        config: JobConfig,
        settings: SequencerSettings,
    }

    impl Fixture {
        fn new() -> Self {
            let mut config = JobConfig::default();
            config.system.architecture = Architecture::X64;
            config.system.threads = 4;
            Self {
                temp: assert_fs::TempDir::new().unwrap(),
                config,
                settings: SequencerSettings::default(),
            }
        }

        fn input(&self, name: &str) -> PathBuf {
            let child = self.temp.child(name);
            child.write_str("source").unwrap();
            child.path().to_path_buf()
        }

        fn commands(&self) -> ToolCommands {
            ToolCommands::new(
                ToolPaths::resolve(&ToolsConfig::default(), Architecture::X64),
                self.temp.path().join("scratch"),
                self.temp.path().join("out"),
            )
        }

        fn sequencer(
            &self,
            files: Vec<PathBuf>,
            runner: Box<dyn ProcessRunner>,
            checksum: Box<dyn ChecksumRunner>,
            log: MemoryLog,
        ) -> StageSequencer {
            StageSequencer::new(
                Arc::new(self.config.clone()),
                self.commands(),
                files.into_iter().collect(),
                runner,
                checksum,
                Box::new(log),
                self.settings,
            )
        }
    }

    fn finished(role: StageRole, code: i32) -> PipelineEvent {
        PipelineEvent::StageFinished(StageCompletion::new(role, Some(code)))
    }

    fn metadata(index: usize) -> PipelineEvent {
        PipelineEvent::MetadataReady {
            file_index: index,
            languages: TrackLanguages {
                video: Some("jpn".to_string()),
                audio: vec![Some("jpn".to_string()), None],
            },
        }
    }

    fn checksum_done(seq: &StageSequencer) -> PipelineEvent {
        let path = seq.state().last_encoded_output_path.clone().unwrap();
        PipelineEvent::ChecksumFinished(Ok(crate::checksum::checksummed_path(&path, 0x1234ABCD)))
    }

    #[test]
    fn test_source_audio_run_over_two_files() {
        let fixture = Fixture::new();
        let a = fixture.input("A.mkv");
        let b = fixture.input("B.mkv");
        let runner = RecordingRunner::default();
        let checksum = RecordingChecksum::default();
        let log = MemoryLog::new();
        let mut seq = fixture.sequencer(
            vec![a.clone(), b.clone()],
            Box::new(runner.clone()),
            Box::new(checksum.clone()),
            log.clone(),
        );

        let mut visited = Vec::new();
        seq.start();
        visited.push(seq.state().stage);
        assert_eq!(seq.take_metadata_request(), Some((1, a.clone())));
        seq.handle(metadata(1));
        seq.handle(finished(StageRole::VideoEncode, 0));
        visited.push(seq.state().stage);
        seq.handle(finished(StageRole::Mux, 0));
        visited.push(seq.state().stage);
        seq.handle(checksum_done(&seq));
        visited.push(seq.state().stage);

        assert_eq!(seq.take_metadata_request(), Some((2, b.clone())));
        seq.handle(metadata(2));
        seq.handle(finished(StageRole::VideoEncode, 0));
        visited.push(seq.state().stage);
        seq.handle(finished(StageRole::Mux, 0));
        visited.push(seq.state().stage);
        seq.handle(checksum_done(&seq));
        visited.push(seq.state().stage);

        assert_eq!(
            visited,
            vec![
                StageState::VideoEncoding,
                StageState::Muxing,
                StageState::Checksumming,
                StageState::VideoEncoding,
                StageState::Muxing,
                StageState::Checksumming,
                StageState::Completed,
            ]
        );
        assert_eq!(
            runner.roles(),
            vec![
                StageRole::VideoEncode,
                StageRole::Mux,
                StageRole::VideoEncode,
                StageRole::Mux
            ]
        );

        let launched = runner.launched();
        for mux in [&launched[1], &launched[3]] {
            assert!(mux.has_arg("-D"));
            assert!(!mux.has_arg("-A"));
            assert!(mux.has_arg("0:jpn"));
        }
        assert_eq!(launched[0].args.last(), Some(&a.to_string_lossy().to_string()));
        assert_eq!(launched[2].args.last(), Some(&b.to_string_lossy().to_string()));
        assert_eq!(checksum.started.lock().unwrap().len(), 2);

        assert_eq!(seq.outcome(), Some(&RunOutcome::Completed));
        assert_eq!(seq.encoded().len(), 2);
        assert!(log.contains("Encoding file 1/2  -  A.mkv..."));
        assert!(log.contains("Using Source Audio"));
        assert!(log.contains("Encoding Complete"));
        assert!(!log.progress_history().contains(&"Analyzing audio streams...".to_string()));
        assert!(!log.contains("Analyzing Audio Streams..."));
    }

    #[test]
    fn test_missing_file_skips_to_completed_without_launch() {
        let fixture = Fixture::new();
        let c = fixture.input("C.mkv");
        std::fs::remove_file(&c).unwrap();

        let mut runner = MockProcessRunner::new();
        runner.expect_launch().never();
        let mut checksum = MockChecksumRunner::new();
        checksum.expect_start().never();
        let log = MemoryLog::new();

        let mut seq = fixture.sequencer(
            vec![c.clone()],
            Box::new(runner),
            Box::new(checksum),
            log.clone(),
        );
        seq.start();

        assert_eq!(seq.state().stage, StageState::Completed);
        assert!(log.contains(&format!("Error - file not found: {}", c.display())));
        assert_eq!(seq.skipped().len(), 1);
        assert!(seq.take_metadata_request().is_none());
    }

    #[test]
    fn test_missing_middle_file_is_skipped_run_continues() {
        let fixture = Fixture::new();
        let a = fixture.input("A.mkv");
        let gone = fixture.temp.path().join("Gone.mkv");
        let b = fixture.input("B.mkv");
        let runner = RecordingRunner::default();
        let mut seq = fixture.sequencer(
            vec![a, gone, b.clone()],
            Box::new(runner.clone()),
            Box::new(RecordingChecksum::default()),
            MemoryLog::new(),
        );

        seq.start();
        seq.handle(metadata(1));
        seq.handle(finished(StageRole::VideoEncode, 0));
        seq.handle(finished(StageRole::Mux, 0));
        seq.handle(checksum_done(&seq));

        assert_eq!(seq.state().current_file_index, 3);
        assert_eq!(seq.state().stage, StageState::VideoEncoding);
        assert_eq!(
            runner.launched().last().unwrap().args.last(),
            Some(&b.to_string_lossy().to_string())
        );
    }

    #[test]
    fn test_sentinel_exit_halts_run() {
        let fixture = Fixture::new();
        let a = fixture.input("A.mkv");
        let b = fixture.input("B.mkv");
        let runner = RecordingRunner::default();
        let log = MemoryLog::new();
        let mut seq = fixture.sequencer(
            vec![a, b],
            Box::new(runner.clone()),
            Box::new(RecordingChecksum::default()),
            log.clone(),
        );

        seq.start();
        seq.handle(finished(StageRole::VideoEncode, -1));

        assert_eq!(seq.state().stage, StageState::Halted);
        assert!(seq.state().halt_requested);
        assert_eq!(
            seq.outcome(),
            Some(&RunOutcome::Halted(HaltReason::InvalidInvocation(
                StageRole::VideoEncode
            )))
        );
        assert!(log.contains("Invalid Custom Command Line Input"));
        assert!(log.contains("Stopping Encode"));

        seq.handle(metadata(1));
        seq.handle(finished(StageRole::Mux, 0));
        assert_eq!(runner.roles(), vec![StageRole::VideoEncode]);
        assert_eq!(seq.queue().len(), 1);
    }

    #[test]
    fn test_wrapped_sentinel_halts_run() {
        let fixture = Fixture::new();
        let a = fixture.input("A.mkv");
        let b = fixture.input("B.mkv");
        let runner = RecordingRunner::default();
        let log = MemoryLog::new();
        let mut seq = fixture.sequencer(
            vec![a, b],
            Box::new(runner.clone()),
            Box::new(RecordingChecksum::default()),
            log.clone(),
        );

        seq.start();
        seq.handle(finished(StageRole::VideoEncode, 255));

        if cfg!(unix) {
            assert_eq!(
                seq.outcome(),
                Some(&RunOutcome::Halted(HaltReason::InvalidInvocation(
                    StageRole::VideoEncode
                )))
            );
            assert!(log.contains("Invalid Custom Command Line Input"));
            assert!(seq.skipped().is_empty());
            assert_eq!(runner.roles(), vec![StageRole::VideoEncode]);
        } else {
            assert_eq!(seq.skipped().len(), 1);
        }
    }

    #[test]
    fn test_sentinel_matching() {
        let settings = SequencerSettings::default();
        assert!(settings.is_invalid_invocation(-1));
        assert_eq!(settings.is_invalid_invocation(255), cfg!(unix));
        assert!(!settings.is_invalid_invocation(1));
        assert!(!settings.is_invalid_invocation(254));
    }

    #[test]
    fn test_completion_outside_its_stage_is_ignored() {
        let fixture = Fixture::new();
        let a = fixture.input("A.mkv");
        let runner = RecordingRunner::default();
        let checksum = RecordingChecksum::default();
        let mut seq = fixture.sequencer(
            vec![a],
            Box::new(runner.clone()),
            Box::new(checksum.clone()),
            MemoryLog::new(),
        );

        seq.start();
        seq.handle(metadata(1));
        seq.handle(finished(StageRole::VideoEncode, 0));
        seq.handle(finished(StageRole::Mux, 0));
        assert_eq!(seq.state().stage, StageState::Checksumming);

        // A repeated mux completion must not start a second checksum pass.
        seq.handle(finished(StageRole::Mux, 0));
        assert_eq!(seq.state().stage, StageState::Checksumming);
        assert_eq!(checksum.started.lock().unwrap().len(), 1);
        assert_eq!(runner.launched().len(), 2);
    }

    #[test]
    fn test_halt_terminates_live_process_once() {
        let fixture = Fixture::new();
        let a = fixture.input("A.mkv");
        let b = fixture.input("B.mkv");

        let mut runner = MockProcessRunner::new();
        runner.expect_launch().times(1).returning(|command| {
            Ok(ProcessHandle {
                id: 1,
                role: command.role,
                program: command.program.clone(),
                pid: Some(4242),
            })
        });
        runner.expect_terminate().times(1).returning(|_| Ok(()));
        let mut checksum = MockChecksumRunner::new();
        checksum.expect_start().never();
        checksum.expect_cancel().never();
        let log = MemoryLog::new();

        let mut seq = fixture.sequencer(vec![a, b], Box::new(runner), Box::new(checksum), log.clone());
        seq.start();
        seq.handle(PipelineEvent::Control(ControlRequest::Halt));
        seq.handle(PipelineEvent::Control(ControlRequest::Halt));
        seq.handle(PipelineEvent::StageFinished(StageCompletion::new(
            StageRole::VideoEncode,
            None,
        )));

        assert_eq!(seq.state().stage, StageState::Halted);
        assert_eq!(seq.queue().len(), 1);
        assert_eq!(seq.outcome(), Some(&RunOutcome::Halted(HaltReason::UserRequest)));
        assert!(log.contains("Process Stopped"));
    }

    #[test]
    fn test_halt_during_checksum_cancels_pass() {
        let fixture = Fixture::new();
        let a = fixture.input("A.mkv");
        let runner = RecordingRunner::default();
        let checksum = RecordingChecksum::default();
        let mut seq = fixture.sequencer(
            vec![a],
            Box::new(runner.clone()),
            Box::new(checksum.clone()),
            MemoryLog::new(),
        );

        seq.start();
        seq.handle(metadata(1));
        seq.handle(finished(StageRole::VideoEncode, 0));
        seq.handle(finished(StageRole::Mux, 0));
        assert_eq!(seq.state().stage, StageState::Checksumming);

        seq.handle(PipelineEvent::Control(ControlRequest::Halt));
        assert_eq!(*checksum.cancelled.lock().unwrap(), 1);
        assert!(runner.terminated.lock().unwrap().is_empty());

        seq.handle(PipelineEvent::ChecksumFinished(Err(GxsError::Cancelled)));
        assert_eq!(seq.state().stage, StageState::Halted);
        assert!(seq.encoded().is_empty());
    }

    #[test]
    fn test_reencoded_audio_walks_every_track() {
        let mut fixture = Fixture::new();
        fixture.config.misc.use_source_audio = false;
        let d = fixture.input("D.mkv");
        let runner = RecordingRunner::default();
        let log = MemoryLog::new();
        let mut seq = fixture.sequencer(
            vec![d],
            Box::new(runner.clone()),
            Box::new(RecordingChecksum::default()),
            log.clone(),
        );

        seq.start();
        seq.handle(finished(StageRole::VideoEncode, 0));
        assert_eq!(seq.state().stage, StageState::AudioAnalyzing);
        seq.handle(PipelineEvent::StageFinished(
            StageCompletion::new(StageRole::Probe, Some(0)).with_output(IDENTIFY_TWO_AUDIO),
        ));
        assert_eq!(seq.state().stage, StageState::AudioExtracting);
        assert_eq!(seq.state().total_tracks, 2);
        seq.handle(finished(StageRole::AudioExtract, 0));
        assert_eq!(seq.state().stage, StageState::AudioEncoding);
        seq.handle(finished(StageRole::AudioEncode, 0));
        assert_eq!(seq.state().current_track_number, 2);
        seq.handle(finished(StageRole::AudioExtract, 0));
        seq.handle(finished(StageRole::AudioEncode, 0));

        // Mux waits for the language lookup.
        assert_eq!(seq.state().stage, StageState::Muxing);
        assert_eq!(runner.launched().len(), 6);
        seq.handle(metadata(1));

        let roles = runner.roles();
        assert_eq!(
            roles,
            vec![
                StageRole::VideoEncode,
                StageRole::Probe,
                StageRole::AudioExtract,
                StageRole::AudioEncode,
                StageRole::AudioExtract,
                StageRole::AudioEncode,
                StageRole::Mux,
            ]
        );

        let launched = runner.launched();
        assert!(launched[2].has_arg("0:1"));
        assert!(launched[4].has_arg("0:2"));
        let mux = &launched[6];
        assert_eq!(mux.args.iter().filter(|a| *a == "--no-chapters").count(), 2);
        assert_eq!(mux.args.iter().filter(|a| *a == "0:AAC LC 0.5").count(), 2);
        assert!(mux.has_arg("-A"));
        assert!(log.contains("Encoding Audio Stream 2/2..."));
        assert!(log.contains("Analyzing Audio Streams..."));
        assert!(log.contains("Audio Stream 1/2 Extracted, Converting to AAC..."));
        assert!(log.contains("Audio Stream 2/2 Extracted, Converting to AAC..."));
    }

    #[test]
    fn test_empty_probe_goes_straight_to_mux() {
        let mut fixture = Fixture::new();
        fixture.config.misc.use_source_audio = false;
        let e = fixture.input("E.mkv");
        let runner = RecordingRunner::default();
        let mut seq = fixture.sequencer(
            vec![e],
            Box::new(runner.clone()),
            Box::new(RecordingChecksum::default()),
            MemoryLog::new(),
        );

        seq.start();
        seq.handle(metadata(1));
        seq.handle(finished(StageRole::VideoEncode, 0));
        seq.handle(PipelineEvent::StageFinished(
            StageCompletion::new(StageRole::Probe, Some(0)).with_output("File 'E.mkv': container\n"),
        ));

        assert_eq!(seq.state().stage, StageState::Muxing);
        assert_eq!(
            runner.roles(),
            vec![StageRole::VideoEncode, StageRole::Probe, StageRole::Mux]
        );
        let mux = runner.launched().pop().unwrap();
        assert!(!mux.has_arg("--no-chapters"));
        assert!(mux.has_arg("-A"));
    }

    #[test]
    fn test_strict_policy_skips_failed_file() {
        let fixture = Fixture::new();
        let a = fixture.input("A.mkv");
        let b = fixture.input("B.mkv");
        let runner = RecordingRunner::default();
        let log = MemoryLog::new();
        let mut seq = fixture.sequencer(
            vec![a.clone(), b],
            Box::new(runner.clone()),
            Box::new(RecordingChecksum::default()),
            log.clone(),
        );

        seq.start();
        seq.handle(finished(StageRole::VideoEncode, 1));

        assert_eq!(seq.state().current_file_index, 2);
        assert_eq!(seq.state().stage, StageState::VideoEncoding);
        assert_eq!(seq.skipped()[0].path, a);
        assert!(log.contains("video encode stage failed with exit code 1"));
    }

    #[test]
    fn test_lenient_policy_proceeds() {
        let mut fixture = Fixture::new();
        fixture.settings.exit_policy = ExitCodePolicy::Lenient;
        let a = fixture.input("A.mkv");
        let runner = RecordingRunner::default();
        let log = MemoryLog::new();
        let mut seq = fixture.sequencer(
            vec![a],
            Box::new(runner.clone()),
            Box::new(RecordingChecksum::default()),
            log.clone(),
        );

        seq.start();
        seq.handle(metadata(1));
        seq.handle(finished(StageRole::VideoEncode, 2));

        assert_eq!(seq.state().stage, StageState::Muxing);
        assert!(seq.skipped().is_empty());
        assert!(
            log.lines()
                .iter()
                .any(|line| line.level == StatusLevel::Warning && line.message.contains("exit code 2"))
        );
    }

    #[test]
    fn test_launch_failure_halts() {
        let fixture = Fixture::new();
        let a = fixture.input("A.mkv");
        let runner = RecordingRunner {
            fail_launch: true,
            ..RecordingRunner::default()
        };
        let log = MemoryLog::new();
        let mut seq = fixture.sequencer(
            vec![a],
            Box::new(runner),
            Box::new(RecordingChecksum::default()),
            log.clone(),
        );

        seq.start();
        assert_eq!(seq.state().stage, StageState::Halted);
        assert!(matches!(
            seq.outcome(),
            Some(RunOutcome::Halted(HaltReason::LaunchFailed(_)))
        ));
        assert!(log.contains("Failed to launch"));
    }

    #[test]
    fn test_pause_and_resume_call_runner_once() {
        let fixture = Fixture::new();
        let a = fixture.input("A.mkv");

        let mut runner = MockProcessRunner::new();
        runner.expect_launch().returning(|command| {
            Ok(ProcessHandle {
                id: 7,
                role: command.role,
                program: command.program.clone(),
                pid: Some(7),
            })
        });
        runner.expect_suspend().times(1).returning(|_| Ok(()));
        runner.expect_resume().times(1).returning(|_| Ok(()));
        let log = MemoryLog::new();

        let mut seq = fixture.sequencer(
            vec![a],
            Box::new(runner),
            Box::new(MockChecksumRunner::new()),
            log.clone(),
        );

        seq.handle(PipelineEvent::Control(ControlRequest::Pause));
        assert!(log.contains("No running process to pause"));

        seq.start();
        seq.handle(PipelineEvent::Control(ControlRequest::Pause));
        seq.handle(PipelineEvent::Control(ControlRequest::Pause));
        assert!(seq.state().paused);
        assert_eq!(seq.state().stage, StageState::VideoEncoding);
        seq.handle(PipelineEvent::Control(ControlRequest::Resume));
        seq.handle(PipelineEvent::Control(ControlRequest::Resume));
        assert!(!seq.state().paused);
        assert!(log.contains("Process Paused"));
        assert!(log.contains("Process Resumed"));
    }

    #[test]
    fn test_mismatched_completion_is_ignored() {
        let fixture = Fixture::new();
        let a = fixture.input("A.mkv");
        let runner = RecordingRunner::default();
        let log = MemoryLog::new();
        let mut seq = fixture.sequencer(
            vec![a],
            Box::new(runner.clone()),
            Box::new(RecordingChecksum::default()),
            log.clone(),
        );

        seq.start();
        seq.handle(PipelineEvent::StageOutput {
            role: StageRole::VideoEncode,
            segment: "[12.5%] 300/2400 frames".to_string(),
        });
        seq.handle(finished(StageRole::Mux, 0));

        assert_eq!(seq.state().stage, StageState::VideoEncoding);
        assert_eq!(runner.launched().len(), 1);
        assert!(
            log.progress_history()
                .contains(&"[12.5%] 300/2400 frames".to_string())
        );
    }

    #[test]
    fn test_intermediates_purged_between_files() {
        let fixture = Fixture::new();
        let a = fixture.input("A.mkv");
        let b = fixture.input("B.mkv");
        let mut seq = fixture.sequencer(
            vec![a, b],
            Box::new(RecordingRunner::default()),
            Box::new(RecordingChecksum::default()),
            MemoryLog::new(),
        );

        seq.start();
        let scratch = fixture.temp.child("scratch");
        scratch.child("Output.mkv").write_str("video").unwrap();
        scratch.child("OutputAudio1.wav").write_str("pcm").unwrap();

        seq.handle(metadata(1));
        seq.handle(finished(StageRole::VideoEncode, 0));
        seq.handle(finished(StageRole::Mux, 0));
        seq.handle(checksum_done(&seq));

        assert_eq!(std::fs::read_dir(scratch.path()).unwrap().count(), 0);
    }
}
