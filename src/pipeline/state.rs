use std::collections::VecDeque;
use std::fmt;
use std::path::{Path, PathBuf};

use crate::command::StageRole;

/// Logical position of the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StageState {
    Idle,
    VideoEncoding,
    AudioAnalyzing,
    AudioExtracting,
    AudioEncoding,
    Muxing,
    Checksumming,
    Completed,
    Halted,
}

impl StageState {
    pub fn is_terminal(self) -> bool {
        matches!(self, StageState::Completed | StageState::Halted)
    }

    /// Process role that is live in this state, if any.
    pub fn role(self) -> Option<StageRole> {
        match self {
            StageState::VideoEncoding => Some(StageRole::VideoEncode),
            StageState::AudioAnalyzing => Some(StageRole::Probe),
            StageState::AudioExtracting => Some(StageRole::AudioExtract),
            StageState::AudioEncoding => Some(StageRole::AudioEncode),
            StageState::Muxing => Some(StageRole::Mux),
            StageState::Idle
            | StageState::Checksumming
            | StageState::Completed
            | StageState::Halted => None,
        }
    }
}

impl fmt::Display for StageState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// How non-zero exit codes other than the invalid-invocation sentinel are
/// treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitCodePolicy {
    /// The current file fails and the run moves to the next file
    Strict,
    /// A warning is logged and the pipeline proceeds as on success
    Lenient,
}

impl ExitCodePolicy {
    pub fn from_strict(strict: bool) -> Self {
        if strict {
            ExitCodePolicy::Strict
        } else {
            ExitCodePolicy::Lenient
        }
    }
}

/// Files of one run in submission order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InputQueue {
    files: VecDeque<PathBuf>,
}

impl InputQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push<P: Into<PathBuf>>(&mut self, path: P) {
        self.files.push_back(path.into());
    }

    pub fn pop_front(&mut self) -> Option<PathBuf> {
        self.files.pop_front()
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Path> {
        self.files.iter().map(PathBuf::as_path)
    }
}

impl<P: Into<PathBuf>> FromIterator<P> for InputQueue {
    fn from_iter<I: IntoIterator<Item = P>>(iter: I) -> Self {
        Self {
            files: iter.into_iter().map(Into::into).collect(),
        }
    }
}

/// Counters and flags of a run, owned by the sequencer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineState {
    pub stage: StageState,
    pub paused: bool,
    /// 1-based index of the file being processed; 0 before the first
    pub current_file_index: usize,
    pub total_files: usize,
    /// Set once by a halt and never cleared within the run
    pub halt_requested: bool,
    /// 1-based audio track in progress; 0 outside the audio stages
    pub current_track_number: usize,
    pub total_tracks: usize,
    pub last_encoded_output_path: Option<PathBuf>,
}

impl PipelineState {
    pub fn new(total_files: usize) -> Self {
        Self {
            stage: StageState::Idle,
            paused: false,
            current_file_index: 0,
            total_files,
            halt_requested: false,
            current_track_number: 0,
            total_tracks: 0,
            last_encoded_output_path: None,
        }
    }
}

/// Why a run stopped before draining its queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HaltReason {
    UserRequest,
    InvalidInvocation(StageRole),
    LaunchFailed(String),
}

impl fmt::Display for HaltReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HaltReason::UserRequest => write!(f, "stopped by request"),
            HaltReason::InvalidInvocation(role) => {
                write!(f, "invalid command line for {} stage", role)
            }
            HaltReason::LaunchFailed(message) => write!(f, "{}", message),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Completed,
    Halted(HaltReason),
}

/// A queued file that produced no output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedFile {
    pub path: PathBuf,
    pub reason: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queue_preserves_submission_order() {
        let mut queue: InputQueue = ["b.mkv", "a.mkv"].into_iter().collect();
        queue.push("c.mkv");
        assert_eq!(queue.len(), 3);
        assert_eq!(queue.pop_front(), Some(PathBuf::from("b.mkv")));
        assert_eq!(
            queue.iter().collect::<Vec<_>>(),
            vec![Path::new("a.mkv"), Path::new("c.mkv")]
        );
    }

    #[test]
    fn test_stage_roles() {
        assert_eq!(StageState::AudioAnalyzing.role(), Some(StageRole::Probe));
        assert_eq!(StageState::Checksumming.role(), None);
        assert!(StageState::Halted.is_terminal());
        assert!(!StageState::Muxing.is_terminal());
    }
}
