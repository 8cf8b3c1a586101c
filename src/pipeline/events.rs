use std::path::PathBuf;

use crate::command::StageRole;
use crate::error::Result;
use crate::metadata::TrackLanguages;

/// Outcome of one stage process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageCompletion {
    pub role: StageRole,
    /// `None` when the process was ended by a signal
    pub exit_code: Option<i32>,
    /// Accumulated standard output
    pub output: String,
}

impl StageCompletion {
    pub fn new(role: StageRole, exit_code: Option<i32>) -> Self {
        Self {
            role,
            exit_code,
            output: String::new(),
        }
    }

    pub fn with_output<S: Into<String>>(mut self, output: S) -> Self {
        self.output = output.into();
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlRequest {
    Pause,
    Resume,
    Halt,
}

/// Everything the sequencer reacts to.
#[derive(Debug)]
pub enum PipelineEvent {
    StageFinished(StageCompletion),
    /// Latest output segment of the live stage
    StageOutput { role: StageRole, segment: String },
    /// Renamed output path, or why the checksum pass stopped
    ChecksumFinished(Result<PathBuf>),
    /// Track languages of the queued file at `file_index`
    MetadataReady {
        file_index: usize,
        languages: TrackLanguages,
    },
    Control(ControlRequest),
}
