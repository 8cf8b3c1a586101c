//! Audio track planning from `mkvmerge --identify` output.

use std::path::Path;
use tracing::debug;

use crate::command::{StageCommand, ToolCommands};

/// Extract/encode pair for one audio track of the current file.
#[derive(Debug, Clone, PartialEq)]
pub struct PlannedTrack {
    /// 1-based position among the audio tracks, used in intermediate names
    pub sequence: usize,
    /// Container track id as reported by the probe
    pub track_index: String,
    pub extract: StageCommand,
    pub encode: StageCommand,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AudioTrackPlan {
    tracks: Vec<PlannedTrack>,
}

impl AudioTrackPlan {
    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    /// Track by 1-based sequence number.
    pub fn get(&self, sequence: usize) -> Option<&PlannedTrack> {
        sequence.checked_sub(1).and_then(|i| self.tracks.get(i))
    }

    pub fn tracks(&self) -> &[PlannedTrack] {
        &self.tracks
    }
}

pub struct AudioTrackPlanner<'a> {
    commands: &'a ToolCommands,
}

impl<'a> AudioTrackPlanner<'a> {
    pub fn new(commands: &'a ToolCommands) -> Self {
        Self { commands }
    }

    /// Build the plan for `source`. A listing without audio tracks yields an
    /// empty plan.
    pub fn plan(&self, probe_output: &str, source: &Path, quality: f64) -> AudioTrackPlan {
        let tracks = audio_track_ids(probe_output)
            .into_iter()
            .enumerate()
            .map(|(i, track_index)| {
                let sequence = i + 1;
                PlannedTrack {
                    sequence,
                    extract: self.commands.extract_audio(source, &track_index, sequence),
                    encode: self.commands.encode_audio(sequence, quality),
                    track_index,
                }
            })
            .collect::<Vec<_>>();

        debug!("Planned {} audio track(s) for {}", tracks.len(), source.display());
        AudioTrackPlan { tracks }
    }
}

/// Track ids of lines shaped like `Track ID 2: audio (A_AAC)`.
fn audio_track_ids(probe_output: &str) -> Vec<String> {
    probe_output
        .lines()
        .filter_map(|line| {
            let tokens: Vec<&str> = line.split_whitespace().collect();
            match tokens.as_slice() {
                ["Track", _, id, "audio", ..] => Some(id.trim_end_matches(':').to_string()),
                _ => None,
            }
        })
        .collect()
}
