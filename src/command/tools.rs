use std::path::{Path, PathBuf};

use crate::config::ToolsConfig;
use crate::profile::{Architecture, JobConfig};

use super::encoder::{EncoderCommand, decimal};
use super::{StageCommand, StageRole};

const SCRATCH_VIDEO: &str = "Output.mkv";
const ENCODED_MARKER: &str = "[Encoded]";

/// Resolved program names for every external stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolPaths {
    pub directory: Option<PathBuf>,
    pub encoder: Option<String>,
    pub ffmpeg: String,
    pub aac_encoder: String,
    pub mkvmerge: String,
}

impl ToolPaths {
    pub fn resolve(tools: &ToolsConfig, architecture: Architecture) -> Self {
        let mkvmerge = tools.mkvmerge.clone().unwrap_or_else(|| {
            format!(
                "mkvmerge{}{}",
                architecture.bits(),
                std::env::consts::EXE_SUFFIX
            )
        });

        Self {
            directory: tools.directory.clone(),
            encoder: tools.encoder.clone(),
            ffmpeg: tools.ffmpeg.clone(),
            aac_encoder: tools.aac_encoder.clone(),
            mkvmerge,
        }
    }

    /// Program path, prefixed with the tools directory when one is set.
    pub fn program(&self, name: &str) -> String {
        match &self.directory {
            Some(dir) => dir.join(name).to_string_lossy().to_string(),
            None => name.to_string(),
        }
    }
}

/// Audio source of the mux stage.
#[derive(Debug, Clone, PartialEq)]
pub enum MuxAudio {
    /// Copy every audio track of the source file
    Source,
    /// Re-encoded AAC tracks, in sequence order
    Encoded {
        tracks: Vec<MuxTrack>,
        quality: f64,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct MuxTrack {
    pub sequence: usize,
    pub language: Option<String>,
}

/// Builds the tool stages of one run against fixed scratch and output
/// directories.
#[derive(Debug, Clone)]
pub struct ToolCommands {
    tools: ToolPaths,
    scratch_dir: PathBuf,
    output_dir: PathBuf,
}

impl ToolCommands {
    pub fn new<P1: Into<PathBuf>, P2: Into<PathBuf>>(
        tools: ToolPaths,
        scratch_dir: P1,
        output_dir: P2,
    ) -> Self {
        Self {
            tools,
            scratch_dir: scratch_dir.into(),
            output_dir: output_dir.into(),
        }
    }

    pub fn scratch_dir(&self) -> &Path {
        &self.scratch_dir
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn scratch_video(&self) -> PathBuf {
        self.scratch_dir.join(SCRATCH_VIDEO)
    }

    pub fn scratch_wav(&self, sequence: usize) -> PathBuf {
        self.scratch_dir.join(format!("OutputAudio{}.wav", sequence))
    }

    pub fn scratch_aac(&self, sequence: usize) -> PathBuf {
        self.scratch_dir.join(format!("OutputAudio{}.aac", sequence))
    }

    /// `<output>/<stem>[Encoded].mkv`
    pub fn encoded_output(&self, input: &Path) -> PathBuf {
        let stem = input
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default();
        self.output_dir
            .join(format!("{}{}.mkv", stem, ENCODED_MARKER))
    }

    pub fn video_encode(&self, config: &JobConfig, input: &Path) -> StageCommand {
        let mut invocation = EncoderCommand::render(config);
        if let Some(encoder) = &self.tools.encoder {
            invocation.binary = encoder.clone();
        }
        invocation.into_stage(
            self.tools.directory.as_deref(),
            input,
            self.scratch_video().as_path(),
        )
    }

    /// `mkvmerge --identify <input>`
    pub fn probe(&self, input: &Path) -> StageCommand {
        StageCommand::new(
            StageRole::Probe,
            self.tools.program(&self.tools.mkvmerge),
            "Identify tracks",
        )
        .arg("--identify")
        .path(input)
    }

    /// `ffmpeg -i <input> -map 0:<track> -f wav -y <scratch>/OutputAudio<n>.wav`
    pub fn extract_audio(&self, input: &Path, track_index: &str, sequence: usize) -> StageCommand {
        StageCommand::new(
            StageRole::AudioExtract,
            self.tools.program(&self.tools.ffmpeg),
            format!("Extract audio track {}", track_index),
        )
        .arg("-i")
        .path(input)
        .flag("-map", format!("0:{}", track_index))
        .flag("-f", "wav")
        .arg("-y")
        .path(self.scratch_wav(sequence))
    }

    /// `neroAacEnc -ignorelength -q <quality> -if <wav> -of <aac>`
    pub fn encode_audio(&self, sequence: usize, quality: f64) -> StageCommand {
        StageCommand::new(
            StageRole::AudioEncode,
            self.tools.program(&self.tools.aac_encoder),
            format!("Encode audio stream {}", sequence),
        )
        .arg("-ignorelength")
        .flag("-q", decimal(quality, 2))
        .arg("-if")
        .path(self.scratch_wav(sequence))
        .arg("-of")
        .path(self.scratch_aac(sequence))
    }

    pub fn mux(
        &self,
        input: &Path,
        video_language: Option<&str>,
        audio: &MuxAudio,
    ) -> StageCommand {
        let mut cmd = StageCommand::new(
            StageRole::Mux,
            self.tools.program(&self.tools.mkvmerge),
            "Merge files",
        )
        .arg("-o")
        .path(self.encoded_output(input));

        if let Some(language) = video_language {
            cmd = cmd.flag("--language", format!("0:{}", language));
        }
        cmd = cmd.path(self.scratch_video());

        match audio {
            MuxAudio::Source => cmd.arg("-D").path(input),
            MuxAudio::Encoded { tracks, quality } => {
                for track in tracks {
                    cmd = cmd.arg("--no-chapters");
                    if let Some(language) = &track.language {
                        cmd = cmd.flag("--language", format!("0:{}", language));
                    }
                    cmd = cmd
                        .flag("--track-name", format!("0:AAC LC {}", decimal(*quality, 2)))
                        .path(self.scratch_aac(track.sequence));
                }
                cmd.args(["-D", "-A"]).path(input)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn commands() -> ToolCommands {
        let tools = ToolsConfig {
            directory: Some(PathBuf::from("tools")),
            ..ToolsConfig::default()
        };
        ToolCommands::new(
            ToolPaths::resolve(&tools, Architecture::X64),
            "scratch",
            "out",
        )
    }

    fn path(p: &str) -> String {
        PathBuf::from(p).to_string_lossy().to_string()
    }

    #[test]
    fn test_mkvmerge_follows_architecture_unless_overridden() {
        let mut tools = ToolsConfig::default();
        let paths = ToolPaths::resolve(&tools, Architecture::X86);
        assert!(paths.mkvmerge.starts_with("mkvmerge32"));

        tools.mkvmerge = Some("mkvmerge".to_string());
        assert_eq!(ToolPaths::resolve(&tools, Architecture::X64).mkvmerge, "mkvmerge");
    }

    #[test]
    fn test_probe_and_audio_commands() {
        let cmds = commands();
        let input = Path::new("in/A.mkv");

        let probe = cmds.probe(input);
        assert_eq!(probe.role, StageRole::Probe);
        assert_eq!(probe.args, vec!["--identify".to_string(), path("in/A.mkv")]);

        let extract = cmds.extract_audio(input, "2", 1);
        assert_eq!(extract.program, path("tools/ffmpeg"));
        assert_eq!(
            extract.args,
            vec![
                "-i".to_string(),
                path("in/A.mkv"),
                "-map".to_string(),
                "0:2".to_string(),
                "-f".to_string(),
                "wav".to_string(),
                "-y".to_string(),
                path("scratch/OutputAudio1.wav"),
            ]
        );

        let encode = cmds.encode_audio(1, 0.5);
        assert_eq!(
            encode.args,
            vec![
                "-ignorelength".to_string(),
                "-q".to_string(),
                "0.5".to_string(),
                "-if".to_string(),
                path("scratch/OutputAudio1.wav"),
                "-of".to_string(),
                path("scratch/OutputAudio1.aac"),
            ]
        );
    }

    #[test]
    fn test_mux_source_audio_passthrough() {
        let cmds = commands();
        let mux = cmds.mux(Path::new("in/A.mkv"), Some("jpn"), &MuxAudio::Source);
        assert_eq!(
            mux.args,
            vec![
                "-o".to_string(),
                path("out/A[Encoded].mkv"),
                "--language".to_string(),
                "0:jpn".to_string(),
                path("scratch/Output.mkv"),
                "-D".to_string(),
                path("in/A.mkv"),
            ]
        );
    }

    #[test]
    fn test_mux_encoded_tracks() {
        let cmds = commands();
        let audio = MuxAudio::Encoded {
            tracks: vec![
                MuxTrack {
                    sequence: 1,
                    language: Some("eng".to_string()),
                },
                MuxTrack {
                    sequence: 2,
                    language: None,
                },
            ],
            quality: 0.45,
        };
        let mux = cmds.mux(Path::new("A.mkv"), None, &audio);
        assert_eq!(
            mux.args,
            vec![
                "-o".to_string(),
                path("out/A[Encoded].mkv"),
                path("scratch/Output.mkv"),
                "--no-chapters".to_string(),
                "--language".to_string(),
                "0:eng".to_string(),
                "--track-name".to_string(),
                "0:AAC LC 0.45".to_string(),
                path("scratch/OutputAudio1.aac"),
                "--no-chapters".to_string(),
                "--track-name".to_string(),
                "0:AAC LC 0.45".to_string(),
                path("scratch/OutputAudio2.aac"),
                "-D".to_string(),
                "-A".to_string(),
                "A.mkv".to_string(),
            ]
        );
    }

    #[test]
    fn test_video_encode_uses_encoder_override() {
        let tools = ToolsConfig {
            encoder: Some("x264".to_string()),
            ..ToolsConfig::default()
        };
        let cmds = ToolCommands::new(ToolPaths::resolve(&tools, Architecture::X64), "s", "o");
        let stage = cmds.video_encode(&JobConfig::default(), Path::new("A.mkv"));
        assert_eq!(stage.program, "x264");
        assert_eq!(stage.args.last().map(String::as_str), Some("A.mkv"));
    }
}
