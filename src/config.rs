use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{GxsError, Result};

pub const DEFAULT_CONFIG_FILE: &str = "gxs.toml";

fn default_true() -> bool {
    true
}

fn default_invalid_invocation_exit_code() -> i32 {
    -1
}

fn default_checksum_block_size() -> usize {
    64 * 1024
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub tools: ToolsConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub options: OptionsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    /// Directory holding the external tools. Programs are looked up on PATH
    /// when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub directory: Option<PathBuf>,
    /// Audio extractor
    pub ffmpeg: String,
    /// AAC encoder
    pub aac_encoder: String,
    /// Muxer override; defaults to mkvmerge32/mkvmerge64 by architecture
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mkvmerge: Option<String>,
    /// Encoder override; defaults to the x264 build matching the profile
    #[serde(skip_serializing_if = "Option::is_none")]
    pub encoder: Option<String>,
    /// MediaInfo CLI used for track languages
    pub mediainfo: String,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            directory: None,
            ffmpeg: "ffmpeg".to_string(),
            aac_encoder: "neroAacEnc".to_string(),
            mkvmerge: None,
            encoder: None,
            mediainfo: "mediainfo".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Intermediate files for the file being processed
    pub scratch_dir: PathBuf,
    /// Profile TOML files
    pub profiles_dir: PathBuf,
    /// Default destination of finished files
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_dir: Option<PathBuf>,
    /// Treat any non-zero stage exit as a failure of the current file
    #[serde(default = "default_true")]
    pub strict_exit_codes: bool,
    /// Exit code external tools use for a rejected command line
    #[serde(default = "default_invalid_invocation_exit_code")]
    pub invalid_invocation_exit_code: i32,
    /// Read size of the checksum pass
    #[serde(default = "default_checksum_block_size")]
    pub checksum_block_size: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            scratch_dir: PathBuf::from(".gxs/scratch"),
            profiles_dir: PathBuf::from(".gxs/profiles"),
            output_dir: None,
            strict_exit_codes: default_true(),
            invalid_invocation_exit_code: default_invalid_invocation_exit_code(),
            checksum_block_size: default_checksum_block_size(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OptionsConfig {
    /// Command run once after a run completes normally, e.g. `["shutdown", "-h", "now"]`
    pub on_completion: Vec<String>,
    pub remember_profile: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous_profile: Option<String>,
    pub remember_output: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous_output: Option<PathBuf>,
}

impl Config {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| GxsError::Config(format!("Failed to read config file: {}", e)))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| GxsError::Config(format!("Failed to parse config file: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| GxsError::Config(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(path, content)
            .map_err(|e| GxsError::Config(format!("Failed to write config file: {}", e)))?;

        Ok(())
    }

    /// Load `path` when it exists, otherwise fall back to defaults.
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if path.exists() {
            Self::from_file(path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.pipeline.checksum_block_size == 0 {
            return Err(GxsError::Config(
                "checksum_block_size must be greater than zero".to_string(),
            ));
        }
        let sentinel = self.pipeline.invalid_invocation_exit_code;
        if sentinel == 0 || (cfg!(unix) && sentinel & 0xFF == 0) {
            return Err(GxsError::Config(
                "invalid_invocation_exit_code cannot be the success code".to_string(),
            ));
        }
        Ok(())
    }

    /// Profile to use when none was given on the command line.
    pub fn remembered_profile(&self) -> Option<&str> {
        if self.options.remember_profile {
            self.options.previous_profile.as_deref()
        } else {
            None
        }
    }

    /// Output directory to use when none was given on the command line.
    pub fn remembered_output(&self) -> Option<&Path> {
        if self.options.remember_output {
            self.options
                .previous_output
                .as_deref()
                .or(self.pipeline.output_dir.as_deref())
        } else {
            self.pipeline.output_dir.as_deref()
        }
    }

    /// Record the choices of a run. Returns whether anything changed.
    pub fn remember(&mut self, profile: &str, output: &Path) -> bool {
        let mut changed = false;
        if self.options.remember_profile
            && self.options.previous_profile.as_deref() != Some(profile)
        {
            self.options.previous_profile = Some(profile.to_string());
            changed = true;
        }
        if self.options.remember_output && self.options.previous_output.as_deref() != Some(output)
        {
            self.options.previous_output = Some(output.to_path_buf());
            changed = true;
        }
        changed
    }
}
