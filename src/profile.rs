//! Encoding profiles.
//!
//! A profile is a named, persisted [`JobConfig`]. Profiles live as TOML files
//! in the profiles directory, one table per settings section. The pipeline
//! loads a profile once at run start and never writes it back.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::error::{GxsError, Result};

pub const DEFAULT_PROFILE_NAME: &str = "Default";
const PROFILE_EXTENSION: &str = "toml";

/// Level names accepted by x264, in the order the profile editor lists them.
pub const LEVELS: &[&str] = &[
    "auto", "1", "1b", "1.1", "1.2", "1.3", "2", "2.1", "2.2", "3", "3.1", "3.2", "4", "4.1",
    "4.2", "5", "5.1", "5.2",
];

/// Immutable per-run encoding configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct JobConfig {
    #[serde(rename = "System", default)]
    pub system: SystemSettings,
    #[serde(rename = "Common", default)]
    pub common: CommonSettings,
    #[serde(rename = "Frame Type", default)]
    pub frame_type: FrameTypeSettings,
    #[serde(rename = "Rate Control", default)]
    pub rate_control: RateControlSettings,
    #[serde(rename = "Advanced", default)]
    pub advanced: AdvancedSettings,
    #[serde(rename = "Misc", default)]
    pub misc: MiscSettings,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Architecture {
    #[serde(rename = "32")]
    X86,
    #[serde(rename = "64")]
    X64,
}

impl Architecture {
    pub fn host() -> Self {
        if cfg!(target_pointer_width = "64") {
            Architecture::X64
        } else {
            Architecture::X86
        }
    }

    pub fn bits(self) -> u32 {
        match self {
            Architecture::X86 => 32,
            Architecture::X64 => 64,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SystemSettings {
    pub architecture: Architecture,
    pub threads: u32,
}

impl Default for SystemSettings {
    fn default() -> Self {
        Self {
            architecture: Architecture::host(),
            threads: num_cpus::get() as u32,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EncodingMode {
    /// Constant quantizer (`--qp`)
    Quantizer,
    /// Constant ratefactor (`--crf`)
    Ratefactor,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tuning {
    None,
    Film,
    Animation,
    Grain,
}

impl Tuning {
    pub fn is_none(self) -> bool {
        self == Tuning::None
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Preset {
    Ultrafast,
    Superfast,
    Veryfast,
    Faster,
    Fast,
    Medium,
    Slow,
    Slower,
    Veryslow,
    Placebo,
}

impl Preset {
    pub fn as_str(self) -> &'static str {
        match self {
            Preset::Ultrafast => "ultrafast",
            Preset::Superfast => "superfast",
            Preset::Veryfast => "veryfast",
            Preset::Faster => "faster",
            Preset::Fast => "fast",
            Preset::Medium => "medium",
            Preset::Slow => "slow",
            Preset::Slower => "slower",
            Preset::Veryslow => "veryslow",
            Preset::Placebo => "placebo",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AvcProfile {
    Baseline,
    Main,
    High,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CommonSettings {
    pub encoding_mode: EncodingMode,
    pub encoding_quality: f64,
    pub tuning: Tuning,
    pub preset: Preset,
    pub avc_profile: AvcProfile,
    pub level: String,
    pub ten_bit: bool,
    /// Set when the frame type, rate control and advanced sections were
    /// customized and must be rendered.
    pub quick_settings: bool,
}

impl Default for CommonSettings {
    fn default() -> Self {
        Self {
            encoding_mode: EncodingMode::Ratefactor,
            encoding_quality: 23.0,
            tuning: Tuning::None,
            preset: Preset::Medium,
            avc_profile: AvcProfile::High,
            level: "auto".to_string(),
            ten_bit: false,
            quick_settings: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BFramePyramid {
    None,
    Strict,
    Normal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FrameTypeSettings {
    pub deblocking: bool,
    pub deblocking_strength: i32,
    pub deblocking_threshold: i32,
    pub gop_max_size: u32,
    pub gop_min_size: u32,
    pub bframe_weighted: bool,
    pub bframes: u32,
    pub bframe_bias: i32,
    /// 0 = disabled, 1 = fast, 2 = optimal
    pub bframe_adaptive: u32,
    pub bframe_pyramid: BFramePyramid,
    pub references: u32,
    pub scene_cut: u32,
}

impl Default for FrameTypeSettings {
    fn default() -> Self {
        Self {
            deblocking: true,
            deblocking_strength: 0,
            deblocking_threshold: 0,
            gop_max_size: 250,
            gop_min_size: 0,
            bframe_weighted: true,
            bframes: 3,
            bframe_bias: 0,
            bframe_adaptive: 1,
            bframe_pyramid: BFramePyramid::Normal,
            references: 3,
            scene_cut: 40,
        }
    }
}

/// Per-frame-type quantizer bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QpBounds {
    pub i: u32,
    pub p: u32,
    pub b: u32,
}

impl QpBounds {
    pub const fn uniform(value: u32) -> Self {
        Self {
            i: value,
            p: value,
            b: value,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateControlSettings {
    pub qp_min: QpBounds,
    pub qp_max: QpBounds,
    pub qp_step: u32,
    pub qp_comp: f64,
    pub ip_ratio: f64,
    pub pb_ratio: f64,
    pub aq_mode: u32,
    pub aq_strength: f64,
    pub mb_tree: bool,
    pub rc_lookahead: u32,
}

impl Default for RateControlSettings {
    fn default() -> Self {
        Self {
            qp_min: QpBounds::uniform(0),
            qp_max: QpBounds::uniform(81),
            qp_step: 4,
            qp_comp: 0.60,
            ip_ratio: 1.40,
            pb_ratio: 1.30,
            aq_mode: 1,
            aq_strength: 1.0,
            mb_tree: true,
            rc_lookahead: 40,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MeMethod {
    Dia,
    Hex,
    Umh,
    Esa,
    Tesa,
}

impl MeMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            MeMethod::Dia => "dia",
            MeMethod::Hex => "hex",
            MeMethod::Umh => "umh",
            MeMethod::Esa => "esa",
            MeMethod::Tesa => "tesa",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MvPrediction {
    None,
    Spatial,
    Temporal,
    Auto,
}

impl MvPrediction {
    pub fn as_str(self) -> &'static str {
        match self {
            MvPrediction::None => "none",
            MvPrediction::Spatial => "spatial",
            MvPrediction::Temporal => "temporal",
            MvPrediction::Auto => "auto",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResizeMethod {
    Fastbilinear,
    Bilinear,
    Bicubic,
    Experimental,
    Point,
    Area,
    Bicublin,
    Gauss,
    Sinc,
    Lanczos,
    Spline,
}

impl ResizeMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            ResizeMethod::Fastbilinear => "fastbilinear",
            ResizeMethod::Bilinear => "bilinear",
            ResizeMethod::Bicubic => "bicubic",
            ResizeMethod::Experimental => "experimental",
            ResizeMethod::Point => "point",
            ResizeMethod::Area => "area",
            ResizeMethod::Bicublin => "bicublin",
            ResizeMethod::Gauss => "gauss",
            ResizeMethod::Sinc => "sinc",
            ResizeMethod::Lanczos => "lanczos",
            ResizeMethod::Spline => "spline",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdvancedSettings {
    pub me_method: MeMethod,
    pub me_range: u32,
    pub subme: u32,
    pub mv_prediction: MvPrediction,
    pub trellis: u32,
    pub psy_rd_strength: f64,
    pub psy_trellis_strength: f64,
    pub fast_pskip: bool,
    pub resize: bool,
    pub resize_method: ResizeMethod,
    pub width: u32,
    pub height: u32,
}

impl Default for AdvancedSettings {
    fn default() -> Self {
        Self {
            me_method: MeMethod::Hex,
            me_range: 16,
            subme: 7,
            mv_prediction: MvPrediction::Spatial,
            trellis: 1,
            psy_rd_strength: 1.0,
            psy_trellis_strength: 0.0,
            fast_pskip: true,
            resize: false,
            resize_method: ResizeMethod::Bicubic,
            width: 1280,
            height: 720,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MiscSettings {
    /// Keep the source audio tracks instead of re-encoding them to AAC
    pub use_source_audio: bool,
    /// neroAacEnc `-q` value
    pub audio_quality: f64,
    /// Appended verbatim to the encoder arguments
    pub custom_command: String,
    /// Last rendered encoder command line, informational only
    pub command_line: String,
}

impl Default for MiscSettings {
    fn default() -> Self {
        Self {
            use_source_audio: true,
            audio_quality: 0.5,
            custom_command: String::new(),
            command_line: String::new(),
        }
    }
}

impl JobConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            GxsError::Profile(format!("Failed to read profile {}: {}", path.display(), e))
        })?;

        let config = Self::parse_toml(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn parse_toml(content: &str) -> Result<Self> {
        toml::from_str(content)
            .map_err(|e| GxsError::Profile(format!("Failed to parse profile: {}", e)))
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| GxsError::Profile(format!("Failed to serialize profile: {}", e)))?;

        std::fs::write(path, content)
            .map_err(|e| GxsError::Profile(format!("Failed to write profile: {}", e)))?;

        Ok(())
    }

    /// Reject values the encoder would refuse outright.
    pub fn validate(&self) -> Result<()> {
        let common = &self.common;
        if !LEVELS.contains(&common.level.as_str()) {
            return Err(GxsError::Profile(format!("Unknown level '{}'", common.level)));
        }

        let quality_range = match common.encoding_mode {
            EncodingMode::Quantizer => 0.0..=81.0,
            EncodingMode::Ratefactor => -12.0..=51.0,
        };
        if !quality_range.contains(&common.encoding_quality) {
            return Err(GxsError::Profile(format!(
                "Encoding quality {} out of range {:?}",
                common.encoding_quality, quality_range
            )));
        }

        if self.system.threads == 0 {
            return Err(GxsError::Profile("Thread count must be at least 1".to_string()));
        }

        let frame = &self.frame_type;
        if !(-3..=3).contains(&frame.deblocking_strength)
            || !(-3..=3).contains(&frame.deblocking_threshold)
        {
            return Err(GxsError::Profile("Deblocking values must be within -3..=3".to_string()));
        }
        if frame.bframes > 16 || frame.bframe_adaptive > 2 {
            return Err(GxsError::Profile("Invalid B-frame settings".to_string()));
        }
        if !(1..=16).contains(&frame.references) {
            return Err(GxsError::Profile("Reference frames must be within 1..=16".to_string()));
        }

        let rc = &self.rate_control;
        if rc.aq_mode > 4 {
            return Err(GxsError::Profile(format!("Unknown AQ mode {}", rc.aq_mode)));
        }

        let advanced = &self.advanced;
        if advanced.subme > 10 || advanced.trellis > 2 {
            return Err(GxsError::Profile("Invalid subme/trellis settings".to_string()));
        }

        Ok(())
    }
}

/// Directory of `<name>.toml` profiles.
#[derive(Debug, Clone)]
pub struct ProfileStore {
    dir: PathBuf,
}

impl ProfileStore {
    pub fn new<P: Into<PathBuf>>(dir: P) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{}.{}", name, PROFILE_EXTENSION))
    }

    /// Profile names sorted alphabetically.
    pub fn list(&self) -> Result<Vec<String>> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }

        let mut names = Vec::new();
        for entry in std::fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(PROFILE_EXTENSION) {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                names.push(stem.to_string());
            }
        }
        names.sort();
        Ok(names)
    }

    pub fn load(&self, name: &str) -> Result<JobConfig> {
        let path = self.path_for(name);
        if !path.exists() {
            return Err(GxsError::Profile(format!("Profile '{}' does not exist", name)));
        }
        debug!("Loading profile {} from {}", name, path.display());
        JobConfig::from_file(path)
    }

    pub fn save(&self, name: &str, config: &JobConfig) -> Result<()> {
        if name.trim().is_empty() {
            return Err(GxsError::Profile("Profile names cannot be empty".to_string()));
        }
        std::fs::create_dir_all(&self.dir)?;
        config.save_to_file(self.path_for(name))
    }

    /// Create the `Default` profile when the directory holds none.
    pub fn ensure_default(&self) -> Result<()> {
        if self.list()?.is_empty() {
            info!("No profiles found, creating '{}'", DEFAULT_PROFILE_NAME);
            let mut config = JobConfig::default();
            config.misc.command_line =
                crate::command::EncoderCommand::render(&config).command_line();
            self.save(DEFAULT_PROFILE_NAME, &config)?;
        }
        Ok(())
    }
}
