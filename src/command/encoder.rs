use std::path::Path;

use crate::profile::{
    AvcProfile, BFramePyramid, EncodingMode, JobConfig, MeMethod, MvPrediction, Preset, QpBounds,
    ResizeMethod, Tuning,
};

use super::{StageCommand, StageRole};

const DEFAULT_QUALITY: f64 = 23.0;
const DEFAULT_QP_MIN: u32 = 0;
const DEFAULT_QP_MAX: u32 = 81;

/// Rendered x264 invocation: binary name plus argument tokens, without the
/// input/output arguments the video stage appends.
#[derive(Debug, Clone, PartialEq)]
pub struct EncoderInvocation {
    pub binary: String,
    pub args: Vec<String>,
}

impl EncoderInvocation {
    /// Space-joined form kept in the profile for display.
    pub fn command_line(&self) -> String {
        std::iter::once(self.binary.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Build the video encode stage writing to `output` from `input`.
    pub fn into_stage<P: AsRef<Path>>(
        self,
        directory: Option<&Path>,
        input: P,
        output: P,
    ) -> StageCommand {
        let program = match directory {
            Some(dir) => dir.join(&self.binary).to_string_lossy().to_string(),
            None => self.binary,
        };
        StageCommand::new(StageRole::VideoEncode, program, "Video encode")
            .args(self.args)
            .arg("--quiet")
            .arg("--output")
            .path(output)
            .path(input)
    }
}

/// Renders a [`JobConfig`] into x264 arguments.
///
/// Flags are emitted only when the configured value deviates from x264's own
/// default, except for `--threads`, `--ref`, `--bframes`, `--rc-lookahead`,
/// `--subme` and `--trellis` which are always present. The frame type, rate
/// control and advanced groups are rendered only when `quick_settings` is set.
pub struct EncoderCommand<'a> {
    config: &'a JobConfig,
    args: Vec<String>,
}

impl<'a> EncoderCommand<'a> {
    pub fn render(config: &'a JobConfig) -> EncoderInvocation {
        let mut builder = Self {
            config,
            args: Vec::new(),
        };

        builder.push("--threads", config.system.threads.to_string());
        builder.common();
        if config.common.quick_settings {
            builder.frame_type();
            builder.rate_control();
            builder.advanced();
        }
        builder
            .args
            .extend(config.misc.custom_command.split_whitespace().map(str::to_string));

        EncoderInvocation {
            binary: binary_name(config),
            args: builder.args,
        }
    }

    fn push<S: Into<String>>(&mut self, flag: &str, value: S) {
        self.args.push(flag.to_string());
        self.args.push(value.into());
    }

    fn switch(&mut self, flag: &str) {
        self.args.push(flag.to_string());
    }

    fn tuned(&self) -> bool {
        !self.config.common.tuning.is_none()
    }

    fn common(&mut self) {
        let config = self.config;
        let common = &config.common;

        if !common.ten_bit {
            match common.avc_profile {
                AvcProfile::Baseline => self.push("--profile", "baseline"),
                AvcProfile::Main => self.push("--profile", "main"),
                AvcProfile::High => {}
            }
        }

        if common.preset != Preset::Medium {
            self.push("--preset", common.preset.as_str());
        }

        if common.level != "auto" {
            self.push("--level", common.level.clone());
        }

        match common.tuning {
            Tuning::None => {}
            Tuning::Film => self.push("--tune", "film"),
            Tuning::Animation => self.push("--tune", "animation"),
            Tuning::Grain => self.push("--tune", "grain"),
        }

        let quality = round_to(common.encoding_quality, 1);
        if quality != DEFAULT_QUALITY {
            match common.encoding_mode {
                EncodingMode::Quantizer => {
                    self.push("--qp", format!("{}", quality.round() as i64))
                }
                EncodingMode::Ratefactor => self.push("--crf", decimal(quality, 1)),
            }
        }
    }

    fn frame_type(&mut self) {
        let config = self.config;
        let frame = &config.frame_type;
        let preset = config.common.preset;

        if frame.scene_cut != 40 || preset == Preset::Ultrafast {
            self.push("--scenecut", frame.scene_cut.to_string());
        }

        self.push("--ref", frame.references.to_string());

        if !frame.deblocking {
            self.switch("--no-deblock");
        } else if frame.deblocking_strength != 0 || frame.deblocking_threshold != 0 || self.tuned()
        {
            self.push(
                "--deblock",
                format!("{}:{}", frame.deblocking_strength, frame.deblocking_threshold),
            );
        }

        if frame.gop_max_size != 250 {
            self.push("--keyint", frame.gop_max_size.to_string());
        }
        if frame.gop_min_size != 0 {
            self.push("--min-keyint", frame.gop_min_size.to_string());
        }

        self.push("--bframes", frame.bframes.to_string());
        if frame.bframes > 0 {
            if frame.bframe_adaptive != 1 {
                self.push("--b-adapt", frame.bframe_adaptive.to_string());
            }
            if frame.bframe_bias != 0 {
                self.push("--b-bias", frame.bframe_bias.to_string());
            }
            match frame.bframe_pyramid {
                BFramePyramid::None => self.push("--b-pyramid", "none"),
                BFramePyramid::Strict => self.push("--b-pyramid", "strict"),
                BFramePyramid::Normal => {}
            }
            if !frame.bframe_weighted {
                self.switch("--no-weightb");
            }
        }
    }

    fn rate_control(&mut self) {
        let config = self.config;
        let rc = &config.rate_control;
        let grain = config.common.tuning == Tuning::Grain;

        if !rc.mb_tree {
            self.switch("--no-mbtree");
        }

        self.push("--rc-lookahead", rc.rc_lookahead.to_string());

        if let Some(value) = qp_bound(rc.qp_min, DEFAULT_QP_MIN) {
            self.push("--qpmin", value);
        }
        if let Some(value) = qp_bound(rc.qp_max, DEFAULT_QP_MAX) {
            self.push("--qpmax", value);
        }

        if rc.qp_step != 4 {
            self.push("--qpstep", rc.qp_step.to_string());
        }

        for (flag, value, default) in [
            ("--qcomp", rc.qp_comp, 0.60),
            ("--ipratio", rc.ip_ratio, 1.40),
            ("--pbratio", rc.pb_ratio, 1.30),
        ] {
            let value = round_to(value, 2);
            if value != default || grain {
                self.push(flag, decimal(value, 2));
            }
        }

        if rc.aq_mode != 1 || config.common.preset == Preset::Ultrafast {
            self.push("--aq-mode", rc.aq_mode.to_string());
        }

        let aq_strength = round_to(rc.aq_strength, 1);
        if aq_strength != 1.0 || self.tuned() {
            self.push("--aq-strength", decimal(aq_strength, 1));
        }
    }

    fn advanced(&mut self) {
        let config = self.config;
        let advanced = &config.advanced;
        let preset = config.common.preset;

        if advanced.me_method != MeMethod::Hex {
            self.push("--me", advanced.me_method.as_str());
        }

        if advanced.me_range != 16 || preset >= Preset::Veryslow {
            self.push("--merange", advanced.me_range.to_string());
        }

        if advanced.mv_prediction != MvPrediction::Spatial {
            self.push("--direct", advanced.mv_prediction.as_str());
        } else if preset >= Preset::Slow {
            self.push("--direct", MvPrediction::Spatial.as_str());
        }

        self.push("--subme", advanced.subme.to_string());
        self.push("--trellis", advanced.trellis.to_string());

        let psy_rd = round_to(advanced.psy_rd_strength, 1);
        let psy_trellis = round_to(advanced.psy_trellis_strength, 1);
        if advanced.subme >= 6 && ((psy_rd, psy_trellis) != (1.0, 0.0) || self.tuned()) {
            self.push(
                "--psy-rd",
                format!("{}:{}", decimal(psy_rd, 1), decimal(psy_trellis, 1)),
            );
        }

        if !advanced.fast_pskip {
            self.switch("--no-fast-pskip");
        }

        if advanced.resize {
            let mut filter = format!(
                "resize:width={},height={}",
                advanced.width, advanced.height
            );
            if advanced.resize_method != ResizeMethod::Bicubic {
                filter.push_str(",method=");
                filter.push_str(advanced.resize_method.as_str());
            }
            self.push("--video-filter", filter);
        }
    }
}

/// `x264_{32|64}_tMod-{8|10}bit-all` with the platform executable suffix.
pub fn binary_name(config: &JobConfig) -> String {
    format!(
        "x264_{}_tMod-{}bit-all{}",
        config.system.architecture.bits(),
        if config.common.ten_bit { 10 } else { 8 },
        std::env::consts::EXE_SUFFIX
    )
}

fn qp_bound(bounds: QpBounds, default: u32) -> Option<String> {
    if bounds == QpBounds::uniform(default) {
        None
    } else if bounds.i == bounds.p && bounds.p == bounds.b {
        Some(bounds.i.to_string())
    } else {
        Some(format!("{}:{}:{}", bounds.i, bounds.p, bounds.b))
    }
}

fn round_to(value: f64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    (value * factor).round() / factor
}

/// Shortest decimal form with at most `places` digits, keeping one fractional
/// digit: `1.0`, `0.6`, `1.45`.
pub fn decimal(value: f64, places: usize) -> String {
    let mut text = format!("{:.*}", places, value);
    if text.contains('.') {
        while text.ends_with('0') && !text.ends_with(".0") {
            text.pop();
        }
    }
    text
}
