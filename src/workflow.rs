use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::process::Command;
use tracing::{info, warn};
use walkdir::WalkDir;

use crate::audio::{AudioTrackPlan, AudioTrackPlanner};
use crate::command::{EncoderCommand, ToolCommands, ToolPaths};
use crate::config::Config;
use crate::error::{GxsError, Result};
use crate::metadata::{MediaInfoCli, MetadataProvider, NoMetadata, TrackLanguages};
use crate::output_log::OutputLog;
use crate::pipeline::{ExitCodePolicy, InputQueue, Pipeline, RunReport, SequencerSettings};
use crate::profile::{Architecture, DEFAULT_PROFILE_NAME, JobConfig, ProfileStore};

const VIDEO_EXTENSIONS: [&str; 7] = ["mp4", "avi", "mov", "mkv", "wmv", "flv", "webm"];

/// Per-run choices from the command line.
#[derive(Debug, Clone, Default)]
pub struct EncodeRequest {
    pub profile: Option<String>,
    pub output_dir: Option<PathBuf>,
    pub lenient: bool,
}

/// Audio tracks and languages of a source file.
#[derive(Debug, Clone)]
pub struct ProbeSummary {
    pub plan: AudioTrackPlan,
    pub languages: TrackLanguages,
}

pub struct Workflow {
    config: Config,
    config_path: Option<PathBuf>,
    profiles: ProfileStore,
}

impl Workflow {
    /// `config_path` is where remembered options are written back; `None`
    /// keeps them in memory only.
    pub fn new(config: Config, config_path: Option<PathBuf>) -> Result<Self> {
        config.validate()?;
        let profiles = ProfileStore::new(&config.pipeline.profiles_dir);
        Ok(Self {
            config,
            config_path,
            profiles,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn profiles(&self) -> &ProfileStore {
        &self.profiles
    }

    /// Queue of the given files in submission order.
    pub fn build_queue(inputs: &[PathBuf]) -> InputQueue {
        inputs.iter().cloned().collect()
    }

    /// Queue of every video file under `input_dir`, sorted by path.
    pub fn scan_directory<P: AsRef<Path>>(input_dir: P) -> Result<InputQueue> {
        let input_dir = input_dir.as_ref();
        if !input_dir.is_dir() {
            return Err(GxsError::FileNotFound(input_dir.display().to_string()));
        }

        let mut video_files = Vec::new();
        for entry in WalkDir::new(input_dir).into_iter().filter_map(|e| e.ok()) {
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
                if VIDEO_EXTENSIONS.contains(&ext.to_lowercase().as_str()) {
                    video_files.push(path.to_path_buf());
                }
            }
        }
        video_files.sort();

        info!(
            "Found {} video files in {}",
            video_files.len(),
            input_dir.display()
        );
        Ok(video_files.into_iter().collect())
    }

    /// Profile name of a run: the request, then the remembered one, then
    /// `Default`.
    pub fn profile_name(&self, request: &EncodeRequest) -> String {
        request
            .profile
            .clone()
            .or_else(|| self.config.remembered_profile().map(str::to_string))
            .unwrap_or_else(|| DEFAULT_PROFILE_NAME.to_string())
    }

    /// Output directory of a run; it must already exist.
    pub fn output_dir(&self, request: &EncodeRequest) -> Result<PathBuf> {
        let dir = request
            .output_dir
            .clone()
            .or_else(|| self.config.remembered_output().map(Path::to_path_buf))
            .ok_or_else(|| GxsError::Config("No output directory selected".to_string()))?;

        if !dir.is_dir() {
            return Err(GxsError::FileNotFound(dir.display().to_string()));
        }
        Ok(dir)
    }

    pub fn load_profile(&self, name: &str) -> Result<JobConfig> {
        self.profiles.ensure_default()?;
        let config = self.profiles.load(name)?;
        config.validate()?;
        Ok(config)
    }

    /// Write a default profile named `name`.
    pub fn init_profile(&self, name: &str, force: bool) -> Result<PathBuf> {
        let path = self.profiles.path_for(name);
        if path.exists() && !force {
            return Err(GxsError::Profile(format!(
                "Profile '{}' already exists at {}",
                name,
                path.display()
            )));
        }

        let mut config = JobConfig::default();
        config.misc.command_line = EncoderCommand::render(&config).command_line();
        self.profiles.save(name, &config)?;
        info!("Wrote profile {} to {}", name, path.display());
        Ok(path)
    }

    /// Encoder command line a profile renders to.
    pub fn show_profile(&self, name: &str) -> Result<String> {
        let config = self.load_profile(name)?;
        Ok(EncoderCommand::render(&config).command_line())
    }

    fn tool_commands(&self, architecture: Architecture, output_dir: PathBuf) -> ToolCommands {
        ToolCommands::new(
            ToolPaths::resolve(&self.config.tools, architecture),
            &self.config.pipeline.scratch_dir,
            output_dir,
        )
    }

    fn metadata_provider(&self) -> Arc<dyn MetadataProvider> {
        let binary = self.config.tools.mediainfo.trim();
        if binary.is_empty() {
            Arc::new(NoMetadata)
        } else {
            Arc::new(MediaInfoCli::new(binary))
        }
    }

    /// Run one encode over `queue`. Ctrl-C halts the run.
    pub async fn encode(
        &mut self,
        queue: InputQueue,
        request: EncodeRequest,
        log: Box<dyn OutputLog>,
    ) -> Result<RunReport> {
        if queue.is_empty() {
            return Err(GxsError::Config("No input files to encode".to_string()));
        }
        let output_dir = self.output_dir(&request)?;
        let profile_name = self.profile_name(&request);
        let job = Arc::new(self.load_profile(&profile_name)?);

        info!(
            "Encoding {} files with profile {} into {}",
            queue.len(),
            profile_name,
            output_dir.display()
        );

        let strict = self.config.pipeline.strict_exit_codes && !request.lenient;
        let settings = SequencerSettings {
            exit_policy: ExitCodePolicy::from_strict(strict),
            invalid_invocation_exit_code: self.config.pipeline.invalid_invocation_exit_code,
        };

        let commands = self.tool_commands(job.system.architecture, output_dir.clone());
        let pipeline = Pipeline::new(
            job,
            commands,
            queue,
            self.metadata_provider(),
            log,
            settings,
            self.config.pipeline.checksum_block_size,
        );

        let handle = pipeline.handle();
        let interrupt = tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupt received, stopping encode");
                handle.halt();
            }
        });

        let report = pipeline.run().await;
        interrupt.abort();

        if report.completed() {
            run_completion_hook(&self.config.options.on_completion).await;
        }

        if self.config.remember(&profile_name, &output_dir) {
            if let Some(path) = &self.config_path {
                if let Err(e) = self.config.save_to_file(path) {
                    warn!("Failed to save remembered options: {}", e);
                }
            }
        }

        Ok(report)
    }

    /// Identify the audio tracks of `input` without encoding it.
    pub async fn probe<P: AsRef<Path>>(&self, input: P) -> Result<ProbeSummary> {
        let input = input.as_ref();
        if !input.exists() {
            return Err(GxsError::FileNotFound(input.display().to_string()));
        }

        let commands = self.tool_commands(Architecture::host(), PathBuf::new());
        let probe = commands.probe(input);
        let output = Command::new(&probe.program)
            .args(&probe.args)
            .output()
            .await
            .map_err(|source| GxsError::Launch {
                program: probe.program.clone(),
                source,
            })?;

        if !output.status.success() {
            return Err(GxsError::StageFailed {
                role: probe.role,
                code: output.status.code(),
            });
        }

        let listing = String::from_utf8_lossy(&output.stdout);
        let plan = AudioTrackPlanner::new(&commands).plan(&listing, input, 0.5);
        let languages = match self.metadata_provider().track_languages(input).await {
            Ok(languages) => languages,
            Err(e) => {
                warn!("No track languages for {}: {}", input.display(), e);
                TrackLanguages::default()
            }
        };

        Ok(ProbeSummary { plan, languages })
    }
}

/// Run the configured on-completion command. Failures are logged only.
async fn run_completion_hook(command: &[String]) {
    let Some((program, args)) = command.split_first() else {
        return;
    };

    info!("Running on-completion command: {}", command.join(" "));
    match Command::new(program).args(args).status().await {
        Ok(status) if status.success() => {}
        Ok(status) => warn!("On-completion command exited with {}", status),
        Err(e) => warn!("Failed to run on-completion command {}: {}", program, e),
    }
}
