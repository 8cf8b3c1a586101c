use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Configuration file path
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Encode the given files in order
    Encode {
        /// Source video files
        #[arg(required = true)]
        inputs: Vec<PathBuf>,

        /// Profile name (defaults to the remembered or Default profile)
        #[arg(short, long)]
        profile: Option<String>,

        /// Output directory for finished files
        #[arg(short, long)]
        output_dir: Option<PathBuf>,

        /// Continue with the next stage when a tool exits with an error
        #[arg(long)]
        lenient: bool,
    },

    /// Encode every video file found under a directory
    Batch {
        /// Input directory containing video files
        #[arg(short, long)]
        input_dir: PathBuf,

        /// Profile name (defaults to the remembered or Default profile)
        #[arg(short, long)]
        profile: Option<String>,

        /// Output directory for finished files
        #[arg(short, long)]
        output_dir: Option<PathBuf>,

        /// Continue with the next stage when a tool exits with an error
        #[arg(long)]
        lenient: bool,
    },

    /// Manage encoding profiles
    Profile {
        #[command(subcommand)]
        action: ProfileAction,
    },

    /// Show the audio tracks and languages a file would be encoded with
    Probe {
        /// Source video file
        input: PathBuf,
    },
}

#[derive(Subcommand)]
pub enum ProfileAction {
    /// List available profiles
    List,

    /// Write a profile with default settings
    Init {
        /// Profile name
        name: String,

        /// Overwrite an existing profile
        #[arg(long)]
        force: bool,
    },

    /// Print the encoder command line of a profile
    Show {
        /// Profile name
        name: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_accepts_multiple_inputs() {
        let args = Args::try_parse_from([
            "gxs", "encode", "A.mkv", "B.mkv", "-p", "Anime", "-o", "/out", "--lenient",
        ])
        .unwrap();

        match args.command {
            Commands::Encode {
                inputs,
                profile,
                output_dir,
                lenient,
            } => {
                assert_eq!(inputs, vec![PathBuf::from("A.mkv"), PathBuf::from("B.mkv")]);
                assert_eq!(profile.as_deref(), Some("Anime"));
                assert_eq!(output_dir, Some(PathBuf::from("/out")));
                assert!(lenient);
            }
            _ => panic!("expected encode"),
        }
    }

    #[test]
    fn test_encode_requires_input() {
        assert!(Args::try_parse_from(["gxs", "encode"]).is_err());
    }

    #[test]
    fn test_profile_show() {
        let args = Args::try_parse_from(["gxs", "-v", "profile", "show", "Default"]).unwrap();
        assert!(args.verbose);
        assert!(matches!(
            args.command,
            Commands::Profile {
                action: ProfileAction::Show { ref name }
            } if name == "Default"
        ));
    }
}
