// Stage command construction
//
// Every external stage is described as a structured argument vector:
// - Encoder: JobConfig -> x264 invocation
// - Tools: probe, extract, audio encode and mux invocations

pub mod encoder;
pub mod tools;

use std::fmt;
use std::path::Path;

pub use encoder::*;
pub use tools::*;

/// The pipeline step an external process performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StageRole {
    VideoEncode,
    Probe,
    AudioExtract,
    AudioEncode,
    Mux,
}

impl fmt::Display for StageRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StageRole::VideoEncode => "video encode",
            StageRole::Probe => "probe",
            StageRole::AudioExtract => "audio extract",
            StageRole::AudioEncode => "audio encode",
            StageRole::Mux => "mux",
        };
        f.write_str(name)
    }
}

/// One external process invocation: program plus discrete argument tokens.
/// Arguments are never joined into a shell string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageCommand {
    pub role: StageRole,
    pub program: String,
    pub args: Vec<String>,
    pub description: String,
}

impl StageCommand {
    pub fn new<S1: Into<String>, S2: Into<String>>(
        role: StageRole,
        program: S1,
        description: S2,
    ) -> Self {
        Self {
            role,
            program: program.into(),
            args: Vec::new(),
            description: description.into(),
        }
    }

    pub fn arg<S: Into<String>>(mut self, arg: S) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(|s| s.into()));
        self
    }

    /// Add a path argument
    pub fn path<P: AsRef<Path>>(self, path: P) -> Self {
        self.arg(path.as_ref().to_string_lossy().to_string())
    }

    /// Add a flag followed by its value
    pub fn flag<S1: Into<String>, S2: Into<String>>(self, flag: S1, value: S2) -> Self {
        self.arg(flag).arg(value)
    }

    /// Human-readable rendering for logs. Tokens containing spaces are quoted.
    pub fn display_line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .map(|token| {
                if token.contains(char::is_whitespace) {
                    format!("\"{}\"", token)
                } else {
                    token.to_string()
                }
            })
            .collect::<Vec<_>>()
            .join(" ")
    }

    pub fn has_arg(&self, arg: &str) -> bool {
        self.args.iter().any(|a| a == arg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_keeps_tokens_discrete() {
        let cmd = StageCommand::new(StageRole::Mux, "mkvmerge", "Mux")
            .flag("-o", "out dir/a[Encoded].mkv")
            .args(["-D", "-A"])
            .path(Path::new("in.mkv"));

        assert_eq!(cmd.args, vec!["-o", "out dir/a[Encoded].mkv", "-D", "-A", "in.mkv"]);
        assert!(cmd.has_arg("-D"));
        assert_eq!(
            cmd.display_line(),
            "mkvmerge -o \"out dir/a[Encoded].mkv\" -D -A in.mkv"
        );
    }

    #[test]
    fn test_role_display() {
        assert_eq!(StageRole::VideoEncode.to_string(), "video encode");
        assert_eq!(StageRole::Mux.to_string(), "mux");
    }
}
