//! gxs - Batch x264 Encoding Pipeline
//!
//! Encodes a queue of video files through x264, optional audio re-encoding
//! with ffmpeg and neroAacEnc, mkvmerge muxing and a CRC32 rename.

pub mod audio;
pub mod checksum;
pub mod cli;
pub mod command;
pub mod config;
pub mod error;
pub mod metadata;
pub mod output_log;
pub mod pipeline;
pub mod process;
pub mod profile;
pub mod workflow;
