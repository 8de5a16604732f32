//! JSONL transcript of a run, kept beside the artifact it executed.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;

use chrono::Utc;
use serde::Serialize;

use flowsmith_core::{OutputStream, RunState, WrittenArtifact};

/// One line of the transcript.
#[derive(Serialize)]
struct LogEntry<'a> {
    timestamp: String,
    event_type: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream: Option<OutputStream>,
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    state: Option<RunState>,
    #[serde(skip_serializing_if = "Option::is_none")]
    exit_code: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    elapsed_ms: Option<u64>,
}

impl<'a> LogEntry<'a> {
    fn new(event_type: &'a str) -> Self {
        Self {
            timestamp: Utc::now().to_rfc3339(),
            event_type,
            stream: None,
            text: None,
            state: None,
            exit_code: None,
            elapsed_ms: None,
        }
    }
}

pub struct RunLog {
    path: PathBuf,
    out: BufWriter<File>,
}

impl RunLog {
    /// `<artifact stem>_run.jsonl` in the artifact's directory.
    pub fn path_for(artifact: &WrittenArtifact) -> PathBuf {
        let stem = artifact
            .path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "flow".to_string());
        artifact.dir().join(format!("{}_run.jsonl", stem))
    }

    /// Truncates a log left by an earlier run of the same artifact.
    pub fn create(path: PathBuf) -> io::Result<Self> {
        let out = BufWriter::new(File::create(&path)?);
        Ok(Self { path, out })
    }

    fn write(&mut self, entry: &LogEntry<'_>) -> io::Result<()> {
        serde_json::to_writer(&mut self.out, entry)?;
        self.out.write_all(b"\n")
    }

    pub fn output(&mut self, stream: OutputStream, line: &str) -> io::Result<()> {
        self.write(&LogEntry {
            stream: Some(stream),
            text: Some(line),
            ..LogEntry::new("output")
        })
    }

    /// A conflict warning, an error or any other one-line note.
    pub fn note(&mut self, event_type: &str, message: &str) -> io::Result<()> {
        self.write(&LogEntry {
            text: Some(message),
            ..LogEntry::new(event_type)
        })
    }

    /// Write the outcome entry and flush.
    pub fn close(mut self, state: RunState, exit_code: Option<i32>, elapsed_ms: u64) -> io::Result<PathBuf> {
        self.write(&LogEntry {
            state: Some(state),
            exit_code,
            elapsed_ms: Some(elapsed_ms),
            ..LogEntry::new("finished")
        })?;
        self.out.flush()?;
        Ok(self.path)
    }
}
