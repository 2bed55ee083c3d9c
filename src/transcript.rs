//! Append-only interview transcript.
//!
//! One newline-delimited JSON file per session, written by the worker as
//! the interview progresses and deleted by session cleanup. Every record
//! carries a timestamp and a type tag: `interaction`, `error`, or
//! `completion`.

use std::fs::{File, OpenOptions};
use std::io::Write as _;
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde_json::json;

pub struct TranscriptLog {
    path: PathBuf,
    file: File,
}

impl TranscriptLog {
    /// Create (or reopen for append) the transcript for `session_id`.
    pub fn create(dir: &Path, session_id: &str) -> std::io::Result<Self> {
        std::fs::create_dir_all(dir)?;
        let path = dir.join(format!("{session_id}.jsonl"));
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self { path, file })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn append(&mut self, record: serde_json::Value) -> std::io::Result<()> {
        let line = serde_json::to_string(&record).map_err(std::io::Error::other)?;
        writeln!(self.file, "{line}")?;
        self.file.flush()
    }

    /// Record one stage interaction. `question` is present for interactive
    /// stages; `content` is the answer or the stage output.
    pub fn interaction(
        &mut self,
        stage: &str,
        question: Option<&str>,
        content: &str,
    ) -> std::io::Result<()> {
        self.append(json!({
            "timestamp": Utc::now().to_rfc3339(),
            "type": "interaction",
            "stage": stage,
            "question": question,
            "content": content,
        }))
    }

    pub fn error(&mut self, stage: &str, message: &str) -> std::io::Result<()> {
        self.append(json!({
            "timestamp": Utc::now().to_rfc3339(),
            "type": "error",
            "stage": stage,
            "message": message,
        }))
    }

    pub fn completion(&mut self, artifact: &str) -> std::io::Result<()> {
        self.append(json!({
            "timestamp": Utc::now().to_rfc3339(),
            "type": "completion",
            "artifact": artifact,
        }))
    }

    /// Delete the transcript file. Consumes the log; the file handle is
    /// dropped before the unlink.
    pub fn remove(self) -> std::io::Result<()> {
        let path = self.path;
        drop(self.file);
        std::fs::remove_file(path)
    }
}
