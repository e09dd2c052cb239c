//! Gate and trigger discovery in the recorder's data directory.
//!
//! The recorder writes each gate to `<run>_g<N>/` and every file of trigger `M`
//! contains `_t<M>.` in its name.

use crate::error::RigResult;
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

/// Where a recording's files and log table go
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunTarget {
    /// Gate directory
    pub dest: PathBuf,
    /// Run name
    pub run: String,
    /// Gate index
    pub gate: u32,
    /// Trigger index
    pub trigger: u32,
}

impl RunTarget {
    /// Log table file name for this target
    pub fn log_file_name(&self, prefix: &str) -> String {
        format!("{}.{}.g{}.t{}.tsv", prefix, self.run, self.gate, self.trigger)
    }

    /// Full log table path
    pub fn log_path(&self, prefix: &str) -> PathBuf {
        self.dest.join(self.log_file_name(prefix))
    }
}

/// Gate and trigger for the next recording, and whether it opens a new gate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NextRecording {
    /// Gate index
    pub gate: u32,
    /// Trigger index
    pub trigger: u32,
    /// True when the recorder must start a new gate
    pub new_gate: bool,
}

/// Gate numbers already present for `run` under `subject_dir`, ascending
pub fn existing_gates(subject_dir: &Path, run: &str) -> RigResult<Vec<u32>> {
    let prefix = format!("{}_g", run);
    let mut gates = Vec::new();
    if !subject_dir.exists() {
        return Ok(gates);
    }
    for entry in std::fs::read_dir(subject_dir)? {
        let entry = entry?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if let Some(n) = name
            .strip_prefix(&prefix)
            .and_then(|suffix| suffix.parse::<u32>().ok())
        {
            gates.push(n);
        }
    }
    gates.sort_unstable();
    gates.dedup();
    Ok(gates)
}

#[allow(clippy::expect_used)]
static TRIGGER_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"_t(\d+)\.").expect("Invalid trigger regex"));

/// Trigger number in a file name, if it has one
pub fn trigger_in_name(name: &str) -> Option<u32> {
    TRIGGER_PATTERN
        .captures(name)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

/// Largest trigger number of any file below `gate_dir`
pub fn last_trigger(gate_dir: &Path) -> RigResult<Option<u32>> {
    let mut last: Option<u32> = None;
    let mut pending = vec![gate_dir.to_path_buf()];
    while let Some(dir) = pending.pop() {
        if !dir.is_dir() {
            continue;
        }
        for entry in std::fs::read_dir(&dir)? {
            let entry = entry?;
            let path = entry.path();
            if let Some(t) = entry.file_name().to_str().and_then(trigger_in_name) {
                last = Some(last.map_or(t, |l| l.max(t)));
            }
            if entry.file_type()?.is_dir() {
                pending.push(path);
            }
        }
    }
    Ok(last)
}

/// Decide gate and trigger for the next recording of `run`.
///
/// With no gates on disk this is gate 0, trigger 0. Otherwise a new gate is one past
/// the highest existing gate, and staying in the current gate takes the trigger
/// after the last one found there.
pub fn next_recording(subject_dir: &Path, run: &str, increment_gate: bool) -> RigResult<NextRecording> {
    let gates = existing_gates(subject_dir, run)?;
    let next = match gates.last() {
        None => NextRecording {
            gate: 0,
            trigger: 0,
            new_gate: true,
        },
        Some(&last) if increment_gate => NextRecording {
            gate: last + 1,
            trigger: 0,
            new_gate: true,
        },
        Some(&last) => {
            let gate_dir = subject_dir.join(format!("{}_g{}", run, last));
            NextRecording {
                gate: last,
                trigger: last_trigger(&gate_dir)?.map_or(0, |t| t + 1),
                new_gate: false,
            }
        }
    };
    Ok(next)
}
