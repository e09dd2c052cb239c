//! In-memory event log and its tab-separated table on disk.
//!
//! Records are appended as actions complete. Persisting rewrites the whole table:
//! times become relative to the session base time, and gas intervals are closed at
//! the next gas change (or "now" for the gas still flowing).

use crate::error::RigResult;
use crate::record::{Category, LogRecord, NOT_APPLICABLE};
use std::path::Path;
use tracing::debug;

/// Ordered event log owned by the rig
#[derive(Debug, Clone)]
pub struct LogStore {
    records: Vec<LogRecord>,
    created_at: f64,
}

impl LogStore {
    /// Empty log created at `now` (epoch seconds)
    pub fn new(now: f64) -> Self {
        Self {
            records: Vec::new(),
            created_at: now,
        }
    }

    /// Add a record at the end
    pub fn append(&mut self, record: LogRecord) {
        self.records.push(record);
    }

    /// Drop every record and restart the log at `now`
    pub fn reset(&mut self, now: f64) {
        self.records.clear();
        self.created_at = now;
    }

    /// When the log was created or last reset
    pub fn created_at(&self) -> f64 {
        self.created_at
    }

    /// Records in append order
    pub fn records(&self) -> &[LogRecord] {
        &self.records
    }

    /// Number of records
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the log is empty
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Records relative to `base_time`, gas intervals extended.
    ///
    /// Each gas record ends where the next gas record (by start time) begins; the
    /// last one ends at `now - base_time`. Other records keep their own end time.
    pub fn consolidate(&self, base_time: f64, now: f64) -> Vec<LogRecord> {
        let mut rows: Vec<LogRecord> = self
            .records
            .iter()
            .map(|r| r.relative_to(base_time))
            .collect();

        let mut gas: Vec<usize> = rows
            .iter()
            .enumerate()
            .filter(|(_, r)| r.category == Category::Gas)
            .map(|(i, _)| i)
            .collect();
        gas.sort_by(|&a, &b| rows[a].start_time.total_cmp(&rows[b].start_time));

        let session_end = now - base_time;
        for (k, &row) in gas.iter().enumerate() {
            let end = match gas.get(k + 1) {
                Some(&next) => rows[next].start_time,
                None => session_end,
            };
            rows[row].end_time = Some(end);
        }
        rows
    }

    /// Parameter columns: every key seen, in first-seen order
    pub fn param_columns(&self) -> Vec<String> {
        let mut columns: Vec<String> = Vec::new();
        for record in &self.records {
            for key in record.params.keys() {
                if !columns.iter().any(|c| c == key) {
                    columns.push(key.to_string());
                }
            }
        }
        columns
    }

    /// Write the consolidated log to `path` as a tab-separated table
    pub fn write_table(&self, path: &Path, base_time: f64, now: f64) -> RigResult<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let columns = self.param_columns();
        let mut writer = csv::WriterBuilder::new()
            .delimiter(b'\t')
            .from_path(path)?;

        let mut header = vec![
            "label".to_string(),
            "category".to_string(),
            "start_time".to_string(),
            "end_time".to_string(),
        ];
        header.extend(columns.iter().cloned());
        writer.write_record(&header)?;

        for row in self.consolidate(base_time, now) {
            let mut fields = vec![
                row.label.clone(),
                row.category.to_string(),
                row.start_time.to_string(),
                row.end_time
                    .map_or_else(|| NOT_APPLICABLE.to_string(), |t| t.to_string()),
            ];
            fields.extend(columns.iter().map(|key| {
                row.params
                    .get(key)
                    .map_or_else(|| NOT_APPLICABLE.to_string(), |v| v.to_string())
            }));
            writer.write_record(&fields)?;
        }
        writer.flush()?;
        debug!(path = %path.display(), rows = self.records.len(), "Event log written");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{Outcome, Params};

    fn gas(label: &str, t: f64) -> LogRecord {
        LogRecord::from_outcome(Outcome::new(label, Category::Gas), t, None)
    }

    #[test]
    fn gas_intervals_extend_to_next_change() {
        let mut store = LogStore::new(1000.0);
        store.append(gas("O2", 1000.0));
        store.append(gas("hypoxia", 1300.0));
        store.append(gas("O2", 1600.0));

        let rows = store.consolidate(1000.0, 1900.0);
        let ends: Vec<Option<f64>> = rows.iter().map(|r| r.end_time).collect();
        assert_eq!(ends, vec![Some(300.0), Some(600.0), Some(900.0)]);
        assert_eq!(rows[1].start_time, 300.0);
    }

    #[test]
    fn gas_extension_follows_start_order_not_append_order() {
        let mut store = LogStore::new(0.0);
        store.append(gas("hypoxia", 50.0));
        store.append(gas("O2", 10.0));

        let rows = store.consolidate(0.0, 80.0);
        assert_eq!(rows[1].end_time, Some(50.0));
        assert_eq!(rows[0].end_time, Some(80.0));
    }

    #[test]
    fn other_categories_keep_their_end_times() {
        let mut store = LogStore::new(0.0);
        store.append(gas("O2", 0.0));
        store.append(LogRecord::from_outcome(
            Outcome::new("opto_train", Category::Opto),
            5.0,
            Some(7.0),
        ));
        store.append(LogRecord::from_outcome(
            Outcome::new("opto_pulse", Category::Opto),
            8.0,
            None,
        ));

        let rows = store.consolidate(0.0, 10.0);
        assert_eq!(rows[0].end_time, Some(10.0));
        assert_eq!(rows[1].end_time, Some(7.0));
        assert_eq!(rows[2].end_time, None);
    }

    #[test]
    fn table_has_union_of_param_columns() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log.tsv");

        let mut store = LogStore::new(100.0);
        store.append(LogRecord {
            label: "opto_pulse".into(),
            category: Category::Opto,
            start_time: 101.0,
            end_time: None,
            params: Params::new().with("amplitude", 0.5).with("duration_sec", 0.01),
        });
        store.append(LogRecord {
            label: "tone".into(),
            category: Category::Event,
            start_time: 102.0,
            end_time: Some(102.5),
            params: Params::new().with("frequency", 1000u16),
        });
        store.write_table(&path, 100.0, 110.0).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(
            lines[0],
            "label\tcategory\tstart_time\tend_time\tamplitude\tduration_sec\tfrequency"
        );
        assert_eq!(lines[1], "opto_pulse\topto\t1\tNaN\t0.5\t0.01\tNaN");
        assert_eq!(lines[2], "tone\tevent\t2\t2.5\tNaN\tNaN\t1000");
    }

    #[test]
    fn reset_clears_and_restarts() {
        let mut store = LogStore::new(0.0);
        store.append(gas("O2", 1.0));
        store.reset(50.0);
        assert!(store.is_empty());
        assert_eq!(store.created_at(), 50.0);
    }
}
