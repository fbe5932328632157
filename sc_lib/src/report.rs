//! Per-sample attempt logs and the run-level CSV reports.

use anyhow::{Context, Result};
use log::warn;
use sc_types::{AttemptRecord, PipelineStage, RunReport};
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

/// One row of `download_report.csv`: the fate of a single read file.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct DownloadReportRow {
    pub sample: String,
    pub file_name: String,
    pub url: String,
    /// `downloaded`, `reused` or `failed`
    pub status: String,
    pub attempts: u32,
    pub bytes: u64,
    pub path: String,
}

/// Everything recorded while one sample moves through the stages. Attempts
/// are also appended to `attempts.jsonl` as they happen, so the record
/// survives an interrupted run.
#[derive(Debug)]
pub struct SampleLog {
    sample: String,
    path: Option<PathBuf>,
    attempts: Vec<AttemptRecord>,
    downloads: Vec<DownloadReportRow>,
}

impl SampleLog {
    pub fn new(sample: impl Into<String>, path: Option<PathBuf>) -> Self {
        SampleLog {
            sample: sample.into(),
            path,
            attempts: Vec::new(),
            downloads: Vec::new(),
        }
    }

    pub fn sample(&self) -> &str {
        &self.sample
    }

    pub fn record_attempt(&mut self, record: AttemptRecord) {
        if let Some(path) = &self.path {
            if let Err(err) = append_json_line(path, &record) {
                warn!(
                    "{}: could not append to {}: {err:#}",
                    self.sample,
                    path.display()
                );
            }
        }
        self.attempts.push(record);
    }

    pub fn record_download(&mut self, row: DownloadReportRow) {
        self.downloads.push(row);
    }

    pub fn attempts(&self) -> &[AttemptRecord] {
        &self.attempts
    }

    pub fn downloads(&self) -> &[DownloadReportRow] {
        &self.downloads
    }

    /// Number of mapping attempts made.
    pub fn mapping_attempts(&self) -> u32 {
        self.attempts
            .iter()
            .filter(|r| r.stage == PipelineStage::Mapping)
            .count() as u32
    }

    /// Largest number of attempts any single file needed.
    pub fn download_attempts(&self) -> u32 {
        self.downloads.iter().map(|row| row.attempts).max().unwrap_or(0)
    }

    pub fn into_parts(self) -> (Vec<AttemptRecord>, Vec<DownloadReportRow>) {
        (self.attempts, self.downloads)
    }
}

fn append_json_line<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    let mut line = serde_json::to_vec(value)?;
    line.push(b'\n');
    file.write_all(&line)?;
    Ok(())
}

/// Write one CSV row per sample, sorted by sample id.
pub fn write_run_summary(path: &Path, report: &RunReport) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("could not create {}", path.display()))?;
    for outcome in &report.outcomes {
        writer.serialize(outcome.summary_row())?;
    }
    writer.flush()?;
    Ok(())
}

pub fn write_download_report(path: &Path, rows: &[DownloadReportRow]) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("could not create {}", path.display()))?;
    for row in rows {
        writer.serialize(row)?;
    }
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use sc_types::{Allocation, AttemptOutcome, SampleOutcome, SampleStatus};
    use std::time::Duration;

    fn download_row(file_name: &str, attempts: u32) -> DownloadReportRow {
        DownloadReportRow {
            sample: "S1".into(),
            file_name: file_name.into(),
            url: format!("ftp://host/{file_name}"),
            status: "downloaded".into(),
            attempts,
            bytes: 10,
            path: format!("/out/{file_name}"),
        }
    }

    #[test]
    fn test_attempts_are_appended_to_jsonl() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("S1").join("attempts.jsonl");
        let mut log = SampleLog::new("S1", Some(path.clone()));
        for attempt in 1..=2 {
            log.record_attempt(AttemptRecord {
                sample: "S1".into(),
                stage: PipelineStage::Mapping,
                attempt,
                allocation: Allocation::Download {
                    connections: 1,
                    timeout: Duration::from_secs(1),
                },
                outcome: AttemptOutcome::RetryableFailure,
                message: "killed".into(),
            });
        }
        log.record_download(download_row("S1_R1.fastq.gz", 3));
        log.record_download(download_row("S1_R2.fastq.gz", 1));

        let text = std::fs::read_to_string(&path)?;
        let records: Vec<AttemptRecord> = text
            .lines()
            .map(serde_json::from_str)
            .collect::<Result<_, _>>()?;
        assert_eq!(records, log.attempts());
        assert_eq!(log.mapping_attempts(), 2);
        assert_eq!(log.download_attempts(), 3);
        Ok(())
    }

    #[test]
    fn test_run_summary_csv() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("run_summary.csv");
        let mut skipped = SampleOutcome::new("S2");
        skipped.stage = PipelineStage::Grouping;
        skipped.status = SampleStatus::skipped("expected 2 read files");
        write_run_summary(&path, &RunReport::new(vec![skipped, SampleOutcome::new("S1")]))?;

        let mut reader = csv::Reader::from_path(&path)?;
        let headers = reader.headers()?.clone();
        assert_eq!(&headers[0], "sample");
        assert_eq!(&headers[headers.len() - 1], "reason");
        let rows: Vec<csv::StringRecord> = reader.records().collect::<Result<_, _>>()?;
        assert_eq!(rows.len(), 2);
        assert_eq!(&rows[0][0], "S1");
        assert_eq!(&rows[0][1], "Completed");
        assert_eq!(&rows[1][1], "Skipped");
        assert_eq!(&rows[1][2], "grouping");
        assert_eq!(&rows[1][headers.len() - 1], "expected 2 read files");
        Ok(())
    }

    #[test]
    fn test_download_report_csv() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("download_report.csv");
        write_download_report(&path, &[download_row("S1_R1.fastq.gz", 2)])?;
        let text = std::fs::read_to_string(&path)?;
        assert_eq!(
            text,
            "sample,file_name,url,status,attempts,bytes,path\n\
             S1,S1_R1.fastq.gz,ftp://host/S1_R1.fastq.gz,downloaded,2,10,/out/S1_R1.fastq.gz\n"
        );
        Ok(())
    }
}
