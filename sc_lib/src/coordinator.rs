//! Runs every manifest sample through download, grouping, whitelist
//! detection and mapping.
//!
//! Two worker pools share the work. Sample workers download, pair and
//! detect; mapping workers, at most `max_concurrent_mappings` of them, run
//! the aligner on samples handed over through a channel. A sample waiting
//! for the aligner never holds a sample worker, so downloads go on while
//! mappings run.
//!
//! Each sample is an independent unit: a stage error becomes that sample's
//! outcome and never stops its siblings. Workers return their outcomes and
//! the coordinator writes the run reports once all of them are done.

use crate::detect_whitelist::ParameterInferenceEngine;
use crate::download::Downloader;
use crate::grouping::{self, Groups};
use crate::layout::{SampleLayout, DOWNLOAD_REPORT_FILE, RUN_SUMMARY_FILE};
use crate::mapping::MappingOrchestrator;
use crate::report::{write_download_report, write_run_summary, DownloadReportRow, SampleLog};
use crate::cancel::CancelToken;
use anyhow::{anyhow, Context, Result};
use crossbeam_channel::{bounded, Receiver, Sender};
use log::{error, info, warn};
use sc_types::{
    FileSet, InferenceResult, Manifest, PipelineStage, RunReport, SampleDescriptor, SampleOutcome,
    SampleStatus, StageError, WhitelistCatalog,
};
use std::any::Any;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// Download, then detect and map.
    Full,
    /// Download and pair read files only.
    DownloadOnly,
    /// Detect and map read files already on disk.
    MapOnly,
}

impl fmt::Display for RunMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RunMode::Full => "full",
            RunMode::DownloadOnly => "download-only",
            RunMode::MapOnly => "map-only",
        })
    }
}

#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    pub output_dir: PathBuf,
    pub sample_workers: usize,
    pub max_concurrent_mappings: usize,
}

impl CoordinatorConfig {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        CoordinatorConfig {
            output_dir: output_dir.into(),
            sample_workers: 4,
            max_concurrent_mappings: 1,
        }
    }
}

enum ReadSource {
    Remote(Downloader),
    Local(PathBuf),
}

/// Whitelist detection and alignment, the second half of the pipeline.
pub struct Mapper {
    pub engine: ParameterInferenceEngine,
    pub catalog: Arc<WhitelistCatalog>,
    pub orchestrator: MappingOrchestrator,
}

pub struct PipelineCoordinator {
    config: CoordinatorConfig,
    source: ReadSource,
    mapper: Option<Mapper>,
    cancel: CancelToken,
}

impl PipelineCoordinator {
    pub fn full(config: CoordinatorConfig, downloader: Downloader, mapper: Mapper) -> Self {
        PipelineCoordinator {
            config,
            source: ReadSource::Remote(downloader),
            mapper: Some(mapper),
            cancel: CancelToken::new(),
        }
    }

    pub fn download_only(config: CoordinatorConfig, downloader: Downloader) -> Self {
        PipelineCoordinator {
            config,
            source: ReadSource::Remote(downloader),
            mapper: None,
            cancel: CancelToken::new(),
        }
    }

    pub fn map_only(config: CoordinatorConfig, fastq_dir: PathBuf, mapper: Mapper) -> Self {
        PipelineCoordinator {
            config,
            source: ReadSource::Local(fastq_dir),
            mapper: Some(mapper),
            cancel: CancelToken::new(),
        }
    }

    /// Observe `cancel` instead of a private token.
    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn mode(&self) -> RunMode {
        match (&self.source, &self.mapper) {
            (ReadSource::Remote(_), Some(_)) => RunMode::Full,
            (ReadSource::Remote(_), None) => RunMode::DownloadOnly,
            (ReadSource::Local(_), _) => RunMode::MapOnly,
        }
    }

    /// Process every sample of `manifest` and write the run reports.
    pub fn run(&self, manifest: &Manifest) -> Result<RunReport> {
        let out = &self.config.output_dir;
        std::fs::create_dir_all(out)
            .with_context(|| format!("could not create output directory {}", out.display()))?;
        let local_groups = match &self.source {
            ReadSource::Local(dir) => {
                let files = grouping::list_read_files(dir)
                    .with_context(|| format!("could not list read files in {}", dir.display()))?;
                info!("found {} read files in {}", files.len(), dir.display());
                Some(grouping::group(files))
            }
            ReadSource::Remote(_) => None,
        };
        info!(
            "{} run of {} samples from {}: {} sample workers, {} concurrent mappings",
            self.mode(),
            manifest.samples.len(),
            manifest.path.display(),
            self.config.sample_workers.max(1),
            self.config.max_concurrent_mappings.max(1)
        );

        let mut outcomes = Vec::with_capacity(manifest.samples.len());
        let mut downloads = Vec::new();
        for (outcome, rows) in self.process_all(&manifest.samples, local_groups.as_ref())? {
            outcomes.push(outcome);
            downloads.extend(rows);
        }
        let report = RunReport::new(outcomes);
        write_run_summary(&out.join(RUN_SUMMARY_FILE), &report)?;
        if let ReadSource::Remote(_) = self.source {
            downloads.sort_by(|a, b| (&a.sample, &a.file_name).cmp(&(&b.sample, &b.file_name)));
            write_download_report(&out.join(DOWNLOAD_REPORT_FILE), &downloads)?;
        }
        info!("run finished: {}", report.counts());
        Ok(report)
    }

    fn process_all(
        &self,
        samples: &[SampleDescriptor],
        local: Option<&Groups>,
    ) -> Result<Vec<Finished>> {
        let n = samples.len().max(1);
        let workers = self.config.sample_workers.clamp(1, n);
        let r = crossbeam_utils::thread::scope(|s| -> Result<Vec<Finished>> {
            // Holds every sample, so handing one over never blocks a sample worker.
            let (ready_send, ready_recv) = bounded::<ReadyToMap>(n);
            let mut mapping_handles = Vec::new();
            if let Some(mapper) = &self.mapper {
                for _ in 0..self.config.max_concurrent_mappings.clamp(1, n) {
                    let ready_recv = ready_recv.clone();
                    mapping_handles.push(s.spawn(move |_| {
                        ready_recv
                            .iter()
                            .map(|ready| self.map_isolated(mapper, ready))
                            .collect::<Vec<_>>()
                    }));
                }
            }
            drop(ready_recv);

            let (send, recv) = bounded::<&SampleDescriptor>(workers);
            let mut handles = Vec::with_capacity(workers);
            for _ in 0..workers {
                let recv = recv.clone();
                let ready_send = ready_send.clone();
                handles.push(s.spawn(move |_| self.prepare_all(&recv, &ready_send, local)));
            }
            drop(recv);
            drop(ready_send);

            let mut results = Vec::with_capacity(samples.len());
            for sample in samples {
                if self.cancel.is_cancelled() {
                    results.push((self.not_started(sample), Vec::new()));
                } else if send.send(sample).is_err() {
                    // Every worker is gone; the join below reports why.
                    break;
                }
            }
            drop(send);

            for h in handles.into_iter().chain(mapping_handles) {
                match h.join() {
                    Ok(done) => results.extend(done),
                    Err(e) => return Err(anyhow!(decipher_panic(e))),
                }
            }
            Ok(results)
        });
        match r {
            Ok(v) => v,
            Err(e) => Err(anyhow!(decipher_panic(e))),
        }
    }

    fn first_stage(&self) -> PipelineStage {
        match self.source {
            ReadSource::Remote(_) => PipelineStage::Download,
            ReadSource::Local(_) => PipelineStage::Grouping,
        }
    }

    fn not_started(&self, sample: &SampleDescriptor) -> SampleOutcome {
        let err = StageError::Aborted(self.first_stage());
        let mut outcome = SampleOutcome::new(&sample.id);
        outcome.stage = err.stage();
        outcome.status = SampleStatus::from_error(&err);
        outcome
    }

    /// Body of a sample worker: prepare each received sample, then either
    /// keep its outcome or hand it to the mapping workers.
    fn prepare_all(
        &self,
        recv: &Receiver<&SampleDescriptor>,
        ready_send: &Sender<ReadyToMap>,
        local: Option<&Groups>,
    ) -> Vec<Finished> {
        let mut finished = Vec::new();
        for sample in recv.iter() {
            match self.prepare_isolated(sample, local) {
                Prepared::Finished(done) => finished.push(done),
                Prepared::ReadyToMap(ready) => {
                    if let Err(lost) = ready_send.send(ready) {
                        let ReadyToMap { unit, .. } = lost.into_inner();
                        finished.push(unit.finish(Err(StageError::Aborted(PipelineStage::Mapping))));
                    }
                }
            }
        }
        finished
    }

    /// Prepare one sample, turning a panic into a failed outcome.
    fn prepare_isolated(&self, sample: &SampleDescriptor, local: Option<&Groups>) -> Prepared {
        catch_unwind(AssertUnwindSafe(|| self.prepare(sample, local)))
            .unwrap_or_else(|panic| Prepared::Finished(panicked(&sample.id, panic)))
    }

    /// Download or look up the reads of `sample`, pair them, and detect its
    /// whitelist when the run maps.
    fn prepare(&self, sample: &SampleDescriptor, local: Option<&Groups>) -> Prepared {
        let mut unit = SampleUnit::new(&self.config.output_dir, &sample.id, self.first_stage());
        let result = unit.read_files(self, sample, local).and_then(|file_set| {
            info!("{file_set}");
            match &self.mapper {
                Some(mapper) => unit.infer(&self.cancel, mapper, file_set).map(Some),
                None => Ok(None),
            }
        });
        match result {
            Ok(Some((file_set, inference))) => Prepared::ReadyToMap(ReadyToMap {
                unit,
                file_set,
                inference,
            }),
            Ok(None) => Prepared::Finished(unit.finish(Ok(()))),
            Err(err) => Prepared::Finished(unit.finish(Err(err))),
        }
    }

    /// Align one prepared sample, turning a panic into a failed outcome.
    fn map_isolated(&self, mapper: &Mapper, ready: ReadyToMap) -> Finished {
        let sample = ready.file_set.sample.clone();
        catch_unwind(AssertUnwindSafe(|| self.map(mapper, ready)))
            .unwrap_or_else(|panic| panicked(&sample, panic))
    }

    fn map(&self, mapper: &Mapper, ready: ReadyToMap) -> Finished {
        let ReadyToMap {
            mut unit,
            file_set,
            inference,
        } = ready;
        let result = unit.enter(&self.cancel, PipelineStage::Mapping).and_then(|()| {
            let star_dir = unit.layout.star_dir();
            let result = mapper.orchestrator.align(
                &file_set,
                &inference,
                &star_dir,
                &mut unit.log,
                &self.cancel,
            )?;
            unit.outcome.output = Some(result.output);
            Ok(())
        });
        unit.finish(result)
    }
}

/// A sample's terminal outcome and the download rows it produced.
type Finished = (SampleOutcome, Vec<DownloadReportRow>);

/// A sample with paired reads and a resolved whitelist, waiting for the aligner.
struct ReadyToMap {
    unit: SampleUnit,
    file_set: FileSet,
    inference: InferenceResult,
}

enum Prepared {
    Finished(Finished),
    ReadyToMap(ReadyToMap),
}

/// The state of one sample as it moves through the stages.
struct SampleUnit {
    layout: SampleLayout,
    log: SampleLog,
    outcome: SampleOutcome,
}

impl SampleUnit {
    fn new(output_dir: &Path, sample: &str, first_stage: PipelineStage) -> Self {
        let layout = SampleLayout::new(output_dir, sample);
        let log = SampleLog::new(sample, Some(layout.attempts_log()));
        let mut outcome = SampleOutcome::new(sample);
        outcome.stage = first_stage;
        SampleUnit {
            layout,
            log,
            outcome,
        }
    }

    /// Stage boundary: stop if the run was interrupted.
    fn enter(&mut self, cancel: &CancelToken, stage: PipelineStage) -> Result<(), StageError> {
        if cancel.is_cancelled() {
            return Err(StageError::Aborted(stage));
        }
        self.outcome.stage = stage;
        Ok(())
    }

    fn read_files(
        &mut self,
        coordinator: &PipelineCoordinator,
        sample: &SampleDescriptor,
        local: Option<&Groups>,
    ) -> Result<FileSet, StageError> {
        let cancel = &coordinator.cancel;
        match &coordinator.source {
            ReadSource::Remote(downloader) => {
                self.enter(cancel, PipelineStage::Download)?;
                let files =
                    downloader.fetch(sample, &self.layout.fastq_dir(), &mut self.log, cancel)?;
                self.enter(cancel, PipelineStage::Grouping)?;
                let groups = grouping::group(files.into_iter().map(|f| f.file));
                Ok(grouping::select_for_sample(&sample.id, &groups, true)?)
            }
            ReadSource::Local(_) => {
                self.enter(cancel, PipelineStage::Grouping)?;
                let empty = Groups::new();
                let groups = local.unwrap_or(&empty);
                Ok(grouping::select_for_sample(&sample.id, groups, false)?)
            }
        }
    }

    fn infer(
        &mut self,
        cancel: &CancelToken,
        mapper: &Mapper,
        file_set: FileSet,
    ) -> Result<(FileSet, InferenceResult), StageError> {
        self.enter(cancel, PipelineStage::Inference)?;
        let inference = mapper.engine.infer(&file_set, &mapper.catalog)?;
        self.outcome.inference = Some(inference.clone());
        if let Some(err) = inference.to_error() {
            return Err(err.into());
        }
        info!(
            "{}: whitelist {} ({:.1}% of reads)",
            file_set.sample,
            inference.whitelist_name().unwrap_or_default(),
            100.0 * inference.confidence
        );
        Ok((file_set, inference))
    }

    /// Record how the sample ended and hand back its outcome.
    fn finish(mut self, result: Result<(), StageError>) -> Finished {
        let sample = self.outcome.sample.clone();
        match result {
            Ok(()) => info!("{sample}: completed"),
            Err(err) => {
                self.outcome.stage = err.stage();
                self.outcome.status = SampleStatus::from_error(&err);
                if err.is_skip() {
                    warn!("{sample}: skipped at {}: {err:#}", self.outcome.stage);
                } else {
                    error!("{sample}: failed at {}: {err:#}", self.outcome.stage);
                }
            }
        }
        self.outcome.download_attempts = self.log.download_attempts();
        self.outcome.mapping_attempts = self.log.mapping_attempts();
        let (attempts, downloads) = self.log.into_parts();
        self.outcome.attempts = attempts;
        (self.outcome, downloads)
    }
}

fn panicked(sample: &str, panic: Box<dyn Any + 'static + Send>) -> Finished {
    let reason = format!("internal error: {}", decipher_panic(panic));
    error!("{sample}: {reason}");
    let mut outcome = SampleOutcome::new(sample);
    outcome.status = SampleStatus::failed(reason);
    (outcome, Vec::new())
}

fn decipher_panic(p: Box<dyn Any + 'static + Send>) -> String {
    if let Some(&s) = p.downcast_ref::<&'static str>() {
        s.to_string()
    } else if let Ok(s) = p.downcast::<String>() {
        *s
    } else {
        "thread panicked with unrecognized type".to_string()
    }
}
