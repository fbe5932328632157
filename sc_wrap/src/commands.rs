//! Command line of `scprep` and the pipeline each subcommand builds.

use crate::utils::CliPath;
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use sc_lib::mapping::base_resources;
use sc_lib::{
    AxelTransport, CoordinatorConfig, Downloader, InferenceConfig, Mapper, MappingOrchestrator,
    ParameterInferenceEngine, PipelineCoordinator, RetryPolicy, RunMode, StarAligner,
};
use sc_types::WhitelistCatalog;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Download single-cell read files, detect their barcode whitelist and
/// align them with STARsolo
#[derive(Parser, Debug)]
#[clap(name = "scprep", version)]
pub struct Scprep {
    #[clap(subcommand)]
    pub subcmd: SubCommand,
}

#[derive(Subcommand, Debug)]
pub enum SubCommand {
    /// Download the read files of every sample in a metadata table.
    #[clap(name = "download")]
    Download(Download),

    /// Detect whitelists and align read files that are already on disk.
    #[clap(name = "map")]
    Map(Map),

    /// Download, then detect whitelists and align, in one pipeline.
    #[clap(name = "run")]
    Run(Run),
}

#[derive(Parser, Debug, Clone)]
pub struct CommonArgs {
    /// Tab-separated sample metadata table with FASTQ_URI columns.
    #[clap(long, value_name = "TSV")]
    pub metadata: CliPath,

    /// Directory the per-sample outputs and run reports are written to.
    #[clap(long, value_name = "PATH")]
    pub output_dir: PathBuf,

    /// Copy log records to this file.
    #[clap(long, value_name = "PATH")]
    pub log_file: Option<PathBuf>,

    /// Number of samples processed at the same time.
    #[clap(long, value_name = "NUM", default_value_t = 4)]
    pub sample_workers: usize,

    /// Metadata column holding sample identifiers. Defaults to the first of
    /// "Assay Name", "Extract Name" and "Source Name" present.
    #[clap(long, value_name = "NAME")]
    pub id_column: Option<String>,
}

#[derive(Parser, Debug, Clone)]
pub struct DownloadArgs {
    /// Parallel connections used for each file.
    #[clap(long, value_name = "NUM", default_value_t = 4)]
    pub connections: usize,
}

#[derive(Parser, Debug, Clone)]
pub struct MapArgs {
    /// STAR genome index directory.
    #[clap(long, value_name = "PATH")]
    pub index_dir: CliPath,

    /// Directory of candidate barcode whitelists.
    #[clap(long, value_name = "PATH")]
    pub whitelist_dir: CliPath,

    /// Threads given to each aligner run.
    #[clap(long, value_name = "NUM", default_value_t = 32)]
    pub threads: usize,

    /// Aligner runs allowed at the same time.
    #[clap(long, value_name = "NUM", default_value_t = 1)]
    pub max_concurrent_mappings: usize,
}

#[derive(Parser, Debug, Clone)]
pub struct Download {
    #[clap(flatten)]
    pub common: CommonArgs,

    #[clap(flatten)]
    pub download: DownloadArgs,
}

#[derive(Parser, Debug, Clone)]
pub struct Map {
    #[clap(flatten)]
    pub common: CommonArgs,

    /// Directory searched recursively for read files named
    /// <sample>_..._R1/R2.fastq.gz.
    #[clap(long, value_name = "PATH")]
    pub fastq_dir: CliPath,

    #[clap(flatten)]
    pub map: MapArgs,
}

#[derive(Parser, Debug, Clone)]
pub struct Run {
    #[clap(flatten)]
    pub common: CommonArgs,

    #[clap(flatten)]
    pub download: DownloadArgs,

    #[clap(flatten)]
    pub map: MapArgs,
}

impl DownloadArgs {
    fn downloader(&self) -> Result<Downloader> {
        Ok(Downloader::new(
            Box::new(AxelTransport::new(self.connections)),
            RetryPolicy::from_parameters()?,
            Duration::from_secs(*parameters_toml::download_base_timeout_secs()?),
        ))
    }
}

impl MapArgs {
    fn mapper(&self) -> Result<Mapper> {
        let catalog = WhitelistCatalog::load(&self.whitelist_dir)
            .context("could not load the whitelist catalog")?;
        let star = StarAligner::new(self.index_dir.to_path_buf())
            .with_extra_args(parameters_toml::star_parameters()?);
        Ok(Mapper {
            engine: ParameterInferenceEngine::new(InferenceConfig::from_parameters()?),
            catalog: Arc::new(catalog),
            orchestrator: MappingOrchestrator::new(
                Box::new(star),
                RetryPolicy::from_parameters()?,
                base_resources(self.threads)?,
            ),
        })
    }
}

impl SubCommand {
    pub fn common(&self) -> &CommonArgs {
        match self {
            SubCommand::Download(c) => &c.common,
            SubCommand::Map(c) => &c.common,
            SubCommand::Run(c) => &c.common,
        }
    }

    pub fn mode(&self) -> RunMode {
        match self {
            SubCommand::Download(_) => RunMode::DownloadOnly,
            SubCommand::Map(_) => RunMode::MapOnly,
            SubCommand::Run(_) => RunMode::Full,
        }
    }

    fn config(&self) -> CoordinatorConfig {
        let common = self.common();
        let max_concurrent_mappings = match self {
            SubCommand::Download(_) => 1,
            SubCommand::Map(c) => c.map.max_concurrent_mappings,
            SubCommand::Run(c) => c.map.max_concurrent_mappings,
        };
        CoordinatorConfig {
            output_dir: common.output_dir.clone(),
            sample_workers: common.sample_workers,
            max_concurrent_mappings,
        }
    }

    /// Build the pipeline this subcommand runs. Fails if the whitelist
    /// catalog or the parameters cannot be loaded.
    pub fn coordinator(&self) -> Result<PipelineCoordinator> {
        let config = self.config();
        Ok(match self {
            SubCommand::Download(c) => {
                PipelineCoordinator::download_only(config, c.download.downloader()?)
            }
            SubCommand::Map(c) => {
                PipelineCoordinator::map_only(config, c.fastq_dir.to_path_buf(), c.map.mapper()?)
            }
            SubCommand::Run(c) => {
                PipelineCoordinator::full(config, c.download.downloader()?, c.map.mapper()?)
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    struct Inputs {
        dir: tempfile::TempDir,
    }

    impl Inputs {
        fn new() -> Result<Self> {
            let dir = tempfile::tempdir()?;
            std::fs::write(dir.path().join("sdrf.tsv"), "Assay Name\tComment[FASTQ_URI]\n")?;
            let whitelists = dir.path().join("whitelists");
            std::fs::create_dir_all(&whitelists)?;
            std::fs::write(whitelists.join("3M-february-2018.txt"), "AAAACCCCGGGGTTTT\n")?;
            std::fs::create_dir_all(dir.path().join("index"))?;
            std::fs::create_dir_all(dir.path().join("fastq"))?;
            Ok(Inputs { dir })
        }

        fn path(&self, name: &str) -> String {
            self.dir.path().join(name).display().to_string()
        }

        fn parse(&self, subcmd: &str, extra: &[&str]) -> Result<Scprep, clap::Error> {
            let mut args = vec![
                "scprep".to_string(),
                subcmd.to_string(),
                "--metadata".to_string(),
                self.path("sdrf.tsv"),
                "--output-dir".to_string(),
                self.path("out"),
            ];
            args.extend(extra.iter().map(|a| a.to_string()));
            Scprep::try_parse_from(args)
        }

        fn map_args(&self) -> Vec<String> {
            vec![
                "--index-dir".to_string(),
                self.path("index"),
                "--whitelist-dir".to_string(),
                self.path("whitelists"),
            ]
        }
    }

    #[test]
    fn test_download_defaults() -> Result<()> {
        let inputs = Inputs::new()?;
        let opts = inputs.parse("download", &[])?;
        let SubCommand::Download(download) = &opts.subcmd else {
            panic!("expected download, got {:?}", opts.subcmd);
        };
        assert_eq!(download.download.connections, 4);
        assert_eq!(download.common.sample_workers, 4);
        assert_eq!(download.common.output_dir, Path::new(&inputs.path("out")));
        assert_eq!(opts.subcmd.coordinator()?.mode(), RunMode::DownloadOnly);
        Ok(())
    }

    #[test]
    fn test_map_builds_map_only_pipeline() -> Result<()> {
        let inputs = Inputs::new()?;
        let mut extra = inputs.map_args();
        extra.extend(["--fastq-dir".to_string(), inputs.path("fastq")]);
        extra.extend(["--max-concurrent-mappings".to_string(), "2".to_string()]);
        let extra: Vec<&str> = extra.iter().map(String::as_str).collect();
        let opts = inputs.parse("map", &extra)?;

        assert_eq!(opts.subcmd.mode(), RunMode::MapOnly);
        assert_eq!(opts.subcmd.config().max_concurrent_mappings, 2);
        let SubCommand::Map(map) = &opts.subcmd else {
            panic!("expected map, got {:?}", opts.subcmd);
        };
        assert_eq!(map.map.threads, 32);
        assert_eq!(opts.subcmd.coordinator()?.mode(), RunMode::MapOnly);
        Ok(())
    }

    #[test]
    fn test_run_requires_whitelists() -> Result<()> {
        let inputs = Inputs::new()?;
        assert!(inputs.parse("run", &["--index-dir", inputs.path("index").as_str()]).is_err());

        let extra = inputs.map_args();
        let extra: Vec<&str> = extra.iter().map(String::as_str).collect();
        let opts = inputs.parse("run", &extra)?;
        assert_eq!(opts.subcmd.coordinator()?.mode(), RunMode::Full);
        Ok(())
    }

    #[test]
    fn test_missing_input_is_rejected() -> Result<()> {
        let inputs = Inputs::new()?;
        let missing = inputs.path("missing");
        let extra = ["--fastq-dir", missing.as_str()];
        let mut all = inputs.map_args();
        all.extend(extra.iter().map(|s| s.to_string()));
        let all: Vec<&str> = all.iter().map(String::as_str).collect();
        assert!(inputs.parse("map", &all).is_err());
        Ok(())
    }
}
