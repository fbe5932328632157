//! STARsolo as the aligner.

use crate::mapping::{AlignmentJob, AlignmentTool, ToolRun};
use crate::process::{log_tail, run_with_deadline};
use anyhow::Result;
use std::ffi::OsString;
use std::path::PathBuf;
use std::process::Command;

/// Directory, relative to the output prefix, STARsolo writes matrices to.
pub const SOLO_OUTPUT_DIR: &str = "output";

const LOG_FILE: &str = "star.log";
const LOG_TAIL_BYTES: u64 = 4096;

#[derive(Debug, Clone)]
pub struct StarAligner {
    pub program: PathBuf,
    pub genome_dir: PathBuf,
    /// Appended verbatim after the generated arguments.
    pub extra_args: Vec<String>,
}

impl StarAligner {
    pub fn new(genome_dir: PathBuf) -> Self {
        StarAligner {
            program: PathBuf::from("STAR"),
            genome_dir,
            extra_args: Vec::new(),
        }
    }

    pub fn with_extra_args(mut self, extra_args: &str) -> Self {
        self.extra_args = extra_args.split_whitespace().map(String::from).collect();
        self
    }

    /// Command-line arguments for one attempt.
    pub fn args(&self, job: &AlignmentJob<'_>) -> Vec<OsString> {
        let wl = job.whitelist;
        let mut prefix = job.output_dir.as_os_str().to_os_string();
        prefix.push("/");
        let mut args: Vec<OsString> = Vec::new();
        let mut push = |flag: &str, values: &[OsString]| {
            args.push(flag.into());
            args.extend(values.iter().cloned());
        };
        let s = |v: &str| OsString::from(v);

        push("--runThreadN", &[s(&job.resources.cpus.to_string())]);
        push("--genomeDir", &[self.genome_dir.clone().into()]);
        // cDNA first, then the barcode read.
        push(
            "--readFilesIn",
            &[
                job.file_set.read2.path.clone().into(),
                job.file_set.read1.path.clone().into(),
            ],
        );
        if job.file_set.read1.is_gzipped() {
            push("--readFilesCommand", &[s("zcat")]);
        }
        push("--runDirPerm", &[s("All_RWX")]);
        push("--limitBAMsortRAM", &[s(&job.resources.mem_bytes().to_string())]);
        push("--soloType", &[s("CB_UMI_Simple")]);
        push("--soloCBwhitelist", &[wl.path.clone().into()]);
        push("--soloCBstart", &[s("1")]);
        push("--soloCBlen", &[s(&wl.barcode_length.to_string())]);
        push("--soloUMIstart", &[s(&(wl.barcode_length + 1).to_string())]);
        push("--soloUMIlen", &[s(&wl.umi_length.to_string())]);
        if !job.uniform_read_length {
            push("--soloBarcodeReadLength", &[s("0")]);
        }
        push("--soloStrand", &[s("Forward")]);
        push("--soloCBmatchWLtype", &[s("1MM_multi_Nbase_pseudocounts")]);
        push("--soloUMIfiltering", &[s("MultiGeneUMI_CR")]);
        push("--soloUMIdedup", &[s("1MM_CR")]);
        push("--clipAdapterType", &[s("CellRanger4")]);
        push("--outFilterScoreMin", &[s("30")]);
        push("--soloFeatures", &[s("Gene"), s("GeneFull"), s("Velocyto")]);
        push(
            "--soloOutFileNames",
            &[
                s(&format!("{SOLO_OUTPUT_DIR}/")),
                s("features.tsv"),
                s("barcodes.tsv"),
                s("matrix.mtx"),
            ],
        );
        push("--outFileNamePrefix", &[prefix]);
        args.extend(self.extra_args.iter().map(OsString::from));
        args
    }
}

impl AlignmentTool for StarAligner {
    fn name(&self) -> &str {
        "STAR"
    }

    fn run(&self, job: &AlignmentJob<'_>) -> Result<ToolRun> {
        let log_path = job.output_dir.join(LOG_FILE);
        let mut cmd = Command::new(&self.program);
        cmd.args(self.args(job));
        let exit = run_with_deadline(&mut cmd, job.resources.wall_time, &log_path)?;
        // STAR reports allocation failures in Log.out as well as on stderr.
        let mut log_excerpt = log_tail(&job.output_dir.join("Log.out"), LOG_TAIL_BYTES);
        log_excerpt.push('\n');
        log_excerpt.push_str(&log_tail(&log_path, LOG_TAIL_BYTES));
        let artifact = Some(job.output_dir.join(SOLO_OUTPUT_DIR)).filter(|dir| dir.is_dir());
        Ok(ToolRun {
            exit,
            log_excerpt: log_excerpt.trim().to_string(),
            artifact,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use sc_types::{FileSet, ReadFile, ResolvedWhitelist, ResourceAllocation};
    use std::path::Path;
    use std::time::Duration;

    fn file_set(ext: &str) -> FileSet {
        FileSet {
            sample: "S1".into(),
            read1: ReadFile {
                path: format!("/data/S1_R1.{ext}").into(),
                bytes: 1,
            },
            read2: ReadFile {
                path: format!("/data/S1_R2.{ext}").into(),
                bytes: 1,
            },
        }
    }

    fn whitelist() -> ResolvedWhitelist {
        ResolvedWhitelist {
            name: "3M-february-2018".into(),
            path: "/wl/3M-february-2018.txt".into(),
            barcode_length: 16,
            umi_length: 12,
        }
    }

    fn value_of<'a>(args: &'a [String], flag: &str) -> Vec<&'a str> {
        let start = args.iter().position(|a| a == flag).map(|i| i + 1);
        start
            .map(|i| {
                args[i..]
                    .iter()
                    .take_while(|a| !a.starts_with("--"))
                    .map(String::as_str)
                    .collect()
            })
            .unwrap_or_default()
    }

    fn render(aligner: &StarAligner, fs: &FileSet, uniform: bool) -> Vec<String> {
        let wl = whitelist();
        let job = AlignmentJob {
            file_set: fs,
            whitelist: &wl,
            uniform_read_length: uniform,
            output_dir: Path::new("/out/samples/S1/star"),
            resources: ResourceAllocation {
                cpus: 8,
                mem_gb: 2,
                wall_time: Duration::from_secs(60),
            },
            attempt: 1,
        };
        aligner
            .args(&job)
            .into_iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn test_star_arguments() {
        let aligner = StarAligner::new("/ref/star".into()).with_extra_args("--soloCellFilter None");
        let args = render(&aligner, &file_set("fastq.gz"), true);
        assert_eq!(value_of(&args, "--runThreadN"), ["8"]);
        assert_eq!(value_of(&args, "--genomeDir"), ["/ref/star"]);
        assert_eq!(
            value_of(&args, "--readFilesIn"),
            ["/data/S1_R2.fastq.gz", "/data/S1_R1.fastq.gz"]
        );
        assert_eq!(value_of(&args, "--readFilesCommand"), ["zcat"]);
        assert_eq!(value_of(&args, "--soloCBlen"), ["16"]);
        assert_eq!(value_of(&args, "--soloUMIstart"), ["17"]);
        assert_eq!(value_of(&args, "--soloUMIlen"), ["12"]);
        assert_eq!(value_of(&args, "--limitBAMsortRAM"), ["2147483648"]);
        assert_eq!(value_of(&args, "--soloFeatures"), ["Gene", "GeneFull", "Velocyto"]);
        assert_eq!(value_of(&args, "--outFileNamePrefix"), ["/out/samples/S1/star/"]);
        assert_eq!(value_of(&args, "--soloCellFilter"), ["None"]);
        assert!(!args.iter().any(|a| a == "--soloBarcodeReadLength"));
    }

    #[test]
    fn test_mixed_read_lengths_and_plain_fastq() {
        let aligner = StarAligner::new("/ref/star".into());
        let args = render(&aligner, &file_set("fastq"), false);
        assert_eq!(value_of(&args, "--soloBarcodeReadLength"), ["0"]);
        assert!(!args.iter().any(|a| a == "--readFilesCommand"));
    }
}
