//! scprep
#![deny(missing_docs)]

use anyhow::Result;
use clap::Parser;
use log::info;
use sc_lib::CancelToken;
use sc_types::ManifestReader;
use sc_wrap::commands::Scprep;
use sc_wrap::logging::init_logging;
use sc_wrap::signals::cancel_on_signals;
use sc_wrap::IntoExitCode;
use std::process::ExitCode;

fn inner_main() -> Result<ExitCode> {
    let opts = Scprep::parse();
    let common = opts.subcmd.common();
    init_logging(common.log_file.as_deref())?;
    info!(
        "scprep {} {} run, writing to {}",
        env!("CARGO_PKG_VERSION"),
        opts.subcmd.mode(),
        common.output_dir.display()
    );

    let manifest = ManifestReader::new()
        .with_id_column(common.id_column.clone())
        .read(&common.metadata)?;
    let coordinator = opts.subcmd.coordinator()?;

    let cancel = CancelToken::new();
    cancel_on_signals(&cancel)?;
    let report = coordinator.with_cancel(cancel.clone()).run(&manifest)?;
    if cancel.is_cancelled() {
        info!("run was interrupted; unfinished samples are reported as skipped");
    }
    Ok(report.into_exit_code())
}

fn main() -> ExitCode {
    match inner_main() {
        Ok(exit_code) => exit_code,
        Err(err) => {
            sc_wrap::utils::print_error_chain(&err);
            ExitCode::FAILURE
        }
    }
}
