//! Firmware update command implementation.

use anyhow::{Context, Result};
use bleflash::{
    CancelToken, FileSource, HttpSource, ImageSource, Outcome, SerialConfig, SerialTransport, UpdateProgress,
    Updater, link_channel,
};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use log::debug;
use std::path::Path;

use crate::config::Config;
use crate::{Cli, CliError, DEFAULT_BAUD, get_port, use_fancy_output};

/// Where the firmware comes from.
pub(crate) enum FirmwareArg<'a> {
    /// Local file.
    File(&'a Path),
    /// File name resolved against a base URL.
    Remote {
        /// File name.
        name: &'a str,
        /// Base URL from the command line, if any.
        base_url: Option<&'a str>,
    },
}

fn resolve_source(firmware: FirmwareArg<'_>, config: &Config) -> Result<Box<dyn ImageSource>> {
    match firmware {
        FirmwareArg::File(path) => Ok(Box::new(FileSource::new(path))),
        FirmwareArg::Remote { name, base_url } => {
            let base = base_url
                .or(config
                    .source
                    .base_url
                    .as_deref())
                .ok_or_else(|| {
                    CliError::Usage(
                        "--url needs a base URL: pass --base-url or set [source] base_url".into(),
                    )
                })?;
            Ok(Box::new(HttpSource::new(base, name)))
        },
    }
}

fn progress_bar(cli: &Cli, json: bool) -> ProgressBar {
    if cli.quiet || json || !use_fancy_output() {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new(0);
    let bar_style = ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_bar());
    pb.set_style(bar_style.progress_chars("#>-"));
    pb.set_draw_target(indicatif::ProgressDrawTarget::stderr());
    pb
}

fn render(pb: &ProgressBar, progress: &UpdateProgress) {
    pb.set_length(progress.total_bytes as u64);
    pb.set_position(progress.sent_bytes as u64);
    let step = progress
        .step
        .map(|s| s.to_string())
        .unwrap_or_default();
    if progress.attempt > 0 {
        pb.set_message(format!("{step} (retry {})", progress.attempt));
    } else {
        pb.set_message(step);
    }
}

/// Update command implementation.
pub(crate) fn cmd_update(
    cli: &Cli,
    config: &mut Config,
    firmware: FirmwareArg<'_>,
    json: bool,
) -> Result<()> {
    let source = resolve_source(firmware, config)?;

    let port = get_port(cli, config)?;
    let baud = cli
        .baud
        .or(config
            .connection
            .baud)
        .unwrap_or(DEFAULT_BAUD);
    if !cli.quiet {
        eprintln!(
            "{} Using {} at {baud} baud",
            style("🔌").cyan(),
            style(&port).green()
        );
        eprintln!(
            "{} Loading firmware from {}",
            style("📦").cyan(),
            source.describe()
        );
    }

    let update_config = config.update_config();
    debug!("Update config: {update_config:?}");

    let (notifier, inbox) = link_channel();
    let cancel = CancelToken::new();
    let transport = SerialTransport::new(SerialConfig::new(&port, baud), notifier).with_cancel(cancel.clone());
    let mut updater = Updater::new(transport, inbox)
        .with_config(update_config)
        .with_cancel(cancel);

    let pb = progress_bar(cli, json);
    let result = updater.update_from(source.as_ref(), |progress| {
        if json {
            match serde_json::to_string(progress) {
                Ok(line) => println!("{line}"),
                Err(e) => debug!("Failed to encode progress: {e}"),
            }
        } else {
            render(&pb, progress);
        }
    });

    match result {
        Ok(outcome @ Outcome::Complete { .. }) => {
            pb.finish_with_message("Complete");
            if !cli.quiet {
                eprintln!("\n{} {outcome}", style("🎉").green().bold());
            }
            Ok(())
        },
        Ok(outcome) => {
            pb.abandon();
            Err(CliError::Cancelled(outcome.to_string()).into())
        },
        Err(e) => {
            pb.abandon();
            Err(e).with_context(|| format!("Update via {port} failed"))
        },
    }
}
