// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use {
    anyhow::{anyhow, Context, Result},
    clap::{Arg, ArgMatches, Command},
    kconfig_fetch::{
        config::load_config,
        run::{run_distros, AppContext},
        state::StateFile,
    },
    log::LevelFilter,
    std::{path::PathBuf, sync::Arc},
};

const ABOUT: &str = "\
# About

`kcc` downloads and catalogs kernel build configurations.

Each distribution declared in the config file is checked for a newer kernel
package. New packages are downloaded, their signatures verified, and their
build configuration extracted to `<output-dir>/<distribution>/config`. A
state file keeps subsequent runs incremental.
";

pub async fn run() -> Result<()> {
    let app = Command::new("Kernel Config Collector")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Collect kernel build configurations from distribution packages")
        .long_about(ABOUT);

    let app = app.arg(
        Arg::new("config")
            .required(true)
            .takes_value(true)
            .help("Configuration file declaring tracked distributions"),
    );

    let app = app.arg(
        Arg::new("state")
            .long("state")
            .takes_value(true)
            .default_value("state.json")
            .help("JSON file holding the state of the last run"),
    );

    let app = app.arg(
        Arg::new("download_dir")
            .long("download-dir")
            .takes_value(true)
            .default_value("save")
            .help("Directory where downloads are stored"),
    );

    let app = app.arg(
        Arg::new("output_dir")
            .long("output-dir")
            .takes_value(true)
            .default_value("out")
            .help("Directory where extracted configs are stored"),
    );

    let app = app.arg(
        Arg::new("keys_dir")
            .long("keys-dir")
            .takes_value(true)
            .default_value("gpg-keys")
            .help("Directory holding one keyring file per trust anchor name"),
    );

    let app = app.arg(
        Arg::new("ikconfig_script")
            .long("ikconfig-script")
            .takes_value(true)
            .default_value("extract-ikconfig")
            .help("Helper that recovers an embedded config from a kernel image"),
    );

    let app = app.arg(
        Arg::new("filter")
            .long("filter")
            .short('f')
            .takes_value(true)
            .multiple_occurrences(true)
            .help("Only run config sections matching these fnmatch patterns"),
    );

    let app = app.arg(
        Arg::new("verbose")
            .long("verbose")
            .short('v')
            .multiple_occurrences(true)
            .global(true)
            .help("Increase logging verbosity"),
    );

    let matches = app.get_matches();

    let log_level = match matches.occurrences_of("verbose") {
        0 => LevelFilter::Info,
        1 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };

    let mut builder = env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(log_level.as_str()),
    );

    // Disable log context except at higher log levels.
    if log_level <= LevelFilter::Info {
        builder
            .format_timestamp(None)
            .format_level(false)
            .format_target(false);
    }

    builder.init();

    command_collect(&matches).await
}

async fn command_collect(args: &ArgMatches) -> Result<()> {
    let config_path = PathBuf::from(args.value_of("config").expect("argument is required"));
    let state_path = PathBuf::from(args.value_of("state").expect("argument has default"));
    let download_dir = PathBuf::from(args.value_of("download_dir").expect("argument has default"));
    let output_dir = PathBuf::from(args.value_of("output_dir").expect("argument has default"));
    let keys_dir = PathBuf::from(args.value_of("keys_dir").expect("argument has default"));
    let ikconfig = PathBuf::from(
        args.value_of("ikconfig_script")
            .expect("argument has default"),
    );

    let filters = args
        .values_of("filter")
        .unwrap_or_default()
        .map(|pattern| {
            glob::Pattern::new(pattern)
                .map_err(|e| anyhow!("invalid filter pattern {pattern}: {e}"))
        })
        .collect::<Result<Vec<_>>>()?;

    let specs = load_config(&config_path, &filters)
        .await
        .with_context(|| format!("loading config from {}", config_path.display()))?;

    let prior = StateFile::load(&state_path)
        .await
        .with_context(|| format!("loading state from {}", state_path.display()))?;

    let ctx = Arc::new(AppContext::new(keys_dir, ikconfig)?);

    let report = run_distros(
        &specs,
        &prior,
        !filters.is_empty(),
        &download_dir,
        &output_dir,
        ctx,
    )
    .await?;

    report
        .state
        .save(&state_path)
        .await
        .with_context(|| format!("saving state to {}", state_path.display()))?;

    if report.failures.is_empty() {
        Ok(())
    } else {
        // The failures were logged as they happened; summarize for the exit.
        Err(anyhow!(
            "{} of {} distributions failed",
            report.failures.len(),
            specs.len()
        ))
    }
}
