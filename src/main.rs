//! `tomoscan` command-line entry point.

use anyhow::{bail, Context};
use clap::{CommandFactory, Parser};
use tomoscan::cli::{Cli, Commands, ScanOverrides};
use tomoscan::config::{default_config_path, ScanConfig};
use tomoscan::{completion, logging, pv, scan};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config_path = cli.config.clone().unwrap_or_else(default_config_path);

    match &cli.command {
        Commands::Init { force } => {
            logging::init_console(cli.verbose);
            if config_path.exists() && !force {
                bail!(
                    "{} already exists, use --force to overwrite it",
                    config_path.display()
                );
            }
            ScanConfig::default()
                .write(&config_path)
                .with_context(|| format!("writing {}", config_path.display()))?;
            tracing::info!(path = %config_path.display(), "default configuration written");
        }
        Commands::Completion { output } => {
            logging::init_console(cli.verbose);
            let config = ScanConfig::load(&config_path, &cli.layer(&ScanOverrides::default()))
                .context("loading configuration")?;
            let path = output.clone().unwrap_or_else(completion::default_output);
            completion::write_script(&Cli::command(), &config, &path)
                .with_context(|| format!("writing {}", path.display()))?;
        }
        Commands::Status(overrides) | Commands::Scan(overrides) | Commands::Test(overrides) => {
            let mut config = ScanConfig::load(&config_path, &cli.layer(overrides))
                .with_context(|| format!("loading {}", config_path.display()))?;
            config.validate().context("invalid configuration")?;
            logging::init(&config.general.logs_home, config.general.verbose)
                .context("starting logging")?;

            match &cli.command {
                Commands::Status(_) => {
                    tracing::info!(path = %config_path.display(), "effective configuration");
                    config.log_values()?;
                }
                Commands::Test(_) => {
                    let channels = pv::connect(&config)?;
                    let model = scan::check_detector(&channels, &config)
                        .await
                        .context("detector test failed")?;
                    tracing::info!(model = %model, "detector ready");
                }
                _ => {
                    config.log_values()?;
                    let channels = pv::connect(&config)?;
                    let records =
                        scan::run_campaign(&channels, &mut config, &config_path, scan::ctrl_c())
                            .await
                            .context("scan failed")?;
                    for record in &records {
                        tracing::info!(
                            file = %record.data_file,
                            duration_s = record.duration_s,
                            "data set collected"
                        );
                    }
                }
            }
        }
    }

    Ok(())
}
