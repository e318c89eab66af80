use std::path::PathBuf;

use clap::Parser;
use dockercfg_reaper::config::ControllerConfig;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
enum Args {
    /// Watch for deleted dockercfg secrets and clean up after them
    Run(RunArgs),
    /// Print the default configuration
    Defaults,
}

#[derive(clap::Args, Debug)]
struct RunArgs {
    /// YAML configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Re-list secrets this often; never when unset
    #[arg(long)]
    resync_seconds: Option<u64>,

    #[arg(long)]
    max_update_attempts: Option<u32>,

    #[arg(long)]
    conflict_jitter_millis: Option<u64>,
}

impl RunArgs {
    fn into_config(self) -> anyhow::Result<ControllerConfig> {
        let mut config = match &self.config {
            Some(path) => ControllerConfig::from_file(path)?,
            None => ControllerConfig::default(),
        };

        if self.resync_seconds.is_some() {
            config.resync_seconds = self.resync_seconds;
        }
        if let Some(attempts) = self.max_update_attempts {
            config.max_update_attempts = attempts;
        }
        if let Some(millis) = self.conflict_jitter_millis {
            config.conflict_jitter_millis = millis;
        }

        Ok(config)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    match args {
        Args::Defaults => {
            println!("{}", serde_yaml::to_string(&ControllerConfig::default())?);
        }
        Args::Run(run_args) => {
            tracing_subscriber::fmt()
                .with_env_filter(
                    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
                )
                .init();

            dockercfg_reaper::run(run_args.into_config()?).await?;
        }
    };

    Ok(())
}
