use std::path::PathBuf;

use clap::Parser;

#[derive(Debug, Parser)]
#[command(name = "wa-bridge-discord", about = "Multi-tenant Discord/WhatsApp bridge", version)]
pub struct Cli {
    /// Path to the YAML configuration file.
    #[arg(long, short, env = "CONFIG_PATH", default_value = "config.yaml")]
    pub config: PathBuf,
}
