use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "marquee")]
#[command(about = "Venue kiosk display client")]
pub struct Cli {
    /// 1-based display slot this instance renders to. Absent or 1 makes
    /// this the primary instance.
    #[arg(long)]
    pub slot: Option<u32>,

    /// Run as an unallocated device: show device attributes, never poll.
    #[arg(long)]
    pub unallocated: bool,

    /// Venue service base URL. Overrides MARQUEE_HOST and any persisted
    /// setting.
    #[arg(long)]
    pub host: Option<String>,

    /// Shared storage directory for cross-instance coordination.
    #[arg(long)]
    pub store_dir: Option<PathBuf>,

    /// Static device-id override; skips the managed identity provider.
    #[arg(long)]
    pub device_id: Option<String>,
}
