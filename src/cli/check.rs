//! `kiln check`: ask the release index whether a newer kiln exists.
//!
//! Always queries the network (the throttle only applies to the passive check
//! behind `kiln version`) and records the result in the upgrade state file.

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Args;
use colored::Colorize;

use super::common::release_checker;
use crate::config::GlobalConfig;
use crate::upgrade::version::format_version_info;

#[derive(Args, Debug, Default)]
pub struct CheckArgs {
    /// Print the result as JSON
    #[arg(long)]
    pub json: bool,
}

impl CheckArgs {
    /// # Errors
    ///
    /// Network, HTTP and release validation failures.
    pub async fn execute(self, config: &GlobalConfig) -> Result<()> {
        let checker = release_checker(&config.upgrade)?;
        let info = checker.check_forced(Utc::now()).await?;

        if self.json {
            let json = serde_json::to_string_pretty(&info)
                .context("Failed to serialize version information")?;
            println!("{json}");
            return Ok(());
        }

        println!("{}", format_version_info(&info));
        if info.update_available {
            println!("Run {} to install it", "kiln upgrade".cyan().bold());
        }
        Ok(())
    }
}
