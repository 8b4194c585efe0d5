//! `kiln version`: print the installed version and mention available updates.

use anyhow::Result;
use chrono::Utc;
use clap::Args;
use tracing::debug;

use super::common::{CURRENT_VERSION, release_checker};
use crate::config::GlobalConfig;
use crate::upgrade::version_check::display_update_notification;

#[derive(Args, Debug, Default)]
pub struct VersionArgs {
    /// Skip the background update check
    #[arg(long)]
    pub no_check: bool,
}

impl VersionArgs {
    /// Never fails because of the update check; only client construction can.
    ///
    /// # Errors
    ///
    /// Fails if the HTTP client cannot be constructed.
    pub async fn execute(self, config: &GlobalConfig) -> Result<()> {
        println!("kiln {CURRENT_VERSION}");

        if self.no_check || !config.upgrade.check_on_startup {
            debug!("Update check disabled");
            return Ok(());
        }

        let checker = release_checker(&config.upgrade)?;
        if let Some(info) = checker.check_passive(Utc::now()).await {
            if info.update_available {
                display_update_notification(&info);
            }
        }
        Ok(())
    }
}
