//! Push command handler

use anyhow::Result;
use colored::*;
use shipyard_client::DeployerClient;
use shipyard_core::dto::registry::PushNotification;

use crate::config::Config;

/// Announce a registry push, as a registry webhook would
pub async fn push(config: &Config, repository: String, tag: String) -> Result<()> {
    let client = DeployerClient::new(&config.deployer_url)?;
    let image = format!("{}:{}", repository, tag);

    let outcome = client
        .notify_push(PushNotification { repository, tag })
        .await?;

    if outcome.accepted {
        println!("{}", format!("✓ Push of {} queued for deployment", image).green().bold());
    } else if outcome.ignored {
        println!(
            "{}",
            format!("Push of {} ignored: tag is not watched", image).yellow()
        );
    }

    Ok(())
}
