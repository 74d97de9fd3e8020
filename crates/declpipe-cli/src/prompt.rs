//! Terminal prompts.

use console::style;
use dialoguer::{Confirm, theme::ColorfulTheme};

/// Show the uncommitted paths and ask whether to deploy them anyway.
///
/// With `assume_yes` the listing is still printed but no question is asked.
/// A prompt that cannot be shown (no terminal) counts as a refusal.
pub fn confirm_forced_deploy(changes: &[String], assume_yes: bool) -> bool {
    eprintln!(
        "{}",
        style("Uncommitted changes will be deployed:").yellow().bold()
    );
    for change in changes {
        eprintln!("  {}", style(change).yellow());
    }

    if assume_yes {
        return true;
    }

    match Confirm::with_theme(&ColorfulTheme::default())
        .with_prompt("Deploy anyway?")
        .default(false)
        .interact()
    {
        Ok(answer) => answer,
        Err(err) => {
            tracing::warn!(error = %err, "confirmation prompt unavailable");
            false
        }
    }
}
