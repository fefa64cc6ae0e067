//! Interactive prompts

use anyhow::Result;
use dialoguer::{Confirm, Password};

/// Ask user for yes/no confirmation
pub fn confirm(prompt: &str) -> Result<bool> {
    let result = Confirm::new()
        .with_prompt(prompt)
        .default(false)
        .interact()?;

    Ok(result)
}

/// Read a password without echoing it
pub fn password(prompt: &str) -> Result<String> {
    let result = Password::new()
        .with_prompt(prompt)
        .allow_empty_password(true)
        .interact()?;

    Ok(result)
}
