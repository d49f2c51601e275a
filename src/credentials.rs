//! SQL administrator credential capture.
//!
//! The password comes from configuration when present, otherwise from a
//! hidden terminal prompt. Passwords are never logged - `SqlCredentials`
//! implements a custom `Debug` that redacts them.

use std::fmt;

use secrecy::{ExposeSecret, SecretString};

use crate::error::AppError;

/// SQL authentication credentials for the target server.
#[derive(Clone)]
pub struct SqlCredentials {
    pub username: String,
    pub password: SecretString,
}

impl fmt::Debug for SqlCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SqlCredentials")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

/// Returns credentials for `username`.
///
/// # Arguments
/// * `username` - The server administrator login
/// * `preset` - A password supplied through flags or environment, if any
///
/// # Errors
/// Returns `AppError::InvalidConfig` if the password is empty or the prompt
/// cannot read from the terminal.
pub async fn prompt_credentials(
    username: &str,
    preset: Option<SecretString>,
) -> Result<SqlCredentials, AppError> {
    if username.trim().is_empty() {
        return Err(AppError::InvalidConfig(
            "Administrator login must not be empty".into(),
        ));
    }

    let password = match preset {
        Some(password) => password,
        None => {
            let prompt = format!("Password for SQL administrator '{}'", username);
            tokio::task::spawn_blocking(move || {
                dialoguer::Password::new()
                    .with_prompt(prompt)
                    .interact()
                    .map(SecretString::from)
                    .map_err(|_| {
                        AppError::InvalidConfig(
                            "Could not read the administrator credential from the terminal".into(),
                        )
                    })
            })
            .await
            .map_err(|_| AppError::Internal("Credential prompt task failed".into()))??
        }
    };

    if password.expose_secret().is_empty() {
        return Err(AppError::InvalidConfig(
            "Administrator credential must not be empty".into(),
        ));
    }

    Ok(SqlCredentials {
        username: username.to_string(),
        password,
    })
}
