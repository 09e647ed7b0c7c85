use secrecy::SecretString;
use std::env;

/// Access key pair used to sign requests.
#[derive(Clone, Debug)]
pub struct Credentials {
    // access key id
    key: String,
    // secret access key
    secret: SecretString,
}

impl Credentials {
    #[must_use]
    pub fn new(access: &str, secret: &str) -> Self {
        Self {
            key: access.to_string(),
            secret: SecretString::new(secret.to_string()),
        }
    }

    /// Read the key pair from `AWS_ACCESS_KEY` / `AWS_SECRET_KEY`.
    ///
    /// # Errors
    ///
    /// Will return `Err` if either variable is missing
    pub fn from_env() -> Result<Self, env::VarError> {
        let access = env::var("AWS_ACCESS_KEY")?;
        let secret = env::var("AWS_SECRET_KEY")?;
        Ok(Self::new(&access, &secret))
    }

    /// Get a reference to the access key ID.
    #[must_use]
    pub fn access_key(&self) -> &str {
        &self.key
    }

    /// Get a reference to the secret access key.
    #[must_use]
    pub fn secret_key(&self) -> &SecretString {
        &self.secret
    }
}
