use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::secret::SecretString;

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct SigningConfig {
    #[serde(default)]
    pub enabled: bool,
    /// PKCS#12/PFX bundle with signer cert + private key, handed to the
    /// signer adapter.
    #[serde(default)]
    pub pfx_path: Option<PathBuf>,
    #[serde(default)]
    pub pfx_password: Option<SecretString>,
    /// External signer command (unsigned PDF on stdin, signed PDF on
    /// stdout). When unset, signing requires a pfx bundle and the built-in
    /// adapter refuses to run.
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default)]
    pub pades: PadesConfig,
    #[serde(default)]
    pub timestamp: TimestampConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct PadesConfig {
    #[serde(default = "default_reason")]
    pub reason: String,
    #[serde(default = "default_location")]
    pub location: String,
}

impl Default for PadesConfig {
    fn default() -> Self {
        Self {
            reason: default_reason(),
            location: default_location(),
        }
    }
}

fn default_reason() -> String {
    "Ticket Archivierung".to_string()
}

fn default_location() -> String {
    "Datacenter".to_string()
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct TimestampConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub rfc3161: Rfc3161Config,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Rfc3161Config {
    #[serde(default)]
    pub tsa_url: Option<Url>,
    #[serde(default = "default_tsa_timeout")]
    pub timeout_seconds: f64,
    #[serde(default)]
    pub ca_bundle_path: Option<PathBuf>,
}

impl Default for Rfc3161Config {
    fn default() -> Self {
        Self {
            tsa_url: None,
            timeout_seconds: default_tsa_timeout(),
            ca_bundle_path: None,
        }
    }
}

fn default_tsa_timeout() -> f64 {
    10.0
}
