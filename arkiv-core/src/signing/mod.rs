//! Signing capability: a boxed "signed bytes from unsigned bytes"
//! operation with a defined error taxonomy.
//!
//! Real PAdES/RFC3161 work happens outside the service; the shipped
//! adapter pipes the PDF through an external signer command and maps its
//! failures into the taxonomy the classifier understands. Material is
//! pre-validated so obvious misconfiguration fails before rendering work
//! is wasted.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use arkiv_config::SigningConfig;

#[derive(Debug, Error)]
pub enum SigningError {
    #[error("Missing signing material: {0}")]
    MaterialMissing(String),

    #[error("Failed to load signing material: {0}")]
    MaterialInvalid(String),

    #[error("Signing certificate is not valid before {0}")]
    CertNotYetValid(String),

    #[error("Signing certificate expired on {0}")]
    CertExpired(String),

    #[error("TSA unreachable: {0}")]
    TsaUnreachable(String),

    #[error("TSA server error (status={status})")]
    TsaServer { status: u16 },

    #[error("TSA rejected request (status={status})")]
    TsaRejected { status: u16 },

    #[error("malformed TSA reply: {0}")]
    TsaMalformedReply(String),

    #[error("signer command failed (exit={code:?}): {stderr}")]
    SignerFailed {
        code: Option<i32>,
        stderr: String,
        /// EX_TEMPFAIL and friends; feeds the classifier.
        transient: bool,
    },
}

#[async_trait]
pub trait Signer: Send + Sync {
    async fn sign(&self, pdf: &[u8]) -> Result<Vec<u8>, SigningError>;

    /// SHA-256 fingerprint of the configured signing material, for the
    /// audit record.
    fn material_fingerprint(&self) -> Option<String>;
}

pub type SharedSigner = Arc<dyn Signer>;

/// sysexits(3) EX_TEMPFAIL.
const EX_TEMPFAIL: i32 = 75;
const SYSEXITS_RANGE: std::ops::RangeInclusive<i32> = 64..=78;

const SIGNER_TIMEOUT: Duration = Duration::from_secs(120);

/// External-command signer: unsigned PDF on stdin, signed PDF on stdout,
/// exit 0 on success.
pub struct CommandSigner {
    command: Vec<String>,
    material_fingerprint: Option<String>,
    pfx_path: Option<PathBuf>,
}

impl std::fmt::Debug for CommandSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandSigner")
            .field("command", &self.command.first())
            .finish()
    }
}

impl CommandSigner {
    /// Validate the configured material and build the signer. Fails early
    /// on missing command or missing/unreadable pfx bundle.
    pub fn from_config(cfg: &SigningConfig) -> Result<Self, SigningError> {
        let command_line = cfg
            .command
            .as_deref()
            .ok_or_else(|| SigningError::MaterialMissing("signing.command".to_string()))?;
        let command: Vec<String> = command_line
            .split_whitespace()
            .map(str::to_string)
            .collect();
        if command.is_empty() {
            return Err(SigningError::MaterialMissing("signing.command".to_string()));
        }

        let mut material_fingerprint = None;
        if let Some(pfx_path) = &cfg.pfx_path {
            if !pfx_path.is_file() {
                return Err(SigningError::MaterialMissing(format!(
                    "PFX file not found: {}",
                    pfx_path.display()
                )));
            }
            let bytes = std::fs::read(pfx_path).map_err(|err| {
                SigningError::MaterialInvalid(format!(
                    "cannot read {}: {err}",
                    pfx_path.display()
                ))
            })?;
            if bytes.is_empty() {
                return Err(SigningError::MaterialInvalid(format!(
                    "{} is empty",
                    pfx_path.display()
                )));
            }
            material_fingerprint = Some(hex::encode(Sha256::digest(&bytes)));
        }

        Ok(Self {
            command,
            material_fingerprint,
            pfx_path: cfg.pfx_path.clone(),
        })
    }

    fn map_failure(&self, code: Option<i32>, stderr: String) -> SigningError {
        let lower = stderr.to_ascii_lowercase();

        if lower.contains("expired") {
            return SigningError::CertExpired(stderr);
        }
        if lower.contains("not valid before") || lower.contains("not yet valid") {
            return SigningError::CertNotYetValid(stderr);
        }
        if lower.contains("password") || lower.contains("pkcs") || lower.contains("pfx") {
            return SigningError::MaterialInvalid(stderr);
        }
        if lower.contains("tsa") || lower.contains("timestamp") {
            if lower.contains("timeout")
                || lower.contains("unreachable")
                || lower.contains("connect")
                || lower.contains("network")
            {
                return SigningError::TsaUnreachable(stderr);
            }
            return SigningError::TsaMalformedReply(stderr);
        }

        let transient = match code {
            Some(EX_TEMPFAIL) => true,
            Some(code) if SYSEXITS_RANGE.contains(&code) => false,
            // Signals and unknown codes: fail-safe permanent.
            _ => false,
        };
        SigningError::SignerFailed {
            code,
            stderr,
            transient,
        }
    }
}

#[async_trait]
impl Signer for CommandSigner {
    async fn sign(&self, pdf: &[u8]) -> Result<Vec<u8>, SigningError> {
        let (program, args) = self
            .command
            .split_first()
            .ok_or_else(|| SigningError::MaterialMissing("signing.command".to_string()))?;

        let mut cmd = Command::new(program);
        cmd.args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(pfx_path) = &self.pfx_path {
            cmd.env("ARKIV_SIGNING_PFX", pfx_path);
        }

        let mut child = cmd.spawn().map_err(|err| {
            SigningError::MaterialInvalid(format!("cannot start signer {program:?}: {err}"))
        })?;

        let mut stdin = child.stdin.take().expect("stdin was piped");
        stdin.write_all(pdf).await.map_err(|err| SigningError::SignerFailed {
            code: None,
            stderr: format!("failed to write signer stdin: {err}"),
            transient: true,
        })?;
        drop(stdin);

        let output = tokio::time::timeout(SIGNER_TIMEOUT, child.wait_with_output())
            .await
            .map_err(|_| SigningError::TsaUnreachable("signer timed out".to_string()))?
            .map_err(|err| SigningError::SignerFailed {
                code: None,
                stderr: format!("failed to collect signer output: {err}"),
                transient: true,
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Err(self.map_failure(output.status.code(), stderr));
        }

        if output.stdout.is_empty() {
            return Err(SigningError::SignerFailed {
                code: output.status.code(),
                stderr: "signer produced no output".to_string(),
                transient: false,
            });
        }

        Ok(output.stdout)
    }

    fn material_fingerprint(&self) -> Option<String> {
        self.material_fingerprint.clone()
    }
}
