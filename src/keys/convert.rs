//! PuTTY key conversion

use std::ffi::OsString;
use std::path::Path;

use async_trait::async_trait;

use super::tool::{run_tool, ToolError};

/// Converts a foreign-format private key into OpenSSH format at `output`
#[async_trait]
pub trait KeyConverter: Send + Sync {
    async fn convert(
        &self,
        source: &Path,
        output: &Path,
        passphrase: Option<&str>,
    ) -> Result<(), ToolError>;
}

/// `puttygen <src> -O private-openssh -o <out> [-passphrase <p>]`
#[derive(Debug, Clone)]
pub struct PuttygenConverter {
    program: String,
}

impl PuttygenConverter {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    pub fn program(&self) -> &str {
        &self.program
    }
}

impl Default for PuttygenConverter {
    fn default() -> Self {
        Self::new("puttygen")
    }
}

fn puttygen_args(source: &Path, output: &Path, passphrase: Option<&str>) -> Vec<OsString> {
    let mut args: Vec<OsString> = vec![
        source.into(),
        "-O".into(),
        "private-openssh".into(),
        "-o".into(),
        output.into(),
    ];
    // Passing it up front keeps puttygen from prompting
    if let Some(passphrase) = passphrase.filter(|p| !p.is_empty()) {
        args.push("-passphrase".into());
        args.push(passphrase.into());
    }
    args
}

#[async_trait]
impl KeyConverter for PuttygenConverter {
    async fn convert(
        &self,
        source: &Path,
        output: &Path,
        passphrase: Option<&str>,
    ) -> Result<(), ToolError> {
        run_tool(&self.program, puttygen_args(source, output, passphrase)).await
    }
}
