use async_trait::async_trait;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use super::{RelyingParty, TransportError};
use crate::webauthn::{AssertionPayload, RegistrationPayload};

#[derive(Debug, Clone)]
pub enum ChallengeSource {
    Stdin,
    File(PathBuf),
}

impl ChallengeSource {
    /// `-` means stdin.
    pub fn from_arg(path: &Path) -> Self {
        if path == Path::new("-") {
            Self::Stdin
        } else {
            Self::File(path.to_path_buf())
        }
    }
}

/// File-based relying party used by the command line: challenges come from a
/// file or stdin, payloads are written as JSON into an outbox directory and
/// echoed on stdout for whatever carries them onward.
pub struct SpoolRelyingParty {
    challenges: Option<ChallengeSource>,
    outbox: PathBuf,
    echo: bool,
}

impl SpoolRelyingParty {
    pub fn new(outbox: PathBuf, challenges: Option<ChallengeSource>) -> Self {
        Self {
            challenges,
            outbox,
            echo: true,
        }
    }

    pub fn quiet(mut self) -> Self {
        self.echo = false;
        self
    }

    async fn spool<T: Serialize>(&self, name: &str, payload: &T) -> Result<(), TransportError> {
        let mut json = serde_json::to_vec_pretty(payload)
            .map_err(|e| TransportError::Serialization(e.to_string()))?;
        json.push(b'\n');

        tokio::fs::create_dir_all(&self.outbox).await?;
        let tmp = self.outbox.join(format!("{name}.tmp"));
        let path = self.outbox.join(name);
        {
            let mut file = tokio::fs::File::create(&tmp).await?;
            file.write_all(&json).await?;
            file.sync_all().await?;
        }
        tokio::fs::rename(&tmp, &path).await?;
        tracing::info!(path = %path.display(), "Payload spooled");

        if self.echo {
            let mut stdout = tokio::io::stdout();
            stdout.write_all(&json).await?;
            stdout.flush().await?;
        }
        Ok(())
    }
}

#[async_trait]
impl RelyingParty for SpoolRelyingParty {
    async fn submit_registration(
        &self,
        payload: &RegistrationPayload,
    ) -> Result<(), TransportError> {
        self.spool("registration.json", payload).await
    }

    async fn fetch_challenge(&self) -> Result<Vec<u8>, TransportError> {
        match &self.challenges {
            None => Err(TransportError::Rejected("no challenge source configured".into())),
            Some(ChallengeSource::File(path)) => Ok(tokio::fs::read(path).await?),
            Some(ChallengeSource::Stdin) => {
                let mut buf = Vec::new();
                tokio::io::stdin().read_to_end(&mut buf).await?;
                Ok(buf)
            }
        }
    }

    async fn submit_assertion(&self, payload: &AssertionPayload) -> Result<(), TransportError> {
        let name = format!("assertion-{}.json", file_safe(&payload.session_id));
        self.spool(&name, payload).await
    }
}

/// Session ids come from the relying party; keep them from escaping the outbox.
fn file_safe(id: &str) -> String {
    id.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}
