use async_trait::async_trait;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use super::prompt::PresencePrompt;
use super::{PresenceOutcome, UserPresence};

/// Presence check through a pinentry confirmation dialog.
///
/// A pinentry confirmation proves presence only, so grants carry
/// `user_verified: false`.
pub struct PinentryPresence {
    binary: String,
    timeout: Duration,
}

impl PinentryPresence {
    pub fn new(binary: impl Into<String>, timeout: Duration) -> Self {
        Self {
            binary: binary.into(),
            timeout,
        }
    }
}

#[async_trait]
impl UserPresence for PinentryPresence {
    async fn request_user_presence(
        &self,
        prompt: &PresencePrompt,
        cancel: &Arc<AtomicBool>,
    ) -> PresenceOutcome {
        let title = prompt.title.clone();
        let description = prompt.description.clone();
        let bin = self.binary.clone();

        let join = tokio::task::spawn_blocking(move || {
            let input = pinentry::PassphraseInput::with_binary(&bin);
            match input {
                None => Err(pinentry::Error::Io(std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    "pinentry binary not found",
                ))),
                Some(mut input) => input
                    .with_title(&title)
                    .with_description(&description)
                    .with_ok("Confirm")
                    .with_cancel("Deny")
                    .interact()
                    .map(|_| ()),
            }
        });

        let result = tokio::time::timeout(self.timeout, join).await;

        if cancel.load(Ordering::Relaxed) {
            return PresenceOutcome::Cancelled;
        }

        match result {
            Err(_) => {
                tracing::debug!("Presence prompt timed out");
                PresenceOutcome::Denied
            }
            Ok(Err(e)) => PresenceOutcome::Error(format!("prompt task failed: {e}")),
            Ok(Ok(Ok(()))) => PresenceOutcome::Granted {
                user_verified: false,
            },
            Ok(Ok(Err(pinentry::Error::Cancelled))) => PresenceOutcome::Denied,
            Ok(Ok(Err(pinentry::Error::Timeout))) => PresenceOutcome::Denied,
            Ok(Ok(Err(e))) => PresenceOutcome::Error(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_binary_is_backend_error() {
        let presence = PinentryPresence::new(
            "/nonexistent/keylink-pinentry-test",
            Duration::from_secs(5),
        );
        let prompt = super::super::prompt::link_prompt("example.com", "s");
        let cancel = Arc::new(AtomicBool::new(false));
        let outcome = presence.request_user_presence(&prompt, &cancel).await;
        assert!(matches!(outcome, PresenceOutcome::Error(_)), "{outcome:?}");
    }
}
