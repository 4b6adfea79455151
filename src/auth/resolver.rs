use tokio::sync::oneshot;
use tracing::{info, warn};

use crate::auth::credentials::{CredentialCategory, CredentialStore, PromptEntry, classify};
use crate::events::{PromptRequest, PromptSender};

/// Produces the answer for each interactive-auth prompt.
///
/// Classified prompts are answered from the credential store without
/// suspending anyone; everything else is handed to the foreground over
/// the prompt channel and the calling worker blocks until the human
/// answers or dismisses. The resolver itself never touches the terminal.
pub struct ChallengeResolver {
    prompts: PromptSender,
}

impl ChallengeResolver {
    pub fn new(prompts: PromptSender) -> Self {
        Self { prompts }
    }

    /// Resolve one full round of prompts, strictly in server order.
    /// Answers are positional and match the prompt count exactly.
    pub async fn resolve_round(
        &self,
        entries: &[PromptEntry],
        store: &CredentialStore,
    ) -> Vec<String> {
        let mut answers = Vec::with_capacity(entries.len());
        for entry in entries {
            answers.push(self.resolve(entry, store).await);
        }
        answers
    }

    pub async fn resolve(&self, entry: &PromptEntry, store: &CredentialStore) -> String {
        match classify(&entry.text, store) {
            CredentialCategory::Otp => {
                warn!("prompt requires a one-time value: {}", entry.text.trim());
                // OTP entry is always masked, whatever the server's echo flag says
                self.ask("Verification required", entry, true).await
            }
            CredentialCategory::StaticPassword => match &store.static_secret {
                Some(secret) => {
                    info!("auto-filled static password for prompt");
                    secret.clone()
                }
                None => self.ask("Input required", entry, !entry.echo).await,
            },
            CredentialCategory::Challenge => match &store.challenge_secret {
                Some(secret) => {
                    info!("auto-filled challenge secret for prompt");
                    secret.clone()
                }
                None => self.ask("Input required", entry, !entry.echo).await,
            },
            CredentialCategory::Unclassified => {
                warn!("prompt not recognized, deferring to operator: {}", entry.text.trim());
                self.ask("Input required", entry, !entry.echo).await
            }
        }
    }

    /// Rendezvous with the foreground. A dismissed or unanswerable
    /// prompt resolves to an empty string; the server's rejection of it
    /// surfaces later as an authentication failure.
    async fn ask(&self, title: &str, entry: &PromptEntry, masked: bool) -> String {
        let (reply_tx, reply_rx) = oneshot::channel();
        let request = PromptRequest {
            title: title.to_string(),
            prompt: entry.text.clone(),
            masked,
            reply: reply_tx,
        };

        if self.prompts.send(request).await.is_err() {
            warn!("prompt channel closed, answering with empty string");
            return String::new();
        }

        reply_rx.await.unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn entry(text: &str, echo: bool) -> PromptEntry {
        PromptEntry {
            text: text.to_string(),
            echo,
        }
    }

    fn store(static_secret: Option<&str>, challenge_secret: Option<&str>) -> CredentialStore {
        CredentialStore {
            key_path: None,
            static_secret: static_secret.map(String::from),
            challenge_secret: challenge_secret.map(String::from),
        }
    }

    #[tokio::test]
    async fn test_static_password_resolved_without_human() {
        // No receiver at all: any attempt to ask would yield ""
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let resolver = ChallengeResolver::new(tx);

        let answer = resolver
            .resolve(&entry("Password:", false), &store(Some("pw"), None))
            .await;
        assert_eq!(answer, "pw");
    }

    #[tokio::test]
    async fn test_challenge_secret_resolved_without_human() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let resolver = ChallengeResolver::new(tx);

        let answer = resolver
            .resolve(&entry("PortalPIN:", false), &store(None, Some("8841")))
            .await;
        assert_eq!(answer, "8841");
    }

    #[tokio::test]
    async fn test_otp_goes_to_human_even_with_secrets_configured() {
        let (tx, mut rx) = mpsc::channel(1);
        let resolver = ChallengeResolver::new(tx);

        let responder = tokio::spawn(async move {
            let request = rx.recv().await.expect("prompt request");
            assert!(request.masked);
            request.reply.send("314159".to_string()).unwrap();
        });

        let answer = resolver
            .resolve(&entry("Verification Code:", true), &store(Some("pw"), Some("1")))
            .await;
        assert_eq!(answer, "314159");
        responder.await.unwrap();
    }

    #[tokio::test]
    async fn test_dismissal_yields_empty_string() {
        let (tx, mut rx) = mpsc::channel(1);
        let resolver = ChallengeResolver::new(tx);

        let responder = tokio::spawn(async move {
            let request = rx.recv().await.expect("prompt request");
            // Dropping the reply sender models the operator dismissing the prompt
            drop(request.reply);
        });

        let answer = resolver
            .resolve(&entry("Realm token:", false), &store(None, None))
            .await;
        assert_eq!(answer, "");
        responder.await.unwrap();
    }

    #[tokio::test]
    async fn test_round_answers_are_positional() {
        let (tx, mut rx) = mpsc::channel(4);
        let resolver = ChallengeResolver::new(tx);

        let responder = tokio::spawn(async move {
            // Only the unclassified prompt reaches the human
            let request = rx.recv().await.expect("prompt request");
            request.reply.send("manual".to_string()).unwrap();
        });

        let entries = vec![
            entry("Password:", false),
            entry("Realm token:", true),
            entry("PortalPIN:", false),
        ];
        let answers = resolver
            .resolve_round(&entries, &store(Some("pw"), Some("8841")))
            .await;

        assert_eq!(answers, vec!["pw", "manual", "8841"]);
        responder.await.unwrap();
    }
}
