use std::sync::Arc;

use russh::client::{self, KeyboardInteractiveAuthResponse};
use russh::keys::{self, PrivateKeyWithHashAlg};
use tracing::{debug, info, warn};

use crate::auth::credentials::{CredentialStore, PromptEntry};
use crate::auth::resolver::ChallengeResolver;
use crate::config::ConnectionProfile;
use crate::error::{AppError, Result};
use crate::utils::expand_tilde;

/// Drives the multi-method handshake against one transport:
/// public key, then static password, then the server's interactive
/// challenge protocol. Machine-verifiable methods go first so a human
/// is only prompted when nothing stored already works.
pub struct AuthNegotiator<'a> {
    profile: &'a ConnectionProfile,
    store: CredentialStore,
    resolver: &'a ChallengeResolver,
}

impl<'a> AuthNegotiator<'a> {
    pub fn new(profile: &'a ConnectionProfile, resolver: &'a ChallengeResolver) -> Self {
        Self {
            profile,
            store: CredentialStore::from_profile(profile),
            resolver,
        }
    }

    /// Run the stages in order until one authenticates the session.
    pub async fn authenticate<H: client::Handler>(
        &self,
        session: &mut client::Handle<H>,
    ) -> Result<()> {
        if self.try_publickey(session).await? {
            return Ok(());
        }
        if self.try_password(session).await? {
            return Ok(());
        }
        if self.try_interactive(session).await? {
            return Ok(());
        }

        Err(AppError::Auth {
            host: self.profile.host.clone(),
        })
    }

    async fn try_publickey<H: client::Handler>(
        &self,
        session: &mut client::Handle<H>,
    ) -> Result<bool> {
        let Some(configured_path) = &self.store.key_path else {
            return Ok(false);
        };

        let key_path = expand_tilde(configured_path);
        if !key_path.exists() {
            debug!("key file {} does not exist, skipping", key_path.display());
            return Ok(false);
        }

        // First without a passphrase, then with the one supplied secret
        let parsed = match (
            keys::load_secret_key(&key_path, None),
            self.store.static_secret.as_deref(),
        ) {
            (Ok(key), _) => Ok(key),
            (Err(_), Some(passphrase)) => keys::load_secret_key(&key_path, Some(passphrase)),
            (Err(e), None) => Err(e),
        };

        let private_key = match parsed {
            Ok(key) => key,
            Err(e) => {
                warn!("could not parse key {}: {}", key_path.display(), e);
                return Ok(false);
            }
        };

        let algo = session.best_supported_rsa_hash().await?.flatten();
        let key_with_alg = PrivateKeyWithHashAlg::new(Arc::new(private_key), algo);

        let auth_result = session
            .authenticate_publickey(&self.profile.user, key_with_alg)
            .await?;
        if auth_result.success() {
            info!("public key accepted by {}", self.profile.host);
            Ok(true)
        } else {
            warn!("key rejected by {}", self.profile.host);
            Ok(false)
        }
    }

    async fn try_password<H: client::Handler>(
        &self,
        session: &mut client::Handle<H>,
    ) -> Result<bool> {
        let Some(password) = &self.store.static_secret else {
            return Ok(false);
        };

        let auth_result = session
            .authenticate_password(&self.profile.user, password)
            .await?;
        if auth_result.success() {
            info!("password accepted by {}", self.profile.host);
            Ok(true)
        } else {
            debug!("password rejected by {}", self.profile.host);
            Ok(false)
        }
    }

    /// Keyboard-interactive fallback. Every round of prompts the server
    /// issues is classified and resolved, and the answers are submitted
    /// together as that round's response, until the server stops asking.
    async fn try_interactive<H: client::Handler>(
        &self,
        session: &mut client::Handle<H>,
    ) -> Result<bool> {
        let mut response = session
            .authenticate_keyboard_interactive_start(&self.profile.user, None)
            .await?;

        loop {
            match response {
                KeyboardInteractiveAuthResponse::Success => {
                    info!("interactive authentication accepted by {}", self.profile.host);
                    return Ok(true);
                }
                KeyboardInteractiveAuthResponse::Failure { .. } => {
                    warn!("interactive authentication rejected by {}", self.profile.host);
                    return Ok(false);
                }
                KeyboardInteractiveAuthResponse::InfoRequest { ref prompts, .. } => {
                    let entries: Vec<PromptEntry> = prompts
                        .iter()
                        .map(|p| PromptEntry {
                            text: p.prompt.clone(),
                            echo: p.echo,
                        })
                        .collect();

                    let answers = self.resolver.resolve_round(&entries, &self.store).await;
                    response = session
                        .authenticate_keyboard_interactive_respond(answers)
                        .await?;
                }
            }
        }
    }
}
