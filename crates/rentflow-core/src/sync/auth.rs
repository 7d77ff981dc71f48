//! Authentication state as seen by the sync core

use std::sync::Arc;

use tokio::sync::watch;

/// Whether a user session is active. Remote refreshes and mutations that
/// need the server are skipped while this reports no session.
pub trait AuthGate: Send + Sync {
    fn user_id(&self) -> Option<String>;

    fn is_authenticated(&self) -> bool {
        self.user_id().is_some()
    }
}

/// In-process session holder for clients that track sign-in themselves
#[derive(Debug, Clone)]
pub struct SessionFlag {
    user: Arc<watch::Sender<Option<String>>>,
}

impl Default for SessionFlag {
    fn default() -> Self {
        let (sender, _) = watch::channel(None);
        Self {
            user: Arc::new(sender),
        }
    }
}

impl SessionFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sign_in(&self, user_id: impl Into<String>) {
        let user_id = user_id.into();
        tracing::debug!("Session started for {user_id}");
        self.user.send_replace(Some(user_id));
    }

    pub fn sign_out(&self) {
        if self.user.send_replace(None).is_some() {
            tracing::debug!("Session ended");
        }
    }

    /// Watch sign-in and sign-out
    pub fn subscribe(&self) -> watch::Receiver<Option<String>> {
        self.user.subscribe()
    }
}

impl AuthGate for SessionFlag {
    fn user_id(&self) -> Option<String> {
        self.user.borrow().clone()
    }
}
