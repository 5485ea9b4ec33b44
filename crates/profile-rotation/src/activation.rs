//! Activation: swap a profile's credentials into the active slot

use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;

use claude_profiles::{ProfileId, ProfileStore};

use crate::error::Result;

/// Performs the credential swap once a target profile has been chosen.
///
/// Uses `Pin<Box<dyn Future>>` return types for dyn-compatibility (`Arc<dyn ActivationSink>`).
pub trait ActivationSink: Send + Sync {
    fn activate<'a>(&'a self, id: &'a ProfileId) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;
}

/// Activates through the profile store: writes the active-session file and
/// marks the profile active.
pub struct StoreActivation {
    store: Arc<ProfileStore>,
    session_path: PathBuf,
}

impl StoreActivation {
    pub fn new(store: Arc<ProfileStore>, session_path: PathBuf) -> Self {
        Self {
            store,
            session_path,
        }
    }
}

impl ActivationSink for StoreActivation {
    fn activate<'a>(&'a self, id: &'a ProfileId) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(async move {
            self.store
                .activate_credentials(id, &self.session_path)
                .await?;
            Ok(())
        })
    }
}
