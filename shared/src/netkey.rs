//! Net channel encryption key, shared between the tick loop and the
//! hosting-status publisher.

use std::sync::{Arc, Mutex, MutexGuard};

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use log::{info, warn};
use rand::RngCore;
use thiserror::Error;

/// Key length in bytes before base64 encoding.
pub const NET_KEY_LEN: usize = 16;

/// Key used when random keys are turned off.
pub const DEFAULT_NET_KEY: &str = "WDNWLmJYQ2ZlM0VoTid3Yw==";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NetKeyError {
    #[error("net key is not valid base64")]
    NotBase64,

    #[error("net key decodes to {0} bytes, expected 16")]
    WrongLength(usize),
}

/// Cloneable handle; all clones see the same key.
#[derive(Debug, Clone)]
pub struct NetKey {
    inner: Arc<Mutex<String>>,
}

impl Default for NetKey {
    fn default() -> Self {
        Self::new()
    }
}

impl NetKey {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(DEFAULT_NET_KEY.to_string())),
        }
    }

    fn lock(&self) -> MutexGuard<'_, String> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Current key as base64 text.
    pub fn current(&self) -> String {
        self.lock().clone()
    }

    /// Installs a base64 key. Invalid keys are logged and leave the old key in place.
    pub fn set(&self, key: &str) -> Result<(), NetKeyError> {
        let decoded = STANDARD.decode(key.trim()).map_err(|_| {
            warn!("Failed to set net key: '{}' is not valid base64", key);
            NetKeyError::NotBase64
        })?;

        if decoded.len() != NET_KEY_LEN {
            warn!(
                "Failed to set net key: decoded length {} (expected {})",
                decoded.len(),
                NET_KEY_LEN
            );
            return Err(NetKeyError::WrongLength(decoded.len()));
        }

        let encoded = STANDARD.encode(&decoded);
        info!("Installed net key '{}'", encoded);
        *self.lock() = encoded;
        Ok(())
    }

    /// Generates and installs a random key, returning it.
    pub fn generate(&self) -> String {
        let mut bytes = [0u8; NET_KEY_LEN];
        rand::thread_rng().fill_bytes(&mut bytes);
        let encoded = STANDARD.encode(bytes);
        info!("Generated net key '{}'", encoded);
        *self.lock() = encoded.clone();
        encoded
    }

    /// Reacts to the "use random key" toggle changing.
    pub fn on_random_key_changed(&self, old: bool, new: bool) {
        if old == new {
            return;
        }

        if new {
            self.generate();
        } else if let Err(err) = self.set(DEFAULT_NET_KEY) {
            warn!("Failed to restore default net key: {}", err);
        }
    }
}
