//! Publishing the hosted server to a server list, and reading the list back.
//!
//! The tick thread calls [`ServerListManager::update_hosting_status`] and
//! [`ServerListManager::refresh_server_list`]; the list service calls run on
//! the [`TaskQueue`] and write their results back under the same mutex the
//! tick thread reads them through.

use std::cmp::Ordering;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{SystemTime, UNIX_EPOCH};

use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};

use shared::NetKey;

use crate::task_queue::TaskQueue;

/// Prefix of the request message after a successful post.
pub const BROADCASTING_MESSAGE: &str = "Broadcasting: ";
/// Appended when the list service handed back a token to share.
pub const TOKEN_HINT: &str = "share the following token for clients to connect: ";
/// Prefix of the message after a successful token lookup.
pub const FOUND_SERVER_MESSAGE: &str = "Found Server: ";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostStatus {
    NotHosting,
    Hosting,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerVisibility {
    Offline,
    Hidden,
    Public,
}

/// Server description as posted to the list service.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServerListing {
    pub host_name: String,
    pub description: String,
    pub hidden: bool,
    pub map: String,
    pub playlist: String,
    pub address: String,
    pub port: u16,
    pub net_key: String,
    pub version: String,
    pub player_count: u32,
    pub max_players: u32,
    pub timestamp_ms: u64,
}

/// Sort keys for the server list, one per browser column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerListSort {
    HostName,
    Map,
    Playlist,
    Players,
    Port,
}

impl ServerListSort {
    /// Ascending order of two listings under this key.
    pub fn compare(self, a: &ServerListing, b: &ServerListing) -> Ordering {
        match self {
            ServerListSort::HostName => a.host_name.cmp(&b.host_name),
            ServerListSort::Map => a.map.cmp(&b.map),
            ServerListSort::Playlist => a.playlist.cmp(&b.playlist),
            ServerListSort::Players => a.player_count.cmp(&b.player_count),
            ServerListSort::Port => a.port.cmp(&b.port),
        }
    }
}

/// Stable ascending sort; listings that compare equal keep their order.
pub fn sort_server_list(list: &mut [ServerListing], key: ServerListSort) {
    list.sort_by(|a, b| key.compare(a, b));
}

/// Everything the hosting and browser panels read. Only ever touched under
/// the mutex.
#[derive(Debug, Clone)]
pub struct HostingState {
    pub status: HostStatus,
    pub visibility: ServerVisibility,
    pub listing: ServerListing,
    pub host_token: String,
    pub request_message: String,
    /// Whether `request_message` came from a successful post.
    pub message_is_success: bool,
    /// Last list fetched from the service.
    pub server_list: Vec<ServerListing>,
    /// Error from the last refresh; empty after a successful one.
    pub server_list_message: String,
}

/// The list service. Errors carry the service's message verbatim.
pub trait HostingBackend: Send + Sync {
    /// Publishes a bincode-encoded [`ServerListing`]. `Ok` carries the host
    /// token, empty when the service issued none.
    fn post_server_host(&self, payload: &[u8]) -> Result<String, String>;

    /// Public servers currently listed.
    fn fetch_server_list(&self) -> Result<Vec<ServerListing>, String>;

    /// Looks up a hidden server by the token its host shared.
    fn server_by_token(&self, token: &str) -> Result<ServerListing, String>;
}

/// Backend for running without a list service: logs the post and succeeds,
/// lists nothing and knows no tokens.
pub struct LoggingBackend;

impl HostingBackend for LoggingBackend {
    fn post_server_host(&self, payload: &[u8]) -> Result<String, String> {
        info!("Server listing posted ({} bytes)", payload.len());
        Ok(String::new())
    }

    fn fetch_server_list(&self) -> Result<Vec<ServerListing>, String> {
        debug!("Server list requested; no list service configured");
        Ok(Vec::new())
    }

    fn server_by_token(&self, token: &str) -> Result<ServerListing, String> {
        Err(format!("no server registered for token '{}'", token))
    }
}

pub struct ServerListManager {
    state: Arc<Mutex<HostingState>>,
    net_key: NetKey,
    backend: Arc<dyn HostingBackend>,
}

impl ServerListManager {
    pub fn new(
        listing: ServerListing,
        visibility: ServerVisibility,
        net_key: NetKey,
        backend: Arc<dyn HostingBackend>,
    ) -> Self {
        let state = HostingState {
            status: HostStatus::NotHosting,
            visibility,
            listing,
            host_token: String::new(),
            request_message: String::new(),
            message_is_success: false,
            server_list: Vec::new(),
            server_list_message: String::new(),
        };

        Self {
            state: Arc::new(Mutex::new(state)),
            net_key,
            backend,
        }
    }

    fn lock(&self) -> MutexGuard<'_, HostingState> {
        lock_state(&self.state)
    }

    /// Copy of the current state.
    pub fn snapshot(&self) -> HostingState {
        self.lock().clone()
    }

    pub fn set_visibility(&self, visibility: ServerVisibility) {
        self.lock().visibility = visibility;
    }

    /// Copy of the last fetched server list.
    pub fn server_list(&self) -> Vec<ServerListing> {
        self.lock().server_list.clone()
    }

    /// Sorts the stored list in place by `key`.
    pub fn sort_server_list(&self, key: ServerListSort) {
        sort_server_list(&mut self.lock().server_list, key);
    }

    /// Queues a fetch of the public server list. On success the stored list
    /// is replaced and the list message cleared; on failure the list is
    /// emptied and the message holds the error. Returns true when queued.
    pub fn refresh_server_list(&self, queue: &TaskQueue) -> bool {
        let backend = Arc::clone(&self.backend);
        let state = Arc::clone(&self.state);
        let queued = queue.submit(async move {
            let result = tokio::task::spawn_blocking(move || backend.fetch_server_list()).await;
            let result = match result {
                Ok(result) => result,
                Err(e) => Err(format!("server list task failed: {}", e)),
            };

            let mut state = lock_state(&state);
            match result {
                Ok(list) => {
                    info!("Server list refreshed: {} server(s)", list.len());
                    state.server_list = list;
                    state.server_list_message.clear();
                }
                Err(message) => {
                    warn!("Server list refresh failed: {}", message);
                    state.server_list.clear();
                    state.server_list_message = message;
                }
            }
        });

        if !queued {
            warn!("Task queue closed; server list not refreshed");
        }
        queued
    }

    /// Resolves a hidden server's token to its listing. Blocks on the list
    /// service; the error is ready to show to the user.
    pub fn server_by_token(&self, token: &str) -> Result<ServerListing, String> {
        let token = token.trim();
        if token.is_empty() {
            return Err("Token is required.".to_string());
        }

        match self.backend.server_by_token(token) {
            Ok(listing) if listing.host_name.is_empty() => {
                Err(format!("Error: no server found for token '{}'", token))
            }
            Ok(listing) => {
                info!("{}{}", FOUND_SERVER_MESSAGE, listing.host_name);
                Ok(listing)
            }
            Err(message) => Err(format!("Error: {}", message)),
        }
    }

    /// Records whether we are hosting and, when visible, queues a post of the
    /// current listing. Returns true when a post was queued.
    pub fn update_hosting_status(&self, hosting: bool, player_count: u32, queue: &TaskQueue) -> bool {
        let mut state = self.lock();
        state.status = if hosting {
            HostStatus::Hosting
        } else {
            HostStatus::NotHosting
        };

        if !hosting {
            state.host_token.clear();
            if state.message_is_success {
                state.request_message.clear();
                state.message_is_success = false;
            }
            return false;
        }

        match state.visibility {
            ServerVisibility::Offline => return false,
            ServerVisibility::Hidden => state.listing.hidden = true,
            ServerVisibility::Public => state.listing.hidden = false,
        }

        let mut listing = state.listing.clone();
        drop(state);

        listing.net_key = self.net_key.current();
        listing.player_count = player_count;
        listing.timestamp_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_millis() as u64)
            .unwrap_or_default();

        let payload = match bincode::serialize(&listing) {
            Ok(payload) => payload,
            Err(e) => {
                error!("Failed to encode server listing: {}", e);
                return false;
            }
        };

        let backend = Arc::clone(&self.backend);
        let state = Arc::clone(&self.state);
        let queued = queue.submit(async move {
            let result =
                tokio::task::spawn_blocking(move || backend.post_server_host(&payload)).await;

            let result = match result {
                Ok(result) => result,
                Err(e) => Err(format!("hosting post task failed: {}", e)),
            };
            store_post_result(&state, result);
        });

        if !queued {
            warn!("Task queue closed; server listing not posted");
        }
        queued
    }
}

fn lock_state(state: &Mutex<HostingState>) -> MutexGuard<'_, HostingState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Writes a finished post back. A post that completes after hosting stopped
/// is stale and leaves the cleared state alone.
fn store_post_result(state: &Mutex<HostingState>, result: Result<String, String>) {
    let mut state = lock_state(state);
    if state.status != HostStatus::Hosting {
        debug!("Discarding hosting post result; no longer hosting");
        return;
    }

    match result {
        Ok(token) => {
            let mut message = String::from(BROADCASTING_MESSAGE);
            if !token.is_empty() {
                message.push_str(TOKEN_HINT);
            }
            debug!("Hosting post succeeded");
            state.request_message = message;
            state.host_token = token;
            state.message_is_success = true;
        }
        Err(message) => {
            warn!("Hosting post failed: {}", message);
            state.request_message = message;
            state.host_token.clear();
            state.message_is_success = false;
        }
    }
}
