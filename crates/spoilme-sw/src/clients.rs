//! Clients API: the pages a worker can see, focus and open.

use hashbrown::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use url::Url;

use crate::ServiceWorkerError;

/// A client (controlled page or worker).
#[derive(Debug, Clone, PartialEq)]
pub struct Client {
    /// Client ID.
    pub id: String,

    /// Client URL.
    pub url: Url,

    /// Client type.
    pub client_type: ClientType,

    /// Visibility state.
    pub visibility_state: VisibilityState,

    /// Whether focused.
    pub focused: bool,
}

/// Client type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClientType {
    #[default]
    Window,
    Worker,
    SharedWorker,
    All,
}

/// Visibility state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VisibilityState {
    Hidden,
    Visible,
}

impl Client {
    /// A visible, unfocused window client at `url`.
    pub fn window(url: Url) -> Self {
        Self {
            id: next_client_id(),
            url,
            client_type: ClientType::Window,
            visibility_state: VisibilityState::Visible,
            focused: false,
        }
    }

    /// Whether this client is a browsing window.
    pub fn is_window(&self) -> bool {
        self.client_type == ClientType::Window
    }
}

/// Options for `Clients::match_all`.
#[derive(Debug, Clone, Default)]
pub struct ClientMatchOptions {
    pub client_type: ClientType,
}

impl ClientMatchOptions {
    pub fn windows() -> Self {
        Self {
            client_type: ClientType::Window,
        }
    }
}

// ==================== Clients ====================

/// Clients known to a registration.
#[derive(Debug)]
pub struct Clients {
    /// Base URL relative window URLs resolve against.
    scope: Url,
    clients: HashMap<String, Client>,
    /// Insertion order, so enumeration is stable.
    order: Vec<String>,
}

impl Clients {
    /// Create an empty client list for `scope`.
    pub fn new(scope: Url) -> Self {
        Self {
            scope,
            clients: HashMap::new(),
            order: Vec::new(),
        }
    }

    /// Scope URL.
    pub fn scope(&self) -> &Url {
        &self.scope
    }

    /// Resolve `url` (absolute or relative) against the scope.
    pub fn resolve(&self, url: &str) -> Result<Url, ServiceWorkerError> {
        self.scope
            .join(url)
            .map_err(|e| ServiceWorkerError::NetworkError(format!("{url}: {e}")))
    }

    /// Get a client by ID.
    pub fn get(&self, id: &str) -> Option<&Client> {
        self.clients.get(id)
    }

    /// All clients matching the options, in the order they were added.
    pub fn match_all(&self, options: &ClientMatchOptions) -> Vec<Client> {
        self.order
            .iter()
            .filter_map(|id| self.clients.get(id))
            .filter(|c| match options.client_type {
                ClientType::All => true,
                t => c.client_type == t,
            })
            .cloned()
            .collect()
    }

    /// Focus a window client. Other windows lose focus.
    pub fn focus(&mut self, id: &str) -> Result<Client, ServiceWorkerError> {
        let client = self
            .clients
            .get(id)
            .ok_or_else(|| ServiceWorkerError::NotFound(format!("client {id}")))?;
        if !client.is_window() {
            return Err(ServiceWorkerError::StateError(
                "Can only focus window clients".to_string(),
            ));
        }

        let mut focused = None;
        for other in self.clients.values_mut() {
            other.focused = other.id == id;
            if other.focused {
                other.visibility_state = VisibilityState::Visible;
                focused = Some(other.clone());
            }
        }
        focused.ok_or_else(|| ServiceWorkerError::NotFound(format!("client {id}")))
    }

    /// Open a new focused window at `url`.
    pub fn open_window(&mut self, url: &str) -> Result<Client, ServiceWorkerError> {
        let url = self.resolve(url)?;
        let mut client = Client::window(url);
        client.focused = true;

        for other in self.clients.values_mut() {
            other.focused = false;
        }
        self.add(client.clone());
        Ok(client)
    }

    /// Add a client.
    pub fn add(&mut self, client: Client) {
        if self.clients.insert(client.id.clone(), client.clone()).is_none() {
            self.order.push(client.id);
        }
    }

    /// Remove a client.
    pub fn remove(&mut self, id: &str) -> Option<Client> {
        self.order.retain(|c| c != id);
        self.clients.remove(id)
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}

fn next_client_id() -> String {
    static COUNTER: AtomicU64 = AtomicU64::new(1);
    format!("client-{}", COUNTER.fetch_add(1, Ordering::Relaxed))
}
