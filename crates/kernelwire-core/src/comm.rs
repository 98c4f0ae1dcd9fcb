//! Comms: named bidirectional channels between the kernel and its clients.
//!
//! The manager keeps weak references only. A comm lives as long as some
//! [`Comm`] handle does; dropping the last handle unregisters it.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use bytes::Bytes;
use kernelwire_frame::{new_id, Channel, Header, Message};
use kernelwire_server::ServerError;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::error::{KernelError, Result};
use crate::protocol::{CommData, CommOpen};
use crate::publisher::Publisher;

/// Handler invoked with the triggering `comm_msg` or `comm_close` message.
pub type CommHandler = Box<dyn FnMut(&Message) + Send>;

type TargetCallback = Arc<dyn Fn(Comm, &Message) + Send + Sync>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Default)]
struct Handlers {
    on_message: Option<CommHandler>,
    on_close: Option<CommHandler>,
}

fn message_slot(handlers: &mut Handlers) -> &mut Option<CommHandler> {
    &mut handlers.on_message
}

fn close_slot(handlers: &mut Handlers) -> &mut Option<CommHandler> {
    &mut handlers.on_close
}

struct CommState {
    id: String,
    target_name: String,
    manager: Weak<CommManager>,
    handlers: Mutex<Handlers>,
}

impl Drop for CommState {
    fn drop(&mut self) {
        if let Some(manager) = self.manager.upgrade() {
            if manager.unregister(self) {
                debug!(comm_id = %self.id, "comm dropped");
            }
        }
    }
}

/// Handle to one live comm.
#[derive(Clone)]
pub struct Comm {
    state: Arc<CommState>,
}

impl fmt::Debug for Comm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Comm")
            .field("id", &self.state.id)
            .field("target_name", &self.state.target_name)
            .finish()
    }
}

impl Comm {
    fn attach(manager: Weak<CommManager>, id: String, target_name: String) -> Self {
        Self {
            state: Arc::new(CommState {
                id,
                target_name,
                manager,
                handlers: Mutex::new(Handlers::default()),
            }),
        }
    }

    /// Open a comm from the kernel side and announce it to clients.
    pub fn open(
        manager: &Arc<CommManager>,
        target_name: &str,
        data: Map<String, Value>,
        metadata: Value,
    ) -> Result<Self> {
        let comm = Self::attach(Arc::downgrade(manager), new_id(), target_name.to_string());
        manager.register(&comm);
        let content = CommOpen {
            comm_id: comm.id().to_string(),
            target_name: target_name.to_string(),
            data,
            target_module: None,
        };
        manager.publisher().publish_with("comm_open", metadata, content, Vec::new())?;
        Ok(comm)
    }

    pub fn id(&self) -> &str {
        &self.state.id
    }

    pub fn target_name(&self) -> &str {
        &self.state.target_name
    }

    /// Send `data` to the client side.
    pub fn send(&self, data: Map<String, Value>, metadata: Value, buffers: Vec<Bytes>) -> Result<()> {
        let content = CommData {
            comm_id: self.id().to_string(),
            data,
        };
        self.manager()?
            .publisher()
            .publish_with("comm_msg", metadata, content, buffers)
    }

    /// Close from the kernel side: unregister and tell clients.
    pub fn close(&self, data: Map<String, Value>) -> Result<()> {
        let manager = self.manager()?;
        manager.unregister(&self.state);
        let content = CommData {
            comm_id: self.id().to_string(),
            data,
        };
        manager.publisher().publish("comm_close", content)
    }

    pub fn on_message(&self, handler: impl FnMut(&Message) + Send + 'static) {
        lock(&self.state.handlers).on_message = Some(Box::new(handler));
    }

    pub fn on_close(&self, handler: impl FnMut(&Message) + Send + 'static) {
        lock(&self.state.handlers).on_close = Some(Box::new(handler));
    }

    fn manager(&self) -> Result<Arc<CommManager>> {
        self.state.manager.upgrade().ok_or_else(|| {
            KernelError::Server(ServerError::Disconnected("comm manager dropped".to_string()))
        })
    }

    /// Run one handler without holding the lock, so it may replace handlers
    /// or send on this comm.
    fn invoke(&self, slot: fn(&mut Handlers) -> &mut Option<CommHandler>, message: &Message) {
        let taken = slot(&mut lock(&self.state.handlers)).take();
        let Some(mut handler) = taken else {
            debug!(comm_id = %self.id(), msg_type = message.msg_type(), "comm has no handler");
            return;
        };
        handler(message);
        let mut handlers = lock(&self.state.handlers);
        let current = slot(&mut handlers);
        if current.is_none() {
            *current = Some(handler);
        }
    }
}

struct CommEntry {
    target_name: String,
    comm: Weak<CommState>,
}

/// Registry of comm targets and live comms.
pub struct CommManager {
    this: Weak<CommManager>,
    publisher: Mutex<Publisher>,
    targets: Mutex<HashMap<String, TargetCallback>>,
    comms: Mutex<HashMap<String, CommEntry>>,
}

impl CommManager {
    pub fn new(publisher: Publisher) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            this: this.clone(),
            publisher: Mutex::new(publisher),
            targets: Mutex::new(HashMap::new()),
            comms: Mutex::new(HashMap::new()),
        })
    }

    /// Register `callback` for comms clients open with `name`.
    ///
    /// The callback receives the new comm and must keep a handle to it;
    /// otherwise the comm is unregistered as soon as the callback returns.
    pub fn register_comm_target(
        &self,
        name: impl Into<String>,
        callback: impl Fn(Comm, &Message) + Send + Sync + 'static,
    ) {
        lock(&self.targets).insert(name.into(), Arc::new(callback));
    }

    pub fn unregister_comm_target(&self, name: &str) -> Result<()> {
        match lock(&self.targets).remove(name) {
            Some(_) => Ok(()),
            None => Err(KernelError::UnknownTarget(name.to_string())),
        }
    }

    pub fn has_target(&self, name: &str) -> bool {
        lock(&self.targets).contains_key(name)
    }

    /// Handle a client `comm_open`.
    pub fn comm_open(&self, message: &Message) -> Result<()> {
        let open: CommOpen = message.parse_content()?;
        let callback = lock(&self.targets).get(&open.target_name).cloned();

        let Some(callback) = callback else {
            warn!(
                comm_id = %open.comm_id,
                target_name = %open.target_name,
                "no comm target registered; closing comm"
            );
            let content = CommData {
                comm_id: open.comm_id,
                data: Map::new(),
            };
            return self.publisher().publish("comm_close", content);
        };

        let comm = Comm::attach(self.this.clone(), open.comm_id, open.target_name);
        self.register(&comm);
        debug!(comm_id = %comm.id(), target_name = %comm.target_name(), "comm opened");
        callback(comm, message);
        Ok(())
    }

    /// Handle a client `comm_msg`.
    pub fn comm_msg(&self, message: &Message) -> Result<()> {
        let content: CommData = message.parse_content()?;
        let comm = self
            .get(&content.comm_id)
            .ok_or(KernelError::UnknownComm(content.comm_id))?;
        comm.invoke(message_slot, message);
        Ok(())
    }

    /// Handle a client `comm_close`.
    pub fn comm_close(&self, message: &Message) -> Result<()> {
        let content: CommData = message.parse_content()?;
        let comm = self
            .get(&content.comm_id)
            .ok_or(KernelError::UnknownComm(content.comm_id))?;
        self.unregister(&comm.state);
        comm.invoke(close_slot, message);
        debug!(comm_id = %comm.id(), "comm closed by client");
        Ok(())
    }

    /// Live comms as id → target name, optionally filtered by target.
    pub fn comms(&self, target_name: Option<&str>) -> BTreeMap<String, String> {
        lock(&self.comms)
            .iter()
            .filter(|(_, entry)| entry.comm.strong_count() > 0)
            .filter(|(_, entry)| target_name.is_none_or(|name| entry.target_name == name))
            .map(|(id, entry)| (id.clone(), entry.target_name.clone()))
            .collect()
    }

    pub fn get(&self, id: &str) -> Option<Comm> {
        let state = lock(&self.comms).get(id).and_then(|entry| entry.comm.upgrade());
        state.map(|state| Comm { state })
    }

    /// Publisher bound to the request currently being handled.
    pub fn publisher(&self) -> Publisher {
        lock(&self.publisher).clone()
    }

    pub(crate) fn set_parent(&self, parent: Option<Header>, channel: Channel) {
        let mut publisher = lock(&self.publisher);
        *publisher = publisher.with_parent(parent, channel);
    }

    fn register(&self, comm: &Comm) {
        let entry = CommEntry {
            target_name: comm.target_name().to_string(),
            comm: Arc::downgrade(&comm.state),
        };
        lock(&self.comms).insert(comm.id().to_string(), entry);
    }

    /// Remove `state`'s registration, leaving alone a newer comm that reuses its id.
    fn unregister(&self, state: &CommState) -> bool {
        let mut comms = lock(&self.comms);
        let owned = comms
            .get(&state.id)
            .is_some_and(|entry| std::ptr::eq(entry.comm.as_ptr(), state));
        owned && comms.remove(&state.id).is_some()
    }
}
