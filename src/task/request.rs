//! Per-delivery invocation context

use crate::canvas::SignatureRef;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};

/// Keyword arguments, headers and other string-keyed payloads.
pub type Kwargs = serde_json::Map<String, Value>;

/// Broker delivery metadata the tracer reacts to.
#[derive(Debug, Clone, Default)]
pub struct DeliveryInfo {
    /// The broker flagged this message as redelivered.
    pub redelivered: bool,
    /// Delivery priority, if the broker assigned one.
    pub priority: Option<i32>,
}

/// Per-call invocation context ("request").
///
/// Created by the caller for each delivery, read by the tracer during a
/// single execution, discarded afterwards. The id is unique per attempt but
/// stable across redeliveries of the same logical message.
pub struct Request {
    /// Attempt id.
    pub id: String,
    /// Name of the task this request targets. The tracer stamps it on entry.
    pub task: String,
    /// Positional arguments.
    pub args: Vec<Value>,
    /// Keyword arguments.
    pub kwargs: Kwargs,
    /// Id of the task that spawned this one.
    pub parent_id: Option<String>,
    /// Id of the root of the originating workflow.
    pub root_id: Option<String>,
    /// Remaining downstream stages, last element first to go.
    pub chain: Vec<SignatureRef>,
    /// Signatures to fan out on success.
    pub callbacks: Vec<SignatureRef>,
    /// Signatures to fan out on failure.
    pub errbacks: Vec<SignatureRef>,
    /// Chord membership marker, forwarded to the backend with the result.
    pub chord: Option<String>,
    /// Group membership marker.
    pub group: Option<String>,
    /// Broker delivery metadata.
    pub delivery_info: DeliveryInfo,
    /// Inherited application headers.
    pub headers: Kwargs,
    /// Inherited log level.
    pub loglevel: u8,
    /// The task was invoked as a plain call, not through the transport.
    pub called_directly: bool,
    /// Latch set by the stack guard once a nested plain call was rerouted
    /// through this frame.
    protected: AtomicBool,
}

impl Request {
    /// Create a request with the given attempt id and empty everything else.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            task: String::new(),
            args: Vec::new(),
            kwargs: Kwargs::new(),
            parent_id: None,
            root_id: None,
            chain: Vec::new(),
            callbacks: Vec::new(),
            errbacks: Vec::new(),
            chord: None,
            group: None,
            delivery_info: DeliveryInfo::default(),
            headers: Kwargs::new(),
            loglevel: 0,
            called_directly: false,
            protected: AtomicBool::new(false),
        }
    }

    pub fn with_args(mut self, args: Vec<Value>) -> Self {
        self.args = args;
        self
    }

    pub fn with_kwargs(mut self, kwargs: Kwargs) -> Self {
        self.kwargs = kwargs;
        self
    }

    pub fn with_parent_id(mut self, parent_id: impl Into<String>) -> Self {
        self.parent_id = Some(parent_id.into());
        self
    }

    pub fn with_root_id(mut self, root_id: impl Into<String>) -> Self {
        self.root_id = Some(root_id.into());
        self
    }

    pub fn with_chain(mut self, chain: Vec<SignatureRef>) -> Self {
        self.chain = chain;
        self
    }

    pub fn with_callbacks(mut self, callbacks: Vec<SignatureRef>) -> Self {
        self.callbacks = callbacks;
        self
    }

    pub fn with_errbacks(mut self, errbacks: Vec<SignatureRef>) -> Self {
        self.errbacks = errbacks;
        self
    }

    pub fn with_chord(mut self, chord: impl Into<String>) -> Self {
        self.chord = Some(chord.into());
        self
    }

    pub fn with_group(mut self, group: impl Into<String>) -> Self {
        self.group = Some(group.into());
        self
    }

    pub fn with_delivery_info(mut self, delivery_info: DeliveryInfo) -> Self {
        self.delivery_info = delivery_info;
        self
    }

    pub fn with_headers(mut self, headers: Kwargs) -> Self {
        self.headers = headers;
        self
    }

    pub fn with_loglevel(mut self, loglevel: u8) -> Self {
        self.loglevel = loglevel;
        self
    }

    pub fn with_called_directly(mut self, called_directly: bool) -> Self {
        self.called_directly = called_directly;
        self
    }

    /// Build a child request for a rerouted plain call.
    ///
    /// Headers and log level come from the parent unless the call site
    /// overrides them; parent and root ids follow the parent; everything
    /// downstream (chain, callbacks, errbacks) starts empty.
    pub fn inherit(
        parent: &Request,
        id: impl Into<String>,
        args: Vec<Value>,
        kwargs: Kwargs,
        overrides: CallOverrides,
    ) -> Self {
        Self {
            id: id.into(),
            task: parent.task.clone(),
            args,
            kwargs,
            parent_id: Some(parent.id.clone()),
            root_id: parent.root_id.clone(),
            chain: Vec::new(),
            callbacks: Vec::new(),
            errbacks: Vec::new(),
            chord: None,
            group: None,
            delivery_info: DeliveryInfo::default(),
            headers: overrides.headers.unwrap_or_else(|| parent.headers.clone()),
            loglevel: overrides.loglevel.unwrap_or(parent.loglevel),
            called_directly: true,
            protected: AtomicBool::new(false),
        }
    }

    /// Latch this frame as having absorbed a rerouted call. Returns false if
    /// it was already latched.
    pub(crate) fn protect(&self) -> bool {
        !self.protected.swap(true, Ordering::SeqCst)
    }

    pub(crate) fn is_protected(&self) -> bool {
        self.protected.load(Ordering::SeqCst)
    }
}

impl std::fmt::Debug for Request {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Request")
            .field("id", &self.id)
            .field("task", &self.task)
            .field("args", &self.args)
            .field("kwargs", &self.kwargs)
            .field("parent_id", &self.parent_id)
            .field("root_id", &self.root_id)
            .field("chain", &self.chain.len())
            .field("callbacks", &self.callbacks.len())
            .field("errbacks", &self.errbacks.len())
            .field("chord", &self.chord)
            .field("group", &self.group)
            .field("delivery_info", &self.delivery_info)
            .field("headers", &self.headers)
            .field("loglevel", &self.loglevel)
            .field("called_directly", &self.called_directly)
            .finish()
    }
}

/// Field overrides for a rerouted plain call.
#[derive(Debug, Clone, Default)]
pub struct CallOverrides {
    /// Replace the inherited headers.
    pub headers: Option<Kwargs>,
    /// Replace the inherited log level.
    pub loglevel: Option<u8>,
}
