//! The per-client facade. A session owns one proxy provider, exposes an
//! enable property per update kind, and forwards the proxy's streams.

use std::sync::{Arc, Mutex, Weak};

use location_lib::{
    observable::{Property, Signal, Subscription},
    position::Position,
    provider::{SpaceVehicleMap, UpdateKind},
    units::{Heading, Velocity},
    update::Update,
    Error,
};
use tracing::{debug, warn};

use crate::{
    engine::{Engine, EngineStatus},
    proxy_provider::ProxyProvider,
};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SessionStatus {
    #[default]
    Disabled,
    Enabled,
}

/// The surface handed to the transport skeleton: one status property
/// per kind, and the four streams.
pub struct SessionUpdates {
    pub position_status: Property<SessionStatus>,
    pub heading_status: Property<SessionStatus>,
    pub velocity_status: Property<SessionStatus>,
    pub position: Signal<Update<Position>>,
    pub heading: Signal<Update<Heading>>,
    pub velocity: Signal<Update<Velocity>>,
    pub svs: Signal<Update<SpaceVehicleMap>>,
}

impl SessionUpdates {
    fn new() -> Self {
        Self {
            position_status: Property::new(SessionStatus::default()),
            heading_status: Property::new(SessionStatus::default()),
            velocity_status: Property::new(SessionStatus::default()),
            position: Signal::new(),
            heading: Signal::new(),
            velocity: Signal::new(),
            svs: Signal::new(),
        }
    }

    fn status(&self, kind: UpdateKind) -> &Property<SessionStatus> {
        match kind {
            UpdateKind::Position => &self.position_status,
            UpdateKind::Heading => &self.heading_status,
            UpdateKind::Velocity => &self.velocity_status,
        }
    }
}

struct SessionInner {
    engine: Arc<Engine>,
    proxy: ProxyProvider,
    updates: SessionUpdates,
    // Which kinds this session has actually started; shields against
    // repeated writes of the same status value.
    started: Mutex<[bool; 3]>,
}

impl SessionInner {
    fn kind_index(kind: UpdateKind) -> usize {
        match kind {
            UpdateKind::Position => 0,
            UpdateKind::Heading => 1,
            UpdateKind::Velocity => 2,
        }
    }

    fn try_start(&self, kind: UpdateKind) -> Result<(), Error> {
        let mut started = self.started.lock().unwrap();
        if started[Self::kind_index(kind)] {
            return Ok(());
        }

        // A fresh position consumer gets the fused fix right away, ahead
        // of anything the provider will deliver.
        if kind == UpdateKind::Position && self.engine.engine_state().get() != EngineStatus::Off {
            if let Some(last_known) = self.engine.updates.last_known_location.get() {
                self.updates.position.emit(&last_known);
            }
        }

        self.proxy.start_updates(kind)?;
        started[Self::kind_index(kind)] = true;
        self.engine.notify_session_activity(true);
        Ok(())
    }

    fn stop(&self, kind: UpdateKind) {
        let mut started = self.started.lock().unwrap();
        if !started[Self::kind_index(kind)] {
            return;
        }
        if let Err(err) = self.proxy.stop_updates(kind) {
            warn!("stopping {kind} updates failed: {err}");
        }
        started[Self::kind_index(kind)] = false;
        self.engine.notify_session_activity(false);
    }

    fn apply_status(&self, kind: UpdateKind, status: SessionStatus) {
        match status {
            SessionStatus::Enabled => {
                if let Err(err) = self.try_start(kind) {
                    // Raising this over the transport is an open end; for
                    // now the request is dropped with a log line.
                    warn!("could not start {kind} updates: {err}");
                }
            }
            SessionStatus::Disabled => self.stop(kind),
        }
    }
}

impl Drop for SessionInner {
    fn drop(&mut self) {
        let started = *self.started.lock().unwrap();
        for kind in UpdateKind::ALL {
            if started[Self::kind_index(kind)] {
                if let Err(err) = self.proxy.stop_updates(kind) {
                    debug!("stopping {kind} updates during teardown failed: {err}");
                }
                self.engine.notify_session_activity(false);
            }
        }
    }
}

pub struct Session {
    inner: Arc<SessionInner>,
    _subscriptions: Vec<Subscription>,
}

impl Session {
    pub(crate) fn new(engine: Arc<Engine>, proxy: ProxyProvider) -> Self {
        let updates = SessionUpdates::new();
        let mut subscriptions = Vec::new();

        // Proxy streams feed the session streams one to one.
        let sink = updates.position.clone();
        subscriptions.push(proxy.updates.position.connect(move |update| sink.emit(update)));
        let sink = updates.heading.clone();
        subscriptions.push(proxy.updates.heading.connect(move |update| sink.emit(update)));
        let sink = updates.velocity.clone();
        subscriptions.push(proxy.updates.velocity.connect(move |update| sink.emit(update)));
        let sink = updates.svs.clone();
        subscriptions.push(proxy.updates.svs.connect(move |update| sink.emit(update)));

        let inner = Arc::new(SessionInner {
            engine,
            proxy,
            updates,
            started: Mutex::new([false; 3]),
        });

        // Writing the status properties is the client-facing way to
        // start and stop.
        for kind in UpdateKind::ALL {
            let weak: Weak<SessionInner> = Arc::downgrade(&inner);
            subscriptions.push(inner.updates.status(kind).connect(move |status| {
                if let Some(inner) = weak.upgrade() {
                    inner.apply_status(kind, *status);
                }
            }));
        }

        Self {
            inner,
            _subscriptions: subscriptions,
        }
    }

    pub fn updates(&self) -> &SessionUpdates {
        &self.inner.updates
    }

    /// Programmatic start; equivalent to writing the status property but
    /// with the failure surfaced to the caller.
    pub fn start_position_updates(&self) -> Result<(), Error> {
        self.start(UpdateKind::Position)
    }

    pub fn stop_position_updates(&self) {
        self.stop_kind(UpdateKind::Position)
    }

    pub fn start_heading_updates(&self) -> Result<(), Error> {
        self.start(UpdateKind::Heading)
    }

    pub fn stop_heading_updates(&self) {
        self.stop_kind(UpdateKind::Heading)
    }

    pub fn start_velocity_updates(&self) -> Result<(), Error> {
        self.start(UpdateKind::Velocity)
    }

    pub fn stop_velocity_updates(&self) {
        self.stop_kind(UpdateKind::Velocity)
    }

    fn start(&self, kind: UpdateKind) -> Result<(), Error> {
        self.inner.try_start(kind)?;
        // The property write finds the kind already started and only
        // publishes the new status to observers.
        if let Err(err) = self.inner.updates.status(kind).set(SessionStatus::Enabled) {
            warn!("could not publish {kind} status: {err}");
        }
        Ok(())
    }

    fn stop_kind(&self, kind: UpdateKind) {
        self.inner.stop(kind);
        if let Err(err) = self.inner.updates.status(kind).set(SessionStatus::Disabled) {
            warn!("could not publish {kind} status: {err}");
        }
    }
}
