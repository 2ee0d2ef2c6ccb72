//! The session-scoped composite over the providers the policy picked.
//! One proxy belongs to exactly one session and never outlives the
//! engine-owned providers it references.

use std::sync::Arc;

use location_lib::{
    observable::Subscription,
    provider::{Provider, ProviderUpdates, UpdateKind},
    Error,
};

/// The outcome of the selection policy. Slots may share one provider or
/// stay empty when nobody can serve the kind.
#[derive(Clone, Default)]
pub struct ProviderSelection {
    pub position: Option<Arc<dyn Provider>>,
    pub heading: Option<Arc<dyn Provider>>,
    pub velocity: Option<Arc<dyn Provider>>,
}

impl ProviderSelection {
    /// The distinct providers behind the slots, each once.
    pub fn distinct_providers(&self) -> Vec<Arc<dyn Provider>> {
        let mut providers: Vec<Arc<dyn Provider>> = Vec::new();
        for slot in [&self.position, &self.heading, &self.velocity] {
            if let Some(provider) = slot {
                if !providers.iter().any(|known| Arc::ptr_eq(known, provider)) {
                    providers.push(provider.clone());
                }
            }
        }
        providers
    }
}

pub struct ProxyProvider {
    selection: ProviderSelection,
    pub updates: ProviderUpdates,
    _subscriptions: Vec<Subscription>,
}

impl ProxyProvider {
    pub fn new(selection: ProviderSelection) -> Self {
        let updates = ProviderUpdates::new();
        let mut subscriptions = Vec::new();

        if let Some(provider) = &selection.position {
            let sink = updates.position.clone();
            subscriptions.push(
                provider
                    .updates()
                    .position
                    .connect(move |update| sink.emit(update)),
            );
        }
        if let Some(provider) = &selection.heading {
            let sink = updates.heading.clone();
            subscriptions.push(
                provider
                    .updates()
                    .heading
                    .connect(move |update| sink.emit(update)),
            );
        }
        if let Some(provider) = &selection.velocity {
            let sink = updates.velocity.clone();
            subscriptions.push(
                provider
                    .updates()
                    .velocity
                    .connect(move |update| sink.emit(update)),
            );
        }
        // Satellite visibility is merged across every backing provider.
        for provider in selection.distinct_providers() {
            let sink = updates.svs.clone();
            subscriptions.push(
                provider
                    .updates()
                    .svs
                    .connect(move |update| sink.emit(update)),
            );
        }

        Self {
            selection,
            updates,
            _subscriptions: subscriptions,
        }
    }

    /// Starts are forwarded per kind; a kind shared with another slot is
    /// still counted separately by the backing provider.
    pub fn start_updates(&self, kind: UpdateKind) -> Result<(), Error> {
        match self.slot(kind) {
            Some(provider) => {
                provider.start_updates(kind);
                Ok(())
            }
            None => Err(Error::NoMatchingProvider(kind)),
        }
    }

    pub fn stop_updates(&self, kind: UpdateKind) -> Result<(), Error> {
        match self.slot(kind) {
            Some(provider) => {
                provider.stop_updates(kind);
                Ok(())
            }
            None => Err(Error::NoMatchingProvider(kind)),
        }
    }

    fn slot(&self, kind: UpdateKind) -> Option<&Arc<dyn Provider>> {
        match kind {
            UpdateKind::Position => self.selection.position.as_ref(),
            UpdateKind::Heading => self.selection.heading.as_ref(),
            UpdateKind::Velocity => self.selection.velocity.as_ref(),
        }
    }
}
