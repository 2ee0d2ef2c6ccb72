//! A provider that reports a fixed reference position on a timer.
//! Useful on machines without positioning hardware and as a baseline in
//! tests and demos.

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
    thread,
    time::Duration,
};

use location_lib::{
    position::Position,
    provider::{
        ActivationTracker, DeclaredAccuracy, Features, Provider, ProviderUpdates, Requirements,
        UpdateKind,
    },
    update::Update,
};
use tracing::warn;

#[derive(Clone, Debug)]
pub struct DummyProviderConfig {
    pub reference_position: Position,
    pub update_period: Duration,
}

struct Worker {
    stop: Arc<AtomicBool>,
    handle: thread::JoinHandle<()>,
}

pub struct DummyProvider {
    config: DummyProviderConfig,
    updates: ProviderUpdates,
    tracker: ActivationTracker,
    worker: Mutex<Option<Worker>>,
}

impl DummyProvider {
    pub fn new(config: DummyProviderConfig) -> Self {
        Self {
            config,
            updates: ProviderUpdates::new(),
            tracker: ActivationTracker::new(),
            worker: Mutex::new(None),
        }
    }

    fn engage(&self) {
        let mut worker = self.worker.lock().unwrap();
        if worker.is_some() {
            return;
        }

        let stop = Arc::new(AtomicBool::new(false));
        let thread_stop = stop.clone();
        let position = self.config.reference_position;
        let period = self.config.update_period;
        let sink = self.updates.position.clone();

        let spawned = thread::Builder::new()
            .name("dummy-provider".into())
            .spawn(move || {
                while !thread_stop.load(Ordering::Relaxed) {
                    sink.emit(&Update::now(position));
                    thread::park_timeout(period);
                }
            });

        match spawned {
            Ok(handle) => *worker = Some(Worker { stop, handle }),
            Err(err) => warn!("could not spawn dummy provider worker: {err}"),
        }
    }

    fn disengage(&self) {
        let worker = self.worker.lock().unwrap().take();
        if let Some(worker) = worker {
            worker.stop.store(true, Ordering::Relaxed);
            worker.handle.thread().unpark();
            let _ = worker.handle.join();
        }
    }
}

impl Provider for DummyProvider {
    fn features(&self) -> Features {
        Features::POSITION
    }

    fn requirements(&self) -> Requirements {
        Requirements::empty()
    }

    fn declared_accuracy(&self) -> DeclaredAccuracy {
        DeclaredAccuracy {
            horizontal: self.config.reference_position.accuracy.horizontal,
            ..Default::default()
        }
    }

    fn updates(&self) -> &ProviderUpdates {
        &self.updates
    }

    fn start_position_updates(&self) {
        if self.tracker.start(UpdateKind::Position) {
            self.engage();
        }
    }

    fn stop_position_updates(&self) {
        if self.tracker.stop(UpdateKind::Position) {
            self.disengage();
        }
    }

    fn start_heading_updates(&self) {
        self.tracker.start(UpdateKind::Heading);
    }

    fn stop_heading_updates(&self) {
        self.tracker.stop(UpdateKind::Heading);
    }

    fn start_velocity_updates(&self) {
        self.tracker.start(UpdateKind::Velocity);
    }

    fn stop_velocity_updates(&self) {
        self.tracker.stop(UpdateKind::Velocity);
    }

    fn activity(&self) -> Vec<UpdateKind> {
        self.tracker.active_kinds()
    }

    fn suspend(&self) {
        for kind in self.tracker.suspend() {
            if kind == UpdateKind::Position {
                self.disengage();
            }
        }
    }

    fn resume(&self) {
        for kind in self.tracker.resume() {
            if kind == UpdateKind::Position {
                self.engage();
            }
        }
    }
}

impl Drop for DummyProvider {
    fn drop(&mut self) {
        for kind in self.tracker.drain() {
            if kind == UpdateKind::Position {
                self.disengage();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::mpsc,
        time::{Duration, Instant},
    };

    use location_lib::units::{Degrees, Meters};

    use super::*;

    fn config() -> DummyProviderConfig {
        DummyProviderConfig {
            reference_position: Position::new(Degrees(52.5167), Degrees(13.3833))
                .unwrap()
                .with_horizontal_accuracy(Meters(100.0))
                .unwrap(),
            update_period: Duration::from_millis(10),
        }
    }

    #[test]
    fn emits_the_reference_position_while_active() {
        let provider = DummyProvider::new(config());
        let (tx, rx) = mpsc::channel();

        let tx = Mutex::new(tx);
        let _sub = provider.updates().position.connect(move |update: &Update<Position>| {
            let _ = tx.lock().unwrap().send(update.value);
        });

        provider.start_position_updates();
        let first = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(first.latitude(), Degrees(52.5167));
        provider.stop_position_updates();

        // Once stopped, the stream stays quiet.
        while rx.recv_timeout(Duration::from_millis(50)).is_ok() {}
        assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());
    }

    #[test]
    fn worker_lifetime_follows_the_reference_count() {
        let provider = DummyProvider::new(config());
        provider.start_position_updates();
        provider.start_position_updates();
        provider.stop_position_updates();
        assert_eq!(provider.activity(), vec![UpdateKind::Position]);
        provider.stop_position_updates();

        let deadline = Instant::now() + Duration::from_secs(1);
        while provider.worker.lock().unwrap().is_some() {
            assert!(Instant::now() < deadline);
            thread::sleep(Duration::from_millis(5));
        }
    }
}
