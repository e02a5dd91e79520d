//! Result observers
//!
//! Tree views, task lists and toolbar toggles all react to the same session result
//! without knowing about each other or about scan timing. Each session keeps an
//! explicit observer list; consumers register, get an id back, and deregister with
//! that id. Releasing a session drops its whole list.
//!
//! Delivery runs on a dispatcher thread. The worker that completes a scan only
//! snapshots the list and hands it over, so a slow or panicking observer can never
//! stall scanning or block the next job.

use crate::{result::DefectResult, session::SessionKey};
use std::{
    fmt,
    panic::{self, AssertUnwindSafe},
    sync::{mpsc, Arc, RwLock},
    thread,
};
use tracing::{debug, error, warn};
use uuid::Uuid;

pub trait ResultObserver: Send + Sync {
    fn on_result_changed(
        &self,
        session: &SessionKey,
        old: Option<Arc<DefectResult>>,
        new: Arc<DefectResult>,
    );

    fn on_background_scanning_changed(&self, _session: &SessionKey, _enabled: bool) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(Uuid);

impl fmt::Display for ObserverId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Default)]
pub struct ObserverList {
    observers: RwLock<Vec<(ObserverId, Arc<dyn ResultObserver>)>>,
}

impl ObserverList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, observer: Arc<dyn ResultObserver>) -> ObserverId {
        let id = ObserverId(Uuid::new_v4());
        self.observers.write().unwrap().push((id, observer));
        id
    }

    pub fn remove(&self, id: ObserverId) -> bool {
        let mut observers = self.observers.write().unwrap();
        let before = observers.len();
        observers.retain(|(existing, _)| *existing != id);
        observers.len() != before
    }

    pub fn clear(&self) -> usize {
        let mut observers = self.observers.write().unwrap();
        let removed = observers.len();
        observers.clear();
        removed
    }

    pub fn len(&self) -> usize {
        self.observers.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn snapshot(&self) -> Vec<Arc<dyn ResultObserver>> {
        self.observers
            .read()
            .unwrap()
            .iter()
            .map(|(_, observer)| Arc::clone(observer))
            .collect()
    }
}

#[derive(Clone)]
pub enum Notification {
    ResultChanged {
        session: SessionKey,
        old: Option<Arc<DefectResult>>,
        new: Arc<DefectResult>,
    },
    BackgroundScanningChanged {
        session: SessionKey,
        enabled: bool,
    },
}

struct Delivery {
    observers: Vec<Arc<dyn ResultObserver>>,
    notification: Notification,
}

/// Cheap to clone; every clone feeds the same dispatcher thread, which exits once
/// the last clone is dropped.
#[derive(Clone)]
pub struct NotificationDispatcher {
    tx: mpsc::Sender<Delivery>,
}

impl NotificationDispatcher {
    pub fn new(thread_name: &str) -> std::io::Result<Self> {
        let (tx, rx) = mpsc::channel::<Delivery>();

        thread::Builder::new()
            .name(thread_name.to_string())
            .spawn(move || {
                while let Ok(delivery) = rx.recv() {
                    deliver(delivery);
                }
                debug!("Notification dispatcher stopped");
            })?;

        Ok(Self { tx })
    }

    pub fn dispatch(&self, observers: &ObserverList, notification: Notification) {
        let observers = observers.snapshot();
        if observers.is_empty() {
            return;
        }

        let delivery = Delivery {
            observers,
            notification,
        };
        if self.tx.send(delivery).is_err() {
            warn!("Notification dispatcher is gone, dropping notification");
        }
    }
}

fn deliver(delivery: Delivery) {
    let Delivery {
        observers,
        notification,
    } = delivery;

    for observer in observers {
        let call = panic::catch_unwind(AssertUnwindSafe(|| match &notification {
            Notification::ResultChanged { session, old, new } => {
                observer.on_result_changed(session, old.clone(), Arc::clone(new))
            }
            Notification::BackgroundScanningChanged { session, enabled } => {
                observer.on_background_scanning_changed(session, *enabled)
            }
        }));

        if call.is_err() {
            error!("Result observer panicked while handling a notification");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{project::Project, test_support::sample_result};
    use std::time::Duration;

    struct ChannelObserver {
        tx: std::sync::Mutex<mpsc::Sender<(SessionKey, usize)>>,
    }

    impl ResultObserver for ChannelObserver {
        fn on_result_changed(
            &self,
            session: &SessionKey,
            _old: Option<Arc<DefectResult>>,
            new: Arc<DefectResult>,
        ) {
            let _ = self
                .tx
                .lock()
                .unwrap()
                .send((session.clone(), new.count(false)));
        }
    }

    struct PanickingObserver;

    impl ResultObserver for PanickingObserver {
        fn on_result_changed(
            &self,
            _session: &SessionKey,
            _old: Option<Arc<DefectResult>>,
            _new: Arc<DefectResult>,
        ) {
            panic!("observer bug");
        }
    }

    fn key() -> SessionKey {
        SessionKey::new(Project::new("app", "/work/app").key(), "pmd")
    }

    #[test]
    fn test_add_and_remove_observer() {
        let list = ObserverList::new();
        let first = list.add(Arc::new(PanickingObserver));
        let second = list.add(Arc::new(PanickingObserver));
        assert_eq!(list.len(), 2);

        assert!(list.remove(first));
        assert!(!list.remove(first));
        assert_eq!(list.len(), 1);

        assert_eq!(list.clear(), 1);
        assert!(list.is_empty());
        assert!(!list.remove(second));
    }

    #[test]
    fn test_dispatch_survives_panicking_observer() {
        let dispatcher = NotificationDispatcher::new("test-dispatcher").unwrap();
        let (tx, rx) = mpsc::channel();
        let list = ObserverList::new();
        list.add(Arc::new(PanickingObserver));
        list.add(Arc::new(ChannelObserver {
            tx: std::sync::Mutex::new(tx),
        }));

        for _ in 0..2 {
            dispatcher.dispatch(
                &list,
                Notification::ResultChanged {
                    session: key(),
                    old: None,
                    new: Arc::new(sample_result("pmd")),
                },
            );
        }

        for _ in 0..2 {
            let (session, count) = rx.recv_timeout(Duration::from_secs(5)).unwrap();
            assert_eq!(session, key());
            assert_eq!(count, 3);
        }
    }

    #[test]
    fn test_background_toggle_uses_default_handler() {
        let dispatcher = NotificationDispatcher::new("toggle-dispatcher").unwrap();
        let (tx, rx) = mpsc::channel();
        let list = ObserverList::new();
        list.add(Arc::new(ChannelObserver {
            tx: std::sync::Mutex::new(tx),
        }));

        dispatcher.dispatch(
            &list,
            Notification::BackgroundScanningChanged {
                session: key(),
                enabled: true,
            },
        );

        assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());
    }
}
