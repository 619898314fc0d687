#![allow(dead_code)]
use async_trait::async_trait;
use notifier::core::{ContactData, EventData, Sender, SenderError, SenderSettings, TriggerData};
use std::sync::{
    atomic::{AtomicBool, AtomicUsize, Ordering},
    Arc, Mutex,
};
use std::time::Duration;
use tokio::sync::{Notify, Semaphore};

/// How a [`MockSender`] answers delivery attempts.
#[derive(Clone, Debug)]
pub enum Behavior {
    Succeed,
    Fail,
    /// Fails the first `n` attempts, then succeeds.
    FailTimes(usize),
    /// Succeeds after sleeping.
    Delay(Duration),
    /// Waits for a permit before succeeding. Permits are consumed.
    Gate(Arc<Semaphore>),
    /// Fails after sleeping.
    FailAfter(Duration),
}

/// What a sender saw, shared with the test after the sender is boxed.
#[derive(Clone, Debug, Default)]
pub struct Tracker {
    pub calls: Arc<AtomicUsize>,
    pub inits: Arc<AtomicUsize>,
    pub received: Arc<Mutex<Vec<(ContactData, TriggerData, usize)>>>,
    pub notifier: Arc<Notify>,
    /// Set once the sender is dropped, i.e. its worker has exited.
    pub dropped: Arc<AtomicBool>,
}

impl Tracker {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn inits(&self) -> usize {
        self.inits.load(Ordering::SeqCst)
    }

    pub fn is_dropped(&self) -> bool {
        self.dropped.load(Ordering::SeqCst)
    }

    pub async fn wait_for_drop(&self, timeout_duration: Duration) {
        let start = std::time::Instant::now();
        while !self.is_dropped() {
            if start.elapsed() > timeout_duration {
                panic!("Timed out waiting for the sender to be dropped");
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    /// Contact values in the order they were attempted.
    pub fn contacts(&self) -> Vec<String> {
        self.received
            .lock()
            .unwrap()
            .iter()
            .map(|(contact, _, _)| contact.value.clone())
            .collect()
    }

    pub async fn wait_for_calls(&self, target: usize, timeout_duration: Duration) {
        let wait_future = async {
            loop {
                let notified = self.notifier.notified();
                if self.calls() >= target {
                    return;
                }
                notified.await;
            }
        };

        tokio::time::timeout(timeout_duration, wait_future)
            .await
            .unwrap_or_else(|_| {
                panic!(
                    "Timed out waiting for {} calls, got {}",
                    target,
                    self.calls()
                )
            });
    }
}

/// A scriptable `Sender` for dispatcher tests.
pub struct MockSender {
    behavior: Behavior,
    fail_init: bool,
    tracker: Tracker,
}

impl MockSender {
    pub fn new(behavior: Behavior) -> Self {
        Self {
            behavior,
            fail_init: false,
            tracker: Tracker::default(),
        }
    }

    pub fn succeeding() -> Self {
        Self::new(Behavior::Succeed)
    }

    pub fn failing() -> Self {
        Self::new(Behavior::Fail)
    }

    /// A sender whose `init` rejects every settings block.
    pub fn broken() -> Self {
        Self {
            behavior: Behavior::Succeed,
            fail_init: true,
            tracker: Tracker::default(),
        }
    }

    pub fn tracker(&self) -> Tracker {
        self.tracker.clone()
    }

    pub fn boxed(self) -> Box<dyn Sender> {
        Box::new(self)
    }
}

impl Drop for MockSender {
    fn drop(&mut self) {
        self.tracker.dropped.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl Sender for MockSender {
    fn init(&mut self, _settings: &SenderSettings, _span: &tracing::Span) -> Result<(), SenderError> {
        self.tracker.inits.fetch_add(1, Ordering::SeqCst);
        if self.fail_init {
            return Err(SenderError::MissingSetting {
                sender: "mock".to_string(),
                key: "endpoint",
            });
        }
        Ok(())
    }

    async fn send_events(
        &self,
        events: &[EventData],
        contact: &ContactData,
        trigger: &TriggerData,
        _throttled: bool,
    ) -> Result<(), SenderError> {
        let attempt = self.tracker.calls.fetch_add(1, Ordering::SeqCst);
        self.tracker
            .received
            .lock()
            .unwrap()
            .push((contact.clone(), trigger.clone(), events.len()));
        self.tracker.notifier.notify_waiters();

        let result = match &self.behavior {
            Behavior::Succeed => Ok(()),
            Behavior::Fail => Err(SenderError::Delivery("mock delivery failed".to_string())),
            Behavior::FailTimes(n) if attempt < *n => {
                Err(SenderError::Delivery(format!("mock failure {}", attempt + 1)))
            }
            Behavior::FailTimes(_) => Ok(()),
            Behavior::Delay(delay) => {
                tokio::time::sleep(*delay).await;
                Ok(())
            }
            Behavior::FailAfter(delay) => {
                tokio::time::sleep(*delay).await;
                Err(SenderError::Delivery("mock delivery failed late".to_string()))
            }
            Behavior::Gate(gate) => {
                gate.acquire()
                    .await
                    .map_err(|e| SenderError::Delivery(e.to_string()))?
                    .forget();
                Ok(())
            }
        };
        self.tracker.notifier.notify_waiters();
        result
    }
}
