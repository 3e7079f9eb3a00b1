use std::collections::VecDeque;
use std::time::Duration;

use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use webpilot_core_types::BrowserEvent;
use webpilot_event_bus::EventBus;

use crate::config::WatchdogConfig;
use crate::errors::WatchdogError;
use crate::metrics;
use crate::signal::WatchdogSignal;
use crate::watchdogs::Watchdog;

/// Publishes the Loop's current step epoch to the observers.
#[derive(Debug)]
pub struct EpochPublisher {
    sender: watch::Sender<u64>,
}

impl EpochPublisher {
    pub fn current(&self) -> u64 {
        *self.sender.borrow()
    }

    /// Move to the next logical step and return its epoch.
    pub fn advance(&self) -> u64 {
        let mut next = 0;
        self.sender.send_modify(|epoch| {
            *epoch += 1;
            next = *epoch;
        });
        next
    }
}

/// Signals for one turn boundary.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct SignalDrain {
    /// Advisories in arrival order. Empty whenever `fatal` is set.
    pub advisories: Vec<WatchdogSignal>,
    pub fatal: Option<WatchdogSignal>,
}

impl SignalDrain {
    pub fn is_empty(&self) -> bool {
        self.advisories.is_empty() && self.fatal.is_none()
    }
}

/// Loop side of the ordered signal channel.
///
/// Besides the signals it keeps its own subscription to the event feed and
/// the progress of every observer, so [`settle`](Self::settle) can tell when
/// the observers have seen everything published so far.
#[derive(Debug)]
pub struct SignalReceiver {
    receiver: mpsc::UnboundedReceiver<WatchdogSignal>,
    buffered: VecDeque<WatchdogSignal>,
    feed: broadcast::Receiver<BrowserEvent>,
    published: u64,
    progress: Vec<watch::Receiver<u64>>,
}

impl SignalReceiver {
    fn new(
        receiver: mpsc::UnboundedReceiver<WatchdogSignal>,
        feed: broadcast::Receiver<BrowserEvent>,
        progress: Vec<watch::Receiver<u64>>,
    ) -> Self {
        Self {
            receiver,
            buffered: VecDeque::new(),
            feed,
            published: 0,
            progress,
        }
    }

    /// Wait until every observer has handled each event published before
    /// the call, so the signals those events raise are queued for the next
    /// [`drain`](Self::drain). Returns `false` if `limit` elapsed first.
    pub async fn settle(&mut self, limit: Duration) -> bool {
        loop {
            match self.feed.try_recv() {
                Ok(_) => self.published += 1,
                Err(TryRecvError::Lagged(skipped)) => self.published += skipped,
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => break,
            }
        }
        let target = self.published;
        let progress = &mut self.progress;
        let caught_up = async move {
            for observer in progress.iter_mut() {
                // An observer that already exited has nothing left to report.
                let _ = observer.wait_for(|handled| *handled >= target).await;
            }
        };
        tokio::time::timeout(limit, caught_up).await.is_ok()
    }

    /// Take everything queued so far.
    ///
    /// The first fatal signal preempts every advisory queued for the same
    /// turn; later fatals are redundant and dropped.
    pub fn drain(&mut self) -> SignalDrain {
        let mut drain = SignalDrain::default();
        let mut incoming: Vec<WatchdogSignal> = self.buffered.drain(..).collect();
        while let Ok(signal) = self.receiver.try_recv() {
            incoming.push(signal);
        }
        for signal in incoming {
            if signal.is_fatal() {
                if drain.fatal.is_none() {
                    drain.fatal = Some(signal);
                }
            } else {
                drain.advisories.push(signal);
            }
        }
        if drain.fatal.is_some() && !drain.advisories.is_empty() {
            debug!(
                preempted = drain.advisories.len(),
                "fatal signal preempts queued advisories"
            );
            drain.advisories.clear();
        }
        drain
    }

    /// Resolve once a fatal signal arrives. Advisories seen while waiting are
    /// kept for the next [`drain`](Self::drain), as is the fatal itself.
    ///
    /// Cancel safe. Never resolves once every observer is gone.
    pub async fn next_fatal(&mut self) -> WatchdogSignal {
        if let Some(fatal) = self.buffered.iter().find(|signal| signal.is_fatal()) {
            return fatal.clone();
        }
        loop {
            match self.receiver.recv().await {
                Some(signal) => {
                    let fatal = signal.is_fatal();
                    self.buffered.push_back(signal.clone());
                    if fatal {
                        return signal;
                    }
                }
                None => std::future::pending::<()>().await,
            }
        }
    }
}

/// Runs the watchdogs of one browser session.
///
/// Each watchdog gets its own task and its own subscription to the session
/// event feed, so a slow observer never holds up the others or the Loop.
pub struct WatchdogSupervisor {
    cancel: CancellationToken,
    tasks: Vec<(&'static str, JoinHandle<()>)>,
}

impl WatchdogSupervisor {
    /// Attach the observers described by `config`.
    pub fn attach<B>(bus: &B, config: &WatchdogConfig) -> (Self, SignalReceiver, EpochPublisher)
    where
        B: EventBus<BrowserEvent> + ?Sized,
    {
        Self::attach_with(bus, config.build_watchdogs())
    }

    pub fn attach_with<B>(
        bus: &B,
        watchdogs: Vec<Box<dyn Watchdog>>,
    ) -> (Self, SignalReceiver, EpochPublisher)
    where
        B: EventBus<BrowserEvent> + ?Sized,
    {
        let cancel = CancellationToken::new();
        let (signal_tx, signal_rx) = mpsc::unbounded_channel();
        let (epoch_tx, epoch_rx) = watch::channel(0u64);

        let mut progress = Vec::with_capacity(watchdogs.len());
        let tasks = watchdogs
            .into_iter()
            .map(|watchdog| {
                let name = watchdog.name();
                let (handled_tx, handled_rx) = watch::channel(0u64);
                progress.push(handled_rx);
                let handle = tokio::spawn(run_observer(
                    watchdog,
                    bus.subscribe(),
                    epoch_rx.clone(),
                    signal_tx.clone(),
                    handled_tx,
                    cancel.child_token(),
                ));
                metrics::observer_attached();
                (name, handle)
            })
            .collect::<Vec<_>>();
        // Subscribed after every observer, so it never counts an event an
        // observer cannot see.
        let feed = bus.subscribe();
        info!(observers = tasks.len(), "watchdogs attached");

        (
            Self { cancel, tasks },
            SignalReceiver::new(signal_rx, feed, progress),
            EpochPublisher { sender: epoch_tx },
        )
    }

    pub fn observer_names(&self) -> Vec<&'static str> {
        self.tasks.iter().map(|(name, _)| *name).collect()
    }

    /// Stop every observer and wait for them to exit.
    pub async fn detach(mut self) -> Result<(), WatchdogError> {
        self.cancel.cancel();
        let mut first_error = None;
        for (name, handle) in std::mem::take(&mut self.tasks) {
            if let Err(err) = handle.await {
                let error = if err.is_panic() {
                    WatchdogError::ObserverPanicked(name.to_string())
                } else {
                    WatchdogError::ObserverAborted(name.to_string())
                };
                warn!(watchdog = name, %error, "observer did not exit cleanly");
                first_error.get_or_insert(error);
            }
        }
        info!("watchdogs detached");
        first_error.map_or(Ok(()), Err)
    }
}

impl Drop for WatchdogSupervisor {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl std::fmt::Debug for WatchdogSupervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WatchdogSupervisor")
            .field("observers", &self.observer_names())
            .finish()
    }
}

async fn run_observer(
    mut watchdog: Box<dyn Watchdog>,
    mut events: broadcast::Receiver<BrowserEvent>,
    epoch: watch::Receiver<u64>,
    signals: mpsc::UnboundedSender<WatchdogSignal>,
    handled: watch::Sender<u64>,
    cancel: CancellationToken,
) {
    let name = watchdog.name();
    loop {
        let received = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            received = events.recv() => received,
        };
        let (signal, consumed) = match received {
            Ok(event) => {
                let current = *epoch.borrow();
                (watchdog.observe(&event, current), 1)
            }
            Err(RecvError::Lagged(skipped)) => {
                warn!(watchdog = name, skipped, "observer lagged behind the event feed");
                metrics::record_lagged(name, skipped);
                (None, skipped)
            }
            Err(RecvError::Closed) => {
                let current = *epoch.borrow();
                if let Some(signal) = watchdog.on_feed_closed(current) {
                    emit(name, &signals, signal);
                }
                break;
            }
        };
        if let Some(signal) = signal {
            if !emit(name, &signals, signal) {
                break;
            }
        }
        // Only after the signal is queued, so a settled drain sees it.
        handled.send_modify(|count| *count += consumed);
    }
    metrics::observer_detached();
    debug!(watchdog = name, "observer stopped");
}

fn emit(name: &str, signals: &mpsc::UnboundedSender<WatchdogSignal>, signal: WatchdogSignal) -> bool {
    metrics::record_signal(&signal);
    if signal.is_fatal() {
        warn!(watchdog = name, category = %signal.category(), "fatal signal: {}", signal.describe());
    } else {
        info!(watchdog = name, category = %signal.category(), "advisory signal: {}", signal.describe());
    }
    signals.send(signal).is_ok()
}
