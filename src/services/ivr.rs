//! IVR call service
//!
//! Owns the shared menu catalog and runs one executor task per call. The
//! media layer feeds detected DTMF in through [`IvrService::push_digit`] and
//! reports hangups through [`IvrService::hangup`]; lifecycle events are
//! published on an unbounded channel.

use std::any::Any;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::IvrConfig;
use crate::core::{execute, CallContext, CallbackRegistry, IvrEvent, MenuCatalog, MenuOutcome};
use crate::interfaces::{dtmf_channel, CallControl, ChannelIo, DtmfSender};
use crate::protocols::DigitAlphabet;
use crate::services::menu_loader::build_catalog;
use crate::{Error, Result};

/// Snapshot of a call that is still inside the menu flow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallInfo {
    pub call_id: String,
    pub entry_menu: String,
    pub started_at: DateTime<Utc>,
}

/// Service counters
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IvrStatistics {
    pub calls_started: u64,
    pub calls_completed: u64,
    pub calls_transferred: u64,
    pub calls_channel_gone: u64,
    pub calls_max_failures: u64,
    pub calls_failed: u64,
    pub active_calls: usize,
}

#[derive(Debug, Default)]
struct Counters {
    started: AtomicU64,
    completed: AtomicU64,
    transferred: AtomicU64,
    channel_gone: AtomicU64,
    max_failures: AtomicU64,
    failed: AtomicU64,
}

impl Counters {
    fn record(&self, result: &Result<MenuOutcome>) {
        let counter = match result {
            Ok(MenuOutcome::Completed) => &self.completed,
            Ok(MenuOutcome::Transferred { .. }) => &self.transferred,
            Ok(MenuOutcome::ChannelGone) => &self.channel_gone,
            Ok(MenuOutcome::MaxFailuresExceeded { .. }) => &self.max_failures,
            Err(_) => &self.failed,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

struct ActiveCall {
    info: CallInfo,
    digits: DtmfSender,
    cancel: CancellationToken,
}

/// A running call. Awaiting [`CallHandle::join`] yields how its flow ended.
#[derive(Debug)]
pub struct CallHandle {
    call_id: String,
    task: JoinHandle<Result<MenuOutcome>>,
}

impl CallHandle {
    pub fn call_id(&self) -> &str {
        &self.call_id
    }

    pub async fn join(self) -> Result<MenuOutcome> {
        self.task
            .await
            .map_err(|e| Error::internal(format!("Call task {} failed: {}", self.call_id, e)))?
    }
}

pub struct IvrService {
    config: IvrConfig,
    alphabet: DigitAlphabet,
    catalog: Arc<MenuCatalog>,
    calls: Arc<DashMap<String, ActiveCall>>,
    /// Call slots taken, reserved before a call is inserted into `calls`.
    slots: Arc<AtomicUsize>,
    counters: Arc<Counters>,
    event_tx: mpsc::UnboundedSender<IvrEvent>,
    event_rx: Option<mpsc::UnboundedReceiver<IvrEvent>>,
    is_running: bool,
}

impl IvrService {
    /// Validates `config` and builds its menus. Custom callback names used
    /// by menu entries must already be registered in `callbacks`.
    pub fn new(config: IvrConfig, callbacks: CallbackRegistry) -> Result<Self> {
        config.validate()?;
        let alphabet = config.alphabet()?;
        let catalog = build_catalog(&config, callbacks)?;
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        Ok(Self {
            config,
            alphabet,
            catalog: Arc::new(catalog),
            calls: Arc::new(DashMap::new()),
            slots: Arc::new(AtomicUsize::new(0)),
            counters: Arc::new(Counters::default()),
            event_tx,
            event_rx: Some(event_rx),
            is_running: false,
        })
    }

    pub fn take_event_receiver(&mut self) -> Option<mpsc::UnboundedReceiver<IvrEvent>> {
        self.event_rx.take()
    }

    pub async fn start(&mut self) -> Result<()> {
        if self.is_running {
            return Err(Error::invalid_state("IVR service already running"));
        }
        info!(
            "Starting IVR service {} ({} menus, max {} calls)",
            self.config.general.node_id,
            self.catalog.len(),
            self.config.general.max_calls
        );
        self.is_running = true;
        Ok(())
    }

    /// Hangs up every active call and refuses new ones.
    pub async fn stop(&mut self) -> Result<()> {
        if !self.is_running {
            return Ok(());
        }
        info!("Stopping IVR service, hanging up {} call(s)", self.calls.len());
        for call in self.calls.iter() {
            call.cancel.cancel();
        }
        self.is_running = false;
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.is_running
    }

    pub fn config(&self) -> &IvrConfig {
        &self.config
    }

    pub fn catalog(&self) -> &Arc<MenuCatalog> {
        &self.catalog
    }

    /// Starts a menu flow for a new call in `entry`, or the configured main
    /// menu when `entry` is `None`.
    pub fn start_call(
        &self,
        channel: Arc<dyn ChannelIo>,
        control: Arc<dyn CallControl>,
        entry: Option<&str>,
    ) -> Result<CallHandle> {
        self.spawn_call(channel, control, entry, None)
    }

    /// Like [`start_call`](Self::start_call), with an object callbacks can
    /// inspect through their context.
    pub fn start_call_with_data(
        &self,
        channel: Arc<dyn ChannelIo>,
        control: Arc<dyn CallControl>,
        entry: Option<&str>,
        user_data: Arc<dyn Any + Send + Sync>,
    ) -> Result<CallHandle> {
        self.spawn_call(channel, control, entry, Some(user_data))
    }

    fn spawn_call(
        &self,
        channel: Arc<dyn ChannelIo>,
        control: Arc<dyn CallControl>,
        entry: Option<&str>,
        user_data: Option<Arc<dyn Any + Send + Sync>>,
    ) -> Result<CallHandle> {
        if !self.is_running {
            return Err(Error::invalid_state("IVR service is not running"));
        }
        let entry = entry.unwrap_or(&self.config.general.main_menu).to_string();
        if !self.catalog.contains(&entry) {
            return Err(Error::menu_not_found(entry));
        }

        let max_calls = self.config.general.max_calls as usize;
        self.slots
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |taken| {
                (taken < max_calls).then_some(taken + 1)
            })
            .map_err(|taken| Error::capacity_exceeded(format!("{} calls already active", taken)))?;

        let call_id = Uuid::new_v4().to_string();
        let (digits, receiver) = dtmf_channel();
        let cancel = CancellationToken::new();

        let mut context = CallContext::new(call_id.clone(), channel, control, receiver)
            .with_cancellation(cancel.clone())
            .with_events(self.event_tx.clone())
            .with_max_depth(self.config.general.max_menu_depth);
        if let Some(data) = user_data {
            context = context.with_user_data(data);
        }

        let info = CallInfo {
            call_id: call_id.clone(),
            entry_menu: entry.clone(),
            started_at: Utc::now(),
        };
        self.calls.insert(call_id.clone(), ActiveCall { info, digits, cancel });
        self.counters.started.fetch_add(1, Ordering::Relaxed);
        let _ = self.event_tx.send(IvrEvent::CallStarted {
            call_id: call_id.clone(),
            entry_menu: entry.clone(),
        });
        info!("Call {} started in menu {}", call_id, entry);

        let catalog = Arc::clone(&self.catalog);
        let calls = Arc::clone(&self.calls);
        let slots = Arc::clone(&self.slots);
        let counters = Arc::clone(&self.counters);
        let event_tx = self.event_tx.clone();
        let task_call_id = call_id.clone();

        let task = tokio::spawn(async move {
            let started = Instant::now();
            let result = execute(&catalog, &entry, context).await;
            calls.remove(&task_call_id);
            slots.fetch_sub(1, Ordering::AcqRel);
            counters.record(&result);

            match &result {
                Ok(outcome) => {
                    let _ = event_tx.send(IvrEvent::CallFinished {
                        call_id: task_call_id.clone(),
                        outcome: outcome.clone(),
                        duration: started.elapsed(),
                    });
                }
                Err(e) => {
                    warn!("Call {} failed: {}", task_call_id, e);
                    let _ = event_tx.send(IvrEvent::Error {
                        call_id: Some(task_call_id.clone()),
                        message: e.to_string(),
                    });
                }
            }
            result
        });

        Ok(CallHandle { call_id, task })
    }

    /// Delivers one detected DTMF digit to a running call.
    pub fn push_digit(&self, call_id: &str, digit: char) -> Result<()> {
        if !self.alphabet.contains(digit) {
            return Err(Error::invalid_pattern(format!("{:?} is not a DTMF digit", digit)));
        }
        let call = self
            .calls
            .get(call_id)
            .ok_or_else(|| Error::invalid_state(format!("No active call {}", call_id)))?;
        debug!("Call {} DTMF {}", call_id, digit);
        call.digits.send(digit)
    }

    /// Signals that the call leg went away. Returns false for unknown calls.
    pub fn hangup(&self, call_id: &str) -> bool {
        match self.calls.get(call_id) {
            Some(call) => {
                info!("Call {} hung up", call_id);
                call.cancel.cancel();
                true
            }
            None => false,
        }
    }

    pub fn active_calls(&self) -> Vec<CallInfo> {
        self.calls.iter().map(|call| call.info.clone()).collect()
    }

    pub fn statistics(&self) -> IvrStatistics {
        IvrStatistics {
            calls_started: self.counters.started.load(Ordering::Relaxed),
            calls_completed: self.counters.completed.load(Ordering::Relaxed),
            calls_transferred: self.counters.transferred.load(Ordering::Relaxed),
            calls_channel_gone: self.counters.channel_gone.load(Ordering::Relaxed),
            calls_max_failures: self.counters.max_failures.load(Ordering::Relaxed),
            calls_failed: self.counters.failed.load(Ordering::Relaxed),
            active_calls: self.calls.len(),
        }
    }
}
