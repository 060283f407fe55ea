use chrono::{DateTime, Local};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::oneshot;

use super::trigger::{CaptureTrigger, KeyEvent, KeyEventKind, TriggerAction};
use crate::session::conversation::{LoopState, LoopStateHandle};

/// Sent when the capture chord fires while the loop is idle.
#[derive(Debug, Clone, Copy)]
pub struct CaptureSignal {
    pub fired_at: DateTime<Local>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListenerExit {
    Cancelled,
    Failed(String),
}

pub struct ListenerHandles {
    /// Holds at most one pending capture.
    pub signals: mpsc::Receiver<CaptureSignal>,
    pub exit: oneshot::Receiver<ListenerExit>,
}

/// Converts an OS input event; anything that isn't a key press/release is dropped.
pub fn key_event_from(event: &rdev::Event) -> Option<KeyEvent> {
    let (key, kind) = match event.event_type {
        rdev::EventType::KeyPress(key) => (key, KeyEventKind::Down),
        rdev::EventType::KeyRelease(key) => (key, KeyEventKind::Up),
        _ => return None,
    };

    Some(KeyEvent {
        key: format!("{:?}", key),
        text: event.name.clone().filter(|n| !n.is_empty()),
        kind,
    })
}

/// Runs key events through the trigger and forwards the outcome.
pub struct Dispatcher {
    trigger: CaptureTrigger,
    state: LoopStateHandle,
    signals: mpsc::Sender<CaptureSignal>,
    exit: Option<oneshot::Sender<ListenerExit>>,
}

impl Dispatcher {
    pub fn new(
        trigger: CaptureTrigger,
        state: LoopStateHandle,
        signals: mpsc::Sender<CaptureSignal>,
        exit: oneshot::Sender<ListenerExit>,
    ) -> Self {
        Self {
            trigger,
            state,
            signals,
            exit: Some(exit),
        }
    }

    pub fn dispatch(&mut self, event: &KeyEvent, now: Instant) -> TriggerAction {
        let armed = *self.state.lock() == LoopState::Idle;
        let action = self.trigger.handle(event, now, armed);

        match action {
            TriggerAction::Capture => {
                let signal = CaptureSignal {
                    fired_at: Local::now(),
                };
                match self.signals.try_send(signal) {
                    Ok(()) => log::info!("Capture chord {} detected", self.trigger.chord()),
                    Err(TrySendError::Full(_)) => {
                        log::debug!("A capture is already pending; dropping chord")
                    }
                    Err(TrySendError::Closed(_)) => {
                        log::warn!("Conversation loop has stopped; dropping chord")
                    }
                }
            }
            TriggerAction::Cancel => {
                log::info!("Cancel key pressed; stopping listener");
                self.finish(ListenerExit::Cancelled);
            }
            TriggerAction::Ignore => {}
        }

        action
    }

    fn finish(&mut self, exit: ListenerExit) {
        if let Some(tx) = self.exit.take() {
            let _ = tx.send(exit);
        }
    }
}

/// Starts the OS keyboard hook on its own thread.
pub fn spawn(trigger: CaptureTrigger, state: LoopStateHandle) -> std::io::Result<ListenerHandles> {
    let (signal_tx, signals) = mpsc::channel(1);
    let (exit_tx, exit) = oneshot::channel();
    let dispatcher = Arc::new(Mutex::new(Dispatcher::new(
        trigger, state, signal_tx, exit_tx,
    )));

    std::thread::Builder::new()
        .name("key-listener".to_string())
        .spawn(move || {
            log::info!("Keyboard listener started");
            let hook = dispatcher.clone();
            let result = rdev::listen(move |event| match key_event_from(&event) {
                Some(key_event) => {
                    hook.lock().dispatch(&key_event, Instant::now());
                }
                None => log::trace!("Ignoring non-keyboard event {:?}", event.event_type),
            });

            if let Err(e) = result {
                log::error!("Keyboard listener failed: {:?}", e);
                dispatcher
                    .lock()
                    .finish(ListenerExit::Failed(format!("{:?}", e)));
            }
        })?;

    Ok(ListenerHandles { signals, exit })
}
