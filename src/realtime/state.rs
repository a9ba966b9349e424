//! Conversation state machine and its silence timer.
//!
//! Entry points are plain synchronous methods callable from the audio
//! callback, the keyword hand-off and the timer thread. One mutex guards the
//! state and the timer bookkeeping and is never held across a remote call;
//! every remote side effect is submitted to the offload pool.

use super::session::{PlaybackControl, RealtimeSession};
use crate::keyword::{KeywordMatch, KeywordSwitch};
use crate::lock_or_recover;
use crate::offload::WorkerPool;
use anyhow::{Context, Result};
use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::thread;
use std::time::{Duration, Instant};

pub const DEFAULT_KEYWORD_REARM_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConversationState {
    Idle = 0,
    KeywordDetected = 1,
    ConversationActive = 2,
}

impl ConversationState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::KeywordDetected,
            2 => Self::ConversationActive,
            _ => Self::Idle,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::KeywordDetected => "keyword_detected",
            Self::ConversationActive => "conversation_active",
        }
    }
}

impl fmt::Display for ConversationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConversationSettings {
    /// Silence after which keyword detection is re-armed and the state resets.
    pub rearm_timeout: Duration,
}

impl Default for ConversationSettings {
    fn default() -> Self {
        Self {
            rearm_timeout: DEFAULT_KEYWORD_REARM_TIMEOUT,
        }
    }
}

enum TimerCommand {
    Arm { generation: u64, after: Duration },
    Cancel,
}

struct Inner {
    state: ConversationState,
    /// Bumped on every arm and cancel; a firing timer with an older value is stale.
    timer_generation: u64,
    timer_armed: bool,
    keyword: Option<KeywordSwitch>,
}

pub struct ConversationStateMachine {
    inner: Mutex<Inner>,
    // Mirror of `inner.state` for lock-free reads on the audio path.
    state: AtomicU8,
    session: Arc<dyn RealtimeSession>,
    playback: Arc<dyn PlaybackControl>,
    offload: WorkerPool,
    settings: ConversationSettings,
    timer: Sender<TimerCommand>,
}

impl ConversationStateMachine {
    pub fn new(
        session: Arc<dyn RealtimeSession>,
        playback: Arc<dyn PlaybackControl>,
        offload: WorkerPool,
        settings: ConversationSettings,
    ) -> Result<Arc<Self>> {
        let (timer_tx, timer_rx) = unbounded();
        let machine = Arc::new(Self {
            inner: Mutex::new(Inner {
                state: ConversationState::Idle,
                timer_generation: 0,
                timer_armed: false,
                keyword: None,
            }),
            state: AtomicU8::new(ConversationState::Idle as u8),
            session,
            playback,
            offload,
            settings,
            timer: timer_tx,
        });
        let weak = Arc::downgrade(&machine);
        thread::Builder::new()
            .name("silence-timer".into())
            .spawn(move || timer_loop(&timer_rx, &weak))
            .context("failed to spawn silence timer thread")?;
        Ok(machine)
    }

    pub fn state(&self) -> ConversationState {
        ConversationState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn settings(&self) -> ConversationSettings {
        self.settings
    }

    pub fn silence_timer_armed(&self) -> bool {
        self.lock().timer_armed
    }

    /// Keyword recognizer to arm and disarm. Without one, speech starting in
    /// `Idle` opens the conversation directly.
    pub fn set_keyword_switch(&self, keyword: Option<KeywordSwitch>) {
        self.lock().keyword = keyword;
    }

    pub fn has_keyword(&self) -> bool {
        self.lock().keyword.is_some()
    }

    pub fn on_keyword_detected(&self, result: &KeywordMatch) {
        tracing::info!(keyword = %result.keyword, "local keyword: user keyword detected");
        let mut inner = self.lock();
        self.notify_keyword_armed(&inner, false);
        self.set_state(&mut inner, ConversationState::KeywordDetected);
        self.arm_timer(&mut inner);
    }

    pub fn on_speech_start(&self) {
        let server_turns = self.session.server_turn_detection();
        let active = {
            let mut inner = self.lock();
            tracing::info!(state = %inner.state, "local VAD: user speech started");
            let opens = match inner.state {
                ConversationState::KeywordDetected | ConversationState::ConversationActive => true,
                ConversationState::Idle => inner.keyword.is_none(),
            };
            if opens {
                self.set_state(&mut inner, ConversationState::ConversationActive);
                self.cancel_timer(&mut inner);
            }
            inner.state == ConversationState::ConversationActive
        };

        if active && !server_turns && self.playback.is_audio_playing() {
            let session = Arc::clone(&self.session);
            let playback = Arc::clone(&self.playback);
            self.offload.submit("interrupt_assistant", move || {
                interrupt_assistant(session.as_ref(), playback.as_ref());
            });
        }
    }

    pub fn on_speech_end(&self) {
        let server_turns = self.session.server_turn_detection();
        let mut inner = self.lock();
        tracing::info!(state = %inner.state, "local VAD: user speech ended");
        if inner.state != ConversationState::ConversationActive || server_turns {
            return;
        }
        tracing::debug!("using local VAD; requesting response generation");
        let session = Arc::clone(&self.session);
        self.offload.submit("generate_response", move || {
            if let Err(err) = session.generate_response() {
                tracing::warn!(error = %err, "generate_response failed");
            }
        });
        self.arm_timer(&mut inner);
    }

    /// Reset to `Idle` without re-arming keyword detection.
    pub fn force_idle(&self) {
        let mut inner = self.lock();
        self.set_state(&mut inner, ConversationState::Idle);
    }

    fn on_silence_timeout(&self, generation: u64) {
        {
            let mut inner = self.lock();
            if !inner.timer_armed || inner.timer_generation != generation {
                return;
            }
            inner.timer_armed = false;
        }

        // Collaborator checks run unlocked; the generation re-check below
        // catches any transition that raced with them.
        if self.playback.is_audio_playing() || self.session.is_function_processing() {
            tracing::info!(
                "assistant is responding or processing a function; waiting to reset keyword detection"
            );
            let mut inner = self.lock();
            if inner.timer_generation == generation {
                self.arm_timer(&mut inner);
            }
            return;
        }

        let mut inner = self.lock();
        if inner.timer_generation != generation {
            return;
        }
        tracing::info!("silence timeout reached; rearming keyword detection");
        self.notify_keyword_armed(&inner, true);
        let session = Arc::clone(&self.session);
        self.offload.submit("clear_input_audio_buffer", move || {
            if let Err(err) = session.clear_input_audio_buffer() {
                tracing::warn!(error = %err, "clear_input_audio_buffer failed");
            }
        });
        self.set_state(&mut inner, ConversationState::Idle);
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        lock_or_recover(&self.inner, "conversation_state")
    }

    fn set_state(&self, inner: &mut Inner, next: ConversationState) {
        if inner.state != next {
            tracing::debug!(from = %inner.state, to = %next, "conversation state transition");
        }
        inner.state = next;
        self.state.store(next as u8, Ordering::Release);
        if next != ConversationState::ConversationActive {
            self.cancel_timer(inner);
        }
    }

    fn arm_timer(&self, inner: &mut Inner) {
        inner.timer_generation += 1;
        inner.timer_armed = true;
        let _ = self.timer.send(TimerCommand::Arm {
            generation: inner.timer_generation,
            after: self.settings.rearm_timeout,
        });
    }

    fn cancel_timer(&self, inner: &mut Inner) {
        inner.timer_generation += 1;
        if inner.timer_armed {
            inner.timer_armed = false;
            let _ = self.timer.send(TimerCommand::Cancel);
        }
    }

    fn notify_keyword_armed(&self, inner: &Inner, armed: bool) {
        tracing::info!(armed, "keyword detection armed");
        if let Some(keyword) = inner.keyword.clone() {
            let label = if armed { "keyword_arm" } else { "keyword_disarm" };
            self.offload.submit(label, move || {
                if armed {
                    keyword.arm();
                } else {
                    keyword.disarm();
                }
            });
        }
        let session = Arc::clone(&self.session);
        self.offload
            .submit("keyword_armed_notify", move || session.on_keyword_armed(armed));
    }
}

fn interrupt_assistant(session: &dyn RealtimeSession, playback: &dyn PlaybackControl) {
    tracing::info!("user started speaking while assistant is responding; interrupting");
    if let Err(err) = session.clear_input_audio_buffer() {
        tracing::debug!(error = %err, "clear_input_audio_buffer failed during interrupt");
    }
    if let Err(err) = session.cancel_response() {
        tracing::debug!(error = %err, "cancel_response failed during interrupt");
    }
    playback.drain_and_restart();
}

/// Single pending deadline; a new arm replaces it. Exits once the machine is
/// dropped, so it never holds up shutdown.
fn timer_loop(rx: &Receiver<TimerCommand>, machine: &Weak<ConversationStateMachine>) {
    let mut pending: Option<(u64, Instant)> = None;
    loop {
        let command = match pending {
            Some((_, deadline)) => rx.recv_deadline(deadline),
            None => rx.recv().map_err(|_| RecvTimeoutError::Disconnected),
        };
        match command {
            Ok(TimerCommand::Arm { generation, after }) => {
                pending = Some((generation, Instant::now() + after));
            }
            Ok(TimerCommand::Cancel) => pending = None,
            Err(RecvTimeoutError::Timeout) => {
                let Some((generation, _)) = pending.take() else {
                    continue;
                };
                match machine.upgrade() {
                    Some(machine) => machine.on_silence_timeout(generation),
                    None => break,
                }
            }
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
}
