// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Lifecycle Controller
//!
//! One [`Lifecycle`] per process holds the running state observed by every
//! delivery session it is injected into. State changes come from OS signals
//! (or from code calling [`Lifecycle::interrupt`], [`Lifecycle::pause`] and
//! [`Lifecycle::resume`]) and are cooperative: a session only looks at the
//! state between deliveries, so an in-flight callback always runs to completion.
//!
//! ```text
//!          start              interrupt             loop exit
//!   Idle ---------> Running -----------> Interrupted ---------> Idle
//!    |               |   ^                    ^
//!    |         pause |   | resume             |
//!    |               v   |                    |
//!    |              Paused                    |
//!    +----------------------------------------+
//!                    interrupt
//! ```
//!
//! An interrupt is remembered until the next resume, so a session that starts
//! its loop after it returns immediately.

use crate::errors::AmqpError;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use tokio::{sync::watch, task::JoinHandle};
use tracing::{debug, info};

static SIGNALS_REGISTERED: AtomicBool = AtomicBool::new(false);

/// Lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Idle,
    Running,
    Interrupted,
    Paused,
}

/// What a pause request does.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PausePolicy {
    /// Pause stops the receive loop exactly like an interrupt.
    #[default]
    SameAsInterrupt,
    /// Pause lets the current callback finish, then holds the loop inside
    /// `run()` until a resume (keep consuming) or an interrupt (exit).
    Drain,
}

/// Decision taken by a session at an iteration boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Turn {
    Proceed,
    Stop,
}

/// State shared through the watch channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Status {
    state: LifecycleState,
    /// Set by an interrupt, cleared only by a resume
    stop_pending: bool,
}

/// Shared running state, injected into each delivery session.
///
/// An interrupt stays pending until [`Lifecycle::resume`]: a session entering
/// its loop afterwards, whether it was still subscribing or idle between runs,
/// returns right away.
#[derive(Debug, Clone)]
pub struct Lifecycle {
    status: Arc<watch::Sender<Status>>,
    pause_policy: PausePolicy,
}

impl Default for Lifecycle {
    fn default() -> Self {
        Lifecycle::new(PausePolicy::default())
    }
}

impl Lifecycle {
    pub fn new(pause_policy: PausePolicy) -> Self {
        let (status, _) = watch::channel(Status {
            state: LifecycleState::Idle,
            stop_pending: false,
        });
        Lifecycle {
            status: Arc::new(status),
            pause_policy,
        }
    }

    pub fn state(&self) -> LifecycleState {
        self.status.borrow().state
    }

    pub fn pause_policy(&self) -> PausePolicy {
        self.pause_policy
    }

    pub fn is_running(&self) -> bool {
        self.state() == LifecycleState::Running
    }

    /// True between an interrupt and the next resume.
    pub fn is_stop_pending(&self) -> bool {
        self.status.borrow().stop_pending
    }

    /// Asks every session to stop after its current delivery.
    ///
    /// Sessions that are not looping yet see the request when they start.
    pub fn interrupt(&self) {
        self.transition(|status| {
            status.stop_pending = true;
            status.state = LifecycleState::Interrupted;
        });
    }

    /// Pauses running sessions, according to the pause policy.
    pub fn pause(&self) {
        self.transition(|status| {
            if status.state != LifecycleState::Running {
                return;
            }
            match self.pause_policy {
                PausePolicy::SameAsInterrupt => {
                    status.stop_pending = true;
                    status.state = LifecycleState::Interrupted;
                }
                PausePolicy::Drain => status.state = LifecycleState::Paused,
            }
        });
    }

    /// Clears any pending interrupt and sets the state back to running.
    ///
    /// A paused loop carries on. A loop that already exited is not restarted
    /// by this call: its owner re-enters it by calling `run()` again.
    pub fn resume(&self) {
        self.transition(|status| {
            status.stop_pending = false;
            status.state = LifecycleState::Running;
        });
    }

    /// Called when a session enters its loop. Returns false when an interrupt
    /// is pending.
    pub(crate) fn start(&self) -> bool {
        let mut started = false;
        self.transition(|status| {
            if status.stop_pending {
                return;
            }
            if status.state == LifecycleState::Idle {
                status.state = LifecycleState::Running;
            }
            started = true;
        });
        started
    }

    /// Called when a session leaves its loop. The pending interrupt, if any,
    /// is kept for the sessions that have not seen it yet.
    pub(crate) fn settle(&self) {
        self.transition(|status| {
            if status.state == LifecycleState::Interrupted {
                status.state = LifecycleState::Idle;
            }
        });
    }

    /// Waits at an iteration boundary while paused, then tells whether the
    /// loop goes on.
    pub(crate) async fn next_turn(&self) -> Turn {
        let mut rx = self.status.subscribe();
        let status = match rx.wait_for(|s| s.state != LifecycleState::Paused).await {
            Ok(status) => *status,
            Err(_) => return Turn::Stop,
        };

        if status.state == LifecycleState::Running && !status.stop_pending {
            Turn::Proceed
        } else {
            Turn::Stop
        }
    }

    /// Resolves once the state leaves `Running`.
    pub(crate) async fn stopped(&self) {
        let mut rx = self.status.subscribe();
        let _ = rx.wait_for(|s| s.state != LifecycleState::Running).await;
    }

    fn transition<F>(&self, f: F)
    where
        F: FnOnce(&mut Status),
    {
        self.status.send_if_modified(|status| {
            let before = *status;
            f(status);
            if *status == before {
                return false;
            }
            debug!(
                from = ?before.state,
                to = ?status.state,
                stop_pending = status.stop_pending,
                "lifecycle transition"
            );
            true
        });
    }

    /// Subscribes this lifecycle to the process signals.
    ///
    /// SIGINT and SIGTERM interrupt, SIGHUP resumes and SIGUSR1 pauses. Only
    /// one lifecycle per process may register.
    ///
    /// # Errors
    /// * `CapabilityError` - no tokio runtime, non unix platform, or the OS
    ///   refused the subscription
    /// * `ConfigurationError` - signal handlers were already registered
    pub fn register_signal_handlers(&self) -> Result<JoinHandle<()>, AmqpError> {
        let handle = tokio::runtime::Handle::try_current().map_err(|_| {
            AmqpError::CapabilityError("signal handling needs a tokio runtime".to_owned())
        })?;

        if SIGNALS_REGISTERED.swap(true, Ordering::SeqCst) {
            return Err(AmqpError::config(
                "signal handlers are already registered for this process",
            ));
        }

        match self.spawn_signal_listener(&handle) {
            Ok(task) => Ok(task),
            Err(err) => {
                SIGNALS_REGISTERED.store(false, Ordering::SeqCst);
                Err(err)
            }
        }
    }

    #[cfg(unix)]
    fn spawn_signal_listener(
        &self,
        handle: &tokio::runtime::Handle,
    ) -> Result<JoinHandle<()>, AmqpError> {
        use tokio::signal::unix::{signal, SignalKind};

        // signal() needs the runtime context to reach the driver
        let _guard = handle.enter();

        let listen = |kind: SignalKind, name: &str| {
            signal(kind).map_err(|err| {
                AmqpError::CapabilityError(format!("cannot subscribe to {name}: {err}"))
            })
        };

        let mut sigint = listen(SignalKind::interrupt(), "SIGINT")?;
        let mut sigterm = listen(SignalKind::terminate(), "SIGTERM")?;
        let mut sighup = listen(SignalKind::hangup(), "SIGHUP")?;
        let mut sigusr1 = listen(SignalKind::user_defined1(), "SIGUSR1")?;

        let lifecycle = self.clone();

        Ok(handle.spawn(async move {
            loop {
                tokio::select! {
                    Some(_) = sigint.recv() => {
                        info!("received SIGINT, stopping after the current delivery");
                        lifecycle.interrupt();
                    }
                    Some(_) = sigterm.recv() => {
                        info!("received SIGTERM, stopping after the current delivery");
                        lifecycle.interrupt();
                    }
                    Some(_) = sighup.recv() => {
                        info!("received SIGHUP, resuming");
                        lifecycle.resume();
                    }
                    Some(_) = sigusr1.recv() => {
                        info!("received SIGUSR1, pausing");
                        lifecycle.pause();
                    }
                    else => break,
                }
            }
        }))
    }

    #[cfg(not(unix))]
    fn spawn_signal_listener(
        &self,
        _handle: &tokio::runtime::Handle,
    ) -> Result<JoinHandle<()>, AmqpError> {
        Err(AmqpError::CapabilityError(
            "interrupt, pause and resume signals need a unix platform".to_owned(),
        ))
    }
}
