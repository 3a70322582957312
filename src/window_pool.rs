use crate::alignment_window::AlignmentWindow;
use crate::errors::{AppError, Result};
use crossbeam_channel::{bounded, Receiver, Sender};
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::debug;

pub const MAX_WINDOWS: usize = 24;

/// What `checkout` does once every existing window is in use.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PoolPolicy {
    /// Construct another window while fewer than `max_windows` exist, then block.
    #[default]
    Grow,
    /// Wait for a window to be returned.
    Block,
    /// Return `PoolExhausted`.
    Fail,
}

impl std::str::FromStr for PoolPolicy {
    type Err = AppError;

    fn from_str(value: &str) -> Result<Self> {
        match value.to_ascii_lowercase().as_str() {
            "grow" => Ok(Self::Grow),
            "block" => Ok(Self::Block),
            "fail" => Ok(Self::Fail),
            _ => Err(AppError::InvalidValue {
                flag: "--pool-policy".to_string(),
                value: value.to_string(),
                reason: "expected one of grow, block, fail".to_string(),
            }),
        }
    }
}

type Factory<W> = Box<dyn Fn() -> Result<W> + Send + Sync>;

/// Free-list of reusable windows shared by every worker.
pub struct WindowPool<W = AlignmentWindow> {
    sender: Sender<W>,
    receiver: Receiver<W>,
    factory: Factory<W>,
    created: AtomicUsize,
    max_windows: usize,
    policy: PoolPolicy,
}

impl<W> std::fmt::Debug for WindowPool<W> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WindowPool")
            .field("available", &self.available())
            .field("created", &self.created())
            .field("max_windows", &self.max_windows)
            .field("policy", &self.policy)
            .finish()
    }
}

impl<W: Send + 'static> WindowPool<W> {
    pub fn new<F>(initial: usize, max_windows: usize, policy: PoolPolicy, factory: F) -> Result<Self>
    where
        F: Fn() -> Result<W> + Send + Sync + 'static,
    {
        let max_windows = max_windows.max(1);
        if initial > max_windows {
            return Err(AppError::InvalidValue {
                flag: "--initial-windows".to_string(),
                value: initial.to_string(),
                reason: format!("exceeds the pool maximum of {max_windows}"),
            });
        }
        if initial == 0 && policy == PoolPolicy::Block {
            return Err(AppError::InvalidValue {
                flag: "--initial-windows".to_string(),
                value: initial.to_string(),
                reason: "a blocking pool needs at least one window".to_string(),
            });
        }

        let (sender, receiver) = bounded(max_windows);
        for _ in 0..initial {
            let window = factory()?;
            sender.try_send(window).map_err(|_| AppError::PoolExhausted { max: max_windows })?;
        }
        debug!(initial, max_windows, ?policy, "window pool ready");
        Ok(Self {
            sender,
            receiver,
            factory: Box::new(factory),
            created: AtomicUsize::new(initial),
            max_windows,
            policy,
        })
    }

    /// Takes a window out of the pool. The guard puts it back on drop.
    pub fn checkout(&self) -> Result<PooledWindow<W>> {
        // The pool owns a sender, so an error here only means empty.
        if let Ok(window) = self.receiver.try_recv() {
            return Ok(self.guard(window));
        }

        match self.policy {
            PoolPolicy::Fail => Err(AppError::PoolExhausted { max: self.max_windows }),
            PoolPolicy::Grow if self.reserve_slot() => match (self.factory)() {
                Ok(window) => {
                    debug!(created = self.created(), "window pool grew");
                    Ok(self.guard(window))
                }
                Err(error) => {
                    self.created.fetch_sub(1, Ordering::AcqRel);
                    Err(error)
                }
            },
            PoolPolicy::Grow | PoolPolicy::Block => self
                .receiver
                .recv()
                .map(|window| self.guard(window))
                .map_err(|_| AppError::PoolExhausted { max: self.max_windows }),
        }
    }

    fn reserve_slot(&self) -> bool {
        self.created
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |count| {
                (count < self.max_windows).then_some(count + 1)
            })
            .is_ok()
    }

    fn guard(&self, window: W) -> PooledWindow<W> {
        PooledWindow {
            window: Some(window),
            home: self.sender.clone(),
        }
    }
}

impl<W> WindowPool<W> {
    /// Windows currently idle in the pool.
    pub fn available(&self) -> usize {
        self.receiver.len()
    }

    /// Windows constructed so far, idle or checked out.
    pub fn created(&self) -> usize {
        self.created.load(Ordering::Acquire)
    }

    pub fn max_windows(&self) -> usize {
        self.max_windows
    }

    pub fn policy(&self) -> PoolPolicy {
        self.policy
    }
}

/// Exclusive use of one pooled window.
pub struct PooledWindow<W = AlignmentWindow> {
    window: Option<W>,
    home: Sender<W>,
}

impl<W> Deref for PooledWindow<W> {
    type Target = W;

    fn deref(&self) -> &W {
        match &self.window {
            Some(window) => window,
            None => unreachable!("pooled window used after return"),
        }
    }
}

impl<W> DerefMut for PooledWindow<W> {
    fn deref_mut(&mut self) -> &mut W {
        match &mut self.window {
            Some(window) => window,
            None => unreachable!("pooled window used after return"),
        }
    }
}

impl<W> Drop for PooledWindow<W> {
    fn drop(&mut self) {
        if let Some(window) = self.window.take() {
            // Capacity is max_windows so the send cannot be full; it fails only
            // when the pool itself is gone, and then the window just drops.
            if self.home.try_send(window).is_err() {
                debug!("window pool dropped before its window was returned");
            }
        }
    }
}
