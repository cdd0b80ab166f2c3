//! Client-facing queues shared between client threads and the stepping thread.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use log::{debug, warn};

use crate::config::SpiConfig;
use crate::spi::command::{SpiCommand, SpiResult};
use crate::BridgeError;

#[derive(Debug)]
struct Channel<T> {
    queue: Mutex<VecDeque<T>>,
    ready: Condvar,
}

impl<T> Default for Channel<T> {
    fn default() -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            ready: Condvar::new(),
        }
    }
}

impl<T> Channel<T> {
    // Queue contents stay consistent across a panicking holder: every
    // critical section is a single push, pop or clear.
    fn lock(&self) -> MutexGuard<'_, VecDeque<T>> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn try_pop(&self) -> Option<T> {
        self.lock().pop_front()
    }

    fn pop_blocking(&self) -> T {
        let mut queue = self.lock();
        loop {
            if let Some(item) = queue.pop_front() {
                return item;
            }
            queue = self
                .ready
                .wait(queue)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    fn pop_timeout(&self, timeout: Duration) -> Option<T> {
        let deadline = Instant::now() + timeout;
        let mut queue = self.lock();
        loop {
            if let Some(item) = queue.pop_front() {
                return Some(item);
            }
            let remaining = deadline.checked_duration_since(Instant::now())?;
            queue = self
                .ready
                .wait_timeout(queue, remaining)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }
}

/// Completion of one serial command: its result record and, for bulk
/// reads, the bytes shifted in.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SpiReply {
    /// Result record.
    pub result: SpiResult,
    /// Bulk-read payload; empty for every other command.
    pub payload: Vec<u8>,
}

/// Session object owning the submission, result and bulk-payload queues.
///
/// Share it between client threads and the stepping thread through an
/// `Arc`. Clients only ever submit and wait; the serial state machine on
/// the stepping thread is the only consumer of submissions and the only
/// producer of results.
#[derive(Debug, Default)]
pub struct SpiBridge {
    config: SpiConfig,
    submissions: Channel<(u64, SpiCommand)>,
    results: Channel<SpiResult>,
    payloads: Channel<Vec<u8>>,
    epoch: AtomicU64,
}

impl SpiBridge {
    /// Creates a session with empty queues.
    #[must_use]
    pub fn new(config: SpiConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    /// Configuration shared with the state machine.
    #[must_use]
    pub const fn config(&self) -> &SpiConfig {
        &self.config
    }

    /// Number of resets performed on this session.
    #[must_use]
    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::Acquire)
    }

    /// Commands submitted but not yet picked up by the state machine.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.submissions.lock().len()
    }

    /// Queues a command for the stepping thread.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::InvalidBeatStream`] for a packed write whose
    /// payload is not a whole number of beats.
    pub fn submit(&self, command: SpiCommand) -> Result<(), BridgeError> {
        command.validate()?;
        let mut queue = self.submissions.lock();
        debug!("spi submit {command:?}");
        queue.push_back((self.epoch(), command));
        drop(queue);
        self.submissions.ready.notify_one();
        Ok(())
    }

    /// Blocks until the next result is available and removes it.
    #[must_use]
    pub fn wait_result(&self) -> SpiResult {
        self.results.pop_blocking()
    }

    /// Like [`Self::wait_result`], giving up after `timeout`.
    #[must_use]
    pub fn wait_result_timeout(&self, timeout: Duration) -> Option<SpiResult> {
        self.results.pop_timeout(timeout)
    }

    /// Waits for the next result by checking the queue every
    /// [`SpiConfig::poll_interval`] instead of parking on the condition
    /// variable.
    #[must_use]
    pub fn wait_result_polling(&self) -> SpiResult {
        loop {
            if let Some(result) = self.results.try_pop() {
                return result;
            }
            thread::sleep(self.config.poll_interval);
        }
    }

    /// Removes the next result if one is ready.
    ///
    /// Lets a thread that steps the clock itself collect completions.
    #[must_use]
    pub fn try_result(&self) -> Option<SpiResult> {
        self.results.try_pop()
    }

    /// Removes the next bulk-read payload if one is ready.
    #[must_use]
    pub fn try_bulk(&self) -> Option<Vec<u8>> {
        self.payloads.try_pop()
    }

    /// Blocks until the next bulk-read payload is available and removes it.
    #[must_use]
    pub fn wait_bulk(&self) -> Vec<u8> {
        self.payloads.pop_blocking()
    }

    /// Submits `command` and blocks until it completes.
    ///
    /// # Errors
    ///
    /// Propagates submission errors from [`Self::submit`].
    pub fn transact(&self, command: SpiCommand) -> Result<SpiReply, BridgeError> {
        let returns_payload = command.returns_payload();
        self.submit(command)?;
        let result = self.wait_result();
        let payload = if returns_payload {
            self.wait_bulk()
        } else {
            Vec::new()
        };
        Ok(SpiReply { result, payload })
    }

    /// Discards every queued submission, result and payload.
    ///
    /// The state machine abandons its in-flight command on its next
    /// invocation and never reports it. No client may be blocked waiting
    /// across a reset.
    pub fn reset(&self) {
        let mut submissions = self.submissions.lock();
        let mut results = self.results.lock();
        let mut payloads = self.payloads.lock();
        let epoch = self.epoch.fetch_add(1, Ordering::AcqRel) + 1;
        debug!(
            "spi reset epoch={epoch} dropped submissions={} results={} payloads={}",
            submissions.len(),
            results.len(),
            payloads.len()
        );
        submissions.clear();
        results.clear();
        payloads.clear();
    }

    /// Dequeues the next command with the epoch it was submitted in.
    pub(crate) fn next_command(&self) -> Option<(u64, SpiCommand)> {
        self.submissions.try_pop()
    }

    /// Publishes a completion unless a reset happened since its command was
    /// submitted. Returns whether it was delivered.
    pub(crate) fn complete(&self, epoch: u64, result: SpiResult, payload: Option<Vec<u8>>) -> bool {
        let mut results = self.results.lock();
        let mut payloads = self.payloads.lock();
        if epoch != self.epoch() {
            warn!("dropping result {result:?} from before reset");
            return false;
        }
        if let Some(payload) = payload {
            payloads.push_back(payload);
        }
        results.push_back(result);
        drop(payloads);
        drop(results);
        self.payloads.ready.notify_all();
        self.results.ready.notify_all();
        true
    }
}
