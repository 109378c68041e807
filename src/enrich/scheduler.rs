// Bounded-concurrency dispatcher over a prioritised pool of description providers

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, OwnedSemaphorePermit, Semaphore};
use tracing::{debug, warn};

use super::provider::{DescriptionProvider, OpenAiCompatibleProvider};
use crate::config::SchedulerConfig;

/// A provider with its concurrency limit
pub struct ProviderSlot {
    name: String,
    provider: Arc<dyn DescriptionProvider>,
    limit: usize,
    permits: Arc<Semaphore>,
}

impl ProviderSlot {
    pub fn new(provider: Arc<dyn DescriptionProvider>, limit: usize) -> Self {
        Self {
            name: provider.name().to_string(),
            provider,
            limit,
            permits: Arc::new(Semaphore::new(limit)),
        }
    }

    fn in_flight(&self) -> usize {
        self.limit.saturating_sub(self.permits.available_permits())
    }
}

struct Task {
    prompt: String,
    max_tokens: u32,
    attempt: u32,
    reply: oneshot::Sender<Option<String>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderStats {
    pub name: String,
    pub limit: usize,
    pub in_flight: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerStats {
    pub queued: usize,
    pub providers: Vec<ProviderStats>,
}

struct SchedulerInner {
    providers: Vec<ProviderSlot>,
    queue: Mutex<VecDeque<Task>>,
    max_retries: u32,
    backoff_base: Duration,
}

impl SchedulerInner {
    /// Hand queued tasks to providers, highest priority first, while any has
    /// a free permit. Queue pops and permit acquisition share the queue lock.
    fn drain(self: &Arc<Self>) {
        let mut queue = self.queue.lock();
        for (index, slot) in self.providers.iter().enumerate() {
            while !queue.is_empty() {
                let Ok(permit) = Arc::clone(&slot.permits).try_acquire_owned() else {
                    break;
                };
                let Some(task) = queue.pop_front() else {
                    break;
                };
                let inner = Arc::clone(self);
                tokio::spawn(async move { inner.run(index, task, permit).await });
            }
            if queue.is_empty() {
                break;
            }
        }
    }

    async fn run(self: Arc<Self>, index: usize, mut task: Task, permit: OwnedSemaphorePermit) {
        let slot = &self.providers[index];
        let result = slot
            .provider
            .generate_description(&task.prompt, task.max_tokens)
            .await;
        drop(permit);

        let retry = match result {
            Ok(text) => {
                let _ = task.reply.send(text);
                None
            }
            Err(e) if e.is_retryable() && task.attempt < self.max_retries => {
                let delay = self
                    .backoff_base
                    .saturating_mul(2u32.saturating_pow(task.attempt));
                debug!(
                    "{} failed (attempt {}): {}; retrying in {:?}",
                    slot.name,
                    task.attempt + 1,
                    e,
                    delay
                );
                task.attempt += 1;
                Some((task, delay))
            }
            Err(e) => {
                if e.is_retryable() {
                    warn!("{}: giving up after {} retries: {}", slot.name, task.attempt, e);
                } else {
                    warn!("{}: request rejected: {}", slot.name, e);
                }
                let _ = task.reply.send(None);
                None
            }
        };

        // Capacity just freed
        self.drain();

        if let Some((task, delay)) = retry {
            tokio::time::sleep(delay).await;
            self.queue.lock().push_back(task);
            self.drain();
        }
    }
}

/// Shared dispatcher for description requests.
///
/// Providers are tried in the order given; a provider never runs more than its
/// limit of requests at once. Cloning shares the same pool and queue.
#[derive(Clone)]
pub struct TaskScheduler {
    inner: Arc<SchedulerInner>,
}

impl TaskScheduler {
    pub fn new(providers: Vec<ProviderSlot>, max_retries: u32, backoff_base: Duration) -> Self {
        Self {
            inner: Arc::new(SchedulerInner {
                providers,
                queue: Mutex::new(VecDeque::new()),
                max_retries,
                backoff_base,
            }),
        }
    }

    /// Build the provider pool described by the configuration
    pub fn from_config(config: &SchedulerConfig) -> anyhow::Result<Self> {
        let mut slots = Vec::with_capacity(config.providers.len());
        for provider in &config.providers {
            let client = OpenAiCompatibleProvider::from_config(provider)?;
            slots.push(ProviderSlot::new(Arc::new(client), provider.concurrency));
        }
        Ok(Self::new(
            slots,
            config.max_retries,
            Duration::from_millis(config.backoff_base_ms),
        ))
    }

    /// Queue a description request and wait for its outcome. Resolves to
    /// `None` when every attempt failed or no provider is configured.
    pub async fn submit(&self, prompt: String, max_tokens: u32) -> Option<String> {
        if self.inner.providers.is_empty() {
            return None;
        }

        let (reply, outcome) = oneshot::channel();
        self.inner.queue.lock().push_back(Task {
            prompt,
            max_tokens,
            attempt: 0,
            reply,
        });
        self.inner.drain();

        outcome.await.ok().flatten()
    }

    pub fn stats(&self) -> SchedulerStats {
        SchedulerStats {
            queued: self.inner.queue.lock().len(),
            providers: self
                .inner
                .providers
                .iter()
                .map(|slot| ProviderStats {
                    name: slot.name.clone(),
                    limit: slot.limit,
                    in_flight: slot.in_flight(),
                })
                .collect(),
        }
    }
}
