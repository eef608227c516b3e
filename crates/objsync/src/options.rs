use std::time::Duration;

/// What a thread does after the bounded spin on a contended light lock
/// runs out.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum ContentionPolicy {
    /// Suspend the owning thread through the safepoint collaborator and
    /// inflate the lock on its behalf. Best latency for short critical
    /// sections; requires a working [`ThreadSuspender`](crate::threads::ThreadSuspender).
    SuspendAndInflate,
    /// Sleep briefly, then inflate the lock the next time it is observed
    /// unlocked. Never suspends a peer thread.
    SleepRetry,
}

/// Tunables for the monitor subsystem. Defaults follow the contention
/// constants the subsystem was measured with.
#[derive(Clone, Debug)]
pub struct Options {
    pub contention_policy: ContentionPolicy,
    /// Spin iterations on a contended light lock before escalating.
    pub spin_limit: u32,
    /// Spin iteration past which each retry yields the processor.
    pub yield_threshold: u32,
    /// Sleep quantum for the [`ContentionPolicy::SleepRetry`] policy.
    pub sleep_quantum: Duration,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            contention_policy: ContentionPolicy::SuspendAndInflate,
            spin_limit: 100,
            yield_threshold: 50,
            sleep_quantum: Duration::from_millis(10),
        }
    }
}

impl Options {
    /// Build options from `OBJSYNC_*` environment variables, falling back
    /// to defaults for anything unset or unparsable.
    pub fn from_env() -> Self {
        let mut options = Self::default();

        if let Ok(policy) = std::env::var("OBJSYNC_CONTENTION") {
            match policy.to_lowercase().as_str() {
                "suspend" | "suspend-and-inflate" => {
                    options.contention_policy = ContentionPolicy::SuspendAndInflate
                }
                "sleep" | "sleep-retry" => options.contention_policy = ContentionPolicy::SleepRetry,
                other => log::error!("unknown contention policy {other:?}, keeping default"),
            }
        }

        if let Some(limit) = env_u32("OBJSYNC_SPIN_LIMIT") {
            options.spin_limit = limit;
        }

        if let Some(threshold) = env_u32("OBJSYNC_YIELD_THRESHOLD") {
            options.yield_threshold = threshold;
        }

        if let Some(millis) = env_u32("OBJSYNC_SLEEP_MILLIS") {
            options.sleep_quantum = Duration::from_millis(millis as u64);
        }

        options
    }
}

fn env_u32(name: &str) -> Option<u32> {
    let value = std::env::var(name).ok()?;
    match value.parse() {
        Ok(parsed) => Some(parsed),
        Err(_) => {
            log::error!("ignoring unparsable {name}={value:?}");
            None
        }
    }
}
