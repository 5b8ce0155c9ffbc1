//! Scroll-driven loading of the channel feed.
//!
//! The feed is virtualized and never reports a total, so "fully loaded" is a
//! fixed point: the sampled (message count, scroll height) pair stops
//! changing for long enough. The feed can stall briefly mid-load, which is
//! why full crawls jump to the top and back before trusting a plateau.

use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use serde::Deserialize;
use tracing::{debug, info};

use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScrollAnchor {
    /// Last message centred in the viewport.
    Center,
    /// Last message aligned to the viewport bottom.
    End,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScrollMetrics {
    pub message_count: usize,
    pub scroll_height: u64,
}

#[async_trait]
pub trait FeedSurface: Send + Sync {
    /// Scroll the newest loaded message into view and report the page extent.
    async fn advance(&self, anchor: ScrollAnchor) -> Result<ScrollMetrics>;
    async fn message_count(&self) -> Result<usize>;
    async fn jump_to_top(&self) -> Result<()>;
    async fn jump_to_bottom(&self) -> Result<()>;
}

// ── Policy ──

#[derive(Debug, Clone)]
pub struct Perturbation {
    /// Plateau at or above this many messages is suspicious.
    pub min_messages: usize,
    /// Stalled readings before a plateau is suspicious regardless of size.
    pub stalled_attempts: u32,
    pub top_pause: Duration,
    pub bottom_pause: Duration,
}

#[derive(Debug, Clone)]
pub struct ScrollPolicy {
    pub anchor: ScrollAnchor,
    pub stable_threshold: u32,
    pub max_attempts: u32,
    pub delay_min: Duration,
    pub delay_max: Duration,
    pub perturbation: Option<Perturbation>,
}

impl ScrollPolicy {
    pub fn full() -> Self {
        Self {
            anchor: ScrollAnchor::Center,
            stable_threshold: 20,
            max_attempts: 1000,
            delay_min: Duration::from_millis(2000),
            delay_max: Duration::from_millis(4000),
            perturbation: Some(Perturbation {
                min_messages: 20,
                stalled_attempts: 8,
                top_pause: Duration::from_millis(1500),
                bottom_pause: Duration::from_millis(3000),
            }),
        }
    }

    pub fn incremental() -> Self {
        Self {
            anchor: ScrollAnchor::End,
            stable_threshold: 5,
            max_attempts: 200,
            delay_min: Duration::from_millis(2000),
            delay_max: Duration::from_millis(3000),
            perturbation: None,
        }
    }

    fn step_delay(&self) -> Duration {
        let lo = self.delay_min.as_millis() as u64;
        let hi = (self.delay_max.as_millis() as u64).max(lo);
        Duration::from_millis(rand::rng().random_range(lo..=hi))
    }
}

// ── State machine ──

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortReason {
    Limit,
    Cap,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadState {
    Scrolling,
    Verifying { stable: u32 },
    Perturbing,
    Converged,
    Aborted(AbortReason),
}

impl LoadState {
    pub fn is_terminal(self) -> bool {
        matches!(self, LoadState::Converged | LoadState::Aborted(_))
    }
}

#[derive(Debug)]
pub struct Convergence {
    policy: ScrollPolicy,
    limit: usize,
    state: LoadState,
    attempts: u32,
    stable: u32,
    stalled: u32,
    last_count: usize,
    last_height: u64,
}

impl Convergence {
    pub fn new(policy: ScrollPolicy, limit: usize) -> Self {
        Self {
            policy,
            limit,
            state: LoadState::Scrolling,
            attempts: 0,
            stable: 0,
            stalled: 0,
            last_count: 0,
            last_height: 0,
        }
    }

    pub fn state(&self) -> LoadState {
        self.state
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn messages(&self) -> usize {
        self.last_count
    }

    /// Feed one scroll sample; returns the state to act on next.
    pub fn observe(&mut self, count: usize, height: u64) -> LoadState {
        let state = if count == self.last_count && height == self.last_height {
            self.stable += 1;
            self.stalled += 1;
            let suspicious = self.policy.perturbation.as_ref().is_some_and(|p| {
                count >= p.min_messages || self.stalled >= p.stalled_attempts
            });
            if suspicious {
                LoadState::Perturbing
            } else if self.stable >= self.policy.stable_threshold {
                info!("Stable at {} messages after {} attempts", count, self.stable);
                LoadState::Converged
            } else {
                LoadState::Verifying { stable: self.stable }
            }
        } else {
            if count > self.last_count {
                debug!("Loaded {} messages (+{})", count, count - self.last_count);
            }
            self.stable = 0;
            self.stalled = 0;
            LoadState::Scrolling
        };

        self.last_count = count;
        self.last_height = height;
        self.attempts += 1;
        self.state = self.bounded(state);
        self.state
    }

    /// Result of the top/bottom jump. No growth means the plateau was real.
    pub fn after_perturbation(&mut self, count: usize) -> LoadState {
        let state = if count <= self.last_count {
            info!("Final count: {} messages (no more to load)", count);
            LoadState::Converged
        } else {
            debug!("Perturbation unstuck the feed: {} -> {}", self.last_count, count);
            self.stable = 0;
            self.stalled = 0;
            LoadState::Scrolling
        };
        self.state = self.bounded(state);
        self.state
    }

    fn bounded(&self, state: LoadState) -> LoadState {
        if state.is_terminal() || state == LoadState::Perturbing {
            return state;
        }
        if self.last_count >= self.limit {
            info!("Reached limit of {} messages", self.limit);
            LoadState::Aborted(AbortReason::Limit)
        } else if self.attempts >= self.policy.max_attempts {
            info!("Gave up after {} scroll attempts", self.attempts);
            LoadState::Aborted(AbortReason::Cap)
        } else {
            state
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct LoadReport {
    pub state: LoadState,
    pub attempts: u32,
    pub messages: usize,
}

/// Drive the surface until the feed converges or a bound trips.
pub async fn load_feed<S: FeedSurface + ?Sized>(
    surface: &S,
    policy: ScrollPolicy,
    limit: usize,
) -> Result<LoadReport> {
    let mut conv = Convergence::new(policy.clone(), limit);

    while !conv.state().is_terminal() {
        let metrics = surface.advance(policy.anchor).await?;
        debug!(
            "Scrolled: {} messages rendered, height {}",
            metrics.message_count, metrics.scroll_height
        );
        tokio::time::sleep(policy.step_delay()).await;
        let count = surface.message_count().await?;

        let mut state = conv.observe(count, metrics.scroll_height);
        if state == LoadState::Perturbing {
            if let Some(p) = &policy.perturbation {
                info!("Plateau at {} messages, jumping to top and back", count);
                surface.jump_to_top().await?;
                tokio::time::sleep(p.top_pause).await;
                surface.jump_to_bottom().await?;
                tokio::time::sleep(p.bottom_pause).await;
                let after = surface.message_count().await?;
                state = conv.after_perturbation(after);
            }
        }

        if conv.attempts() % 30 == 0 && !state.is_terminal() {
            info!(
                "Progress: {} scroll attempts, {} messages loaded",
                conv.attempts(),
                conv.messages()
            );
        }
    }

    info!(
        "Finished scrolling: {:?}, {} messages after {} attempts",
        conv.state(),
        conv.messages(),
        conv.attempts()
    );
    Ok(LoadReport {
        state: conv.state(),
        attempts: conv.attempts(),
        messages: conv.messages(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Scripted feed: each advance reveals the next count; the last one repeats.
    struct ScriptedFeed {
        counts: Mutex<VecDeque<usize>>,
        current: Mutex<usize>,
        bottom_bumps: Mutex<VecDeque<usize>>,
        jumps: Mutex<u32>,
    }

    impl ScriptedFeed {
        fn new(counts: &[usize], bottom_bumps: &[usize]) -> Self {
            Self {
                counts: Mutex::new(counts.iter().copied().collect()),
                current: Mutex::new(0),
                bottom_bumps: Mutex::new(bottom_bumps.iter().copied().collect()),
                jumps: Mutex::new(0),
            }
        }
    }

    #[async_trait]
    impl FeedSurface for ScriptedFeed {
        async fn advance(&self, _anchor: ScrollAnchor) -> Result<ScrollMetrics> {
            let mut current = self.current.lock().unwrap();
            if let Some(next) = self.counts.lock().unwrap().pop_front() {
                *current = next;
            }
            Ok(ScrollMetrics {
                message_count: *current,
                scroll_height: *current as u64 * 120,
            })
        }

        async fn message_count(&self) -> Result<usize> {
            Ok(*self.current.lock().unwrap())
        }

        async fn jump_to_top(&self) -> Result<()> {
            *self.jumps.lock().unwrap() += 1;
            Ok(())
        }

        async fn jump_to_bottom(&self) -> Result<()> {
            if let Some(bump) = self.bottom_bumps.lock().unwrap().pop_front() {
                let mut current = self.current.lock().unwrap();
                *current += bump;
                // Later advances continue from the bumped count.
                let mut counts = self.counts.lock().unwrap();
                for c in counts.iter_mut() {
                    *c += bump;
                }
            }
            Ok(())
        }
    }

    fn quick(mut policy: ScrollPolicy) -> ScrollPolicy {
        policy.delay_min = Duration::ZERO;
        policy.delay_max = Duration::ZERO;
        if let Some(p) = policy.perturbation.as_mut() {
            p.top_pause = Duration::ZERO;
            p.bottom_pause = Duration::ZERO;
        }
        policy
    }

    #[tokio::test]
    async fn incremental_converges_after_five_stable_readings() {
        let feed = ScriptedFeed::new(&[20, 40], &[]);
        let report = load_feed(&feed, quick(ScrollPolicy::incremental()), 500).await.unwrap();
        assert_eq!(report.state, LoadState::Converged);
        assert_eq!(report.attempts, 7);
        assert_eq!(report.messages, 40);
    }

    #[tokio::test]
    async fn stops_at_limit() {
        let feed = ScriptedFeed::new(&[20, 40, 60, 80], &[]);
        let report = load_feed(&feed, quick(ScrollPolicy::incremental()), 50).await.unwrap();
        assert_eq!(report.state, LoadState::Aborted(AbortReason::Limit));
        assert_eq!(report.messages, 60);
    }

    #[tokio::test]
    async fn aborts_at_cap() {
        let counts: Vec<usize> = (1..=400).map(|i| i * 2).collect();
        let feed = ScriptedFeed::new(&counts, &[]);
        let report = load_feed(&feed, quick(ScrollPolicy::incremental()), 10_000).await.unwrap();
        assert_eq!(report.state, LoadState::Aborted(AbortReason::Cap));
        assert_eq!(report.attempts, 200);
    }

    #[tokio::test]
    async fn full_mode_perturbs_until_nothing_new() {
        // Plateau at 25, the jump reveals 15 more, then the second plateau is real.
        let feed = ScriptedFeed::new(&[10, 25, 25, 40, 40], &[15]);
        let report = load_feed(&feed, quick(ScrollPolicy::full()), 10_000).await.unwrap();
        assert_eq!(report.state, LoadState::Converged);
        assert_eq!(report.messages, 55);
        assert_eq!(*feed.jumps.lock().unwrap(), 2);
    }

    #[tokio::test]
    async fn full_mode_small_feed_perturbs_after_eight_stalls() {
        let feed = ScriptedFeed::new(&[5], &[]);
        let report = load_feed(&feed, quick(ScrollPolicy::full()), 10_000).await.unwrap();
        assert_eq!(report.state, LoadState::Converged);
        // One progress reading, then eight stalled ones before the jump.
        assert_eq!(report.attempts, 9);
        assert_eq!(*feed.jumps.lock().unwrap(), 1);
    }

    #[test]
    fn verifying_counts_up() {
        let mut conv = Convergence::new(ScrollPolicy::incremental(), 100);
        assert_eq!(conv.observe(10, 1000), LoadState::Scrolling);
        assert_eq!(conv.observe(10, 1000), LoadState::Verifying { stable: 1 });
        assert_eq!(conv.observe(10, 1200), LoadState::Scrolling);
        assert_eq!(conv.observe(10, 1200), LoadState::Verifying { stable: 1 });
    }
}
