//! Reader selection policies
use rand::Rng;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::config::ReaderSelection;
use crate::core::HostSpec;

/// Reader selection trait
pub trait HostSelector: Send + Sync {
    fn name(&self) -> &'static str;

    /// Pick the index of a host among the candidates
    fn select(&self, hosts: &[HostSpec]) -> Option<usize>;
}

/// Uniformly random selection
#[derive(Debug, Default)]
pub struct RandomHostSelector;

impl HostSelector for RandomHostSelector {
    fn name(&self) -> &'static str {
        "random"
    }

    fn select(&self, hosts: &[HostSpec]) -> Option<usize> {
        if hosts.is_empty() {
            return None;
        }

        Some(rand::thread_rng().gen_range(0..hosts.len()))
    }
}

/// Round-robin selection
#[derive(Debug, Default)]
pub struct RoundRobinHostSelector {
    counter: AtomicUsize,
}

impl RoundRobinHostSelector {
    pub fn new() -> Self {
        Self {
            counter: AtomicUsize::new(0),
        }
    }
}

impl HostSelector for RoundRobinHostSelector {
    fn name(&self) -> &'static str {
        "round_robin"
    }

    fn select(&self, hosts: &[HostSpec]) -> Option<usize> {
        if hosts.is_empty() {
            return None;
        }

        let index = self.counter.fetch_add(1, Ordering::Relaxed) % hosts.len();
        Some(index)
    }
}

pub fn selector_for(strategy: ReaderSelection) -> Arc<dyn HostSelector> {
    match strategy {
        ReaderSelection::Random => Arc::new(RandomHostSelector),
        ReaderSelection::RoundRobin => Arc::new(RoundRobinHostSelector::new()),
    }
}
