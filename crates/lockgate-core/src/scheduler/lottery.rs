//! Lottery scheduling
//!
//! Each user holds `10 + priority * 5 + round(starvation_boost * 5)`
//! tickets, cached on first use. A uniform draw over the pool (every
//! queued request contributes its user's tickets) picks the winner.
//!
//! Starvation boosts multiply the cached count up to [`MAX_TICKETS`].
//! Once a boosted request is admitted its user falls back to the formula,
//! and a user with nothing left in the queue loses its cache entry.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashMap;

use super::types::QueuedRequest;

const BASE_TICKETS: u64 = 10;
const TICKETS_PER_PRIORITY: u64 = 5;
const TICKETS_PER_BOOST: f64 = 5.0;

/// Ceiling for a single user's ticket count
pub const MAX_TICKETS: u64 = 1 << 40;

/// Ticket-based random scheduler
#[derive(Debug)]
pub struct LotteryScheduler {
    requests: Vec<QueuedRequest>,
    user_tickets: HashMap<String, u64>,
    rng: StdRng,
}

impl LotteryScheduler {
    /// Create a scheduler; a seed makes draws reproducible
    pub fn new(seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        Self {
            requests: Vec::new(),
            user_tickets: HashMap::new(),
            rng,
        }
    }

    fn initial_tickets(request: &QueuedRequest) -> u64 {
        let tickets = BASE_TICKETS
            + u64::from(request.priority.level()) * TICKETS_PER_PRIORITY
            + (request.starvation_boost * TICKETS_PER_BOOST).round() as u64;
        tickets.min(MAX_TICKETS)
    }

    fn tickets_for(&mut self, request: &QueuedRequest) -> u64 {
        *self
            .user_tickets
            .entry(request.user().to_string())
            .or_insert_with(|| Self::initial_tickets(request))
    }

    pub fn push(&mut self, request: QueuedRequest) {
        self.requests.push(request);
    }

    pub fn pop_next(&mut self) -> Option<QueuedRequest> {
        if self.requests.is_empty() {
            return None;
        }

        let requests = std::mem::take(&mut self.requests);
        let tickets: Vec<u64> = requests.iter().map(|r| self.tickets_for(r)).collect();
        self.requests = requests;

        let total: u128 = tickets.iter().map(|&t| u128::from(t)).sum();
        let index = if total == 0 {
            0
        } else {
            let winning = self.rng.gen_range(0..total);
            let mut cumulative: u128 = 0;
            tickets
                .iter()
                .position(|&t| {
                    cumulative += u128::from(t);
                    cumulative > winning
                })
                .unwrap_or(0)
        };

        let selected = self.requests.remove(index);
        self.requests.iter_mut().for_each(|r| r.attempts += 1);

        if selected.starvation_boost > 1.0 || !self.has_queued(selected.user()) {
            self.user_tickets.remove(selected.user());
        }
        Some(selected)
    }

    fn has_queued(&self, user: &str) -> bool {
        self.requests.iter().any(|r| r.user() == user)
    }

    /// Multiply the owning user's tickets. Returns the new ticket count.
    pub fn boost(&mut self, request_id: &str, factor: f64) -> Option<u64> {
        let index = self.requests.iter().position(|r| r.id() == request_id)?;
        let request = self.requests[index].clone();

        let current = self.tickets_for(&request);
        let boosted = ((current as f64 * factor) as u64).min(MAX_TICKETS);
        self.user_tickets.insert(request.user().to_string(), boosted);
        self.requests[index].starvation_boost = factor;

        Some(boosted)
    }

    pub fn remove(&mut self, request_id: &str) -> Option<QueuedRequest> {
        let index = self.requests.iter().position(|r| r.id() == request_id)?;
        let removed = self.requests.remove(index);
        if !self.has_queued(removed.user()) {
            self.user_tickets.remove(removed.user());
        }
        Some(removed)
    }

    pub fn len(&self) -> usize {
        self.requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }

    pub fn requests(&self) -> Vec<QueuedRequest> {
        self.requests.clone()
    }

    /// Cached tickets for `user`
    pub fn tickets(&self, user: &str) -> Option<u64> {
        self.user_tickets.get(user).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::locking::{LockRequest, Priority, ResourceIdentifier};
    use tokio::time::Instant;

    fn queued(id: &str, user: &str, priority: Priority) -> QueuedRequest {
        let request = LockRequest::with_id(id, ResourceIdentifier::new("ns", "r", "ws"), user, priority);
        QueuedRequest::new(request, 1.0, Instant::now())
    }

    #[tokio::test]
    async fn test_ticket_formula() {
        let mut lottery = LotteryScheduler::new(Some(7));
        lottery.push(queued("a1", "alice", Priority::Low));
        lottery.push(queued("a2", "alice", Priority::Low));
        lottery.push(queued("b1", "bob", Priority::Critical));
        lottery.push(queued("b2", "bob", Priority::Critical));
        lottery.pop_next();

        // 10 + 0*5 + 5 and 10 + 3*5 + 5
        assert_eq!(lottery.tickets("alice"), Some(15));
        assert_eq!(lottery.tickets("bob"), Some(30));
    }

    #[tokio::test]
    async fn test_boost_computes_missing_cache_first() {
        let mut lottery = LotteryScheduler::new(Some(7));
        lottery.push(queued("a", "alice", Priority::Normal));

        assert_eq!(lottery.boost("a", 2.0), Some(40));
        assert_eq!(lottery.boost("a", 2.0), Some(80));
        assert_eq!(lottery.requests()[0].starvation_boost, 2.0);
        assert_eq!(lottery.boost("missing", 2.0), None);
    }

    #[tokio::test]
    async fn test_seeded_draws_are_reproducible() {
        let draw = |seed| {
            let mut lottery = LotteryScheduler::new(Some(seed));
            for i in 0..10 {
                lottery.push(queued(&format!("r{}", i), &format!("u{}", i), Priority::Normal));
            }
            (0..10)
                .map(|_| lottery.pop_next().unwrap().id().to_string())
                .collect::<Vec<_>>()
        };
        assert_eq!(draw(42), draw(42));
    }

    #[tokio::test]
    async fn test_zero_ticket_pool_falls_back_to_fifo() {
        let mut lottery = LotteryScheduler::new(Some(1));
        lottery.push(queued("first", "alice", Priority::Normal));
        lottery.push(queued("second", "bob", Priority::Normal));
        lottery.boost("first", 0.0);
        lottery.boost("second", 0.0);

        assert_eq!(lottery.pop_next().unwrap().id(), "first");
        assert_eq!(lottery.pop_next().unwrap().id(), "second");
        assert!(lottery.pop_next().is_none());
    }

    #[tokio::test]
    async fn test_boost_is_capped() {
        let mut lottery = LotteryScheduler::new(Some(5));
        for i in 0..64 {
            lottery.push(queued(&format!("r{}", i), &format!("u{}", i), Priority::Normal));
        }
        for _ in 0..100 {
            for i in 0..64 {
                lottery.boost(&format!("r{}", i), 10.0);
            }
        }

        assert_eq!(lottery.tickets("u0"), Some(MAX_TICKETS));
        assert_eq!(lottery.tickets("u63"), Some(MAX_TICKETS));
        for _ in 0..64 {
            assert!(lottery.pop_next().is_some());
        }
        assert!(lottery.is_empty());
    }

    #[tokio::test]
    async fn test_admitting_boosted_request_resets_tickets() {
        let mut lottery = LotteryScheduler::new(Some(9));
        lottery.push(queued("a1", "alice", Priority::Normal));
        lottery.push(queued("a2", "alice", Priority::Normal));
        lottery.push(queued("b1", "bob", Priority::Normal));
        assert_eq!(lottery.boost("a1", 2.0), Some(40));
        assert_eq!(lottery.boost("a2", 2.0), Some(80));
        // bob holds no tickets, so alice wins both draws
        assert_eq!(lottery.boost("b1", 0.0), Some(0));

        assert_eq!(lottery.pop_next().unwrap().user(), "alice");
        assert_eq!(lottery.tickets("alice"), None);
        assert_eq!(lottery.tickets("bob"), Some(0));

        assert_eq!(lottery.pop_next().unwrap().user(), "alice");
        assert_eq!(lottery.pop_next().unwrap().id(), "b1");
        assert_eq!(lottery.tickets("bob"), None);
    }

    #[tokio::test]
    async fn test_removing_last_request_evicts_user() {
        let mut lottery = LotteryScheduler::new(Some(2));
        lottery.push(queued("a1", "alice", Priority::Normal));
        lottery.push(queued("a2", "alice", Priority::Normal));
        assert_eq!(lottery.boost("a1", 1.0), Some(20));

        assert!(lottery.remove("a1").is_some());
        assert_eq!(lottery.tickets("alice"), Some(20));
        assert!(lottery.remove("a2").is_some());
        assert_eq!(lottery.tickets("alice"), None);
        assert!(lottery.remove("a2").is_none());
    }
}
