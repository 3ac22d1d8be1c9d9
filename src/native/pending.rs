//! Bounded table of outstanding frame requests.
//!
//! Ids are handed out sequentially (wrapping). Completion removes exactly the
//! completed id, so requests may be answered in any order. When the table is
//! full the oldest request is dropped to make room.

use std::collections::{HashMap, VecDeque};

/// Result of issuing a new request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IssuedRequest {
    pub request_id: u32,
    pub timestamp_ms: i64,
    /// Id of the request dropped to make room, if any
    pub evicted: Option<u32>,
}

pub struct PendingRequests {
    /// request id -> issue timestamp
    by_id: HashMap<u32, i64>,
    /// Issue order of the outstanding ids; same set as `by_id`
    order: VecDeque<u32>,
    next_request_id: u32,
    capacity: usize,
}

impl PendingRequests {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            by_id: HashMap::with_capacity(capacity),
            order: VecDeque::with_capacity(capacity),
            next_request_id: 0,
            capacity,
        }
    }

    /// Record a new request made at `timestamp_ms`.
    pub fn issue(&mut self, timestamp_ms: i64) -> IssuedRequest {
        let evicted = if self.by_id.len() >= self.capacity {
            self.evict_oldest()
        } else {
            None
        };

        // Skip ids still outstanding after a wrap
        let mut request_id = self.next_request_id;
        while self.by_id.contains_key(&request_id) {
            request_id = request_id.wrapping_add(1);
        }
        self.next_request_id = request_id.wrapping_add(1);

        self.by_id.insert(request_id, timestamp_ms);
        self.order.push_back(request_id);

        IssuedRequest {
            request_id,
            timestamp_ms,
            evicted,
        }
    }

    /// Take a pending request, returning its original timestamp.
    /// `None` for unknown, already completed or evicted ids.
    pub fn complete(&mut self, request_id: u32) -> Option<i64> {
        let timestamp = self.by_id.remove(&request_id)?;
        // At most `capacity` entries, so a linear scan is fine
        if let Some(index) = self.order.iter().position(|&id| id == request_id) {
            self.order.remove(index);
        }
        Some(timestamp)
    }

    /// Drop every pending request (abandoned).
    pub fn clear(&mut self) -> usize {
        let abandoned = self.by_id.len();
        self.by_id.clear();
        self.order.clear();
        abandoned
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    fn evict_oldest(&mut self) -> Option<u32> {
        let id = self.order.pop_front()?;
        self.by_id.remove(&id);
        Some(id)
    }
}
