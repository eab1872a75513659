use serde::{Deserialize, Serialize};

/// Which list a paginator drives.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PageKey {
    Conversations,
    Messages(String),
    Saved,
}

/// Proof that a load was started; handed back on completion so results of
/// a load that was superseded by a reset are ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageTicket {
    pub page: u32,
    generation: u64,
}

/// Single-flight page tracker for one list.
#[derive(Debug, Clone)]
pub struct Paginator {
    page: u32,
    has_more: bool,
    in_flight: bool,
    page_size: u32,
    generation: u64,
}

impl Paginator {
    pub fn new(page_size: u32) -> Self {
        Self {
            page: 0,
            has_more: true,
            in_flight: false,
            page_size: page_size.max(1),
            generation: 0,
        }
    }

    /// Last page successfully loaded (0 before the first load).
    pub fn page(&self) -> u32 {
        self.page
    }

    pub fn has_more(&self) -> bool {
        self.has_more
    }

    pub fn in_flight(&self) -> bool {
        self.in_flight
    }

    pub fn page_size(&self) -> u32 {
        self.page_size
    }

    /// Start loading the next page. `None` while a load is outstanding or
    /// when the list is exhausted.
    pub fn begin(&mut self) -> Option<PageTicket> {
        if self.in_flight || !self.has_more {
            return None;
        }
        self.in_flight = true;
        Some(PageTicket {
            page: self.page + 1,
            generation: self.generation,
        })
    }

    /// Record a successful fetch of `fetched` items. Returns false if the
    /// ticket is stale and the result should be discarded.
    pub fn complete(&mut self, ticket: PageTicket, fetched: usize) -> bool {
        if ticket.generation != self.generation {
            return false;
        }
        self.in_flight = false;
        self.page = ticket.page;
        self.has_more = fetched >= self.page_size as usize;
        true
    }

    /// Record a failed fetch: page and `has_more` stay put so a retry asks
    /// for the same page.
    pub fn fail(&mut self, ticket: PageTicket) {
        if ticket.generation == self.generation {
            self.in_flight = false;
        }
    }

    /// Forget everything and start again from page 1. Outstanding tickets go stale.
    pub fn reset(&mut self) {
        self.generation += 1;
        self.page = 0;
        self.has_more = true;
        self.in_flight = false;
    }
}
