use std::collections::{HashSet, VecDeque};

use tracing::warn;
use url::Url;

use crate::error::RangeError;

/// One page of the ranking, keyed by the offset of its first entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PageRequest {
    pub offset: u32,
}

impl PageRequest {
    pub fn new(offset: u32) -> Self {
        Self { offset }
    }

    /// The listing URL for this page, e.g. `{base}?start=25&filter=`.
    pub fn url(&self, base: &Url) -> Url {
        let mut url = base.clone();
        url.set_query(Some(&format!("start={}&filter=", self.offset)));
        url
    }

    /// Recover a request from a listing URL. No `start` parameter means the first page.
    pub fn from_url(url: &Url) -> Option<Self> {
        match url.query_pairs().find(|(k, _)| k == "start") {
            Some((_, v)) => v.parse().ok().map(Self::new),
            None => Some(Self::new(0)),
        }
    }
}

/// The static, finite crawl range: offsets `0, page_size, .., (page_count - 1) * page_size`.
///
/// Fails when the last offset does not fit in a `u32`.
pub fn produce(page_count: u32, page_size: u32) -> Result<Vec<PageRequest>, RangeError> {
    (0..page_count)
        .map(|page| {
            page.checked_mul(page_size)
                .map(PageRequest::new)
                .ok_or(RangeError {
                    page_count,
                    page_size,
                })
        })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Offer {
    /// Already scheduled (static range or an earlier link).
    Known,
    /// New, and queued.
    Scheduled,
    /// New, but following is off or the page cap is reached.
    Ignored,
}

/// Work queue seeded from the static range. Discovered links are checked
/// against it and only ever added when following is on, up to `max_pages`.
pub struct Frontier {
    queue: VecDeque<PageRequest>,
    scheduled: HashSet<PageRequest>,
    uncovered: HashSet<PageRequest>,
    follow: bool,
    max_pages: usize,
    truncated: usize,
}

impl Frontier {
    pub fn new(requests: Vec<PageRequest>, max_pages: u32, follow: bool) -> Self {
        let max_pages = max_pages as usize;
        let mut seen = HashSet::new();
        let mut queue: VecDeque<PageRequest> =
            requests.into_iter().filter(|r| seen.insert(*r)).collect();
        let truncated = queue.len().saturating_sub(max_pages);
        if truncated > 0 {
            queue.truncate(max_pages);
            warn!(
                "max_pages {} cuts {} pages from the static range",
                max_pages, truncated
            );
        }
        let scheduled = queue.iter().copied().collect();
        Self {
            queue,
            scheduled,
            uncovered: HashSet::new(),
            follow,
            max_pages,
            truncated,
        }
    }

    pub fn next(&mut self) -> Option<PageRequest> {
        self.queue.pop_front()
    }

    pub fn offer(&mut self, link: PageRequest) -> Offer {
        if self.scheduled.contains(&link) {
            return Offer::Known;
        }
        self.uncovered.insert(link);
        if self.follow && self.scheduled.len() < self.max_pages {
            self.scheduled.insert(link);
            self.queue.push_back(link);
            Offer::Scheduled
        } else {
            Offer::Ignored
        }
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Pages handed out or waiting.
    pub fn scheduled(&self) -> usize {
        self.scheduled.len()
    }

    /// Static-range pages dropped by the `max_pages` cap.
    pub fn truncated(&self) -> usize {
        self.truncated
    }

    /// Distinct discovered pages the static range did not contain.
    pub fn uncovered(&self) -> usize {
        self.uncovered.len()
    }
}
