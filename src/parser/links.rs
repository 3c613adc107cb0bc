use std::collections::HashSet;
use std::sync::LazyLock;

use scraper::{Html, Selector};
use tracing::debug;
use url::Url;

use crate::pages::PageRequest;

static PAGINATOR_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("div.paginator > a").unwrap());

/// Pagination links on the page, resolved against `page_url`, deduplicated, in page order.
pub fn extract(doc: &Html, page_url: &Url) -> Vec<PageRequest> {
    let mut seen = HashSet::new();
    let mut requests = Vec::new();

    for anchor in doc.select(&PAGINATOR_SEL) {
        let Some(href) = anchor.value().attr("href") else {
            continue;
        };
        let resolved = match page_url.join(href) {
            Ok(u) => u,
            Err(e) => {
                debug!("Skipping pagination href {:?}: {}", href, e);
                continue;
            }
        };
        // Anything pointing off the listing path is not a page of this ranking.
        if resolved.host_str() != page_url.host_str() || resolved.path() != page_url.path() {
            continue;
        }
        if let Some(req) = PageRequest::from_url(&resolved) {
            if seen.insert(req) {
                requests.push(req);
            }
        }
    }

    requests
}
