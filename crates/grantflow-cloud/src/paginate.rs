//! Cursor-based search over paged listings

use crate::error::{ErrorCategory, GrantError, RemoteError, Result};
use crate::retry::{self, Retry, RetryPolicy};
use serde::{Deserialize, Serialize};
use std::future::Future;

/// Page size used when none is configured
pub const DEFAULT_PAGE_SIZE: u32 = 100;

/// One page of a listing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,

    /// Opaque cursor for the next page
    pub next_cursor: Option<String>,

    /// Whether more items are available after this page
    pub truncated: bool,
}

impl<T> Page<T> {
    /// Final page of a listing
    pub fn last(items: Vec<T>) -> Self {
        Self {
            items,
            next_cursor: None,
            truncated: false,
        }
    }

    /// A page followed by more data at `cursor`
    pub fn more(items: Vec<T>, cursor: impl Into<String>) -> Self {
        Self {
            items,
            next_cursor: Some(cursor.into()),
            truncated: true,
        }
    }
}

/// Transient listing failures: retried per page
pub fn classify_list_error(err: &RemoteError) -> Retry {
    match err.category {
        ErrorCategory::NotFound
        | ErrorCategory::DependencyTimeout
        | ErrorCategory::Internal
        | ErrorCategory::Transport => Retry::Retryable,
        ErrorCategory::InvalidReference | ErrorCategory::Other => Retry::Fatal,
    }
}

/// Walks a paged listing looking for one item
///
/// Every page fetch runs under the retry policy. Running out of pages is
/// reported as [`GrantError::Missing`] and is never retried here; waiting
/// for an item to appear is the caller's decision.
pub struct PaginatedFinder<'a> {
    policy: &'a RetryPolicy,
    page_size: u32,
}

impl<'a> PaginatedFinder<'a> {
    pub fn new(policy: &'a RetryPolicy) -> Self {
        Self {
            policy,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub fn page_size(&self) -> u32 {
        self.page_size
    }

    /// Return the first item matching `predicate`
    ///
    /// `fetch(cursor, limit)` loads one page; `label` names the searched item
    /// in errors.
    pub async fn find_one<T, F, Fut, P>(&self, label: &str, mut fetch: F, mut predicate: P) -> Result<T>
    where
        F: FnMut(Option<String>, u32) -> Fut,
        Fut: Future<Output = std::result::Result<Page<T>, RemoteError>>,
        P: FnMut(&T) -> bool,
    {
        let mut cursor: Option<String> = None;
        let mut pages: u32 = 0;

        loop {
            let page = retry::execute_classified(self.policy, classify_list_error, || {
                fetch(cursor.clone(), self.page_size)
            })
            .await
            .map_err(|e| GrantError::from_remote_retry(e, &format!("listing {}", label)))?;
            pages += 1;

            if let Some(item) = page.items.into_iter().find(|item| predicate(item)) {
                tracing::debug!("Found {} on page {}", label, pages);
                return Ok(item);
            }

            if !page.truncated {
                break;
            }

            match page.next_cursor {
                Some(next) => {
                    tracing::debug!("Listing truncated, getting next page via marker: {}", next);
                    cursor = Some(next);
                }
                None => {
                    return Err(GrantError::Pagination(format!(
                        "page {} for {} is truncated but has no marker",
                        pages, label
                    )));
                }
            }
        }

        Err(GrantError::missing(format!(
            "{} not found after {} page(s)",
            label, pages
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::time::Duration;

    fn pages(count: usize, per_page: usize) -> Vec<Page<u32>> {
        (0..count)
            .map(|p| {
                let items = (0..per_page).map(|i| (p * per_page + i) as u32).collect();
                if p + 1 < count {
                    Page::more(items, format!("cursor-{}", p + 1))
                } else {
                    Page::last(items)
                }
            })
            .collect()
    }

    fn cursor_index(cursor: &Option<String>) -> usize {
        cursor
            .as_deref()
            .and_then(|c| c.strip_prefix("cursor-"))
            .and_then(|n| n.parse().ok())
            .unwrap_or(0)
    }

    #[tokio::test(start_paused = true)]
    async fn test_match_on_last_page_fetches_every_page_once() {
        let policy = RetryPolicy::default();
        let listing = pages(4, 100);
        let fetched = RefCell::new(Vec::new());

        let found = PaginatedFinder::new(&policy)
            .find_one(
                "item 399",
                |cursor, limit| {
                    assert_eq!(limit, DEFAULT_PAGE_SIZE);
                    let index = cursor_index(&cursor);
                    fetched.borrow_mut().push(cursor);
                    let page = listing[index].clone();
                    async move { Ok(page) }
                },
                |item| *item == 399,
            )
            .await
            .unwrap();

        assert_eq!(found, 399);
        assert_eq!(
            fetched.into_inner(),
            vec![
                None,
                Some("cursor-1".to_string()),
                Some("cursor-2".to_string()),
                Some("cursor-3".to_string()),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_stops_at_first_match() {
        let policy = RetryPolicy::default();
        let listing = pages(5, 10);
        let calls = RefCell::new(0);

        let found = PaginatedFinder::new(&policy)
            .with_page_size(10)
            .find_one(
                "item 12",
                |cursor, _| {
                    *calls.borrow_mut() += 1;
                    let page = listing[cursor_index(&cursor)].clone();
                    async move { Ok(page) }
                },
                |item| *item == 12,
            )
            .await
            .unwrap();

        assert_eq!(found, 12);
        assert_eq!(*calls.borrow(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_listing_is_missing() {
        let policy = RetryPolicy::default();
        let listing = pages(3, 5);
        let calls = RefCell::new(0);

        let err = PaginatedFinder::new(&policy)
            .find_one(
                "grant g-404",
                |cursor, _| {
                    *calls.borrow_mut() += 1;
                    let page = listing[cursor_index(&cursor)].clone();
                    async move { Ok(page) }
                },
                |item| *item == 1000,
            )
            .await
            .unwrap_err();

        assert!(err.is_missing());
        assert_eq!(err.to_string(), "grant g-404 not found after 3 page(s)");
        assert_eq!(*calls.borrow(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_page_failure_is_retried() {
        let policy = RetryPolicy::fixed(Duration::from_secs(60), Duration::from_secs(1));
        let calls = RefCell::new(0);

        let found = PaginatedFinder::new(&policy)
            .find_one(
                "item 2",
                |_, _| {
                    *calls.borrow_mut() += 1;
                    let n = *calls.borrow();
                    async move {
                        if n == 1 {
                            Err(RemoteError::from_code("DependencyTimeoutException", "slow"))
                        } else {
                            Ok(Page::last(vec![1u32, 2, 3]))
                        }
                    }
                },
                |item| *item == 2,
            )
            .await
            .unwrap();

        assert_eq!(found, 2);
        assert_eq!(*calls.borrow(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fatal_page_failure_surfaces() {
        let policy = RetryPolicy::default();

        let err = PaginatedFinder::new(&policy)
            .find_one(
                "item 1",
                |_, _| async {
                    Err::<Page<u32>, _>(RemoteError::from_code("AccessDeniedException", "no"))
                },
                |item| *item == 1,
            )
            .await
            .unwrap_err();

        match err {
            GrantError::Remote { context, source } => {
                assert_eq!(context, "listing item 1");
                assert_eq!(source.code, "AccessDeniedException");
            }
            other => panic!("unexpected: {other}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_truncated_page_without_cursor_is_an_error() {
        let policy = RetryPolicy::default();

        let err = PaginatedFinder::new(&policy)
            .find_one(
                "item 9",
                |_, _| async {
                    Ok(Page {
                        items: vec![1u32],
                        next_cursor: None,
                        truncated: true,
                    })
                },
                |item| *item == 9,
            )
            .await
            .unwrap_err();

        assert!(matches!(err, GrantError::Pagination(_)));
    }
}
