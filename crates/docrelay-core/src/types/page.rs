//! Token-based paging over remote list endpoints.
//!
//! [`paginate`] turns a page-fetching closure into a lazy stream of pages.
//! The stream is finite (it ends after the page without a next token or
//! after the first error) and cannot be restarted.

use std::future::Future;

use futures::{Stream, TryStreamExt, pin_mut, stream};
use serde::{Deserialize, Serialize};

use crate::result::AppResult;

/// One page of a remote listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Page<T> {
    /// Items on this page.
    pub items: Vec<T>,
    /// Token to request the following page, absent on the last page.
    pub next_page_token: Option<String>,
    /// Checkpoint token reported with the last page of a change listing.
    pub new_start_page_token: Option<String>,
}

impl<T> Page<T> {
    /// Create the final page of a listing.
    pub fn last(items: Vec<T>) -> Self {
        Self {
            items,
            next_page_token: None,
            new_start_page_token: None,
        }
    }

    /// Create a page that is followed by `next_page_token`.
    pub fn with_next(items: Vec<T>, next_page_token: impl Into<String>) -> Self {
        Self {
            items,
            next_page_token: Some(next_page_token.into()),
            new_start_page_token: None,
        }
    }
}

/// Items accumulated from every page of a listing.
#[derive(Debug, Clone)]
pub struct Collected<T> {
    /// All items, in page order.
    pub items: Vec<T>,
    /// The checkpoint token reported by the last page, if any.
    pub new_start_page_token: Option<String>,
    /// Number of pages fetched.
    pub pages: usize,
}

enum Cursor {
    Next(Option<String>),
    Done,
}

/// Build a lazy stream of pages starting at `first_token`.
///
/// `fetch` is called with the token of the page to load (`None` for an
/// unkeyed first page) and is not called again once a page comes back
/// without a `next_page_token` or an error has been yielded.
pub fn paginate<T, F, Fut>(
    first_token: Option<String>,
    fetch: F,
) -> impl Stream<Item = AppResult<Page<T>>>
where
    F: FnMut(Option<String>) -> Fut,
    Fut: Future<Output = AppResult<Page<T>>>,
{
    stream::unfold(
        (Cursor::Next(first_token), fetch),
        |(cursor, mut fetch)| async move {
            let token = match cursor {
                Cursor::Next(token) => token,
                Cursor::Done => return None,
            };

            match fetch(token).await {
                Ok(page) => {
                    let next = match &page.next_page_token {
                        Some(token) => Cursor::Next(Some(token.clone())),
                        None => Cursor::Done,
                    };
                    Some((Ok(page), (next, fetch)))
                }
                Err(e) => Some((Err(e), (Cursor::Done, fetch))),
            }
        },
    )
}

/// Drain a page stream into a single [`Collected`] value.
pub async fn collect_pages<T, S>(pages: S) -> AppResult<Collected<T>>
where
    S: Stream<Item = AppResult<Page<T>>>,
{
    pin_mut!(pages);

    let mut collected = Collected {
        items: Vec::new(),
        new_start_page_token: None,
        pages: 0,
    };

    while let Some(page) = pages.try_next().await? {
        collected.pages += 1;
        collected.items.extend(page.items);
        if page.new_start_page_token.is_some() {
            collected.new_start_page_token = page.new_start_page_token;
        }
    }

    Ok(collected)
}
