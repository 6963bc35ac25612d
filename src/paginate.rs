//! Page-sized slicing of local sequences and iteration over remote cursor pages.

use crate::api::types::Page;
use crate::error::ApiResult;

/// Lazily splits an iterator into pages of at most `size` items.
///
/// The final page may be shorter; an empty input yields no pages at all.
pub struct Pages<I: Iterator> {
    inner: I,
    size: usize,
}

impl<I: Iterator> Iterator for Pages<I> {
    type Item = Vec<I::Item>;

    fn next(&mut self) -> Option<Self::Item> {
        let page: Vec<I::Item> = self.inner.by_ref().take(self.size).collect();
        if page.is_empty() { None } else { Some(page) }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let (lo, hi) = self.inner.size_hint();
        (lo.div_ceil(self.size), hi.map(|h| h.div_ceil(self.size)))
    }
}

/// Split `items` into pages of `size`.
///
/// # Panics
///
/// Panics if `size` is zero.
pub fn paginate<T>(items: T, size: usize) -> Pages<T::IntoIter>
where
    T: IntoIterator,
{
    assert!(size > 0, "page size must be positive");
    Pages {
        inner: items.into_iter(),
        size,
    }
}

/// Iterates a remote cursor-paginated endpoint.
///
/// `fetch` receives `None` for the first page and the previous page's
/// continuation afterwards. Iteration ends when a page has no continuation, or
/// right after the first error, which is yielded once.
pub struct CursorPages<T, F>
where
    F: FnMut(Option<i64>) -> ApiResult<Page<T>>,
{
    fetch: F,
    cursor: Option<i64>,
    done: bool,
}

impl<T, F> CursorPages<T, F>
where
    F: FnMut(Option<i64>) -> ApiResult<Page<T>>,
{
    pub const fn new(fetch: F) -> Self {
        Self {
            fetch,
            cursor: None,
            done: false,
        }
    }
}

impl<T, F> Iterator for CursorPages<T, F>
where
    F: FnMut(Option<i64>) -> ApiResult<Page<T>>,
{
    type Item = ApiResult<Vec<T>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match (self.fetch)(self.cursor) {
            Ok(page) => {
                match page.next_cursor {
                    Some(next) if Some(next) != self.cursor => self.cursor = Some(next),
                    _ => self.done = true,
                }
                Some(Ok(page.items))
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}
