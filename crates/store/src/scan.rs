//! Paged cursor scanning as a [`Stream`].

use futures::stream::{self, Stream};

use crate::error::StoreError;
use crate::KvStore;

/// Stream every page of keys matching `pattern`.
///
/// Each page is requested only when the previous one has been consumed, so a
/// caller that processes a page before polling again never holds more than one
/// page of keys in memory.
pub fn scan_pages<'a, S>(
    store: &'a S,
    pattern: String,
    count: usize,
) -> impl Stream<Item = Result<Vec<String>, StoreError>> + Send + 'a
where
    S: KvStore + ?Sized + 'a,
{
    // Outer `None` means the scan is finished.
    let start: Option<Option<String>> = Some(None);
    stream::try_unfold(start, move |state| {
        let pattern = pattern.clone();
        async move {
            let Some(cursor) = state else {
                return Ok(None);
            };
            let page = store.scan(cursor, &pattern, count).await?;
            Ok(Some((page.keys, page.next.map(Some))))
        }
    })
}
