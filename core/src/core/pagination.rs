use std::future::Future;

/// One page of a listing API and the token for the page after it.
///
/// `next == None` means the listing is exhausted. Each API maps its own
/// convention (empty cursor, next page 0, missing header) onto that.
#[derive(Debug, Clone)]
pub struct Page<T, K> {
    pub items: Vec<T>,
    pub next: Option<K>,
}

impl<T> Page<T, String> {
    /// Cursor-style APIs signal the last page with an empty cursor.
    pub fn with_cursor(items: Vec<T>, cursor: impl Into<String>) -> Self {
        let cursor = cursor.into();
        Self {
            items,
            next: if cursor.is_empty() { None } else { Some(cursor) },
        }
    }
}

impl<T> Page<T, u32> {
    /// Page-number APIs signal the last page with a next page of 0.
    pub fn with_next_page(items: Vec<T>, next_page: u32) -> Self {
        Self {
            items,
            next: if next_page == 0 { None } else { Some(next_page) },
        }
    }
}

/// Drives `fetch_page` from the first page (`None` token) until exhaustion.
///
/// The first error aborts the listing and discards what was gathered so far.
pub async fn fetch_all<T, K, F, Fut>(mut fetch_page: F) -> anyhow::Result<Vec<T>>
where
    F: FnMut(Option<K>) -> Fut,
    Fut: Future<Output = anyhow::Result<Page<T, K>>>,
{
    let mut items = Vec::new();
    let mut token = None;

    loop {
        let page = fetch_page(token.take()).await?;
        items.extend(page.items);
        match page.next {
            Some(next) => token = Some(next),
            None => return Ok(items),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    #[tokio::test]
    async fn test_cursor_pages_until_empty_cursor() {
        let mut seen_tokens = Vec::new();

        let items = fetch_all(|token: Option<String>| {
            seen_tokens.push(token.clone());
            async move {
                Ok(match token.as_deref() {
                    None => Page::with_cursor(vec![1, 2], "c1"),
                    Some("c1") => Page::with_cursor(vec![3], "c2"),
                    _ => Page::with_cursor(vec![4], ""),
                })
            }
        })
        .await
        .unwrap();

        assert_eq!(items, vec![1, 2, 3, 4]);
        assert_eq!(
            seen_tokens,
            vec![None, Some("c1".to_string()), Some("c2".to_string())]
        );
    }

    #[tokio::test]
    async fn test_page_numbers_until_zero() {
        let items = fetch_all(|page: Option<u32>| async move {
            let current = page.unwrap_or(1);
            let next = if current < 3 { current + 1 } else { 0 };
            Ok(Page::with_next_page(vec![current], next))
        })
        .await
        .unwrap();

        assert_eq!(items, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_error_discards_partial_results() {
        let result = fetch_all(|page: Option<u32>| async move {
            match page {
                None => Ok(Page::with_next_page(vec!["a"], 2)),
                Some(_) => Err(anyhow!("listing failed")),
            }
        })
        .await;

        assert_eq!(result.unwrap_err().to_string(), "listing failed");
    }
}
