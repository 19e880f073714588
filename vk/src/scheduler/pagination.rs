//! Offset pagination over `{count, items}` responses

use futures::future::try_join_all;
use serde_json::Value;
use tracing::debug;

use super::core::{EnqueueOptions, Scheduler};
use crate::api::ApiError;
use crate::domain::{Params, Priority};

/// Options for [`Scheduler::fetch`]
#[derive(Debug, Clone, Copy)]
pub struct FetchOptions {
    pub priority: Priority,
    /// Maximum number of items to return; unbounded when `None`
    pub limit: Option<usize>,
    /// Return an empty list instead of an error
    pub silent: bool,
    /// Request all remaining pages at once when the total is known
    pub parallel: bool,
    pub force_private: bool,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            priority: Priority::DEFAULT,
            limit: None,
            silent: true,
            parallel: false,
            force_private: false,
        }
    }
}

impl FetchOptions {
    fn enqueue_options(&self) -> EnqueueOptions {
        EnqueueOptions {
            priority: self.priority,
            force_private: self.force_private,
        }
    }
}

/// One page of a list response
struct Page {
    items: Vec<Value>,
    count: Option<usize>,
}

impl Page {
    fn parse(value: Value) -> Result<Self, ApiError> {
        let Value::Object(mut object) = value else {
            return Err(ApiError::InvalidResponse("expected an object with 'items'".to_string()));
        };
        let items = match object.remove("items") {
            Some(Value::Array(items)) => items,
            _ => return Err(ApiError::InvalidResponse("response has no 'items' array".to_string())),
        };
        let count = object
            .get("count")
            .and_then(Value::as_u64)
            .and_then(|n| usize::try_from(n).ok());
        Ok(Self { items, count })
    }
}

impl Scheduler {
    /// Load every item of a list method, page by page
    ///
    /// Pages are requested with increasing `offset` starting from the
    /// caller's own `offset` (if any). The page size is the caller's `count`
    /// param when positive, or the length of the first page. Paging stops on a short page
    /// or once `limit` items are collected.
    pub async fn fetch(&self, method: &str, params: Params, options: FetchOptions) -> Result<Vec<Value>, ApiError> {
        debug!(%method, ?options, "Scheduler::fetch: called");
        match self.fetch_pages(method, params, &options).await {
            Ok(items) => Ok(items),
            Err(e) if options.silent => {
                debug!(%method, error = %e, "Scheduler::fetch: error swallowed");
                Ok(Vec::new())
            }
            Err(e) => Err(e),
        }
    }

    async fn fetch_pages(&self, method: &str, params: Params, options: &FetchOptions) -> Result<Vec<Value>, ApiError> {
        let limit = options.limit.unwrap_or(usize::MAX);
        let start = params.get("offset").and_then(|v| v.as_usize()).unwrap_or(0);
        let requested = params.get("count").and_then(|v| v.as_usize()).filter(|&n| n > 0);
        let enqueue_options = options.enqueue_options();

        let first = Page::parse(self.enqueue(method, params.clone(), enqueue_options).await?)?;
        let page_size = requested.unwrap_or(first.items.len()).max(1);
        let total = first.count;
        let mut items = first.items;

        if items.is_empty() || items.len() < page_size || items.len() >= limit {
            debug!(%method, items = items.len(), "Scheduler::fetch_pages: single page");
            items.truncate(limit);
            return Ok(items);
        }

        match total {
            Some(total) if options.parallel => {
                let wanted = total.saturating_sub(start).min(limit);
                let offsets: Vec<usize> = (start + items.len()..start + wanted).step_by(page_size).collect();
                debug!(%method, total, pages = offsets.len(), "Scheduler::fetch_pages: fanning out");

                let pages = try_join_all(offsets.into_iter().map(|offset| {
                    self.enqueue(method, params.clone().with("offset", offset), enqueue_options)
                }))
                .await?;
                for page in pages {
                    items.extend(Page::parse(page)?.items);
                }
            }
            _ => loop {
                let offset = start + items.len();
                debug!(%method, offset, "Scheduler::fetch_pages: next page");
                let page = Page::parse(
                    self.enqueue(method, params.clone().with("offset", offset), enqueue_options)
                        .await?,
                )?;
                let short = page.items.is_empty() || page.items.len() < page_size;
                items.extend(page.items);
                if short || items.len() >= limit {
                    break;
                }
            },
        }

        items.truncate(limit);
        Ok(items)
    }
}
