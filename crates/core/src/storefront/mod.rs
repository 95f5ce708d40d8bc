//! Storefront automation.
//!
//! The `Storefront` trait is the seam between the pipeline and the browser;
//! `WebDriverStorefront` implements it over the W3C WebDriver protocol.

pub mod parse;
mod site;
mod types;
mod webdriver;

pub use site::WebDriverStorefront;
pub use types::*;
pub use webdriver::{BrowserOptions, WebDriverClient, WebDriverError};

use futures::stream::{self, BoxStream, StreamExt};

use crate::session::Session;

/// Lazily walk the order history page by page.
///
/// Yields at most `max_pages` pages. The stream ends after the first error,
/// which is yielded so the caller can record why the scan stopped early.
pub fn order_pages<'a>(
    storefront: &'a dyn Storefront,
    session: &'a Session,
    max_pages: u32,
) -> BoxStream<'a, Result<OrderPage, StorefrontError>> {
    stream::unfold(
        (Some(PageCursor::default()), 0u32),
        move |(cursor, fetched)| async move {
            let cursor = cursor?;
            if fetched >= max_pages {
                return None;
            }
            match storefront.list_orders(session, cursor).await {
                Ok(page) => {
                    let next = page.next;
                    Some((Ok(page), (next, fetched + 1)))
                }
                Err(e) => Some((Err(e), (None, fetched + 1))),
            }
        },
    )
    .boxed()
}
