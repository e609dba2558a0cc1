//! Offset pagination for article listings.

use serde::Serialize;

pub const DEFAULT_PAGE_SIZE: u32 = 20;
pub const MAX_PAGE_SIZE: u32 = 100;

/// A clamped `(offset, limit)` pair. `limit` is always within `1..=max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct PageWindow {
    offset: u64,
    limit: u32,
}

impl Default for PageWindow {
    fn default() -> Self {
        Self {
            offset: 0,
            limit: DEFAULT_PAGE_SIZE,
        }
    }
}

impl PageWindow {
    pub fn new(offset: u64, limit: u32, max_limit: u32) -> Self {
        let max_limit = max_limit.max(1);
        Self {
            offset,
            limit: limit.clamp(1, max_limit),
        }
    }

    /// Translate a one-based page number into a window. Page `0` is treated as `1`.
    pub fn from_page(page: u32, page_size: u32, max_limit: u32) -> Self {
        let window = Self::new(0, page_size, max_limit);
        let page_index = u64::from(page.max(1) - 1);
        Self {
            offset: page_index.saturating_mul(u64::from(window.limit)),
            limit: window.limit,
        }
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }

    /// One-based page number, assuming the window was built from a page.
    pub fn page(&self) -> u64 {
        self.offset / u64::from(self.limit) + 1
    }
}

/// Page-size policy resolved from configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageSizePolicy {
    pub default_size: u32,
    pub max_size: u32,
}

impl Default for PageSizePolicy {
    fn default() -> Self {
        Self {
            default_size: DEFAULT_PAGE_SIZE,
            max_size: MAX_PAGE_SIZE,
        }
    }
}

impl PageSizePolicy {
    pub fn window(&self, page: Option<u32>, page_size: Option<u32>) -> PageWindow {
        PageWindow::from_page(
            page.unwrap_or(1),
            page_size.unwrap_or(self.default_size),
            self.max_size,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn limit_is_clamped_into_range() {
        assert_eq!(PageWindow::new(0, 0, MAX_PAGE_SIZE).limit(), 1);
        assert_eq!(PageWindow::new(0, 500, MAX_PAGE_SIZE).limit(), MAX_PAGE_SIZE);
        assert_eq!(PageWindow::new(0, 25, MAX_PAGE_SIZE).limit(), 25);
    }

    #[test]
    fn page_numbers_map_to_offsets() {
        let window = PageWindow::from_page(3, 20, MAX_PAGE_SIZE);
        assert_eq!(window.offset(), 40);
        assert_eq!(window.limit(), 20);
        assert_eq!(window.page(), 3);
    }

    #[test]
    fn page_zero_is_first_page() {
        assert_eq!(PageWindow::from_page(0, 20, MAX_PAGE_SIZE).offset(), 0);
    }

    #[test]
    fn policy_fills_defaults() {
        let policy = PageSizePolicy::default();
        let window = policy.window(None, None);
        assert_eq!(window, PageWindow::default());
        assert_eq!(policy.window(Some(2), Some(1_000)).limit(), MAX_PAGE_SIZE);
    }
}
