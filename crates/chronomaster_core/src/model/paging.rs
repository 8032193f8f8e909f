//! Paging requests and results for searches and history queries.

use serde::{Deserialize, Serialize};

/// Window over an ordered result set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PagingRequest {
    pub first_item: usize,
    pub paging_size: usize,
}

/// Window actually returned, with the unpaged total.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Paging {
    pub first_item: usize,
    pub paging_size: usize,
    pub total_items: usize,
}

impl PagingRequest {
    pub const ALL: Self = Self {
        first_item: 0,
        paging_size: usize::MAX,
    };
    /// Counts matches without returning any.
    pub const NONE: Self = Self {
        first_item: 0,
        paging_size: 0,
    };
    pub const ONE: Self = Self {
        first_item: 0,
        paging_size: 1,
    };

    /// Builds a request for a 1-based page.
    pub fn of_page(page: usize, paging_size: usize) -> Result<Self, String> {
        if page == 0 {
            return Err("page must be at least 1".to_string());
        }
        if paging_size == 0 {
            return Err("paging size must be at least 1".to_string());
        }
        let first_item = (page - 1)
            .checked_mul(paging_size)
            .ok_or_else(|| format!("page {page} of size {paging_size} is out of range"))?;
        Ok(Self {
            first_item,
            paging_size,
        })
    }

    /// Slices `items` to this window and reports the total.
    pub fn select<T>(&self, items: Vec<T>) -> (Vec<T>, Paging) {
        let total_items = items.len();
        let page = items
            .into_iter()
            .skip(self.first_item)
            .take(self.paging_size)
            .collect();
        (
            page,
            Paging {
                first_item: self.first_item,
                paging_size: self.paging_size,
                total_items,
            },
        )
    }
}

impl Default for PagingRequest {
    fn default() -> Self {
        Self::ALL
    }
}

impl Paging {
    /// 1-based page number, or 0 for a zero-sized window.
    pub fn page_number(&self) -> usize {
        if self.paging_size == 0 {
            return 0;
        }
        self.first_item / self.paging_size + 1
    }

    pub fn total_pages(&self) -> usize {
        if self.paging_size == 0 {
            return 0;
        }
        self.total_items.div_ceil(self.paging_size)
    }
}

#[cfg(test)]
mod tests {
    use super::PagingRequest;

    #[test]
    fn of_page_selects_expected_window() {
        let request = PagingRequest::of_page(2, 3).unwrap();
        let (items, paging) = request.select((1..=8).collect::<Vec<_>>());
        assert_eq!(items, vec![4, 5, 6]);
        assert_eq!(paging.total_items, 8);
        assert_eq!(paging.page_number(), 2);
        assert_eq!(paging.total_pages(), 3);
    }

    #[test]
    fn none_counts_without_items() {
        let (items, paging) = PagingRequest::NONE.select(vec!["a", "b"]);
        assert!(items.is_empty());
        assert_eq!(paging.total_items, 2);
        assert_eq!(paging.total_pages(), 0);
    }

    #[test]
    fn of_page_rejects_zero_values() {
        assert!(PagingRequest::of_page(0, 10).is_err());
        assert!(PagingRequest::of_page(1, 0).is_err());
    }
}
