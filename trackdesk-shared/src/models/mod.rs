/// Database models
///
/// One module per table. Each model exposes associated async functions that
/// take a `&PgPool` (or a transaction) and run plain SQL through `sqlx`.
/// Every tenant-owned lookup takes the `tenant_id` so a query can never cross
/// tenants.
///
/// # Example
///
/// ```no_run
/// use trackdesk_shared::models::affiliate::{Affiliate, AffiliateFilter};
/// use trackdesk_shared::models::Pagination;
/// use sqlx::PgPool;
/// use uuid::Uuid;
///
/// # async fn example(pool: PgPool, tenant_id: Uuid) -> Result<(), sqlx::Error> {
/// let page = Affiliate::list(&pool, tenant_id, &AffiliateFilter::default(), Pagination::default()).await?;
/// println!("{} of {} affiliates", page.data.len(), page.total);
/// # Ok(())
/// # }
/// ```

use serde::{Deserialize, Serialize};

pub mod affiliate;
pub mod api_key;
pub mod branding;
pub mod click;
pub mod conversion;
pub mod coupon;
pub mod delivery;
pub mod integration;
pub mod membership;
pub mod offer;
pub mod payout;
pub mod rule_set;
pub mod smart_link;
pub mod tenant;
pub mod tracking_link;
pub mod user;
pub mod webhook;

/// Largest page a list endpoint returns
pub const MAX_PER_PAGE: i64 = 100;

/// Default page size
pub const DEFAULT_PER_PAGE: i64 = 25;

/// 1-based page selection, clamped to `1..=MAX_PER_PAGE` rows
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pagination {
    pub page: i64,
    pub per_page: i64,
}

impl Pagination {
    pub fn new(page: Option<i64>, per_page: Option<i64>) -> Self {
        Self {
            page: page.unwrap_or(1).max(1),
            per_page: per_page.unwrap_or(DEFAULT_PER_PAGE).clamp(1, MAX_PER_PAGE),
        }
    }

    pub fn limit(&self) -> i64 {
        self.per_page
    }

    pub fn offset(&self) -> i64 {
        (self.page - 1) * self.per_page
    }
}

impl Default for Pagination {
    fn default() -> Self {
        Self::new(None, None)
    }
}

/// One page of results plus the unpaginated total
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Page<T> {
    pub data: Vec<T>,
    pub page: i64,
    pub per_page: i64,
    pub total: i64,
}

impl<T> Page<T> {
    pub fn new(data: Vec<T>, pagination: Pagination, total: i64) -> Self {
        Self {
            data,
            page: pagination.page,
            per_page: pagination.per_page,
            total,
        }
    }
}

/// Wraps a search term for `ILIKE`, escaping the pattern metacharacters
pub(crate) fn like_pattern(term: &str) -> String {
    let escaped = term
        .trim()
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("%{}%", escaped)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pagination_defaults_and_clamping() {
        let p = Pagination::default();
        assert_eq!((p.page, p.per_page, p.offset()), (1, 25, 0));

        let p = Pagination::new(Some(3), Some(500));
        assert_eq!(p.per_page, MAX_PER_PAGE);
        assert_eq!(p.offset(), 200);

        let p = Pagination::new(Some(0), Some(0));
        assert_eq!((p.page, p.per_page), (1, 1));
    }

    #[test]
    fn test_like_pattern_escapes() {
        assert_eq!(like_pattern(" acme "), "%acme%");
        assert_eq!(like_pattern("50%_off"), "%50\\%\\_off%");
    }
}
