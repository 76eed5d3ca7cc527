use async_trait::async_trait;
use tracing::{info, warn};

use super::guest_cart::{GuestCart, GuestCartStore};
use super::ClientError;
use crate::models::GuestCartLine;
use crate::services::commerce::MergeOutcome;

/// Server side of the login merge (`POST /cart/merge`).
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CartMerger: Send + Sync {
    async fn merge_cart(&self, lines: Vec<GuestCartLine>) -> Result<MergeOutcome, ClientError>;
}

#[derive(Debug)]
pub enum LoginMerge {
    NothingToMerge,
    Merged(MergeOutcome),
}

/// Moves the guest cart into the user's server cart after login.
///
/// The local cart is cleared before the call so a repeated login cannot send
/// the same lines twice. The cleared lines stay in memory until the server
/// answers and are put back if the merge fails.
pub async fn merge_guest_cart_on_login<S, M>(
    guest: &GuestCart<S>,
    merger: &M,
) -> Result<LoginMerge, ClientError>
where
    S: GuestCartStore,
    M: CartMerger + ?Sized,
{
    let snapshot = guest.take()?;
    if snapshot.is_empty() {
        return Ok(LoginMerge::NothingToMerge);
    }

    match merger.merge_cart(snapshot.clone()).await {
        Ok(outcome) => {
            info!(
                merged = outcome.lines_merged,
                skipped = outcome.lines_skipped,
                "guest cart merged"
            );
            Ok(LoginMerge::Merged(outcome))
        }
        Err(e) => {
            warn!(error = %e, lines = snapshot.len(), "guest cart merge failed; restoring local cart");
            guest.restore(snapshot)?;
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::guest_cart::MemoryStore;
    use crate::models::{CartView, ProductSnapshot};
    use assert_matches::assert_matches;
    use rust_decimal::Decimal;
    use uuid::Uuid;

    fn outcome(lines: usize) -> MergeOutcome {
        MergeOutcome {
            lines_merged: lines,
            lines_skipped: 0,
            cart: CartView {
                user_id: Uuid::new_v4(),
                items: Vec::new(),
                item_count: 0,
                subtotal: Decimal::ZERO,
            },
        }
    }

    #[tokio::test]
    async fn successful_merge_leaves_guest_cart_empty() {
        let guest = GuestCart::new(MemoryStore::new());
        guest.add(ProductSnapshot::new("a"), 1).unwrap();

        let mut merger = MockCartMerger::new();
        merger
            .expect_merge_cart()
            .withf(|lines| lines.len() == 1 && lines[0].product.id == "a")
            .times(1)
            .returning(|lines| Ok(outcome(lines.len())));

        let result = merge_guest_cart_on_login(&guest, &merger).await.unwrap();
        assert_matches!(result, LoginMerge::Merged(o) if o.lines_merged == 1);
        assert!(guest.lines().unwrap().is_empty());
    }

    #[tokio::test]
    async fn failed_merge_restores_guest_cart() {
        let guest = GuestCart::new(MemoryStore::new());
        guest.add(ProductSnapshot::new("a"), 2).unwrap();

        let mut merger = MockCartMerger::new();
        merger.expect_merge_cart().times(1).returning(|_| {
            Err(ClientError::Api {
                status: 503,
                message: "unavailable".into(),
            })
        });

        let err = merge_guest_cart_on_login(&guest, &merger).await.unwrap_err();
        assert_matches!(err, ClientError::Api { status: 503, .. });

        let lines = guest.lines().unwrap();
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].quantity, 2);
    }

    #[tokio::test]
    async fn empty_guest_cart_skips_the_call() {
        let guest = GuestCart::new(MemoryStore::new());
        let mut merger = MockCartMerger::new();
        merger.expect_merge_cart().never();

        let result = merge_guest_cart_on_login(&guest, &merger).await.unwrap();
        assert_matches!(result, LoginMerge::NothingToMerge);
    }
}
