use crate::{Result, TransactionId, TransactionOutcome, UnsignedAuthorizationTransaction};
use async_trait::async_trait;

/// Capability to obtain the subscriber's signature and submit the grant.
///
/// Implementations suspend until the signer responds. A declined or
/// abandoned request must resolve to [`TransactionOutcome::cancelled`], and
/// a ledger refusal to [`TransactionOutcome::failure`]. `Err` is reserved
/// for failures to reach the wallet at all.
#[async_trait]
pub trait WalletSigningGateway: Send + Sync {
    /// Stable identifier of this backend (e.g. "local", "hosted").
    fn backend_id(&self) -> &str;

    /// Request a signature for `tx` and submit it to the ledger.
    async fn request_signature(
        &self,
        tx: UnsignedAuthorizationTransaction,
    ) -> Result<TransactionOutcome>;

    /// Withdraw the outstanding request for `transaction_id`.
    ///
    /// The pending [`request_signature`](Self::request_signature) call still
    /// delivers the final outcome: cancelled when the withdrawal reaches the
    /// signer first, signed when the subscriber approved before it did.
    /// Withdrawing a request that is no longer outstanding is not an error.
    async fn cancel_signature(&self, transaction_id: &TransactionId) -> Result<()>;
}
