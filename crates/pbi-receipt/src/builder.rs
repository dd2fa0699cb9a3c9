// SPDX-License-Identifier: MIT OR Apache-2.0
//! Fluent builder for constructing [`Receipt`](crate::Receipt)s.

use crate::Decision;
use pbi_core::Receipt;
use uuid::Uuid;

/// Fluent builder for minting a [`Receipt`].
///
/// # Examples
///
/// ```
/// use pbi_receipt::{ReceiptBuilder, Decision};
/// use uuid::Uuid;
///
/// let receipt = ReceiptBuilder::new(Uuid::new_v4(), Uuid::new_v4())
///     .decision(Decision::PbiVerified)
///     .build(b"at-least-32-bytes-of-receipt-secret!!");
///
/// assert_eq!(receipt.decision, Decision::PbiVerified);
/// ```
#[derive(Debug)]
pub struct ReceiptBuilder {
    tenant_id: Uuid,
    challenge_id: Uuid,
    decision: Decision,
}

impl ReceiptBuilder {
    /// Start a builder for a receipt tied to `tenant_id` and `challenge_id`.
    /// Defaults to [`Decision::PbiVerified`] since that is the only decision
    /// the orchestrator ever mints a receipt for.
    #[must_use]
    pub fn new(tenant_id: Uuid, challenge_id: Uuid) -> Self {
        Self {
            tenant_id,
            challenge_id,
            decision: Decision::PbiVerified,
        }
    }

    /// Override the decision.
    #[must_use]
    pub fn decision(mut self, decision: Decision) -> Self {
        self.decision = decision;
        self
    }

    /// Consume the builder, minting the receipt under `secret`.
    #[must_use]
    pub fn build(self, secret: &[u8]) -> Receipt {
        crate::mint(self.tenant_id, self.challenge_id, self.decision, secret)
    }
}
