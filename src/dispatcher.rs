//! Batch dispatch: one gateway call per record, bounded per batch.
//!
//! A batch never fails as a whole; every item yields its own [`Outcome`].
//! The dispatcher keeps no state, so it can be re-run on whatever subset of
//! records is still pending after a resume or restart.

use std::sync::Arc;

use futures::StreamExt;
use futures::stream;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::gateway::{CallOptions, Gateway};
use crate::ledger::{LedgerClient, MintRequest};
use crate::planner::TreeParams;
use crate::state_machine::{Outcome, Record, SkipReason};

/// A record paired with the leaf it will occupy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingItem {
    pub leaf_index: u64,
    pub record: Record,
}

pub struct Dispatcher<C> {
    client: Arc<C>,
    gateway: Arc<Gateway>,
    parallelism: usize,
    call_options: CallOptions,
}

impl<C: LedgerClient> Dispatcher<C> {
    pub fn new(client: Arc<C>, gateway: Arc<Gateway>, parallelism: usize) -> Self {
        let call_options = gateway.default_options();
        Self {
            client,
            gateway,
            parallelism: parallelism.max(1),
            call_options,
        }
    }

    pub fn client(&self) -> &Arc<C> {
        &self.client
    }

    pub fn gateway(&self) -> &Arc<Gateway> {
        &self.gateway
    }

    /// Mint every item in `batch` and collect the outcomes in leaf order.
    pub async fn dispatch_batch(
        &self,
        job_id: &str,
        batch: &[PendingItem],
        params: TreeParams,
    ) -> Vec<Outcome> {
        let (tx, mut rx) = mpsc::unbounded_channel();
        self.dispatch_into(job_id, batch, params, &tx, &CancellationToken::new())
            .await;
        drop(tx);

        let mut outcomes = Vec::with_capacity(batch.len());
        while let Some(outcome) = rx.recv().await {
            outcomes.push(outcome);
        }
        outcomes.sort_by_key(|o| o.leaf_index);
        outcomes
    }

    /// Mint every item in `batch`, sending each outcome as soon as it lands.
    ///
    /// Items not yet submitted when `cancel` fires come back as skipped
    /// without touching the ledger; calls already in flight are left to finish.
    pub async fn dispatch_into(
        &self,
        job_id: &str,
        batch: &[PendingItem],
        params: TreeParams,
        tx: &mpsc::UnboundedSender<Outcome>,
        cancel: &CancellationToken,
    ) {
        // Collected first so the stream stays `Send` inside a spawned driver.
        let calls: Vec<_> = batch
            .iter()
            .map(|item| self.mint_one(job_id, item, params, cancel))
            .collect();
        stream::iter(calls)
            .buffer_unordered(self.parallelism)
            .for_each(|outcome| {
                // The receiver only goes away once the job stopped counting.
                let _ = tx.send(outcome);
                async {}
            })
            .await;
    }

    async fn mint_one(
        &self,
        job_id: &str,
        item: &PendingItem,
        params: TreeParams,
        cancel: &CancellationToken,
    ) -> Outcome {
        if cancel.is_cancelled() {
            return Outcome::skipped(item.leaf_index, SkipReason::Cancelled);
        }

        let req = MintRequest {
            job_id: job_id.to_string(),
            leaf_index: item.leaf_index,
            name: item.record.name.clone(),
            metadata_uri: item.record.metadata_uri.clone(),
            owner: item.record.owner.clone(),
            tree: params,
        };

        match self
            .gateway
            .call(|| self.client.submit(&req), self.call_options)
            .await
        {
            Ok(receipt) => {
                debug!(job_id, leaf_index = item.leaf_index, signature = %receipt.signature, "minted");
                Outcome::minted(item.leaf_index, receipt)
            }
            Err(err) => {
                warn!(job_id, leaf_index = item.leaf_index, "mint failed: {err}");
                Outcome::failed(item.leaf_index, &err)
            }
        }
    }
}
