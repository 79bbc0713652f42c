//! Capacity planning for concurrent Merkle trees.
//!
//! [`CapacityPlanner::plan`] turns a target item count into a supported
//! `(depth, buffer_width, canopy_depth)` triple and a cost estimate. The
//! ledger only accepts the depth/buffer combinations listed in
//! [`SUPPORTED_TREE_SIZES`], so the planner searches that table rather than
//! computing a depth freely.

use serde::{Deserialize, Serialize};

use crate::error::PlanError;

/// Depth/buffer-width combinations the ledger's compression program accepts.
pub const SUPPORTED_TREE_SIZES: &[(u32, &[u32])] = &[
    (3, &[8]),
    (4, &[8]),
    (5, &[8]),
    (6, &[16]),
    (7, &[16]),
    (8, &[16]),
    (9, &[16]),
    (10, &[32]),
    (11, &[32]),
    (12, &[32]),
    (13, &[32]),
    (14, &[64, 256, 1024, 2048]),
    (15, &[64]),
    (16, &[64]),
    (17, &[64]),
    (18, &[64]),
    (19, &[64]),
    (20, &[64, 256, 1024, 2048]),
    (21, &[64, 256]),
    (22, &[64, 256]),
    (23, &[64, 256]),
    (24, &[64, 256, 512, 1024, 2048]),
    (25, &[256, 512]),
    (26, &[512, 1024, 2048]),
    (27, &[512, 1024]),
    (28, &[512, 1024]),
    (29, &[512, 1024]),
    (30, &[512, 1024, 2048]),
];

/// Proof nodes a mint may carry once the canopy is subtracted.
pub const MAX_PROOF_LEVELS: u32 = 10;

/// Largest canopy the ledger allows in a single tree account.
pub const MAX_CANOPY_DEPTH: u32 = 17;

/// Per-item fee used when the gateway has not sampled one yet.
pub const DEFAULT_PER_ITEM_FEE_LAMPORTS: u64 = 5_000;

const TREE_HEADER_SIZE: u64 = 56;
const ACCOUNT_STORAGE_OVERHEAD: u64 = 128;
const LAMPORTS_PER_BYTE_YEAR: u64 = 3_480;
const EXEMPTION_THRESHOLD_YEARS: u64 = 2;

/// Structural parameters of one tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TreeParams {
    pub depth: u32,
    pub buffer_width: u32,
    pub canopy_depth: u32,
}

impl TreeParams {
    pub fn capacity(&self) -> u64 {
        1u64 << self.depth
    }

    /// Proof nodes each later write has to supply.
    pub fn proof_len(&self) -> u32 {
        self.depth - self.canopy_depth
    }

    /// Size in bytes of the on-chain account holding this tree.
    pub fn account_size(&self) -> u64 {
        let depth = u64::from(self.depth);
        let path = 40 + 32 * depth;
        let body = 24 + u64::from(self.buffer_width) * path + path;
        let canopy = ((1u64 << (self.canopy_depth + 1)) - 2) * 32;
        TREE_HEADER_SIZE + body + canopy
    }

    /// One-time rent-exempt deposit for the tree account.
    pub fn rent_lamports(&self) -> u64 {
        (ACCOUNT_STORAGE_OVERHEAD + self.account_size())
            * LAMPORTS_PER_BYTE_YEAR
            * EXEMPTION_THRESHOLD_YEARS
    }
}

/// What a caller asks the planner for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PlanRequest {
    pub target_capacity: u64,
    /// Minimum buffer width, for callers expecting many concurrent writers.
    #[serde(default)]
    pub buffer_width: Option<u32>,
    /// Explicit canopy depth instead of the default policy.
    #[serde(default)]
    pub canopy_depth: Option<u32>,
}

impl PlanRequest {
    pub fn for_capacity(target_capacity: u64) -> Self {
        Self {
            target_capacity,
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plan {
    pub params: TreeParams,
    pub rent_lamports: u64,
    pub per_item_fee: u64,
    pub estimated_cost: u64,
}

/// Selects tree parameters under the ledger's fixed size table.
pub struct CapacityPlanner;

impl CapacityPlanner {
    /// Plan a tree for `request`. `fee` is the sampled per-item fee, if any.
    pub fn plan(request: &PlanRequest, fee: Option<u64>) -> Result<Plan, PlanError> {
        let (depth, widths) = Self::select_depth(request.target_capacity)?;
        let buffer_width = Self::select_buffer_width(depth, widths, request.buffer_width)?;
        let canopy_depth = Self::select_canopy(depth, request.canopy_depth)?;

        let params = TreeParams {
            depth,
            buffer_width,
            canopy_depth,
        };
        let per_item_fee = fee.unwrap_or(DEFAULT_PER_ITEM_FEE_LAMPORTS);
        let rent_lamports = params.rent_lamports();
        let estimated_cost =
            rent_lamports.saturating_add(request.target_capacity.saturating_mul(per_item_fee));

        Ok(Plan {
            params,
            rent_lamports,
            per_item_fee,
            estimated_cost,
        })
    }

    /// Largest capacity any supported tree offers.
    pub fn max_capacity() -> u64 {
        SUPPORTED_TREE_SIZES
            .last()
            .map(|(depth, _)| 1u64 << depth)
            .unwrap_or(0)
    }

    fn select_depth(target: u64) -> Result<(u32, &'static [u32]), PlanError> {
        if target == 0 {
            return Err(PlanError::InvalidCapacity {
                requested: target,
                max: Self::max_capacity(),
            });
        }
        // The table is sorted by depth, so the first hit is the smallest.
        SUPPORTED_TREE_SIZES
            .iter()
            .find(|(depth, _)| (1u64 << depth) >= target)
            .map(|&(depth, widths)| (depth, widths))
            .ok_or(PlanError::InvalidCapacity {
                requested: target,
                max: Self::max_capacity(),
            })
    }

    fn select_buffer_width(
        depth: u32,
        widths: &[u32],
        requested: Option<u32>,
    ) -> Result<u32, PlanError> {
        let min = requested.unwrap_or(0);
        widths
            .iter()
            .copied()
            .find(|&w| w >= min)
            .ok_or(PlanError::InvalidBufferWidth {
                depth,
                requested: min,
            })
    }

    fn select_canopy(depth: u32, requested: Option<u32>) -> Result<u32, PlanError> {
        let max = depth.min(MAX_CANOPY_DEPTH);
        match requested {
            Some(canopy) if canopy > max => Err(PlanError::InvalidCanopy { depth, canopy, max }),
            Some(canopy) => Ok(canopy),
            None => Ok(depth.saturating_sub(MAX_PROOF_LEVELS).min(max)),
        }
    }
}
