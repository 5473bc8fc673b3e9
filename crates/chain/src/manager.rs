//! The chain manager: an append-only sequence of validated blocks.

use basalt_crypto::block_hash;
use basalt_execution::next_base_fee;
use basalt_types::block::MAX_EXTRA_DATA;
use basalt_types::params::SUPPORTED_PROTOCOL_VERSIONS;
use basalt_types::{Block, BlockError, BlockHeader, ChainParams, Hash256};
use parking_lot::RwLock;
use tracing::info;

/// The current chain tip.
#[derive(Debug, Clone)]
pub struct Tip {
    pub header: BlockHeader,
    pub hash: Hash256,
}

pub struct ChainManager {
    params: ChainParams,
    tip: RwLock<Tip>,
}

impl ChainManager {
    /// Starts the chain at a trusted header (genesis, or the persisted tip
    /// on restart).
    pub fn new(params: ChainParams, trusted: BlockHeader) -> Self {
        let hash = block_hash(&trusted);
        Self {
            params,
            tip: RwLock::new(Tip {
                header: trusted,
                hash,
            }),
        }
    }

    pub fn tip(&self) -> Tip {
        self.tip.read().clone()
    }

    pub fn tip_number(&self) -> u64 {
        self.tip.read().header.number
    }

    pub fn tip_hash(&self) -> Hash256 {
        self.tip.read().hash
    }

    /// Validates `block` against the tip without moving it.
    ///
    /// `computed_state_root` is the root obtained by actually executing the
    /// block; the production append path always supplies it. Passing `None`
    /// skips that check and exists for tests that construct blocks without
    /// execution.
    pub fn validate_block(
        &self,
        block: &Block,
        computed_state_root: Option<Hash256>,
    ) -> Result<(), BlockError> {
        let tip = self.tip.read();
        let header = &block.header;

        if header.parent_hash != tip.hash {
            return Err(BlockError::ParentHashMismatch {
                expected: tip.hash,
                got: header.parent_hash,
            });
        }
        if header.number != tip.header.number + 1 {
            return Err(BlockError::InvalidNumber {
                expected: tip.header.number + 1,
                got: header.number,
            });
        }
        if header.timestamp_ms <= tip.header.timestamp_ms {
            return Err(BlockError::TimestampNotIncreasing {
                parent: tip.header.timestamp_ms,
                got: header.timestamp_ms,
            });
        }
        if header.chain_id != self.params.chain_id {
            return Err(BlockError::ChainIdMismatch {
                expected: self.params.chain_id,
                got: header.chain_id,
            });
        }
        if header.gas_used > header.gas_limit {
            return Err(BlockError::GasExceedsLimit {
                used: header.gas_used,
                limit: header.gas_limit,
            });
        }
        if header.gas_limit > self.params.block_gas_limit {
            return Err(BlockError::GasLimitTooHigh {
                got: header.gas_limit,
                max: self.params.block_gas_limit,
            });
        }
        let expected_base_fee =
            next_base_fee(tip.header.base_fee, tip.header.gas_used, &self.params);
        if header.base_fee != expected_base_fee {
            return Err(BlockError::BaseFeeMismatch {
                expected: expected_base_fee.to_string(),
                got: header.base_fee.to_string(),
            });
        }
        if header.extra_data.len() > MAX_EXTRA_DATA {
            return Err(BlockError::ExtraDataTooLarge {
                len: header.extra_data.len(),
                max: MAX_EXTRA_DATA,
            });
        }
        if !SUPPORTED_PROTOCOL_VERSIONS.contains(&header.protocol_version) {
            return Err(BlockError::UnsupportedVersion(header.protocol_version));
        }
        if let Some(computed) = computed_state_root {
            if computed != header.state_root {
                return Err(BlockError::StateRootMismatch {
                    expected: header.state_root,
                    got: computed,
                });
            }
        }
        Ok(())
    }

    /// Validates and appends, returning the new tip hash.
    pub fn add_block(
        &self,
        block: &Block,
        computed_state_root: Option<Hash256>,
    ) -> Result<Hash256, BlockError> {
        self.validate_block(block, computed_state_root)?;
        let hash = block_hash(&block.header);
        let mut tip = self.tip.write();
        *tip = Tip {
            header: block.header.clone(),
            hash,
        };
        info!(
            target: "chain",
            number = block.header.number,
            %hash,
            txs = block.transactions.len(),
            "chain tip advanced"
        );
        Ok(hash)
    }

    /// Rewinds the tip to a previously validated header; the sync rollback
    /// path after a failed batch.
    pub fn rewind_to(&self, header: BlockHeader) {
        let hash = block_hash(&header);
        let mut tip = self.tip.write();
        info!(
            target: "chain",
            from = tip.header.number,
            to = header.number,
            "chain tip rewound"
        );
        *tip = Tip { header, hash };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use basalt_types::{Address, U256};

    fn params() -> ChainParams {
        ChainParams::default().validated().unwrap()
    }

    fn genesis() -> BlockHeader {
        BlockHeader {
            number: 0,
            parent_hash: Hash256::ZERO,
            chain_id: 100,
            timestamp_ms: 1_000,
            state_root: Hash256::ZERO,
            tx_root: Hash256::ZERO,
            receipts_root: Hash256::ZERO,
            gas_used: 0,
            gas_limit: 30_000_000,
            base_fee: U256::from(1_000_000_000u64),
            proposer: Address::ZERO,
            extra_data: vec![],
            protocol_version: 1,
        }
    }

    fn child_of(parent: &BlockHeader, p: &ChainParams) -> Block {
        Block {
            header: BlockHeader {
                number: parent.number + 1,
                parent_hash: block_hash(parent),
                chain_id: parent.chain_id,
                timestamp_ms: parent.timestamp_ms + 2_000,
                state_root: Hash256([7; 32]),
                tx_root: Hash256::ZERO,
                receipts_root: Hash256::ZERO,
                gas_used: 0,
                gas_limit: p.block_gas_limit,
                base_fee: next_base_fee(parent.base_fee, parent.gas_used, p),
                proposer: Address::ZERO,
                extra_data: vec![],
                protocol_version: 1,
            },
            transactions: vec![],
            commit_bitmap: 0b1,
        }
    }

    #[test]
    fn appends_a_valid_child() {
        let p = params();
        let manager = ChainManager::new(p.clone(), genesis());
        let block = child_of(&genesis(), &p);
        let hash = manager.add_block(&block, Some(Hash256([7; 32]))).unwrap();
        assert_eq!(manager.tip_number(), 1);
        assert_eq!(manager.tip_hash(), hash);
    }

    #[test]
    fn rejects_wrong_parent_and_number() {
        let p = params();
        let manager = ChainManager::new(p.clone(), genesis());
        let mut block = child_of(&genesis(), &p);
        block.header.parent_hash = Hash256([9; 32]);
        assert!(matches!(
            manager.validate_block(&block, None),
            Err(BlockError::ParentHashMismatch { .. })
        ));

        let mut block = child_of(&genesis(), &p);
        block.header.number = 5;
        assert!(matches!(
            manager.validate_block(&block, None),
            Err(BlockError::InvalidNumber { expected: 1, got: 5 })
        ));
    }

    #[test]
    fn rejects_non_increasing_timestamp() {
        let p = params();
        let manager = ChainManager::new(p.clone(), genesis());
        let mut block = child_of(&genesis(), &p);
        block.header.timestamp_ms = genesis().timestamp_ms;
        assert!(matches!(
            manager.validate_block(&block, None),
            Err(BlockError::TimestampNotIncreasing { .. })
        ));
    }

    #[test]
    fn rejects_wrong_base_fee() {
        let p = params();
        let manager = ChainManager::new(p.clone(), genesis());
        let mut block = child_of(&genesis(), &p);
        block.header.base_fee = block.header.base_fee + U256::one();
        assert!(matches!(
            manager.validate_block(&block, None),
            Err(BlockError::BaseFeeMismatch { .. })
        ));
    }

    #[test]
    fn state_root_check_on_the_production_path() {
        let p = params();
        let manager = ChainManager::new(p.clone(), genesis());
        let block = child_of(&genesis(), &p);
        assert!(matches!(
            manager.validate_block(&block, Some(Hash256([8; 32]))),
            Err(BlockError::StateRootMismatch { .. })
        ));
        assert!(manager.validate_block(&block, Some(Hash256([7; 32]))).is_ok());
    }

    #[test]
    fn rejects_unsupported_protocol_version() {
        let p = params();
        let manager = ChainManager::new(p.clone(), genesis());
        let mut block = child_of(&genesis(), &p);
        block.header.protocol_version = 99;
        assert!(matches!(
            manager.validate_block(&block, None),
            Err(BlockError::UnsupportedVersion(99))
        ));
    }

    #[test]
    fn rewind_restores_a_prior_tip() {
        let p = params();
        let manager = ChainManager::new(p.clone(), genesis());
        let block = child_of(&genesis(), &p);
        manager.add_block(&block, None).unwrap();
        assert_eq!(manager.tip_number(), 1);

        manager.rewind_to(genesis());
        assert_eq!(manager.tip_number(), 0);
        assert_eq!(manager.tip_hash(), block_hash(&genesis()));
    }
}
