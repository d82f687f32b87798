use alloy_sol_macro::sol;

sol! {
    #[sol(rpc)]
    #[derive(Debug, PartialEq)]
    contract TaikoL1 {
        // Structs
        struct BlockMetadata {
            bytes32 l1Hash;
            bytes32 difficulty;
            bytes32 blobHash;
            bytes32 extraData;
            bytes32 depositsHash;
            address coinbase;
            uint64 id;
            uint32 gasLimit;
            uint64 timestamp;
            uint64 l1Height;
            uint16 minTier;
            bool blobUsed;
            bytes32 parentMetaHash;
            address sender;
        }

        struct BlockMetadataV2 {
            bytes32 anchorBlockHash;
            bytes32 difficulty;
            bytes32 blobHash;
            bytes32 extraData;
            address coinbase;
            uint64 id;
            uint32 gasLimit;
            uint64 timestamp;
            uint64 anchorBlockId;
            uint16 minTier;
            bool blobUsed;
            bytes32 parentMetaHash;
            address proposer;
            uint96 livenessBond;
            uint64 proposedAt;
            uint64 proposedIn;
            uint32 blobTxListOffset;
            uint32 blobTxListLength;
            uint8 blobIndex;
        }

        struct EthDeposit {
            address recipient;
            uint96 amount;
            uint64 id;
        }

        struct Transition {
            bytes32 parentHash;
            bytes32 blockHash;
            bytes32 stateRoot;
            bytes32 graffiti;
        }

        struct BlockV2 {
            bytes32 metaHash;
            address assignedProver;
            uint96 livenessBond;
            uint64 blockId;
            uint64 proposedAt;
            uint64 proposedIn;
            uint24 nextTransitionId;
            bool livenessBondReturned;
            uint24 verifiedTransitionId;
        }

        struct TransitionState {
            bytes32 key;
            bytes32 blockHash;
            bytes32 stateRoot;
            address prover;
            uint96 validityBond;
            address contester;
            uint96 contestBond;
            uint64 timestamp;
            uint16 tier;
            uint8 __reserved1;
        }

        struct SlotA {
            uint64 genesisHeight;
            uint64 genesisTimestamp;
            uint64 lastSyncedBlockId;
            uint64 lastSynecdAt;
        }

        struct SlotB {
            uint64 numBlocks;
            uint64 lastVerifiedBlockId;
            bool provingPaused;
            uint8 __reservedB1;
            uint16 __reservedB2;
            uint32 __reservedB3;
            uint64 lastUnpausedAt;
        }

        struct Config {
            uint64 chainId;
            uint64 blockMaxProposals;
            uint64 blockRingBufferSize;
            uint64 maxBlocksToVerify;
            uint32 blockMaxGasLimit;
            uint96 livenessBond;
            uint8 stateRootSyncInternal;
            uint64 maxAnchorHeightOffset;
            uint8 basefeeSharingPctg;
            uint8 blockGasTargetMillion;
            uint64 ontakeForkHeight;
        }

        // Events
        event BlockProposed(uint256 indexed blockId, address indexed assignedProver, uint96 livenessBond, BlockMetadata meta, EthDeposit[] depositsProcessed);
        event BlockProposedV2(uint256 indexed blockId, BlockMetadataV2 meta);
        event BlockVerified(uint256 indexed blockId, address indexed prover, bytes32 blockHash, bytes32 stateRoot, uint16 tier);
        event BlockVerifiedV2(uint256 indexed blockId, address indexed prover, bytes32 blockHash, uint16 tier);
        event TransitionProved(uint256 indexed blockId, Transition tran, address prover, uint96 validityBond, uint16 tier);
        event TransitionProvedV2(uint256 indexed blockId, Transition tran, address prover, uint96 validityBond, uint16 tier, uint64 proposedIn);
        event TransitionContested(uint256 indexed blockId, Transition tran, address contester, uint96 contestBond, uint16 tier);
        event TransitionContestedV2(uint256 indexed blockId, Transition tran, address contester, uint96 contestBond, uint16 tier, uint64 proposedIn);
        event StateVariablesUpdated(SlotB slotB);
        event BondCredited(address indexed user, uint256 amount);
        event BondDebited(address indexed user, uint256 amount);
        event ProvingPaused(bool paused);
        event Paused(address account);
        event Unpaused(address account);

        // Errors
        error L1_ALREADY_CONTESTED();
        error L1_ALREADY_PROVED();
        error L1_BLOCK_MISMATCH();
        error L1_CANNOT_CONTEST();
        error L1_INVALID_BLOCK_ID();
        error L1_INVALID_PAUSE_STATUS();
        error L1_INVALID_TIER();
        error L1_INVALID_TRANSITION();
        error L1_NOT_ASSIGNED_PROVER();
        error L1_PROVING_PAUSED();
        error L1_TRANSITION_NOT_FOUND();
        error L1_UNEXPECTED_TRANSITION_ID();

        // View functions
        function bondBalanceOf(address _user) external view returns (uint256);
        function getBlock(uint64 _blockId) external view returns (BlockV2 memory blk_);
        function getConfig() external view returns (Config memory);
        function getLastSyncedBlock() external view returns (uint64 blockId_, bytes32 blockHash_, bytes32 stateRoot_);
        function getLastVerifiedBlock() external view returns (uint64 blockId_, bytes32 blockHash_, bytes32 stateRoot_);
        function getStateVariables() external view returns (SlotA memory slotA, SlotB memory slotB);
        function getTransition(uint64 _blockId, uint32 _tid) external view returns (TransitionState memory);
        function getTransition(uint64 _blockId, bytes32 _parentHash) external view returns (TransitionState memory);
        function getVerifiedBlockProver(uint64 _blockId) external view returns (address);
        function paused() external view returns (bool);
        function lastUnpausedAt() external view returns (uint64);
    }
}

sol! {
    /// Event shapes emitted by the proving library once bonds became per-block.
    #[derive(Debug, PartialEq)]
    interface LibProving {
        event BondCredited(address indexed user, uint256 blockId, uint256 amount);
        event BondDebited(address indexed user, uint256 blockId, uint256 amount);
        event BondDeposited(address indexed user, uint256 amount);
    }
}

sol! {
    #[sol(rpc)]
    #[derive(Debug, PartialEq)]
    contract TierProvider {
        struct Tier {
            bytes32 verifierName;
            uint96 validityBond;
            uint96 contestBond;
            uint24 cooldownWindow;
            uint16 provingWindow;
            uint8 maxBlocksToVerifyPerProof;
        }

        error TIER_NOT_FOUND();

        function getTier(uint16 _tierId) external view returns (Tier memory);
        function getTierIds() external view returns (uint16[] memory);
        function getMinTier(address _proposer, uint256 _rand) external view returns (uint16);
    }
}
