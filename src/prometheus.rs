use strum_macros::{Display, EnumIter, EnumMessage};

use crate::metrics::MetricsGauge;

// Define an enum for all rollup tracker metrics gauges.
#[derive(Debug, Clone, Copy, Display, EnumIter, EnumMessage)]
pub enum TrackerGauge {
    // Chain state metrics
    #[strum(
        serialize = "rollup_tracker_last_verified_block_id",
        message = "Last verified rollup block id"
    )]
    LastVerifiedBlockId,
    #[strum(serialize = "rollup_tracker_num_blocks", message = "Number of proposed rollup blocks")]
    NumBlocks,
    #[strum(
        serialize = "rollup_tracker_proving_paused",
        message = "1 while proving or the contract is paused"
    )]
    ProvingPaused,
    #[strum(
        serialize = "rollup_tracker_open_contests",
        message = "Number of contested transitions awaiting a higher tier proof"
    )]
    OpenContests,
    #[strum(serialize = "rollup_tracker_l1_cursor", message = "Last L1 block fully applied")]
    L1Cursor,
    // Sync metrics
    #[strum(
        serialize = "rollup_tracker_events_applied",
        message = "Total number of rollup events applied"
    )]
    EventsApplied,
    #[strum(
        serialize = "rollup_tracker_duplicate_events",
        message = "Total number of re-delivered logs dropped"
    )]
    DuplicateEvents,
    #[strum(
        serialize = "rollup_tracker_blocks_verified_locally",
        message = "Total number of blocks verified by the local verification engine"
    )]
    BlocksVerifiedLocally,
    #[strum(serialize = "rollup_tracker_resyncs", message = "Total number of full resyncs")]
    Resyncs,
    // Error metrics
    #[strum(
        serialize = "rollup_tracker_decode_errors",
        message = "Total number of logs that could not be decoded"
    )]
    DecodeErrors,
    #[strum(
        serialize = "rollup_tracker_sync_errors",
        message = "Total number of errors encountered by the sync loop"
    )]
    SyncErrors,
    #[strum(
        serialize = "rollup_tracker_checkpoint_errors",
        message = "Total number of checkpoint write failures"
    )]
    CheckpointErrors,
}

impl MetricsGauge for TrackerGauge {}
