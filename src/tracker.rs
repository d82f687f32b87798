//! The single-writer sync loop and the read handle it publishes snapshots to.

use std::{
    collections::{BTreeMap, BTreeSet, HashSet},
    sync::Arc,
    time::Duration,
};

use alloy_primitives::{Address, B256, U256};
use alloy_rpc_types_eth::Log;
use futures::StreamExt;
use tokio::{sync::watch, time};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::{
    checkpoint::Checkpoint,
    config::SyncConfig,
    error::{TrackerError, TrackerResult},
    events::{DecodedEvent, EventDecoder, EventId},
    metrics::MetricsGauge,
    prometheus::TrackerGauge,
    state::TrackerState,
    types::{BlockRecord, TierPolicy, TransitionState},
    ChainClient,
};

const RESYNC_BACKOFF: Duration = Duration::from_secs(1);
const MAX_RESYNC_BACKOFF: Duration = Duration::from_secs(60);

/// Cheap, cloneable read access to the latest published [`TrackerState`].
#[derive(Debug, Clone)]
pub struct TrackerHandle {
    rx: watch::Receiver<Arc<TrackerState>>,
}

impl TrackerHandle {
    /// The latest fully applied state. Never reflects a partially applied L1 block.
    pub fn snapshot(&self) -> Arc<TrackerState> {
        self.rx.borrow().clone()
    }

    pub fn block(&self, block_id: u64) -> Option<BlockRecord> {
        self.snapshot().ledger.get_block(block_id).cloned()
    }

    pub fn transition_by_parent_hash(&self, block_id: u64, parent_hash: B256) -> Option<TransitionState> {
        self.snapshot().transitions.lookup_by_parent_hash(block_id, parent_hash).cloned()
    }

    pub fn transition_by_id(&self, block_id: u64, transition_id: u32) -> Option<TransitionState> {
        self.snapshot().transitions.lookup_by_id(block_id, transition_id).cloned()
    }

    /// Bond balance of `user`, or `None` for an account the tracker has not loaded.
    pub fn balance_of(&self, user: Address) -> Option<U256> {
        self.snapshot().bonds.balance_of(user)
    }

    /// Last verified block, including blocks verified locally ahead of the chain.
    pub fn last_verified_block_id(&self) -> u64 {
        self.snapshot().last_verified_block_id()
    }

    /// Last block the chain has verified itself.
    pub fn confirmed_block_id(&self) -> u64 {
        self.snapshot().confirmed_block_id()
    }

    pub fn proving_paused(&self) -> bool {
        self.snapshot().chain.slot_b.proving_paused
    }

    /// Unverified blocks that still need a proof on the canonical chain, oldest first.
    ///
    /// Past the first block without a canonical transition the parent hash is unknown,
    /// so later blocks are only listed if they have no transition at all.
    pub fn unproven_blocks(&self, limit: usize) -> Vec<u64> {
        let state = self.snapshot();
        let mut parent = Some(state.chain.last_verified_block_hash);
        let mut unproven = Vec::new();

        for block_id in state.last_verified_block_id() + 1..state.num_blocks() {
            if unproven.len() >= limit {
                break;
            }
            match parent.and_then(|hash| state.transitions.lookup_by_parent_hash(block_id, hash)) {
                Some(ts) => parent = Some(ts.block_hash),
                None => {
                    if parent.is_some() || state.transitions.transition_count(block_id) == 0 {
                        unproven.push(block_id);
                    }
                    parent = None;
                }
            }
        }
        unproven
    }

    /// Contested transitions as `(block_id, transition)`.
    pub fn open_contests(&self) -> Vec<(u64, TransitionState)> {
        self.snapshot().transitions.contested().map(|(id, ts)| (id, ts.clone())).collect()
    }

    /// Waits for the next published snapshot. Returns `false` once the tracker is gone.
    pub async fn changed(&mut self) -> bool {
        self.rx.changed().await.is_ok()
    }
}

/// Log ids applied per L1 block, kept for a sliding window of blocks.
#[derive(Debug, Default)]
struct SeenLogs {
    /// Every L1 block at or below this one is considered fully applied.
    floor: u64,
    ids: BTreeMap<u64, HashSet<EventId>>,
}

impl SeenLogs {
    fn new(floor: u64) -> Self {
        Self { floor, ids: BTreeMap::new() }
    }

    fn contains(&self, event: &DecodedEvent) -> bool {
        event.l1_block <= self.floor
            || self.ids.get(&event.l1_block).is_some_and(|ids| ids.contains(&event.id))
    }

    fn insert(&mut self, event: &DecodedEvent) {
        self.ids.entry(event.l1_block).or_default().insert(event.id);
    }

    fn prune(&mut self, cursor: u64, window: u64) {
        self.floor = self.floor.max(cursor.saturating_sub(window));
        self.ids = self.ids.split_off(&(self.floor + 1));
    }
}

pub struct RollupTracker<C>
where
    C: ChainClient,
{
    pub config: SyncConfig,
    client: C,
    decoder: EventDecoder,
    state: Arc<TrackerState>,
    /// Last L1 block whose events are fully applied.
    cursor: u64,
    seen: SeenLogs,
    tx: watch::Sender<Arc<TrackerState>>,
}

impl<C> RollupTracker<C>
where
    C: ChainClient,
{
    /// Creates a tracker from the configured checkpoint, or from contract storage when
    /// there is none.
    pub async fn new(client: C, config: SyncConfig) -> TrackerResult<Self> {
        let restored = config.checkpoint_path.as_deref().and_then(Checkpoint::load);
        let (state, cursor) = match restored {
            Some(checkpoint) => {
                tracing::info!(
                    "Restored checkpoint at L1 block {} with last verified block {}",
                    checkpoint.cursor,
                    checkpoint.state.last_verified_block_id()
                );
                (checkpoint.state, checkpoint.cursor)
            }
            None => bootstrap(&client, &config).await?,
        };
        Ok(Self::with_state(client, config, state, cursor))
    }

    pub(crate) fn with_state(client: C, config: SyncConfig, state: TrackerState, cursor: u64) -> Self {
        let state = Arc::new(state);
        let (tx, _) = watch::channel(state.clone());
        Self {
            config,
            client,
            decoder: EventDecoder::new(),
            state,
            cursor,
            seen: SeenLogs::new(cursor),
            tx,
        }
    }

    pub fn handle(&self) -> TrackerHandle {
        TrackerHandle { rx: self.tx.subscribe() }
    }

    pub fn cursor(&self) -> u64 {
        self.cursor
    }

    pub fn state(&self) -> &TrackerState {
        &self.state
    }

    /// Discards local state and rebuilds it from contract storage at the current L1 head.
    pub async fn resync(&mut self) -> TrackerResult<()> {
        let (state, cursor) = bootstrap(&self.client, &self.config).await?;
        self.cursor = cursor;
        self.seen = SeenLogs::new(cursor);
        self.publish(state);
        self.save_checkpoint();
        TrackerGauge::Resyncs.increment(1.0);
        Ok(())
    }

    /// Resyncs, retrying client errors with exponential backoff until it succeeds or
    /// `cancel` fires. Fatal errors are returned.
    pub async fn resync_with_retry(&mut self, cancel: &CancellationToken) -> TrackerResult<()> {
        let mut delay = RESYNC_BACKOFF;
        loop {
            match self.resync().await {
                Ok(()) => return Ok(()),
                Err(e) if !e.is_fatal() => {
                    tracing::warn!("Resync failed, retrying in {:?}: {:?}", delay, e);
                    TrackerGauge::SyncErrors.increment(1.0);
                    tokio::select! {
                        _ = cancel.cancelled() => return Ok(()),
                        _ = time::sleep(delay) => {}
                    }
                    delay = (delay * 2).min(MAX_RESYNC_BACKOFF);
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Runs the sync loop until `cancel` fires or a fatal error occurs. Transient client
    /// errors are logged and retried on the next tick.
    pub async fn run(&mut self, cancel: CancellationToken) -> TrackerResult<()> {
        tracing::info!("Rollup tracker running from L1 block {}...", self.cursor);
        let mut interval = time::interval(Duration::from_secs(self.config.fetch_interval.max(1)));
        let mut metrics_interval = time::interval(Duration::from_secs(15));

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Rollup tracker stopped at L1 block {}", self.cursor);
                    return Ok(());
                }
                _ = interval.tick() => {
                    let synced = self
                        .catch_up(&cancel)
                        .instrument(tracing::info_span!("[[Syncing]]"))
                        .await;
                    self.check(synced)?;

                    if self.config.use_log_subscription && !cancel.is_cancelled() {
                        let followed = self
                            .follow(&cancel)
                            .instrument(tracing::info_span!("[[Following]]"))
                            .await;
                        self.check(followed)?;
                    }
                    self.save_checkpoint();
                }
                _ = metrics_interval.tick() => self.report_metrics(),
            }
        }
    }

    fn check(&self, result: TrackerResult<()>) -> TrackerResult<()> {
        match result {
            Ok(()) => Ok(()),
            Err(e) if e.is_fatal() => {
                tracing::error!("Sync loop stopped at L1 block {}: {}", self.cursor, e);
                TrackerGauge::SyncErrors.increment(1.0);
                Err(e)
            }
            Err(e) => {
                tracing::warn!("Failed to sync rollup events: {:?}", e);
                TrackerGauge::SyncErrors.increment(1.0);
                Ok(())
            }
        }
    }

    /// Applies logs with `getLogs` from the cursor up to the current L1 head.
    pub async fn catch_up(&mut self, cancel: &CancellationToken) -> TrackerResult<()> {
        let head = self.client.block_number().await?;
        self.sync_to(head, cancel).await
    }

    /// Applies logs with `getLogs` in `(cursor, head]`, moving the cursor one range at a
    /// time.
    async fn sync_to(&mut self, head: u64, cancel: &CancellationToken) -> TrackerResult<()> {
        while self.cursor < head && !cancel.is_cancelled() {
            let from = self.cursor + 1;
            let to = head.min(from + self.config.log_batch_size.max(1) - 1);
            tracing::debug!("Fetching rollup logs in L1 blocks {}..={}", from, to);

            let logs = self.client.get_logs(from, to).await?;
            self.ingest(logs).await?;
            self.advance_clock(to).await?;
            self.cursor = self.cursor.max(to);
            self.seen.prune(self.cursor, self.config.dedup_window_blocks);
        }
        Ok(())
    }

    /// Follows the log subscription until it ends or `cancel` fires. Logs are buffered
    /// per L1 block and applied once a later block shows up.
    ///
    /// The cursor never covers a block whose logs were only buffered, so dropping them
    /// on return is safe: the next catch-up fetches them again. A quiet stream says
    /// nothing about the head since the poller lags it, so quiet periods are filled
    /// from `getLogs`.
    async fn follow(&mut self, cancel: &CancellationToken) -> TrackerResult<()> {
        let mut logs = self.client.subscribe_logs(self.cursor + 1).await?;
        let quiet = Duration::from_secs(self.config.fetch_interval.max(1));
        let mut pending: Vec<Log> = Vec::new();

        loop {
            let next = tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                next = time::timeout(quiet, logs.next()) => next,
            };

            match next {
                Ok(Some(log)) => {
                    let block = log.block_number;
                    if pending.last().is_some_and(|last| last.block_number != block) {
                        self.ingest(std::mem::take(&mut pending)).await?;
                    }
                    pending.push(log);
                }
                Ok(None) => {
                    tracing::info!("Log subscription ended at L1 block {}", self.cursor);
                    return Ok(());
                }
                Err(_) => {
                    let head = self.client.block_number().await?;
                    pending.retain(|log| log.block_number.is_some_and(|block| block > head));
                    self.sync_to(head, cancel).await?;
                }
            }
        }
    }

    /// Decodes `logs` and applies them one L1 block at a time.
    pub async fn ingest(&mut self, logs: Vec<Log>) -> TrackerResult<()> {
        let mut blocks: BTreeMap<u64, Vec<DecodedEvent>> = BTreeMap::new();
        for log in &logs {
            match self.decoder.decode(log) {
                Ok(event) => blocks.entry(event.l1_block).or_default().push(event),
                Err(e) => {
                    tracing::warn!("Skipping undecodable log {:?}: {}", log.transaction_hash, e);
                    TrackerGauge::DecodeErrors.increment(1.0);
                }
            }
        }

        for (l1_block, mut events) in blocks {
            events.sort_by_key(|event| event.id.1);
            self.apply_block(l1_block, events).await?;
        }
        Ok(())
    }

    async fn apply_block(&mut self, l1_block: u64, events: Vec<DecodedEvent>) -> TrackerResult<()> {
        let mut fresh = Vec::with_capacity(events.len());
        let mut ids = BTreeSet::new();
        for event in events {
            if event.removed {
                if self.seen.contains(&event) {
                    return Err(TrackerError::desync(format!(
                        "applied {} in L1 block {} was removed by a reorg",
                        event.event.name(),
                        l1_block
                    )));
                }
                continue;
            }
            if self.seen.contains(&event) || !ids.insert(event.id) {
                tracing::debug!("Dropping re-delivered {} {:?}", event.event.name(), event.id);
                TrackerGauge::DuplicateEvents.increment(1.0);
                continue;
            }
            fresh.push(event);
        }
        if fresh.is_empty() {
            return Ok(());
        }

        let timestamp = match fresh.iter().find_map(|event| event.l1_timestamp) {
            Some(timestamp) => timestamp,
            None => self.client.block_timestamp(l1_block).await?,
        };

        // Accounts never seen since the last resync start from their on-chain balance
        // before this block.
        let before = l1_block.saturating_sub(1);
        let mut balances = Vec::new();
        for user in self.state.unknown_bond_accounts(&fresh) {
            let balance = self.client.bond_balance_of(user, before).await?;
            tracing::debug!("Loaded bond balance {} of {} at L1 block {}", balance, user, before);
            balances.push((user, balance));
        }

        let (next, summary) = self.state.apply_batch_seeded(&balances, &fresh, timestamp)?;
        for event in &fresh {
            self.seen.insert(event);
        }
        self.cursor = self.cursor.max(l1_block);

        TrackerGauge::EventsApplied.increment(summary.applied as f64);
        if !summary.verified.is_empty() {
            TrackerGauge::BlocksVerifiedLocally.increment(summary.verified.len() as f64);
        }
        tracing::debug!(
            "Applied {} events from L1 block {}, last verified block {}",
            summary.applied,
            l1_block,
            next.last_verified_block_id()
        );
        self.publish(next);
        Ok(())
    }

    /// Moves the L1 clock to `l1_block` so cooldowns can expire without new events.
    async fn advance_clock(&mut self, l1_block: u64) -> TrackerResult<()> {
        if self.state.tiers.is_empty() || self.state.is_paused() {
            return Ok(());
        }
        let timestamp = self.client.block_timestamp(l1_block).await?;
        if timestamp <= self.state.chain.l1_timestamp {
            return Ok(());
        }

        let (next, summary) = self.state.apply_batch(&[], timestamp)?;
        if !summary.verified.is_empty() {
            TrackerGauge::BlocksVerifiedLocally.increment(summary.verified.len() as f64);
        }
        self.publish(next);
        Ok(())
    }

    fn publish(&mut self, state: TrackerState) {
        let state = Arc::new(state);
        self.state = state.clone();
        self.tx.send_replace(state);
    }

    fn save_checkpoint(&self) {
        let Some(path) = &self.config.checkpoint_path else {
            return;
        };
        let checkpoint = Checkpoint::new(self.cursor, (*self.state).clone());
        if let Err(e) = checkpoint.save(path) {
            tracing::warn!("Failed to write checkpoint {}: {}", path.display(), e);
            TrackerGauge::CheckpointErrors.increment(1.0);
        }
    }

    fn report_metrics(&self) {
        let state = &self.state;
        TrackerGauge::LastVerifiedBlockId.set(state.last_verified_block_id() as f64);
        TrackerGauge::NumBlocks.set(state.num_blocks() as f64);
        TrackerGauge::ProvingPaused.set(if state.is_paused() { 1.0 } else { 0.0 });
        TrackerGauge::OpenContests.set(state.transitions.contested().count() as f64);
        TrackerGauge::L1Cursor.set(self.cursor as f64);
    }
}

/// Rebuilds tracker state from contract storage pinned at the current L1 head.
///
/// Only the canonical transition chain is restored: the transition of each unverified
/// block built on the previous canonical block hash, until the first unproven block.
async fn bootstrap<C>(client: &C, config: &SyncConfig) -> TrackerResult<(TrackerState, u64)>
where
    C: ChainClient,
{
    let at = client.block_number().await?;
    tracing::info!("Bootstrapping rollup state at L1 block {}", at);

    let protocol = client.get_config(at).await?;
    let mut tiers = Vec::new();
    for tier_id in client.get_tier_ids(at).await? {
        tiers.push((tier_id, client.get_tier(tier_id, at).await?));
    }
    let (slot_a, slot_b) = client.get_state_variables(at).await?;
    let head = client.get_last_verified_block(at).await?;
    if head.block_id != slot_b.last_verified_block_id {
        return Err(TrackerError::desync(format!(
            "last verified block {} disagrees with state variables ({})",
            head.block_id, slot_b.last_verified_block_id
        )));
    }

    let synced = client.get_last_synced_block(at).await?;
    if synced.block_id != slot_a.last_synced_block_id {
        return Err(TrackerError::desync(format!(
            "last synced block {} disagrees with state variables ({})",
            synced.block_id, slot_a.last_synced_block_id
        )));
    }

    let head_record = client.get_block(head.block_id, at).await?;
    let max_blocks_to_verify = config.max_blocks_to_verify.unwrap_or(protocol.max_blocks_to_verify);
    let mut state = TrackerState::new(
        protocol.block_ring_buffer_size,
        max_blocks_to_verify,
        TierPolicy::new(tiers),
        head_record,
        head.block_hash,
    )?;
    state.chain.slot_a = slot_a;
    state.chain.slot_b = slot_b;
    state.chain.contract_paused = client.paused(at).await?;
    state.chain.l1_timestamp = client.block_timestamp(at).await?;

    let mut accounts: BTreeSet<Address> = config.tracked_accounts.iter().copied().collect();
    let mut parent = Some(head.block_hash);
    for block_id in head.block_id + 1..slot_b.num_blocks {
        let record = client.get_block(block_id, at).await?;
        if record.block_id != block_id {
            return Err(TrackerError::desync(format!(
                "getBlock({block_id}) returned block {}",
                record.block_id
            )));
        }
        accounts.insert(record.assigned_prover);
        let next_transition_id = record.next_transition_id;
        state.ledger.upsert_block(record)?;

        let Some(parent_hash) = parent else { continue };
        parent = None;
        let Some(ts) = client.get_transition_by_parent_hash(block_id, parent_hash, at).await? else {
            continue;
        };

        let mut transition_id = None;
        for tid in 1..next_transition_id {
            if client.get_transition_by_id(block_id, tid, at).await? == ts {
                transition_id = Some(tid);
                break;
            }
        }
        let transition_id = transition_id.ok_or_else(|| {
            TrackerError::desync(format!("no transition id of block {block_id} matches parent {parent_hash}"))
        })?;

        let restored = TransitionState::from_chain(block_id, parent_hash, ts);
        accounts.insert(restored.prover);
        if !restored.contester.is_zero() {
            accounts.insert(restored.contester);
        }
        parent = Some(restored.block_hash);
        state.transitions.restore(block_id, transition_id, restored);
    }

    for user in accounts {
        let balance = client.bond_balance_of(user, at).await?;
        state.bonds.seed(user, balance);
    }

    tracing::info!(
        "Bootstrapped {} unverified blocks after verified block {} at L1 block {}",
        slot_b.num_blocks.saturating_sub(head.block_id + 1),
        head.block_id,
        at
    );
    Ok((state, at))
}
