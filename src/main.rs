/// Simulated block sync: a fresh local chain catches up with in-process
/// peers serving a generated chain over tokio channels.
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Weak};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use chain::config::DEFAULT_QUEUE_CAPACITY;
use chain::{Chain, ChainBuilder, ChainConfig, ChainState};
use clap::Parser;
use containers::{Block, BlockBody, B256};
use libp2p_identity::PeerId;
use networking::sync::{SyncConfig, SyncService, SyncState};
use networking::types::{ChannelNetwork, OutboundSyncRequest, PeerStatus, SyncRequest};
use tokio::sync::mpsc;
use tokio::{task, time};
use tracing::{debug, info, warn};

type Service = SyncService<Chain, Chain, ChannelNetwork>;

#[derive(Parser, Debug)]
#[command(about = "Sync a local chain from simulated peers")]
struct Args {
    #[arg(short, long, default_value_t = 4)]
    peers: usize,

    #[arg(short, long, default_value_t = 1_000)]
    blocks: u64,

    #[arg(short, long, default_value_t = DEFAULT_QUEUE_CAPACITY)]
    queue_capacity: usize,

    /// YAML file with sync engine settings.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Let the last peer serve a heavier fork branching off at this block.
    #[arg(long)]
    fork_peer: Option<u64>,

    /// Every n-th block reuses the body of the block n numbers below it.
    #[arg(long, default_value_t = 0)]
    shared_body_interval: u64,

    /// Blocks committed from the import queue per tick.
    #[arg(long, default_value_t = 32)]
    drain_rate: usize,

    #[arg(long, default_value_t = 60)]
    timeout_secs: u64,
}

fn load_sync_config(path: Option<&PathBuf>) -> Result<SyncConfig> {
    let Some(path) = path else {
        return Ok(SyncConfig::default());
    };
    let file = std::fs::File::open(path)
        .with_context(|| format!("failed to open config {}", path.display()))?;
    serde_yaml::from_reader(file).with_context(|| format!("invalid config {}", path.display()))
}

fn generate_chain(config: &ChainConfig, blocks: u64, shared_interval: u64) -> ChainBuilder {
    let mut builder = ChainBuilder::new(config);
    for number in 1..=blocks {
        let body = if shared_interval > 0 && number > shared_interval && number % shared_interval == 0 {
            builder.blocks()[(number - shared_interval) as usize].body.clone()
        } else {
            ChainBuilder::unique_body(number, 0)
        };
        builder.push(body);
    }
    builder
}

fn status_of(builder: &ChainBuilder) -> PeerStatus {
    PeerStatus::new(
        builder.total_difficulty(),
        builder.head().hash(),
        builder.head().number(),
    )
}

/// Answer requests addressed to one simulated peer.
async fn serve_peer(
    peer: PeerId,
    blocks: Arc<Vec<Block>>,
    service: Arc<Service>,
    mut requests: mpsc::UnboundedReceiver<SyncRequest>,
) {
    let bodies: HashMap<B256, BlockBody> = blocks
        .iter()
        .map(|block| (block.hash(), block.body.clone()))
        .collect();

    while let Some(request) = requests.recv().await {
        let result = match request {
            SyncRequest::BlockHeaders { start, count } => {
                let headers = blocks
                    .iter()
                    .skip(start as usize)
                    .take(count as usize)
                    .map(|block| block.header.clone())
                    .collect();
                service.on_peer_block_headers(peer, headers)
            }
            SyncRequest::BlockBodies { hashes } => {
                let found = hashes
                    .iter()
                    .filter_map(|hash| bodies.get(hash).cloned())
                    .collect();
                service.on_peer_block_bodies(peer, found)
            }
        };
        if let Err(err) = result {
            warn!(peer = %peer, %err, "Response rejected by sync");
        }
        task::yield_now().await;
    }
    debug!(peer = %peer, "Peer task finished");
}

/// Route outbound requests to the peer tasks.
async fn dispatch(
    mut outbound: mpsc::UnboundedReceiver<OutboundSyncRequest>,
    peers: HashMap<PeerId, mpsc::UnboundedSender<SyncRequest>>,
) {
    while let Some(OutboundSyncRequest { peer, request }) = outbound.recv().await {
        debug!(peer = %peer, %request, "Dispatching request");
        match peers.get(&peer) {
            Some(sender) if sender.send(request).is_ok() => {}
            _ => debug!(peer = %peer, "No session for request"),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    if args.peers == 0 {
        bail!("at least one peer is required");
    }

    let sync_config = load_sync_config(args.config.as_ref())?;
    let chain_config = ChainConfig::default().with_queue_capacity(args.queue_capacity.max(1));

    let main_chain = generate_chain(&chain_config, args.blocks, args.shared_body_interval);
    let fork_chain = args.fork_peer.map(|number| {
        let extra = args.blocks.saturating_sub(number) as usize + 2;
        main_chain.fork(number.min(args.blocks), 1).extend(extra)
    });
    let target = fork_chain.as_ref().unwrap_or(&main_chain).head().hash();

    let local = Arc::new(Chain::new(ChainBuilder::genesis(&chain_config), &chain_config));
    let (outbound_sender, outbound_receiver) = mpsc::unbounded_channel();
    let service = Arc::new(SyncService::new(
        sync_config,
        local.clone(),
        local.clone(),
        ChannelNetwork::new(outbound_sender),
    ));

    let weak: Weak<Service> = Arc::downgrade(&service);
    local.on_room_available(move || {
        if let Some(service) = weak.upgrade() {
            service.on_room_available();
        }
    });

    let mut sessions = HashMap::new();
    let mut statuses = Vec::new();
    for index in 0..args.peers {
        let builder = match &fork_chain {
            Some(fork) if index + 1 == args.peers => fork,
            _ => &main_chain,
        };
        let peer = PeerId::random();
        let (sender, receiver) = mpsc::unbounded_channel();
        sessions.insert(peer, sender);
        statuses.push((peer, status_of(builder)));
        task::spawn(serve_peer(
            peer,
            Arc::new(builder.blocks().to_vec()),
            service.clone(),
            receiver,
        ));
    }
    task::spawn(dispatch(outbound_receiver, sessions));

    let drain_rate = args.drain_rate.max(1);
    let drainer = local.clone();
    task::spawn(async move {
        let mut ticker = time::interval(Duration::from_millis(5));
        loop {
            ticker.tick().await;
            drainer.drain(drain_rate);
        }
    });

    info!(peers = args.peers, blocks = args.blocks, "Starting simulated sync");
    for (peer, status) in statuses {
        service.on_peer_status(peer, status);
    }

    let deadline = time::Instant::now() + Duration::from_secs(args.timeout_secs);
    let mut ticker = time::interval(Duration::from_millis(250));
    loop {
        ticker.tick().await;
        let status = service.status();
        info!(
            state = %status.state,
            current = status.current_block,
            highest = status.highest_block,
            estimated = status.estimated_hashes,
            queued = local.queued(),
            "Sync progress"
        );

        if status.state == SyncState::Idle && local.head_hash() == target && local.queued() == 0 {
            break;
        }
        if time::Instant::now() >= deadline {
            bail!(
                "sync did not finish within {}s: head {} of {}",
                args.timeout_secs,
                local.head_number(),
                status.highest_block
            );
        }
    }

    info!(
        head = local.head_number(),
        hash = %local.head_hash(),
        "Local chain caught up"
    );
    Ok(())
}
