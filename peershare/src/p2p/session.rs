use std::{collections::HashSet, sync::Arc};
use bytes::Bytes;
use tokio::{sync::mpsc, net::TcpStream, time};
use tokio_util::codec::{Framed, FramedParts};
use futures::{SinkExt, StreamExt, stream::SplitSink};
use crate::{
    config::PeerInfo,
    disk::CommandToDisk,
    event,
    picker,
    store::Applied,
    swarm::{CommandToSwarm, SwarmContext},
    Bitfield,
    PeerId,
};
use super::{*, message::*, handshake::*, state::*};

type MessageSink = SplitSink<Framed<TcpStream, MessageCodec>, Message>;

const CONNECT_TIMEOUT: time::Duration = time::Duration::from_secs(10);
const CONNECT_ATTEMPTS: u32 = 10;
const CONNECT_RETRY_DELAY: time::Duration = time::Duration::from_secs(1);

#[derive(Debug)]
pub struct PeerSession {

    // Read only state shared by all sessions.
    ctx: Arc<SwarmContext>,

    // Set for outbound sessions, the peer we dial and expect to answer.
    expected: Option<PeerInfo>,

    // Identity of the remote once the handshake is verified.
    remote: Option<PeerId>,

    // Commands to the session.
    peer_rx: PeerRx,

    // Kept to identify this session to the registry.
    peer_tx: PeerTx,

    // Pieces requested from the peer and not yet received.
    requests_out: HashSet<usize>,

    // Pieces the peer currently has.
    bitfield: Bitfield,

    state: SharedState,

    // The peer's completion has been reported to the swarm.
    reported_complete: bool,

}

impl PeerSession {

    pub fn outbound(ctx: Arc<SwarmContext>, peer: PeerInfo) -> PeerSession {
        Self::new(ctx, Some(peer))
    }

    pub fn inbound(ctx: Arc<SwarmContext>) -> PeerSession {
        Self::new(ctx, None)
    }

    fn new(ctx: Arc<SwarmContext>, expected: Option<PeerInfo>) -> PeerSession {
        let (peer_tx, peer_rx) = mpsc::unbounded_channel();
        let bitfield = Bitfield::repeat(false, ctx.info.num_pieces);
        PeerSession {
            ctx,
            expected,
            remote: None,
            peer_rx,
            peer_tx,
            requests_out: HashSet::new(),
            bitfield,
            state: SharedState::default(),
            reported_complete: false,
        }
    }

    #[tracing::instrument(
        name = "peer",
        skip_all,
        fields(local = self.ctx.local_id, remote = tracing::field::Empty)
    )]
    pub async fn start_session(mut self, inbound_stream: Option<TcpStream>) -> Result<()> {
        let res = self.connect_and_run(inbound_stream).await;
        if let Err(e) = &res {
            tracing::warn!("session closed: {}", e);
        }
        self.close();
        res
    }

    async fn connect_and_run(&mut self, inbound_stream: Option<TcpStream>) -> Result<()> {

        self.state.update(|state| state.conn_state = ConnState::Connecting);
        let stream = match (inbound_stream, &self.expected) {
            (Some(stream), _) => stream,
            (None, Some(peer)) => connect(peer).await?,
            // Inbound sessions are always handed their stream.
            (None, None) => return Err(PeerError::ConnectionFailure(0)),
        };
        let mut socket = Framed::new(stream, HandshakeCodec);

        let remote = self.exchange_handshake(&mut socket).await?;
        self.remote = Some(remote);
        tracing::Span::current().record("remote", remote);

        // Keep anything the peer sent straight after its handshake.
        let parts = socket.into_parts();
        let mut msg_parts = FramedParts::new::<Message>(
            parts.io,
            MessageCodec::new(&self.ctx.info),
        );
        msg_parts.read_buf = parts.read_buf;
        msg_parts.write_buf = parts.write_buf;
        let socket = Framed::from_parts(msg_parts);

        self.ctx.swarm_tx.send(CommandToSwarm::PeerConnected {
            id: remote,
            peer_tx: self.peer_tx.clone(),
            state: self.state.clone(),
        })?;

        self.run(socket).await
    }

    fn close(&mut self) {
        let (last_state, throughput) = self.state.update(|state| {
            let last_state = std::mem::replace(&mut state.conn_state, ConnState::Closed);
            (last_state, state.throughput)
        });
        tracing::debug!(
            "session closed while {:?}, {} bytes down, {} bytes up",
            last_state,
            throughput.down.total(),
            throughput.up.total()
        );
        if let Some(id) = self.remote {
            self.ctx.swarm_tx.send(CommandToSwarm::PeerDisconnected {
                id,
                peer_tx: self.peer_tx.clone(),
            }).ok();
        }
    }

    // Outbound sends first and checks the answer is from the peer it dialled.
    // Inbound waits, checks the identity is configured, then answers.
    async fn exchange_handshake(&mut self, socket: &mut Framed<TcpStream, HandshakeCodec>) -> Result<PeerId> {

        self.state.update(|state| state.conn_state = ConnState::AwaitingHandshake);
        let local = self.ctx.local_id;
        let handshake = Handshake::new(local);

        if self.expected.is_some() {
            tracing::debug!("send handshake");
            socket.send(handshake).await?;
        }

        tracing::trace!("waiting for handshake");
        let remote = match socket.next().await {
            Some(res) => res?.peer_id,
            None => return Err(PeerError::NoHandshake),
        };
        tracing::debug!("read: handshake from {}", remote);

        match &self.expected {
            Some(peer) if peer.id != remote => return Err(PeerError::HandshakeMismatch(remote)),
            Some(_) => event::connection_made(local, remote),
            None if !self.ctx.is_known_peer(remote) => return Err(PeerError::HandshakeMismatch(remote)),
            None => {
                tracing::debug!("send handshake");
                socket.send(handshake).await?;
                event::connection_received(local, remote);
            },
        }

        self.state.update(|state| state.conn_state = ConnState::HandshakeVerified);
        Ok(remote)
    }

    async fn run(&mut self, socket: Framed<TcpStream, MessageCodec>) -> Result<()> {

        let (mut sink, mut stream) = socket.split();

        self.state.update(|state| state.conn_state = ConnState::Active);

        // Always sent, even when we hold nothing.
        let bitfield = self.ctx.store.read().await.bitfield().clone();
        self.send_message(&mut sink, Message::Bitfield(bitfield)).await?;

        loop { tokio::select! {

            // Message from peer.
            msg = stream.next() => match msg {
                Some(msg) => self.handle_msg(&mut sink, msg?).await?,
                None => {
                    tracing::info!("peer closed the connection");
                    break;
                },
            },

            // Command from the swarm.
            Some(cmd) = self.peer_rx.recv() => {
                match cmd {

                    PeerCommand::Choke => self.set_choking(&mut sink, true).await?,

                    PeerCommand::Unchoke => self.set_choking(&mut sink, false).await?,

                    PeerCommand::Have(idx) => self.handle_acquired_piece(&mut sink, idx).await?,

                    PeerCommand::Shutdown => {
                        tracing::info!("session shutdown");
                        sink.close().await.ok();
                        break;
                    },

                }
            }

        }}

        Ok(())
    }

    // Logs a message and sends to peer.
    #[inline(always)]
    async fn send_message(&mut self, sink: &mut MessageSink, msg: Message) -> Result<()> {
        tracing::debug!("send: {}", msg);
        sink.send(msg).await
    }

    fn remote_id(&self) -> PeerId {
        self.remote.unwrap_or_default()
    }

    async fn handle_msg(&mut self, sink: &mut MessageSink, msg: Message) -> Result<()> {
        tracing::debug!("read: {}", msg);
        let (local, remote) = (self.ctx.local_id, self.remote_id());

        match msg {

            Message::Bitfield(bitfield) => self.handle_bitfield(sink, bitfield).await?,

            Message::Have { idx } => self.handle_have(sink, idx as usize).await?,

            Message::Choke => {
                event::choked_by(local, remote);
                self.state.update(|state| state.peer_choking = true);
                // The peer won't answer what is still outstanding.
                self.requests_out.clear();
            },

            Message::Unchoke => {
                event::unchoked_by(local, remote);
                let interested = self.state.update(|state| {
                    state.peer_choking = false;
                    state.am_interested
                });
                if interested {
                    self.make_request(sink).await?;
                }
            },

            Message::Interested => {
                event::interested_received(local, remote);
                self.state.update(|state| state.peer_interested = true);
            },

            Message::NotInterested => {
                event::not_interested_received(local, remote);
                self.state.update(|state| state.peer_interested = false);
            },

            Message::Request { idx } => self.handle_request(sink, idx as usize).await?,

            Message::Piece { idx, data } => self.handle_piece(sink, idx as usize, data).await?,

        }

        Ok(())
    }

    // The codec already sized the bitfield to our piece count.
    async fn handle_bitfield(&mut self, sink: &mut MessageSink, bitfield: Bitfield) -> Result<()> {
        tracing::info!("peer has {}/{} pieces", bitfield.count_ones(), self.ctx.info.num_pieces);
        let num_pieces = bitfield.count_ones();
        self.bitfield = bitfield;
        self.state.update(|state| state.num_pieces = num_pieces);
        self.check_remote_complete()?;

        let interested = self.is_interesting().await;
        self.state.update(|state| state.am_interested = interested);
        let msg = if interested { Message::Interested } else { Message::NotInterested };
        self.send_message(sink, msg).await?;

        if interested && !self.state.get().peer_choking {
            self.make_request(sink).await?;
        }
        Ok(())
    }

    async fn handle_have(&mut self, sink: &mut MessageSink, idx: usize) -> Result<()> {
        if idx >= self.ctx.info.num_pieces {
            tracing::warn!("have msg with invalid idx: {}", idx);
            return Ok(());
        }
        event::have_received(self.ctx.local_id, self.remote_id(), idx);

        // Peer already has piece.
        if self.bitfield[idx] {
            return Ok(());
        }
        self.bitfield.set(idx, true);
        self.state.update(|state| state.num_pieces += 1);
        self.check_remote_complete()?;

        let interested = self.is_interesting().await;
        self.update_interest(sink, interested).await?;

        // Idle and unchoked: the new piece may be the first worth asking for.
        if interested && !self.state.get().peer_choking {
            self.make_request(sink).await?;
        }
        Ok(())
    }

    // Served only while we unchoke the peer and hold the piece.
    async fn handle_request(&mut self, sink: &mut MessageSink, idx: usize) -> Result<()> {
        if self.state.get().am_choking {
            tracing::debug!("ignoring request for {} from choked peer", idx);
            return Ok(());
        }
        let data = {
            let store = self.ctx.store.read().await;
            if store.has(idx) { store.piece(idx) } else { None }
        };
        let Some(data) = data else {
            tracing::debug!("ignoring request for missing piece {}", idx);
            return Ok(());
        };
        let len = data.len() as u64;
        self.state.update(|state| state.throughput.up += len);
        self.send_message(sink, Message::Piece { idx: idx as u32, data }).await
    }

    async fn handle_piece(&mut self, sink: &mut MessageSink, idx: usize, data: Bytes) -> Result<()> {

        // Only answers to our own requests count towards the peer's rate.
        if self.requests_out.remove(&idx) {
            self.state.update(|state| state.throughput.down += data.len() as u64);
        } else {
            tracing::debug!("unrequested piece {}", idx);
        }

        let (res, num_have) = {
            let mut store = self.ctx.store.write().await;
            let res = store.apply(idx, data.clone());
            (res, store.num_have())
        };
        match res {
            Ok(Applied::New) => {
                event::piece_downloaded(self.ctx.local_id, self.remote_id(), idx, num_have);
                self.ctx.disk_tx.send(CommandToDisk::WritePiece { idx, data })?;
                self.ctx.swarm_tx.send(CommandToSwarm::PieceAcquired { idx })?;
            },
            Ok(Applied::Duplicate) => tracing::debug!("already have piece {}", idx),
            Err(e) => tracing::warn!("discarding piece: {}", e),
        }

        let interested = self.is_interesting().await;
        self.update_interest(sink, interested).await?;
        if interested && !self.state.get().peer_choking {
            self.make_request(sink).await?;
        }
        Ok(())
    }

    // A piece became available locally: advertise it and drop interest we no longer have.
    async fn handle_acquired_piece(&mut self, sink: &mut MessageSink, idx: usize) -> Result<()> {
        self.send_message(sink, Message::Have { idx: idx as u32 }).await?;
        let interested = self.is_interesting().await;
        self.update_interest(sink, interested).await
    }

    // Scheduler decisions, repeated ones are not resent.
    async fn set_choking(&mut self, sink: &mut MessageSink, choke: bool) -> Result<()> {
        if self.state.get().am_choking == choke {
            return Ok(());
        }
        self.state.update(|state| state.am_choking = choke);
        let msg = if choke { Message::Choke } else { Message::Unchoke };
        self.send_message(sink, msg).await
    }

    // Request one piece the peer has that we lack, if any. At most one
    // request is in flight per peer.
    async fn make_request(&mut self, sink: &mut MessageSink) -> Result<()> {
        let state = self.state.get();
        if state.peer_choking || !state.am_interested || !self.requests_out.is_empty() {
            return Ok(());
        }

        let pick = {
            let store = self.ctx.store.read().await;
            self.pick_piece(store.bitfield())
        };

        match pick {
            Some(idx) => {
                self.requests_out.insert(idx);
                self.send_message(sink, Message::Request { idx: idx as u32 }).await
            },
            None => {
                tracing::trace!("nothing to request");
                Ok(())
            },
        }
    }

    fn pick_piece(&self, own: &Bitfield) -> Option<usize> {
        picker::pick_piece(&self.bitfield, own, &self.requests_out, &mut rand::thread_rng())
    }

    async fn is_interesting(&self) -> bool {
        let store = self.ctx.store.read().await;
        picker::is_interesting(&self.bitfield, store.bitfield())
    }

    // Send interested / not interested only when it changes.
    async fn update_interest(&mut self, sink: &mut MessageSink, interested: bool) -> Result<()> {
        let was_interested = self.state.update(|state| {
            let was = state.am_interested;
            state.am_interested = interested;
            was
        });
        match (was_interested, interested) {
            (false, true) => self.send_message(sink, Message::Interested).await,
            (true, false) => self.send_message(sink, Message::NotInterested).await,
            _ => Ok(()),
        }
    }

    fn check_remote_complete(&mut self) -> Result<()> {
        if !self.reported_complete && self.bitfield.all() {
            self.reported_complete = true;
            tracing::info!("peer has the complete file");
            self.ctx.swarm_tx.send(CommandToSwarm::PeerComplete { id: self.remote_id() })?;
        }
        Ok(())
    }

}

// Dials a configured peer, retrying while it may still be starting up.
async fn connect(peer: &PeerInfo) -> Result<TcpStream> {
    for attempt in 1..=CONNECT_ATTEMPTS {
        match time::timeout(CONNECT_TIMEOUT, TcpStream::connect((peer.host.as_str(), peer.port))).await {
            Ok(Ok(stream)) => {
                tracing::trace!("outbound connection successful");
                return Ok(stream);
            },
            Ok(Err(e)) => tracing::debug!(attempt, "connect to {}:{} failed: {}", peer.host, peer.port, e),
            Err(_) => tracing::debug!(attempt, "connect to {}:{} timed out", peer.host, peer.port),
        }
        if attempt < CONNECT_ATTEMPTS {
            time::sleep(CONNECT_RETRY_DELAY).await;
        }
    }
    Err(PeerError::ConnectionFailure(CONNECT_ATTEMPTS))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::{io::AsyncWriteExt, net::TcpListener, sync::RwLock};
    use crate::{
        disk::DiskTx,
        store::{PieceStore, StoreInfo},
        swarm::SwarmTx,
    };

    const PIECE_LEN: usize = 16;

    struct Harness {
        // Our side of the connection, speaking as peer 2.
        remote: Framed<TcpStream, MessageCodec>,
        swarm_rx: mpsc::UnboundedReceiver<CommandToSwarm>,
        disk_rx: mpsc::UnboundedReceiver<CommandToDisk>,
        peer_tx: PeerTx,
        state: SharedState,
    }

    fn peer(id: PeerId) -> PeerInfo {
        PeerInfo { id, host: "127.0.0.1".into(), port: 0, has_file: false }
    }

    fn context(info: StoreInfo, store: PieceStore, swarm_tx: SwarmTx, disk_tx: DiskTx) -> Arc<SwarmContext> {
        Arc::new(SwarmContext {
            local_id: 1,
            info,
            store: RwLock::new(store),
            peers: vec![peer(1), peer(2)],
            swarm_tx,
            disk_tx,
        })
    }

    // Accepts an inbound session from peer 2 and completes the handshake.
    async fn accept_from_peer(info: StoreInfo, store: PieceStore) -> Harness {
        let (swarm_tx, mut swarm_rx) = mpsc::unbounded_channel();
        let (disk_tx, disk_rx) = mpsc::unbounded_channel();
        let ctx = context(info, store, swarm_tx, disk_tx);
        let info = ctx.info;

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let client = TcpStream::connect(listener.local_addr().unwrap()).await.unwrap();
        let (server, _) = listener.accept().await.unwrap();
        tokio::spawn(PeerSession::inbound(ctx).start_session(Some(server)));

        let mut remote = Framed::new(client, HandshakeCodec);
        remote.send(Handshake::new(2)).await.unwrap();
        assert_eq!(remote.next().await.unwrap().unwrap(), Handshake::new(1));
        let parts = remote.into_parts();
        let mut msg_parts = FramedParts::new::<Message>(parts.io, MessageCodec::new(&info));
        msg_parts.read_buf = parts.read_buf;
        let remote = Framed::from_parts(msg_parts);

        let (peer_tx, state) = match swarm_rx.recv().await.unwrap() {
            CommandToSwarm::PeerConnected { id, peer_tx, state } => {
                assert_eq!(id, 2);
                (peer_tx, state)
            },
            _ => panic!("expected PeerConnected"),
        };
        Harness { remote, swarm_rx, disk_rx, peer_tx, state }
    }

    async fn read(remote: &mut Framed<TcpStream, MessageCodec>) -> Message {
        time::timeout(time::Duration::from_secs(5), remote.next())
            .await
            .expect("timed out waiting for message")
            .expect("connection closed")
            .expect("decode error")
    }

    fn piece(idx: u32) -> Message {
        Message::Piece { idx, data: Bytes::from(vec![idx as u8; PIECE_LEN]) }
    }

    #[tokio::test]
    async fn test_choke_voids_outstanding_request_credit() {
        let info = StoreInfo::new(4 * PIECE_LEN as u64, PIECE_LEN);
        let mut h = accept_from_peer(info, PieceStore::new(info)).await;

        assert_eq!(read(&mut h.remote).await, Message::Bitfield(Bitfield::repeat(false, 4)));
        h.remote.send(Message::Bitfield(Bitfield::repeat(true, 4))).await.unwrap();
        assert_eq!(read(&mut h.remote).await, Message::Interested);

        // The full bitfield is reported once.
        assert!(matches!(h.swarm_rx.recv().await, Some(CommandToSwarm::PeerComplete { id: 2 })));

        h.remote.send(Message::Unchoke).await.unwrap();
        let first = match read(&mut h.remote).await {
            Message::Request { idx } => idx,
            msg => panic!("expected request, got {}", msg),
        };

        // Choked before the answer arrives: the late piece is stored but not credited.
        h.remote.send(Message::Choke).await.unwrap();
        h.remote.send(piece(first)).await.unwrap();
        assert!(matches!(
            h.swarm_rx.recv().await,
            Some(CommandToSwarm::PieceAcquired { idx }) if idx == first as usize
        ));
        assert!(matches!(h.disk_rx.recv().await, Some(CommandToDisk::WritePiece { .. })));
        assert_eq!(h.state.get().throughput.down.round(), 0);
        assert!(h.state.get().peer_choking);

        // A requested piece after the next unchoke counts.
        h.remote.send(Message::Unchoke).await.unwrap();
        let second = match read(&mut h.remote).await {
            Message::Request { idx } => idx,
            msg => panic!("expected request, got {}", msg),
        };
        assert_ne!(first, second);
        h.remote.send(piece(second)).await.unwrap();
        assert!(matches!(h.swarm_rx.recv().await, Some(CommandToSwarm::PieceAcquired { .. })));
        assert_eq!(h.state.get().throughput.down.round(), PIECE_LEN as u64);
    }

    #[tokio::test]
    async fn test_requests_served_only_when_unchoked() {
        let info = StoreInfo::new(2 * PIECE_LEN as u64, PIECE_LEN);
        let data = Bytes::from((0..2 * PIECE_LEN as u8).collect::<Vec<_>>());
        let mut h = accept_from_peer(info, PieceStore::full(info, data.clone()).unwrap()).await;

        assert_eq!(read(&mut h.remote).await, Message::Bitfield(Bitfield::repeat(true, 2)));

        // An empty bitfield leaves the session uninterested.
        h.remote.send(Message::Bitfield(Bitfield::repeat(false, 8))).await.unwrap();
        assert_eq!(read(&mut h.remote).await, Message::NotInterested);

        // Asked while choked: ignored. The bitfield answer proves it was handled.
        h.remote.send(Message::Interested).await.unwrap();
        h.remote.send(Message::Request { idx: 0 }).await.unwrap();
        h.remote.send(Message::Bitfield(Bitfield::repeat(false, 8))).await.unwrap();
        assert_eq!(read(&mut h.remote).await, Message::NotInterested);

        h.peer_tx.send(PeerCommand::Unchoke).unwrap();
        // Repeated decisions are not resent.
        h.peer_tx.send(PeerCommand::Unchoke).unwrap();
        assert_eq!(read(&mut h.remote).await, Message::Unchoke);
        assert!(h.state.get().peer_interested);

        h.remote.send(Message::Request { idx: 1 }).await.unwrap();
        assert_eq!(
            read(&mut h.remote).await,
            Message::Piece { idx: 1, data: data.slice(PIECE_LEN..) },
        );
        assert_eq!(h.state.get().throughput.up.round(), PIECE_LEN as u64);

        h.peer_tx.send(PeerCommand::Shutdown).unwrap();
        assert!(matches!(
            h.swarm_rx.recv().await,
            Some(CommandToSwarm::PeerDisconnected { id: 2, .. })
        ));
    }

    #[tokio::test]
    async fn test_request_for_missing_piece_ignored() {
        let info = StoreInfo::new(2 * PIECE_LEN as u64, PIECE_LEN);
        let mut store = PieceStore::new(info);
        store.apply(0, Bytes::from(vec![7; PIECE_LEN])).unwrap();
        let mut h = accept_from_peer(info, store).await;
        read(&mut h.remote).await;

        h.peer_tx.send(PeerCommand::Unchoke).unwrap();
        assert_eq!(read(&mut h.remote).await, Message::Unchoke);

        // Only the held piece is answered.
        h.remote.send(Message::Request { idx: 1 }).await.unwrap();
        h.remote.send(Message::Request { idx: 0 }).await.unwrap();
        assert_eq!(
            read(&mut h.remote).await,
            Message::Piece { idx: 0, data: Bytes::from(vec![7; PIECE_LEN]) }
        );
        assert_eq!(h.state.get().throughput.up.total(), PIECE_LEN as u64);
    }

    #[tokio::test]
    async fn test_have_updates_interest_once() {
        let info = StoreInfo::new(4 * PIECE_LEN as u64, PIECE_LEN);
        let mut h = accept_from_peer(info, PieceStore::new(info)).await;

        read(&mut h.remote).await;
        h.remote.send(Message::Bitfield(Bitfield::repeat(false, 8))).await.unwrap();
        assert_eq!(read(&mut h.remote).await, Message::NotInterested);

        // Out of range index is ignored.
        h.remote.send(Message::Have { idx: 40 }).await.unwrap();
        h.remote.send(Message::Have { idx: 2 }).await.unwrap();
        h.remote.send(Message::Have { idx: 3 }).await.unwrap();
        assert_eq!(read(&mut h.remote).await, Message::Interested);

        // Nothing else was sent for the second have: the next message answers the unchoke.
        h.remote.send(Message::Unchoke).await.unwrap();
        assert!(matches!(read(&mut h.remote).await, Message::Request { idx: 2 | 3 }));
        assert_eq!(h.state.get().num_pieces, 2);
    }

    #[tokio::test]
    async fn test_unknown_identity_rejected() {
        let info = StoreInfo::new(PIECE_LEN as u64, PIECE_LEN);
        let (swarm_tx, mut swarm_rx) = mpsc::unbounded_channel();
        let (disk_tx, _disk_rx) = mpsc::unbounded_channel();
        let ctx = context(info, PieceStore::new(info), swarm_tx, disk_tx);

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let client = TcpStream::connect(listener.local_addr().unwrap()).await.unwrap();
        let (server, _) = listener.accept().await.unwrap();
        let session = tokio::spawn(PeerSession::inbound(ctx).start_session(Some(server)));

        let mut remote = Framed::new(client, HandshakeCodec);
        remote.send(Handshake::new(99)).await.unwrap();
        assert!(matches!(session.await.unwrap(), Err(PeerError::HandshakeMismatch(99))));
        // Never registered, so never deregistered either.
        assert!(swarm_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_outbound_answer_from_wrong_peer() {
        let info = StoreInfo::new(PIECE_LEN as u64, PIECE_LEN);
        let (swarm_tx, mut swarm_rx) = mpsc::unbounded_channel();
        let (disk_tx, _disk_rx) = mpsc::unbounded_channel();
        let ctx = context(info, PieceStore::new(info), swarm_tx, disk_tx);

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let dialled = PeerInfo { port: listener.local_addr().unwrap().port(), ..peer(2) };
        let session = PeerSession::outbound(ctx, dialled);
        let state = session.state.clone();
        let session = tokio::spawn(session.start_session(None));

        let (server, _) = listener.accept().await.unwrap();
        let mut remote = Framed::new(server, HandshakeCodec);
        assert_eq!(remote.next().await.unwrap().unwrap(), Handshake::new(1));
        remote.send(Handshake::new(3)).await.unwrap();

        assert!(matches!(session.await.unwrap(), Err(PeerError::HandshakeMismatch(3))));
        assert_eq!(state.get().conn_state, ConnState::Closed);
        assert!(swarm_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_unknown_message_type_closes_session() {
        let info = StoreInfo::new(4 * PIECE_LEN as u64, PIECE_LEN);
        let mut h = accept_from_peer(info, PieceStore::new(info)).await;
        read(&mut h.remote).await;
        assert_eq!(h.state.get().conn_state, ConnState::Active);

        h.remote.get_mut().write_all(&[0, 0, 0, 1, 42]).await.unwrap();

        assert!(matches!(
            h.swarm_rx.recv().await,
            Some(CommandToSwarm::PeerDisconnected { id: 2, .. })
        ));
        assert_eq!(h.state.get().conn_state, ConnState::Closed);
    }
}
