//! Worker-to-worker messaging within one party.
//!
//! Every pair of workers shares one TCP connection. Sends are buffered in
//! memory and pushed out by an explicit flush; receives are posted by the
//! interpreter as (destination, length) descriptors and serviced in post
//! order by a per-peer reader thread. The mesh is established at startup:
//! worker `i` dials every worker with a smaller index and accepts a
//! connection from every worker with a larger one, identifying inbound
//! peers by the worker ID each connector writes in the clear.

use std::{
    io::{
        self,
        Read,
        Write,
    },
    net::{
        TcpListener,
        TcpStream,
        ToSocketAddrs,
    },
    sync::{
        mpsc::{
            sync_channel,
            Receiver,
            SyncSender,
        },
        Arc,
        Condvar,
        Mutex,
    },
    thread,
    time::Duration,
};

use crate::{
    addr::WorkerId,
    config::PartyConfig,
    deps::log::{
        debug,
        info,
        warn,
    },
    error::Error,
    streams::{
        BufferedReader,
        BufferedWriter,
        DEFAULT_BUFFER_SIZE,
    },
};

pub const MAX_CONNECTION_TRIES: u32 = 20;
pub const DELAY_BETWEEN_CONNECTION_TRIES: Duration = Duration::from_millis(3000);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Bound on posted-but-unserviced reads per peer.
const POSTED_READ_DEPTH: usize = 1 << 14;


/// A posted read: where the payload goes and how many bytes it is. The
/// destination points into the engine's frame memory; the interpreter does
/// not touch that region again until the matching finish-receive.
pub struct AsyncRead {
    pub into:   *mut u8,
    pub length: usize,
}

unsafe impl Send for AsyncRead {}


struct ReadState {
    pending: Mutex<(usize, Option<String>)>,
    settled: Condvar,
}


pub struct MessageChannel {
    peer:         WorkerId,
    writer:       BufferedWriter<TcpStream>,
    posted_reads: Option<SyncSender<AsyncRead>>,
    reads:        Arc<ReadState>,
    daemon:       Option<thread::JoinHandle<()>>,
}

impl MessageChannel {
    pub fn new(
        stream: TcpStream,
        peer: WorkerId,
    ) -> Result<Self, Error> {
        stream.set_nodelay(true)?;
        let read_stream = stream.try_clone()?;
        let (sender, receiver) = sync_channel(POSTED_READ_DEPTH);
        let reads = Arc::new(ReadState {
            pending: Mutex::new((0, None)),
            settled: Condvar::new(),
        });

        let daemon_state = Arc::clone(&reads);
        let daemon = thread::spawn(move || {
            Self::reading_daemon(read_stream, receiver, daemon_state, peer);
        });

        Ok(Self {
            peer,
            writer: BufferedWriter::new(stream, DEFAULT_BUFFER_SIZE, false),
            posted_reads: Some(sender),
            reads,
            daemon: Some(daemon),
        })
    }

    // Services posted reads in post order until the pipe closes or the
    // socket fails.
    fn reading_daemon(
        stream: TcpStream,
        posted: Receiver<AsyncRead>,
        reads: Arc<ReadState>,
        peer: WorkerId,
    ) {
        let mut reader = BufferedReader::new(stream, DEFAULT_BUFFER_SIZE, false);
        while let Ok(read_op) = posted.recv() {
            let into =
                unsafe { std::slice::from_raw_parts_mut(read_op.into, read_op.length) };
            let result = reader.read_exact_bytes(into);

            let mut pending = reads.pending.lock().expect("read state lock");
            pending.0 -= 1;
            if let Err(err) = result {
                warn!("read from worker {} failed: {}", peer, err);
                pending.1 = Some(err.to_string());
                reads.settled.notify_all();
                return;
            }
            if pending.0 == 0 {
                reads.settled.notify_all();
            }
        }
        debug!("reader for worker {} shutting down", peer);
    }

    pub fn peer(&self) -> WorkerId {
        self.peer
    }

    /// Posts an asynchronous read of `length` bytes into `into`. Does not
    /// block unless the posted-read pipe is full.
    pub fn post_receive(
        &mut self,
        into: *mut u8,
        length: usize,
    ) -> Result<(), Error> {
        {
            let mut pending = self.reads.pending.lock().expect("read state lock");
            if let Some(reason) = pending.1.clone() {
                return Err(channel_error(self.peer, &reason));
            }
            pending.0 += 1;
        }
        self.posted_reads
            .as_ref()
            .expect("channel is open")
            .send(AsyncRead { into, length })
            .map_err(|_| channel_error(self.peer, "reader thread is gone"))
    }

    /// Blocks until every read posted so far has completed.
    pub fn wait_until_reads_finished(&self) -> Result<(), Error> {
        let mut pending = self.reads.pending.lock().expect("read state lock");
        loop {
            if let Some(reason) = pending.1.clone() {
                return Err(channel_error(self.peer, &reason));
            }
            if pending.0 == 0 {
                return Ok(());
            }
            pending = self.reads.settled.wait(pending).expect("read state lock");
        }
    }

    /// Appends `bytes` to the outgoing buffer; nothing reaches the socket
    /// until the buffer fills or `flush` is called.
    pub fn buffer_send(
        &mut self,
        bytes: &[u8],
    ) -> Result<(), Error> {
        self.writer.write_bytes(bytes)?;
        Ok(())
    }

    pub fn flush(&mut self) -> Result<(), Error> {
        self.writer.flush()?;
        Ok(())
    }
}

impl Drop for MessageChannel {
    fn drop(&mut self) {
        let _ = self.writer.flush();
        // Closing the posted-read pipe stops the reader thread.
        self.posted_reads.take();
        if let Some(daemon) = self.daemon.take() {
            let _ = daemon.join();
        }
    }
}

fn channel_error(
    peer: WorkerId,
    reason: &str,
) -> Error {
    Error::from(io::Error::new(
        io::ErrorKind::Other,
        format!("channel to worker {}: {}", peer, reason),
    ))
}


fn dial_worker(
    host: &str,
    port: u16,
    self_id: WorkerId,
) -> Result<TcpStream, String> {
    let mut addrs = match (host, port).to_socket_addrs() {
        Ok(addrs) => addrs,
        Err(err) => return Err(format!("cannot resolve {}:{}: {}", host, port, err)),
    };
    let addr = match addrs.next() {
        Some(addr) => addr,
        None => return Err(format!("{}:{} resolves to no addresses", host, port)),
    };

    for attempt in 0..MAX_CONNECTION_TRIES {
        match TcpStream::connect_timeout(&addr, CONNECT_TIMEOUT) {
            Ok(mut stream) => {
                if let Err(err) = stream.write_all(&self_id.to_ne_bytes()) {
                    return Err(format!("handshake write failed: {}", err));
                }
                return Ok(stream);
            }
            Err(err) if err.kind() == io::ErrorKind::ConnectionRefused => {
                debug!("connection to {} refused (attempt {}), retrying", addr, attempt + 1);
                thread::sleep(DELAY_BETWEEN_CONNECTION_TRIES);
            }
            Err(err) if err.kind() == io::ErrorKind::TimedOut => {
                return Err(format!("connection to {} timed out", addr));
            }
            Err(err) => {
                return Err(format!("connection to {} failed: {}", addr, err));
            }
        }
    }
    Err(format!("connection to {} refused {} times", addr, MAX_CONNECTION_TRIES))
}


/// Connections from this worker to every other worker of the same party.
pub struct ClusterNetwork {
    channels: Vec<Option<MessageChannel>>,
    self_id:  WorkerId,
}

impl ClusterNetwork {
    pub fn self_id(&self) -> WorkerId {
        self.self_id
    }

    pub fn num_workers(&self) -> WorkerId {
        self.channels.len() as WorkerId
    }

    pub fn contact_worker(
        &mut self,
        worker_id: WorkerId,
    ) -> Result<&mut MessageChannel, Error> {
        self.channels
            .get_mut(worker_id as usize)
            .and_then(|slot| slot.as_mut())
            .ok_or_else(|| {
                Error::Mesh {
                    reason: format!("no channel to worker {}", worker_id),
                }
            })
    }

    /// Establishes the all-pairs mesh for `self_id` within `party`. On any
    /// failure every connection is torn down and the set of unreachable
    /// workers is reported.
    pub fn establish(
        self_id: WorkerId,
        party: &PartyConfig,
    ) -> Result<Self, Error> {
        let num_workers = party.workers.len() as WorkerId;
        if self_id >= num_workers {
            return Err(Error::Mesh {
                reason: format!("self index is {} but there are {} workers", self_id, num_workers),
            });
        }

        // Bind the announced port before dialing anyone, so peers racing to
        // connect here see as few refusals as possible.
        let remaining = num_workers - self_id - 1;
        let listener = if remaining != 0 {
            let port = party.workers[self_id as usize].internal_port;
            Some(TcpListener::bind(("0.0.0.0", port))?)
        } else {
            None
        };

        // Dial every worker with a smaller index.
        let mut connectors = Vec::new();
        for j in 0..self_id {
            let host = party.workers[j as usize].internal_host.clone();
            let port = party.workers[j as usize].internal_port;
            connectors.push(thread::spawn(move || dial_worker(&host, port, self_id)));
        }

        // Accept a connection from every worker with a larger index.
        let mut accepted: Vec<Option<TcpStream>> = Vec::new();
        accepted.resize_with(num_workers as usize, || None);
        let mut failures: Vec<String> = Vec::new();

        if let Some(listener) = listener {
            let mut accepted_count = 0;
            while accepted_count != remaining {
                let (mut stream, from_addr) = listener.accept()?;
                let mut id_bytes = [0u8; 4];
                if let Err(err) = stream.read_exact(&mut id_bytes) {
                    warn!("dropping connection from {}: {}", from_addr, err);
                    continue;
                }
                let from = WorkerId::from_ne_bytes(id_bytes);
                if from > self_id && from < num_workers && accepted[from as usize].is_none() {
                    debug!("accepted worker {} from {}", from, from_addr);
                    accepted[from as usize] = Some(stream);
                    accepted_count += 1;
                } else {
                    warn!("dropping connection from {} claiming worker id {}", from_addr, from);
                }
            }
        }

        let mut dialed: Vec<Option<TcpStream>> = Vec::new();
        dialed.resize_with(num_workers as usize, || None);
        for (j, connector) in connectors.into_iter().enumerate() {
            match connector.join().expect("connector thread must not panic") {
                Ok(stream) => dialed[j] = Some(stream),
                Err(reason) => failures.push(format!("worker {}: {}", j, reason)),
            }
        }

        if !failures.is_empty() {
            return Err(Error::Mesh {
                reason: failures.join("; "),
            });
        }

        let mut channels: Vec<Option<MessageChannel>> = Vec::new();
        for i in 0..num_workers {
            let stream = if i < self_id {
                dialed[i as usize].take()
            } else if i > self_id {
                accepted[i as usize].take()
            } else {
                None
            };
            match stream {
                Some(stream) => channels.push(Some(MessageChannel::new(stream, i)?)),
                None => channels.push(None),
            }
        }

        info!("mesh established: worker {} of {}", self_id, num_workers);
        Ok(Self { channels, self_id })
    }
}
