//! Asynchronous page transfers between frame memory and the swap device.
//!
//! Transfers are submitted without blocking and drained from a completion
//! queue when a finish directive demands one. The backing implementation is
//! a small pool of I/O threads doing positioned reads and writes against
//! the device descriptor; the pool depth is the plan's maximum number of
//! concurrent swaps, so a submission never has to wait behind more work
//! than the planner allowed.
//!
//! Submissions carry raw pointers into the engine's frame memory. The
//! memory program guarantees that no instruction touches a page between the
//! issue and finish of its transfer, which is what makes handing the region
//! to an I/O thread sound.

use std::{
    fs::File,
    os::unix::fs::FileExt,
    sync::{
        mpsc::{
            channel,
            sync_channel,
            Receiver,
            Sender,
            SyncSender,
        },
        Arc,
        Mutex,
    },
    thread,
};

use crate::{
    addr::PhysPageNumber,
    deps::log::debug,
    error::Error,
};


enum TransferKind {
    ReadFromStorage,
    WriteToStorage,
}

struct Transfer {
    kind:   TransferKind,
    ppn:    PhysPageNumber,
    ptr:    *mut u8,
    len:    usize,
    offset: u64,
}

unsafe impl Send for Transfer {}


pub struct SwapCompletion {
    pub ppn:    PhysPageNumber,
    pub result: Result<(), String>,
}


pub struct SwapContext {
    submissions: Option<SyncSender<Transfer>>,
    completions: Receiver<SwapCompletion>,
    workers:     Vec<thread::JoinHandle<()>>,
}

impl SwapContext {
    /// Builds a context able to carry `depth` concurrent transfers against
    /// `device`.
    pub fn new(
        device: File,
        depth: u32,
    ) -> Self {
        let depth = depth.max(1) as usize;
        let device = Arc::new(device);
        let (submit_sender, submit_receiver) = sync_channel::<Transfer>(depth);
        let submit_receiver = Arc::new(Mutex::new(submit_receiver));
        let (done_sender, done_receiver) = channel::<SwapCompletion>();

        debug!("starting swap context with {} transfer threads", depth);
        let mut workers = Vec::with_capacity(depth);
        for _ in 0..depth {
            let device = Arc::clone(&device);
            let submissions = Arc::clone(&submit_receiver);
            let completions: Sender<SwapCompletion> = done_sender.clone();
            workers.push(thread::spawn(move || {
                loop {
                    let transfer = {
                        let receiver = submissions.lock().expect("transfer queue lock");
                        match receiver.recv() {
                            Ok(transfer) => transfer,
                            Err(_) => break,
                        }
                    };

                    let result = unsafe {
                        let page =
                            std::slice::from_raw_parts_mut(transfer.ptr, transfer.len);
                        match transfer.kind {
                            TransferKind::ReadFromStorage => {
                                device.read_exact_at(page, transfer.offset)
                            }
                            TransferKind::WriteToStorage => {
                                device.write_all_at(page, transfer.offset)
                            }
                        }
                    };

                    let completion = SwapCompletion {
                        ppn:    transfer.ppn,
                        result: result.map_err(|err| err.to_string()),
                    };
                    if completions.send(completion).is_err() {
                        break;
                    }
                }
            }));
        }

        Self {
            submissions: Some(submit_sender),
            completions: done_receiver,
            workers,
        }
    }

    fn submit(
        &self,
        transfer: Transfer,
    ) -> Result<(), Error> {
        let ppn = transfer.ppn;
        self.submissions
            .as_ref()
            .expect("swap context is open")
            .send(transfer)
            .map_err(|_| {
                Error::Swap {
                    ppn,
                    reason: "transfer threads are gone".to_string(),
                }
            })
    }

    /// Starts reading `len` bytes at `offset` of the device into the page
    /// at `ptr`.
    pub fn submit_read(
        &self,
        ppn: PhysPageNumber,
        ptr: *mut u8,
        len: usize,
        offset: u64,
    ) -> Result<(), Error> {
        self.submit(Transfer {
            kind: TransferKind::ReadFromStorage,
            ppn,
            ptr,
            len,
            offset,
        })
    }

    /// Starts writing the page at `ptr` to `offset` of the device.
    pub fn submit_write(
        &self,
        ppn: PhysPageNumber,
        ptr: *mut u8,
        len: usize,
        offset: u64,
    ) -> Result<(), Error> {
        self.submit(Transfer {
            kind: TransferKind::WriteToStorage,
            ppn,
            ptr,
            len,
            offset,
        })
    }

    /// Blocks until some transfer completes and returns it. Completions
    /// arrive in device order, not submission order.
    pub fn next_completion(&self) -> Result<SwapCompletion, Error> {
        self.completions.recv().map_err(|_| {
            Error::Swap {
                ppn:    0,
                reason: "transfer threads are gone".to_string(),
            }
        })
    }
}

impl Drop for SwapContext {
    fn drop(&mut self) {
        self.submissions.take();
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}
