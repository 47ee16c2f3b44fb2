//! Whole-file transport for context images.
//!
//! Each owner image lives in its own [`StorageBackend`]. Loads run on the
//! caller's thread. Every store goes through the queue of a single I/O
//! worker thread, so images of one owner reach storage in the order they
//! were issued; synchronous stores wait for their turn. The worker also
//! runs the completion handlers.

use crate::error::{CoreError, CoreResult};
use crate::types::ContextOwner;
use allocmeta_storage::{InMemoryBackend, StorageBackend};
use crossbeam_channel::{bounded, unbounded, Sender};
use parking_lot::Mutex;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// Storage of the three context files.
#[derive(Clone)]
pub struct ContextBackends {
    backends: [Arc<dyn StorageBackend>; 3],
}

impl ContextBackends {
    /// Creates the set from one backend per owner.
    pub fn new(
        segment: Arc<dyn StorageBackend>,
        allocator: Arc<dyn StorageBackend>,
        rebuild: Arc<dyn StorageBackend>,
    ) -> Self {
        Self {
            backends: [segment, allocator, rebuild],
        }
    }

    /// Creates empty in-memory backends, as on a first start.
    #[must_use]
    pub fn in_memory() -> Self {
        Self::new(
            Arc::new(InMemoryBackend::new()),
            Arc::new(InMemoryBackend::new()),
            Arc::new(InMemoryBackend::new()),
        )
    }

    /// Backend holding `owner`'s file.
    #[must_use]
    pub fn get(&self, owner: ContextOwner) -> &Arc<dyn StorageBackend> {
        &self.backends[owner.index()]
    }
}

impl std::fmt::Debug for ContextBackends {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContextBackends").finish_non_exhaustive()
    }
}

/// What a synchronous load found.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadOutcome {
    /// The file does not exist yet or is empty.
    Absent,
    /// The whole file, with the expected size.
    Loaded(Vec<u8>),
}

/// A finished asynchronous store.
#[derive(Debug)]
pub struct IoCompletion {
    /// Owner whose image was written.
    pub owner: ContextOwner,
    /// The image that was written, handed back to the issuer.
    pub bytes: Vec<u8>,
    /// Outcome of the write.
    pub result: CoreResult<()>,
}

/// Handler run on the I/O worker thread when a store finishes.
pub type CompletionHandler = Box<dyn FnOnce(IoCompletion) + Send + 'static>;

struct StoreRequest {
    owner: ContextOwner,
    bytes: Vec<u8>,
    completion: CompletionHandler,
}

/// Loads and stores context images.
pub struct FileIoManager {
    backends: ContextBackends,
    sender: Mutex<Option<Sender<StoreRequest>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl FileIoManager {
    /// Starts the I/O worker.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the worker thread cannot be spawned.
    pub fn new(backends: ContextBackends) -> CoreResult<Self> {
        let (sender, receiver) = unbounded::<StoreRequest>();
        let worker_backends = backends.clone();
        let worker = thread::Builder::new()
            .name("allocmeta-io".into())
            .spawn(move || {
                for request in receiver {
                    let result = store(&worker_backends, request.owner, &request.bytes);
                    (request.completion)(IoCompletion {
                        owner: request.owner,
                        bytes: request.bytes,
                        result,
                    });
                }
            })?;
        Ok(Self {
            backends,
            sender: Mutex::new(Some(sender)),
            worker: Mutex::new(Some(worker)),
        })
    }

    /// Backends this transport reads and writes.
    #[must_use]
    pub fn backends(&self) -> &ContextBackends {
        &self.backends
    }

    /// Reads `owner`'s whole file.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::ContextCorrupted`] if the file exists with a size
    /// other than `expected_len`, or a storage error if it cannot be read.
    pub fn load_sync(&self, owner: ContextOwner, expected_len: usize) -> CoreResult<LoadOutcome> {
        let backend = self.backends.get(owner);
        let size = backend.size()?;
        if size == 0 {
            return Ok(LoadOutcome::Absent);
        }
        if size != expected_len as u64 {
            return Err(CoreError::context_corrupted(
                owner,
                format!("file is {size} bytes, expected {expected_len}"),
            ));
        }
        Ok(LoadOutcome::Loaded(backend.read_all()?))
    }

    /// Writes `owner`'s whole file and waits for it to be durable.
    ///
    /// The write is queued behind every store issued before it. After
    /// [`close`](Self::close) the queue is drained and the write runs on the
    /// caller's thread. Must not be called from a completion handler.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the write or sync fails, or
    /// [`CoreError::TransportClosed`] if the worker died.
    pub fn store_sync(&self, owner: ContextOwner, bytes: Vec<u8>) -> CoreResult<()> {
        let sender = self.sender.lock().clone();
        let Some(sender) = sender else {
            // close() holds the worker slot until the queue is drained
            let _drained = self.worker.lock();
            return store(&self.backends, owner, &bytes);
        };

        let (done_tx, done_rx) = bounded(1);
        sender
            .send(StoreRequest {
                owner,
                bytes,
                completion: Box::new(move |completion| {
                    let _ = done_tx.send(completion.result);
                }),
            })
            .map_err(|_| CoreError::TransportClosed)?;
        drop(sender);
        done_rx.recv().map_err(|_| CoreError::TransportClosed)?
    }

    /// Queues a write of `owner`'s file.
    ///
    /// `completion` runs on the I/O worker once the write finishes, whether
    /// it succeeded or not.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::TransportClosed`] after [`close`](Self::close);
    /// the image is dropped and `completion` never runs.
    pub fn store_async(
        &self,
        owner: ContextOwner,
        bytes: Vec<u8>,
        completion: CompletionHandler,
    ) -> CoreResult<()> {
        let sender = self.sender.lock();
        let sender = sender.as_ref().ok_or(CoreError::TransportClosed)?;
        sender
            .send(StoreRequest {
                owner,
                bytes,
                completion,
            })
            .map_err(|_| CoreError::TransportClosed)
    }

    /// Stops accepting stores, finishes the queued ones and joins the worker.
    pub fn close(&self) {
        self.sender.lock().take();
        let mut slot = self.worker.lock();
        let Some(worker) = slot.take() else {
            return;
        };
        if worker.thread().id() == thread::current().id() {
            return;
        }
        if worker.join().is_err() {
            tracing::error!("context I/O worker panicked");
        }
    }
}

impl Drop for FileIoManager {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for FileIoManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileIoManager")
            .field("open", &self.sender.lock().is_some())
            .finish_non_exhaustive()
    }
}

fn store(backends: &ContextBackends, owner: ContextOwner, bytes: &[u8]) -> CoreResult<()> {
    let backend = backends.get(owner);
    backend.write_all(bytes)?;
    backend.sync()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn empty_backend_loads_as_absent() {
        let io = FileIoManager::new(ContextBackends::in_memory()).unwrap();
        assert_eq!(io.load_sync(ContextOwner::SegmentCtx, 32).unwrap(), LoadOutcome::Absent);
    }

    #[test]
    fn sync_store_then_load() {
        let io = FileIoManager::new(ContextBackends::in_memory()).unwrap();
        io.store_sync(ContextOwner::RebuildCtx, vec![1, 2, 3, 4]).unwrap();
        assert_eq!(
            io.load_sync(ContextOwner::RebuildCtx, 4).unwrap(),
            LoadOutcome::Loaded(vec![1, 2, 3, 4])
        );
    }

    #[test]
    fn size_mismatch_is_corruption() {
        let io = FileIoManager::new(ContextBackends::in_memory()).unwrap();
        io.store_sync(ContextOwner::AllocatorCtx, vec![0; 10]).unwrap();
        assert!(matches!(
            io.load_sync(ContextOwner::AllocatorCtx, 12),
            Err(CoreError::ContextCorrupted { .. })
        ));
    }

    #[test]
    fn async_store_reports_completion() {
        let io = FileIoManager::new(ContextBackends::in_memory()).unwrap();
        let (tx, rx) = crossbeam_channel::bounded(1);
        io.store_async(
            ContextOwner::SegmentCtx,
            vec![9; 8],
            Box::new(move |completion| tx.send(completion).unwrap()),
        )
        .unwrap();

        let completion = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(completion.owner, ContextOwner::SegmentCtx);
        assert_eq!(completion.bytes, vec![9; 8]);
        assert!(completion.result.is_ok());
        assert_eq!(io.backends().get(ContextOwner::SegmentCtx).size().unwrap(), 8);
    }

    #[test]
    fn sync_store_waits_behind_queued_stores() {
        let io = FileIoManager::new(ContextBackends::in_memory()).unwrap();
        let (started_tx, started_rx) = bounded(1);
        let (resume_tx, resume_rx) = bounded::<()>(1);
        // park the worker inside a completion handler
        io.store_async(
            ContextOwner::SegmentCtx,
            vec![1; 4],
            Box::new(move |_| {
                started_tx.send(()).unwrap();
                let _ = resume_rx.recv_timeout(Duration::from_secs(5));
            }),
        )
        .unwrap();
        io.store_async(ContextOwner::SegmentCtx, vec![2; 4], Box::new(|_| {}))
            .unwrap();
        started_rx.recv_timeout(Duration::from_secs(5)).unwrap();

        thread::scope(|scope| {
            let writer = scope.spawn(|| io.store_sync(ContextOwner::SegmentCtx, vec![3; 4]));
            thread::sleep(Duration::from_millis(50));
            assert!(!writer.is_finished());
            resume_tx.send(()).unwrap();
            writer.join().unwrap().unwrap();
        });

        assert_eq!(
            io.backends().get(ContextOwner::SegmentCtx).read_all().unwrap(),
            vec![3; 4]
        );
    }

    #[test]
    fn sync_store_after_close_writes_directly() {
        let io = FileIoManager::new(ContextBackends::in_memory()).unwrap();
        io.store_async(ContextOwner::RebuildCtx, vec![1; 4], Box::new(|_| {}))
            .unwrap();
        io.close();
        io.store_sync(ContextOwner::RebuildCtx, vec![2; 6]).unwrap();
        assert_eq!(
            io.backends().get(ContextOwner::RebuildCtx).read_all().unwrap(),
            vec![2; 6]
        );
    }

    #[test]
    fn close_drains_and_rejects_new_work() {
        let io = FileIoManager::new(ContextBackends::in_memory()).unwrap();
        io.store_async(ContextOwner::SegmentCtx, vec![1; 4], Box::new(|_| {}))
            .unwrap();
        io.close();
        assert_eq!(io.backends().get(ContextOwner::SegmentCtx).size().unwrap(), 4);
        assert!(matches!(
            io.store_async(ContextOwner::SegmentCtx, vec![], Box::new(|_| {})),
            Err(CoreError::TransportClosed)
        ));
    }
}
