use crossbeam_channel::{Receiver, Sender};
use std::thread::JoinHandle;

/// Routing tag for submitted work. The pool keeps separate channels per
/// class so disk-bound work cannot starve CPU-bound work (and vice versa).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum WorkClass {
    /// Work dominated by file I/O (reads, decompression straight off disk).
    DiskIo,
    /// Work dominated by parsing/decoding on the CPU.
    Cpu,
}

pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// The boundary to whatever executes background work. Implementations must
/// run every submitted job to completion exactly once, eventually, possibly
/// concurrently with other jobs. No result is returned through this trait;
/// completion is communicated by the job itself.
pub trait JobPool: Send + Sync {
    fn submit(
        &self,
        work_class: WorkClass,
        job: Job,
    );
}

struct WorkerChannel {
    tx: Option<Sender<Job>>,
    threads: Vec<JoinHandle<()>>,
}

impl WorkerChannel {
    fn new(
        name: &str,
        thread_count: usize,
    ) -> Self {
        let (tx, rx) = crossbeam_channel::unbounded::<Job>();

        let threads = (0..thread_count)
            .map(|i| {
                let rx: Receiver<Job> = rx.clone();
                std::thread::Builder::new()
                    .name(format!("lode-{}-{}", name, i))
                    .spawn(move || {
                        while let Ok(job) = rx.recv() {
                            job();
                        }
                        log::trace!("worker thread exiting");
                    })
                    .expect("failed to spawn worker thread")
            })
            .collect();

        WorkerChannel {
            tx: Some(tx),
            threads,
        }
    }
}

impl Drop for WorkerChannel {
    fn drop(&mut self) {
        // Dropping the sender disconnects the channel; workers drain what is
        // queued and then exit their recv loop.
        self.tx = None;
        for thread in self.threads.drain(..) {
            let _ = thread.join();
        }
    }
}

/// Default `JobPool` implementation: a fixed set of named OS threads per
/// work class, fed by unbounded channels. Dropping the pool finishes all
/// queued work before joining the threads.
pub struct WorkerPool {
    disk_io: WorkerChannel,
    cpu: WorkerChannel,
}

impl WorkerPool {
    pub fn new(
        disk_io_threads: usize,
        cpu_threads: usize,
    ) -> Self {
        assert!(disk_io_threads > 0 && cpu_threads > 0);
        WorkerPool {
            disk_io: WorkerChannel::new("io", disk_io_threads),
            cpu: WorkerChannel::new("cpu", cpu_threads),
        }
    }
}

impl Default for WorkerPool {
    fn default() -> Self {
        WorkerPool::new(2, 2)
    }
}

impl JobPool for WorkerPool {
    fn submit(
        &self,
        work_class: WorkClass,
        job: Job,
    ) {
        let channel = match work_class {
            WorkClass::DiskIo => &self.disk_io,
            WorkClass::Cpu => &self.cpu,
        };

        // The sender is only None while the pool is being torn down, and
        // submit cannot be called at that point because it takes &self.
        channel
            .tx
            .as_ref()
            .expect("worker pool is shutting down")
            .send(job)
            .expect("worker pool channel disconnected");
    }
}
