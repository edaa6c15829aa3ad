//! Block-parallel gzip encoder.
//!
//! Input is cut into blocks of a fixed size. Every block is compressed into
//! an independent gzip member on a pool of worker threads, and the members
//! are written to the inner writer strictly in block order. The result is a
//! multi-member gzip stream that any gzip reader (e.g.
//! [`flate2::read::MultiGzDecoder`]) decodes back into the original bytes.

use crossbeam_channel::{Receiver, Sender, bounded};
use flate2::Compression;
use flate2::write::GzEncoder;
use std::collections::VecDeque;
use std::io::{self, Write};
use std::thread::{self, JoinHandle};
use tracing::{debug, trace, warn};

struct Job {
    data: Vec<u8>,
    level: Compression,
    done: Sender<io::Result<Vec<u8>>>,
}

/// Default number of compression workers: twice the available parallelism.
pub fn default_workers() -> usize {
    thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
        * 2
}

pub struct ParallelGzWriter<W: Write> {
    inner: Option<W>,
    level: Compression,
    block_size: usize,
    block: Vec<u8>,
    jobs: Option<Sender<Job>>,
    pending: VecDeque<Receiver<io::Result<Vec<u8>>>>,
    max_pending: usize,
    workers: Vec<JoinHandle<()>>,
    members_written: u64,
}

impl<W: Write> ParallelGzWriter<W> {
    pub fn new(inner: W, level: u32, block_size: usize, workers: usize) -> io::Result<Self> {
        let workers = workers.max(1);
        let block_size = block_size.max(1);
        let (jobs_tx, jobs_rx) = bounded::<Job>(workers);

        let mut handles = Vec::with_capacity(workers);
        for id in 0..workers {
            let jobs_rx = jobs_rx.clone();
            let handle = thread::Builder::new()
                .name(format!("gzip-worker-{id}"))
                .spawn(move || {
                    for job in jobs_rx.iter() {
                        let result = compress_block(&job.data, job.level);
                        let _ = job.done.send(result);
                    }
                })?;
            handles.push(handle);
        }
        debug!(workers, block_size, level, "Started parallel gzip workers");

        Ok(Self {
            inner: Some(inner),
            level: Compression::new(level),
            block_size,
            block: Vec::with_capacity(block_size),
            jobs: Some(jobs_tx),
            pending: VecDeque::new(),
            max_pending: workers * 2,
            workers: handles,
            members_written: 0,
        })
    }

    /// Compresses the remaining input, writes all outstanding members and
    /// returns the inner writer.
    pub fn finish(mut self) -> io::Result<W> {
        self.finish_blocks()?;
        self.inner
            .take()
            .ok_or_else(|| io::Error::other("gzip writer already finished"))
    }

    fn submit_block(&mut self) -> io::Result<()> {
        if self.block.is_empty() {
            return Ok(());
        }
        let data = std::mem::replace(&mut self.block, Vec::with_capacity(self.block_size));
        let (done_tx, done_rx) = bounded(1);
        let jobs = self
            .jobs
            .as_ref()
            .ok_or_else(|| io::Error::other("gzip writer already finished"))?;

        trace!(bytes = data.len(), "Submitting block for compression");
        jobs.send(Job {
            data,
            level: self.level,
            done: done_tx,
        })
        .map_err(|_| io::Error::other("compression workers stopped"))?;
        self.pending.push_back(done_rx);

        while self.pending.len() > self.max_pending {
            self.write_next_member()?;
        }
        Ok(())
    }

    fn write_next_member(&mut self) -> io::Result<()> {
        let Some(done) = self.pending.pop_front() else {
            return Ok(());
        };
        let member = done
            .recv()
            .map_err(|_| io::Error::other("compression worker exited without a result"))??;
        let inner = self
            .inner
            .as_mut()
            .ok_or_else(|| io::Error::other("gzip writer already finished"))?;
        inner.write_all(&member)?;
        self.members_written += 1;
        Ok(())
    }

    fn drain_pending(&mut self) -> io::Result<()> {
        while !self.pending.is_empty() {
            self.write_next_member()?;
        }
        Ok(())
    }

    fn finish_blocks(&mut self) -> io::Result<()> {
        self.submit_block()?;
        let drained = self.drain_pending();

        self.jobs.take();
        for worker in self.workers.drain(..) {
            if worker.join().is_err() {
                warn!("Compression worker panicked");
            }
        }
        drained?;

        let inner = self
            .inner
            .as_mut()
            .ok_or_else(|| io::Error::other("gzip writer already finished"))?;
        if self.members_written == 0 {
            // An empty stream still needs one valid member.
            inner.write_all(&compress_block(&[], self.level)?)?;
            self.members_written = 1;
        }
        inner.flush()
    }
}

impl<W: Write> Write for ParallelGzWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let room = self.block_size - self.block.len();
        let n = room.min(buf.len());
        self.block.extend_from_slice(&buf[..n]);
        if self.block.len() >= self.block_size {
            self.submit_block()?;
        }
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.submit_block()?;
        self.drain_pending()?;
        match self.inner.as_mut() {
            Some(inner) => inner.flush(),
            None => Ok(()),
        }
    }
}

impl<W: Write> Drop for ParallelGzWriter<W> {
    fn drop(&mut self) {
        if self.inner.is_some()
            && let Err(err) = self.finish_blocks()
        {
            warn!(error = %err, "Failed to finish gzip stream on drop");
        }
    }
}

fn compress_block(data: &[u8], level: Compression) -> io::Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::with_capacity(data.len() / 2 + 64), level);
    encoder.write_all(data)?;
    encoder.finish()
}
