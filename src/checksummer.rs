use std::io;
use std::path::Path;
use std::sync::Arc;

use futures::future;
use tokio::{sync::mpsc, task::JoinHandle};

use crate::combiner::{CombineStrategy, Combiner, FusionCombiner, TreeCombiner};
use crate::crc;
use crate::error::{ChecksumError, Result};
use crate::planner::plan_chunks;
use crate::shared_types::{ByteCount, ByteRange, PartialChecksum};
use crate::source::{self, RandomAccessSource};

const MB_TO_BYTES: u64 = 1024 * 1024;
pub const DEFAULT_PART_SIZE: u64 = MB_TO_BYTES;

type ChunkUpdate = std::result::Result<PartialChecksum, (io::Error, ByteRange)>;

#[derive(Debug, Clone, Copy)]
pub struct ChecksumPreferences {
    /// Bytes per chunk, must be non-zero.
    pub part_size: u64,
    /// Worker count; 0 uses every available core.
    pub concurrency: usize,
    pub strategy: CombineStrategy,
}

impl Default for ChecksumPreferences {
    fn default() -> Self {
        Self {
            part_size: DEFAULT_PART_SIZE,
            concurrency: 0,
            strategy: CombineStrategy::default(),
        }
    }
}

fn resolve_concurrency(concurrency: usize) -> usize {
    if concurrency > 0 {
        return concurrency;
    }
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

/// Opens `path` and checksums it with [`parallel_checksum`].
pub async fn parallel_checksum_file(
    path: &Path,
    specs: ChecksumPreferences,
    mmap: bool,
    s_progress: Option<mpsc::Sender<ByteCount>>,
) -> Result<u32> {
    let source = source::open_source(path, mmap)?;
    parallel_checksum(source, specs, s_progress).await
}

/// CRC32C of the whole `source`, computed chunk by chunk on a pool of workers.
///
/// Every chunk's byte count is sent to `s_progress` once it has been checksummed.
/// The first failed read aborts the run; chunks still in flight are discarded.
pub async fn parallel_checksum(
    source: Arc<dyn RandomAccessSource>,
    specs: ChecksumPreferences,
    s_progress: Option<mpsc::Sender<ByteCount>>,
) -> Result<u32> {
    let length = source.len();
    let chunk_bounds = plan_chunks(length, specs.part_size)?;
    let chunk_count = chunk_bounds.len();
    debug!(
        "source has {length} bytes, {chunk_count} chunks of up to {} bytes",
        specs.part_size
    );

    // more workers than chunks would only idle
    let worker_count = resolve_concurrency(specs.concurrency).min(chunk_count.max(1));
    debug!("checksumming with {worker_count} workers");

    let (s_processing_q, r_processing_q) = async_channel::bounded::<ByteRange>(chunk_count.max(1));
    let (s_update, r_update) = mpsc::channel::<ChunkUpdate>(worker_count);

    // The queue is filled once and closed; workers drain it and exit.
    for bound in chunk_bounds {
        s_processing_q
            .send(bound)
            .await
            .map_err(|_| ChecksumError::WorkerLost)?;
    }
    s_processing_q.close();

    let handles = (0..worker_count)
        .map(|_| {
            spawn_checksum_worker(
                source.clone(),
                r_processing_q.clone(),
                s_update.clone(),
                s_progress.clone(),
            )
        })
        .collect::<Vec<_>>();
    drop(s_update);

    let collected = match specs.strategy {
        CombineStrategy::Tree => {
            let combiner = TreeCombiner::new(chunk_count, specs.part_size, length);
            collect_checksums(combiner, chunk_count, r_update, &r_processing_q).await
        }
        CombineStrategy::Fusion => {
            let combiner = FusionCombiner::new(length);
            collect_checksums(combiner, chunk_count, r_update, &r_processing_q).await
        }
    };

    let checksum = match collected {
        Ok(checksum) => checksum,
        Err(e) => {
            error!("checksum aborted: {e}");
            return Err(e);
        }
    };

    future::join_all(handles).await;
    debug!("checksum complete: {checksum}");
    Ok(checksum)
}

fn spawn_checksum_worker(
    source: Arc<dyn RandomAccessSource>,
    r_processing_q: async_channel::Receiver<ByteRange>,
    s_update: mpsc::Sender<ChunkUpdate>,
    s_progress: Option<mpsc::Sender<ByteCount>>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Ok(range) = r_processing_q.recv().await {
            let source = source.clone();
            let update =
                match tokio::task::spawn_blocking(move || checksum_range(source.as_ref(), range))
                    .await
                {
                    Ok(update) => update,
                    Err(e) => {
                        error!("checksum of chunk {} did not complete: {e}", range.index);
                        break;
                    }
                };

            if let (Ok(part), Some(s_progress)) = (&update, &s_progress) {
                s_progress.send(part.byte_length).await.ok();
            }
            if s_update.send(update).await.is_err() {
                // collector gave up, nobody wants the rest
                break;
            }
        }
        trace!("stopping checksum worker");
    })
}

fn checksum_range(source: &dyn RandomAccessSource, range: ByteRange) -> ChunkUpdate {
    let count = match usize::try_from(range.len()) {
        Ok(count) => count,
        Err(e) => return Err((io::Error::new(io::ErrorKind::InvalidInput, e), range)),
    };
    let data = source.read_at(range.start, count).map_err(|e| (e, range))?;
    Ok(PartialChecksum {
        index: range.index,
        start: range.start,
        byte_length: range.len(),
        checksum: crc::crc32c(&data),
    })
}

/// Feeds `expected` worker results into `combiner`, then reduces them.
async fn collect_checksums<C>(
    mut combiner: C,
    expected: usize,
    mut r_update: mpsc::Receiver<ChunkUpdate>,
    r_processing_q: &async_channel::Receiver<ByteRange>,
) -> Result<u32>
where
    C: Combiner + Send + 'static,
{
    let mut received = 0;
    while received < expected {
        let absorbed = match r_update.recv().await {
            Some(Ok(part)) => combiner.absorb(part).map_err(ChecksumError::from),
            Some(Err((source, range))) => Err(ChecksumError::Read {
                index: range.index,
                offset: range.start,
                count: range.len(),
                source,
            }),
            None => Err(ChecksumError::WorkerLost),
        };
        if let Err(e) = absorbed {
            windup(r_processing_q, &mut r_update);
            return Err(e);
        }
        received += 1;
    }

    tokio::task::spawn_blocking(move || combiner.finish())
        .await
        .map_err(|_| ChecksumError::WorkerLost)?
        .map_err(ChecksumError::from)
}

/// Stops handing out chunks and refuses further results.
fn windup(r_processing_q: &async_channel::Receiver<ByteRange>, r_update: &mut mpsc::Receiver<ChunkUpdate>) {
    let mut dropped = 0;
    while r_processing_q.try_recv().is_ok() {
        dropped += 1;
    }
    r_update.close();
    debug!("winding up: {dropped} queued chunks dropped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::MemorySource;
    use bytes::Bytes;
    use rand::rngs::StdRng;
    use rand::{RngCore, SeedableRng};
    use std::time::Duration;

    fn dummy_bytes(n: usize, seed: u64) -> Vec<u8> {
        let mut data = vec![0u8; n];
        StdRng::seed_from_u64(seed).fill_bytes(&mut data);
        data
    }

    fn prefs(part_size: u64, concurrency: usize, strategy: CombineStrategy) -> ChecksumPreferences {
        ChecksumPreferences {
            part_size,
            concurrency,
            strategy,
        }
    }

    /// Fails every read that touches `bad_offset`.
    struct FailingSource {
        inner: MemorySource,
        bad_offset: u64,
    }

    impl RandomAccessSource for FailingSource {
        fn len(&self) -> u64 {
            self.inner.len()
        }

        fn read_at(&self, offset: u64, count: usize) -> io::Result<Bytes> {
            if (offset..offset + count as u64).contains(&self.bad_offset) {
                return Err(io::Error::new(io::ErrorKind::Other, "disk on fire"));
            }
            self.inner.read_at(offset, count)
        }
    }

    /// Reads near the start of the source take longest, so chunks finish
    /// roughly back to front.
    struct ReversedSource {
        inner: MemorySource,
    }

    impl RandomAccessSource for ReversedSource {
        fn len(&self) -> u64 {
            self.inner.len()
        }

        fn read_at(&self, offset: u64, count: usize) -> io::Result<Bytes> {
            let delay = (self.len() - offset) / 50;
            std::thread::sleep(Duration::from_millis(delay));
            self.inner.read_at(offset, count)
        }
    }

    struct PanickingSource;

    impl RandomAccessSource for PanickingSource {
        fn len(&self) -> u64 {
            40
        }

        fn read_at(&self, offset: u64, count: usize) -> io::Result<Bytes> {
            if offset == 20 {
                panic!("storage driver crashed");
            }
            Ok(Bytes::from(vec![0u8; count]))
        }
    }

    #[tokio::test]
    async fn random_source_in_small_parts() {
        let data = dummy_bytes(5000, 88);
        let expected = crc::crc32c(&data);
        let source = Arc::new(MemorySource::new(data));
        for strategy in [CombineStrategy::Tree, CombineStrategy::Fusion] {
            let actual = parallel_checksum(source.clone(), prefs(10, 10, strategy), None)
                .await
                .unwrap();
            assert_eq!(actual, expected);
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn matches_direct_checksum_across_settings() {
        for concurrency in (0..20).step_by(3) {
            let mut part_size = 1;
            while part_size < 2000 {
                let mut length = 1;
                while length < 5000 {
                    let data = dummy_bytes(length, 42);
                    let expected = crc::crc32c(&data);
                    let source: Arc<dyn RandomAccessSource> = Arc::new(MemorySource::new(data));
                    for strategy in [CombineStrategy::Tree, CombineStrategy::Fusion] {
                        let actual = parallel_checksum(
                            source.clone(),
                            prefs(part_size, concurrency, strategy),
                            None,
                        )
                        .await
                        .unwrap();
                        assert_eq!(
                            actual, expected,
                            "length {length}, part size {part_size}, concurrency {concurrency}, {strategy:?}"
                        );
                    }
                    length *= 10;
                }
                part_size *= 10;
            }
        }
    }

    #[tokio::test]
    async fn empty_source_checksums_to_zero() {
        let source = Arc::new(MemorySource::new(Bytes::new()));
        let checksum = parallel_checksum(source, ChecksumPreferences::default(), None)
            .await
            .unwrap();
        assert_eq!(checksum, crc::crc32c(&[]));
    }

    #[tokio::test]
    async fn part_size_beyond_length_is_single_chunk() {
        let data = dummy_bytes(777, 5);
        let expected = crc::crc32c(&data);
        let source = Arc::new(MemorySource::new(data));
        let checksum = parallel_checksum(source, prefs(777, 4, CombineStrategy::Tree), None)
            .await
            .unwrap();
        assert_eq!(checksum, expected);
    }

    #[tokio::test]
    async fn zero_part_size_is_rejected() {
        let source = Arc::new(MemorySource::new(vec![1u8; 10]));
        let err = parallel_checksum(source, prefs(0, 1, CombineStrategy::Tree), None)
            .await
            .unwrap_err();
        assert!(matches!(err, ChecksumError::Plan(_)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn out_of_order_completion() {
        let data = dummy_bytes(2000, 9);
        let expected = crc::crc32c(&data);
        let source = Arc::new(ReversedSource {
            inner: MemorySource::new(data),
        });
        for strategy in [CombineStrategy::Tree, CombineStrategy::Fusion] {
            let checksum = parallel_checksum(source.clone(), prefs(100, 20, strategy), None)
                .await
                .unwrap();
            assert_eq!(checksum, expected);
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn failed_read_fails_the_whole_checksum() {
        let source = Arc::new(FailingSource {
            inner: MemorySource::new(dummy_bytes(1000, 3)),
            bad_offset: 437,
        });
        for strategy in [CombineStrategy::Tree, CombineStrategy::Fusion] {
            let err = parallel_checksum(source.clone(), prefs(100, 3, strategy), None)
                .await
                .unwrap_err();
            match err {
                ChecksumError::Read { index, offset, count, .. } => {
                    assert_eq!((index, offset, count), (4, 400, 100));
                }
                other => panic!("unexpected error: {other}"),
            }
        }
    }

    #[tokio::test]
    async fn crashed_worker_is_reported() {
        let err = parallel_checksum(Arc::new(PanickingSource), prefs(10, 2, CombineStrategy::Tree), None)
            .await
            .unwrap_err();
        assert!(matches!(err, ChecksumError::WorkerLost), "{err}");
    }

    #[tokio::test]
    async fn progress_reports_every_byte() {
        let source = Arc::new(MemorySource::new(dummy_bytes(1234, 1)));
        let (s_progress, mut r_progress) = mpsc::channel::<ByteCount>(1024);
        parallel_checksum(source, prefs(100, 4, CombineStrategy::Tree), Some(s_progress))
            .await
            .unwrap();
        let mut total = 0;
        while let Some(n) = r_progress.recv().await {
            total += n;
        }
        assert_eq!(total, 1234);
    }
}
