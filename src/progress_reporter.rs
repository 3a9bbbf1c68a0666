use std::sync::Arc;
use std::time::Duration;

use circular_buffer::CircularBuffer;

use indicatif::{MultiProgress, ProgressBar, ProgressState, ProgressStyle};

use tokio::sync::RwLock;
use tokio::time::Instant;
use tokio::{sync::mpsc, task::JoinHandle};

use crate::shared_types::ByteCount;

const UPDATE_INTERVAL: Duration = Duration::from_millis(500);

/// Draws a byte-count progress bar fed by the checksum workers.
pub struct ProgressReporter {
    rx_progress: mpsc::Receiver<ByteCount>,
    total_size: ByteCount,
    multi_progress: MultiProgress,
}

impl ProgressReporter {
    pub fn new(
        rx_progress: mpsc::Receiver<ByteCount>,
        total_size: ByteCount,
        multi_progress: MultiProgress,
    ) -> Self {
        Self {
            rx_progress,
            total_size,
            multi_progress,
        }
    }

    /// Runs until every sender of the progress channel is dropped.
    pub fn spawn(self) -> JoinHandle<()> {
        spawn_progress_reporter(self.total_size, self.rx_progress, self.multi_progress)
    }
}

fn format_speed(bytes_per_sec: f64) -> String {
    let (unit, speed) = if bytes_per_sec > 1024.0 * 1024.0 {
        ("MB/s", bytes_per_sec / (1024.0 * 1024.0))
    } else {
        ("kB/s", bytes_per_sec / 1024.0)
    };
    format!("{:.1} {}", speed, unit)
}

fn bar_style() -> ProgressStyle {
    match ProgressStyle::with_template(
        "{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {bytes}/{total_bytes} ({eta}) ({msg})",
    ) {
        Ok(style) => style
            .with_key("eta", |state: &ProgressState, w: &mut dyn std::fmt::Write| {
                write!(w, "{:.1}s", state.eta().as_secs_f64()).ok();
            })
            .progress_chars("#>-"),
        Err(e) => {
            warn!("falling back to default progress style: {e}");
            ProgressStyle::default_bar()
        }
    }
}

pub(crate) fn spawn_progress_reporter(
    total_size: ByteCount,
    mut rx_progress: mpsc::Receiver<ByteCount>,
    multi: MultiProgress,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut progress: ByteCount = 0;
        type ProgressPoint = (ByteCount, Instant);
        let progress_q = Arc::new(RwLock::new(CircularBuffer::<50, ProgressPoint>::new()));
        let pb = multi.add(ProgressBar::new(total_size));
        pb.set_style(bar_style());

        // refresh the throughput estimate over the sample window
        {
            let progress_q = progress_q.clone();
            let pb = pb.clone();
            tokio::spawn(async move {
                while !pb.is_finished() {
                    tokio::time::sleep(UPDATE_INTERVAL).await;
                    let q = progress_q.read().await;
                    if let (Some((latest_byte, latest_instant)), Some((oldest_byte, oldest_instant))) =
                        (q.back(), q.front())
                    {
                        if latest_byte == oldest_byte {
                            continue;
                        }
                        let speed = (latest_byte - oldest_byte) as f64
                            / latest_instant.duration_since(*oldest_instant).as_secs_f64();
                        pb.set_message(format_speed(speed));
                    }
                }
            });
        }

        while let Some(chunk_size) = rx_progress.recv().await {
            progress += chunk_size;
            pb.set_position(progress);
            let mut q = progress_q.write().await;
            q.push_back((progress, Instant::now()));
        }
        let speed = progress as f64 / pb.elapsed().as_secs_f64().max(f64::EPSILON);
        pb.finish_with_message(format_speed(speed));
    })
}
