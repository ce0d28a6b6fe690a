use std::sync::OnceLock;

/// Pre-initialize the row-copy thread pool so the first capture doesn't
/// pay the pool-creation cost. Safe to call multiple times; only the
/// first call has any effect.
pub(crate) fn warmup_pool(max_workers: usize) {
    install_conversion_pool(max_workers, || {});
}

#[inline(always)]
pub(crate) fn should_parallelize(
    pixel_count: usize,
    min_pixels: usize,
    min_chunk_pixels: usize,
    max_workers: usize,
) -> bool {
    let workers = conversion_workers(max_workers);
    if workers <= 1 {
        return false;
    }
    let min_chunk_total = min_chunk_pixels.saturating_mul(workers);
    pixel_count >= min_pixels.max(min_chunk_total)
}

#[inline]
pub(crate) fn conversion_workers(max_workers: usize) -> usize {
    static WORKERS: OnceLock<usize> = OnceLock::new();
    (*WORKERS.get_or_init(|| {
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
    }))
    .min(max_workers.max(1))
}

#[inline]
pub(crate) fn install_conversion_pool<F>(max_workers: usize, job: F)
where
    F: FnOnce() + Send,
{
    static POOL: OnceLock<Option<rayon::ThreadPool>> = OnceLock::new();
    if let Some(pool) = POOL
        .get_or_init(|| {
            let workers = conversion_workers(max_workers);
            if workers <= 1 {
                return None;
            }
            rayon::ThreadPoolBuilder::new()
                .num_threads(workers)
                .thread_name(|index| format!("snow-dupl-rows-{index}"))
                .build()
                .ok()
        })
        .as_ref()
    {
        pool.install(job);
    } else {
        job();
    }
}
