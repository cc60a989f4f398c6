use crate::error::ExplError;
use rayon::prelude::*;

/// Runs `f` over `items` on at most `width` worker threads and returns the
/// results in item order.
pub fn run_bounded<T, R, F>(items: &[T], width: usize, f: F) -> Result<Vec<R>, ExplError>
where
    T: Sync,
    R: Send,
    F: Fn(&T) -> R + Sync + Send,
{
    if width <= 1 || items.len() <= 1 {
        return Ok(items.iter().map(f).collect());
    }
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(width.min(items.len()))
        .thread_name(|i| format!("expl-worker-{}", i))
        .build()
        .map_err(|e| ExplError::Pool(e.to_string()))?;
    Ok(pool.install(|| items.par_iter().with_max_len(1).map(&f).collect()))
}
