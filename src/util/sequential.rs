use std::future::Future;

/// Run `op` over `items` one at a time, in order.
///
/// Each call's future must settle before the next item is handed over. The
/// first error stops processing and is returned; later items are never
/// seen. `items` is copied up front, so the caller's slice is only read.
pub async fn process_sequentially<T, F, Fut, R, E>(items: &[T], mut op: F) -> Result<(), E>
where
    T: Clone,
    F: FnMut(T) -> Fut,
    Fut: Future<Output = Result<R, E>>,
{
    let pending = items.to_vec();
    for item in pending {
        op(item).await?;
    }
    Ok(())
}
