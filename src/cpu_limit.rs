//! Limits on concurrent CPU-hungry work.

use std::sync::LazyLock;

use tokio::sync::Semaphore;

use crate::prelude::*;

/// One permit per core. Shared by every OCR process we launch, no matter which
/// pipeline instance launched it.
static CPU_SEMAPHORE: LazyLock<Semaphore> =
    LazyLock::new(|| Semaphore::new(num_cpus::get()));

/// Call an async function while holding a permit from the CPU semaphore.
///
/// A `tesseract` process pins a core for the duration of a page. When the
/// batch command runs many receipts at once, this queues recognitions rather
/// than oversubscribing the machine.
#[instrument(level = "trace", skip_all)]
pub async fn with_cpu_semaphore<Func, Fut, R>(f: Func) -> Result<R>
where
    Func: FnOnce() -> Fut,
    Fut: Future<Output = Result<R>>,
{
    let permit = CPU_SEMAPHORE
        .acquire()
        .await
        .context("could not acquire CPU permit")?;
    let result = f().await;
    drop(permit);
    result
}
