//! Dedicated runtime for driving async bridge calls from synchronous FUSE
//! callbacks. The kernel delivers callbacks on its own threads, so the
//! adapter cannot assume an ambient tokio context.

use std::sync::OnceLock;

use tokio::runtime::Runtime;

static RUNTIME: OnceLock<Runtime> = OnceLock::new();

/// Initialize the shared runtime. Idempotent.
pub fn init_runtime() -> std::io::Result<()> {
    if RUNTIME.get().is_some() {
        return Ok(());
    }
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()?;
    let _ = RUNTIME.set(runtime);
    Ok(())
}

/// Run a future to completion on the shared runtime.
///
/// Panics if `init_runtime` has not been called; the adapter constructor
/// guarantees that ordering.
pub fn block_on<F: std::future::Future>(future: F) -> F::Output {
    let runtime = RUNTIME
        .get()
        .unwrap_or_else(|| panic!("bridge runtime not initialized"));
    runtime.block_on(future)
}

/// Access the runtime handle for spawning background tasks.
pub fn handle() -> Option<tokio::runtime::Handle> {
    RUNTIME.get().map(|r| r.handle().clone())
}
