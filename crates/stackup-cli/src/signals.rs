use stackup_core::readiness::CancelToken;

/// Turn SIGINT/SIGTERM into cancellation instead of process death, so the
/// run can clean up its secret file and write diagnostics before exiting.
pub fn listen() -> CancelToken {
    let cancel = CancelToken::new();
    let flag = cancel.clone();
    let spawned = std::thread::Builder::new()
        .name("stackup-signals".into())
        .spawn(move || {
            let rt = match tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
            {
                Ok(rt) => rt,
                Err(e) => {
                    tracing::warn!(error = %e, "signal listener unavailable");
                    return;
                }
            };
            if rt.block_on(wait_for_signal()) {
                tracing::warn!("interrupt received; stopping after the current step");
                flag.cancel();
            }
        });
    if let Err(e) = spawned {
        tracing::warn!(error = %e, "failed to spawn signal listener");
    }
    cancel
}

#[cfg(unix)]
async fn wait_for_signal() -> bool {
    use tokio::signal::unix::{signal, SignalKind};
    let mut term = match signal(SignalKind::terminate()) {
        Ok(term) => term,
        Err(_) => return tokio::signal::ctrl_c().await.is_ok(),
    };
    tokio::select! {
        res = tokio::signal::ctrl_c() => res.is_ok(),
        _ = term.recv() => true,
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() -> bool {
    tokio::signal::ctrl_c().await.is_ok()
}
