use tokio::select;
use tokio_util::sync::CancellationToken;

/// Detects signals sent to the process and turns them into a cancellation.
/// The watcher treats that cancellation as the shutdown/restart event, so
/// the final log entry goes out before the daemon exits.
///
/// On Windows detached processes can't detect signals sent to them, so this
/// should be enhanced in the future to support another way of sending
/// signals.
pub async fn detect_shutdown(cancelation: CancellationToken) {
    select! {
        _ = tokio::signal::ctrl_c() => {
            cancelation.cancel();
        },
    };
}
