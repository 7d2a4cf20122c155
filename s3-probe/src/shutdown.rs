use std::future::Future;
use std::io;

use tokio::signal::unix::{signal, SignalKind};
use tokio::task::JoinError;
use tracing::{error, info};

/// Resolves on the first SIGINT or SIGTERM.
pub async fn wait_for_shutdown_signal() -> Result<(), io::Error> {
    let mut sigterm = signal(SignalKind::terminate())?;

    tokio::select! {
        res = tokio::signal::ctrl_c() => {
            res?;
            info!("received SIGINT");
        }
        _ = sigterm.recv() => info!("received SIGTERM"),
    }
    Ok(())
}

/// Why the process is stopping.
#[derive(Debug)]
pub enum StopReason {
    Signal,
    /// The signal handlers could not be installed
    SignalHandler(io::Error),
    /// The HTTP server stopped on its own
    Server(String),
}

impl StopReason {
    pub fn exit_code(&self) -> u8 {
        match self {
            StopReason::Signal => 0,
            StopReason::SignalHandler(_) => 1,
            StopReason::Server(_) => 2,
        }
    }
}

/// Waits for whichever comes first: a shutdown signal or the server task ending.
pub async fn wait_for_stop<S, T>(signal: S, server: T) -> StopReason
where
    S: Future<Output = Result<(), io::Error>>,
    T: Future<Output = Result<Result<(), io::Error>, JoinError>>,
{
    tokio::select! {
        res = signal => match res {
            Ok(()) => StopReason::Signal,
            Err(e) => {
                error!(error = %e, "failed to listen for shutdown signals");
                StopReason::SignalHandler(e)
            }
        },
        res = server => {
            let reason = match res {
                Ok(Ok(())) => "server exited unexpectedly".to_string(),
                Ok(Err(e)) => format!("server failed: {e}"),
                Err(e) => format!("server task panicked: {e}"),
            };
            error!(reason = %reason, "server stopped");
            StopReason::Server(reason)
        }
    }
}

#[cfg(test)]
mod tests {
    use std::future::pending;

    use super::*;

    type ServerResult = Result<Result<(), io::Error>, JoinError>;

    async fn crashing_server() -> Result<(), io::Error> {
        panic!("boom")
    }

    #[tokio::test]
    async fn signal_stops_cleanly() {
        let reason = wait_for_stop(async { Ok::<(), io::Error>(()) }, pending::<ServerResult>()).await;

        assert!(matches!(reason, StopReason::Signal));
        assert_eq!(reason.exit_code(), 0);
    }

    #[tokio::test]
    async fn signal_handler_failure_is_not_a_clean_stop() {
        let reason = wait_for_stop(
            async { Err::<(), _>(io::Error::new(io::ErrorKind::Unsupported, "no signals here")) },
            pending::<ServerResult>(),
        )
        .await;

        assert!(matches!(reason, StopReason::SignalHandler(_)));
        assert_eq!(reason.exit_code(), 1);
    }

    #[tokio::test]
    async fn server_error_stops_with_its_own_code() {
        let server: ServerResult = Ok(Err(io::Error::new(io::ErrorKind::AddrInUse, "address in use")));

        let reason = wait_for_stop(pending::<Result<(), io::Error>>(), async { server }).await;

        match &reason {
            StopReason::Server(message) => assert!(message.contains("address in use")),
            other => panic!("unexpected stop reason: {other:?}"),
        }
        assert_eq!(reason.exit_code(), 2);
    }

    #[tokio::test]
    async fn panicked_server_task_stops_with_server_code() {
        let server = tokio::spawn(crashing_server());

        let reason = wait_for_stop(pending::<Result<(), io::Error>>(), server).await;

        assert!(matches!(reason, StopReason::Server(_)));
        assert_eq!(reason.exit_code(), 2);
    }
}
