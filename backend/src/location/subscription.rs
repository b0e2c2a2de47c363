//! Cancellable location subscription
//!
//! `start()` spawns a reader task pumping a [`LocationSource`] into a
//! bounded channel exposed as a [`futures::Stream`]; `stop()` (or dropping
//! the subscription) cancels the task. A permission denial is forwarded and
//! ends the stream.

use super::{LocationSource, PositionSample, SourceError};
use futures::Stream;
use log::debug;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

const STREAM_BUFFER: usize = 16;

/// Handle owning the reader task
#[derive(Debug)]
pub struct LocationSubscription {
    token: CancellationToken,
    task: JoinHandle<()>,
}

impl LocationSubscription {
    /// Start reading from `source`
    ///
    /// Must be called inside a tokio runtime.
    pub fn start<S>(source: S) -> (Self, PositionStream)
    where
        S: LocationSource + 'static,
    {
        Self::start_with_token(source, CancellationToken::new())
    }

    /// Like [`LocationSubscription::start`], stopping also when `parent` is cancelled
    pub fn start_with_token<S>(mut source: S, parent: CancellationToken) -> (Self, PositionStream)
    where
        S: LocationSource + 'static,
    {
        let (tx, rx) = mpsc::channel(STREAM_BUFFER);
        let token = parent.child_token();
        let cancelled = token.clone();

        let task = tokio::spawn(async move {
            loop {
                let reading = tokio::select! {
                    _ = cancelled.cancelled() => break,
                    reading = source.next_reading() => reading,
                };
                let Some(reading) = reading else {
                    debug!("Location source exhausted");
                    break;
                };
                let denied = matches!(reading, Err(SourceError::PermissionDenied));
                if tx.send(reading).await.is_err() || denied {
                    break;
                }
            }
        });

        (Self { token, task }, PositionStream { rx })
    }

    /// Stop reading; the stream ends once buffered readings are drained
    pub fn stop(&self) {
        self.token.cancel();
    }

    pub fn is_stopped(&self) -> bool {
        self.token.is_cancelled() || self.task.is_finished()
    }
}

impl Drop for LocationSubscription {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

/// Readings of a running subscription
#[derive(Debug)]
pub struct PositionStream {
    rx: mpsc::Receiver<Result<PositionSample, SourceError>>,
}

impl Stream for PositionStream {
    type Item = Result<PositionSample, SourceError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo::Coordinate;
    use crate::location::ReplaySource;
    use chrono::Utc;
    use futures::StreamExt;
    use std::time::Duration;

    fn sample(accuracy_m: f64) -> PositionSample {
        PositionSample::new(Coordinate::new(-1.28, 36.82), accuracy_m, Utc::now())
    }

    #[tokio::test(start_paused = true)]
    async fn test_stream_yields_readings_in_order() {
        let source = ReplaySource::new()
            .then(Duration::from_millis(100), sample(80.0))
            .then(Duration::from_millis(100), sample(40.0));
        let (_sub, stream) = LocationSubscription::start(source);

        let accuracies: Vec<f64> = stream
            .map(|r| r.unwrap().accuracy_m)
            .collect()
            .await;
        assert_eq!(accuracies, vec![80.0, 40.0]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_ends_stream() {
        let source = ReplaySource::new()
            .then(Duration::from_secs(1), sample(80.0))
            .then(Duration::from_secs(60), sample(40.0));
        let (sub, mut stream) = LocationSubscription::start(source);

        assert!(stream.next().await.is_some());
        sub.stop();
        assert!(stream.next().await.is_none());
        assert!(sub.is_stopped());
    }

    #[tokio::test(start_paused = true)]
    async fn test_permission_denied_closes_stream() {
        let source = ReplaySource::new()
            .then_fail(Duration::from_millis(10), SourceError::PermissionDenied)
            .then(Duration::from_millis(10), sample(10.0));
        let (_sub, mut stream) = LocationSubscription::start(source);

        assert_eq!(stream.next().await, Some(Err(SourceError::PermissionDenied)));
        assert_eq!(stream.next().await, None);
    }
}
