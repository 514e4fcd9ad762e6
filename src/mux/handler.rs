//! Per-connection inspection task
//!
//! One task per accepted connection runs the whole inspection sequence:
//! apply the read deadline, walk every matcher group in priority order, and
//! either hand the connection to the winning group's sub-listener or close
//! it. Matchers for one connection run strictly sequentially because they
//! share the replay cursor; across connections inspection is fully parallel.

use std::sync::Arc;
use std::time::Duration;

use log::{debug, warn};
use tokio::sync::{mpsc, watch};

use crate::common::MuxError;
use crate::stream::MuxStream;

use super::server::{ErrorPolicy, MatchGroup};

pub(crate) async fn inspect_connection(
    mut conn: MuxStream,
    groups: Arc<Vec<MatchGroup>>,
    read_timeout: Option<Duration>,
    mut shutdown: watch::Receiver<bool>,
    policy: Arc<ErrorPolicy>,
    fatal: mpsc::Sender<MuxError>,
) {
    let peer = conn.peer_addr();

    if let Some(timeout) = read_timeout {
        conn.set_read_deadline(timeout);
    }

    for (index, group) in groups.iter().enumerate() {
        for matcher in &group.matchers {
            // Rewind so this matcher sees the stream from byte zero,
            // including bytes earlier matchers already consumed.
            conn.start_inspection();
            if !matcher.claim(&mut conn).await {
                continue;
            }

            conn.finish_inspection();
            debug!("connection from {:?} matched group {}", peer, index);

            // Hand-off races the shutdown signal so a pending enqueue never
            // outlives close(); losing the race drops the connection.
            let delivery = group.queue.send(conn);
            tokio::select! {
                biased;
                delivered = delivery => {
                    if delivered.is_err() {
                        debug!("sub-listener for group {} closed, dropping connection from {:?}", index, peer);
                    }
                }
                _ = shutdown.wait_for(|closed| *closed) => {
                    debug!("multiplexer closing, dropping connection from {:?} before hand-off", peer);
                }
            }
            return;
        }
    }

    // No matcher in any group claimed it: close the connection and report
    // through the error policy.
    drop(conn);
    let err = MuxError::NotMatched { peer };
    warn!("{}", err);
    if !(*policy)(&err) {
        // Capacity-one channel: if a fatal error is already pending the
        // shutdown is underway and this one adds nothing.
        let _ = fatal.try_send(err);
    }
}
