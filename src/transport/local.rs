//! In-process transport
//!
//! An unbounded channel pair between a [`BridgeClient`](crate::rpc::BridgeClient)
//! and a host session. Used by embedded front ends and by the tests.

use super::Session;
use crate::protocol::envelope::Envelope;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinHandle;
use tracing::debug;

/// Feed `inbound` into `session` until either side goes away. The session is
/// closed when the pump ends.
pub fn serve(session: Session, mut inbound: UnboundedReceiver<Envelope>) -> JoinHandle<()> {
    let cancel = session.cancellation();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                envelope = inbound.recv() => match envelope {
                    Some(envelope) => session.handle(envelope),
                    None => {
                        debug!(session_id = %session.id(), "Local peer disconnected");
                        break;
                    }
                },
                _ = cancel.cancelled() => break,
            }
        }
        session.close();
    })
}
