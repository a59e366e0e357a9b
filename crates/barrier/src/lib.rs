#![deny(missing_docs)]
//! Syzygy frame-synchronized data distribution.
//!
//! A master process produces a stream of small records (scene graph or
//! sound changes) from one application thread. A [SyncDataServer] buffers
//! them and, once per frame, hands a consistent snapshot to every
//! connected renderer, pacing the whole cluster with a [FrameBarrier] so
//! nobody starts frame N+1 before everybody finished frame N.
//!
//! See [frame_cycle] for how one frame moves through the server.

/// This is a documentation module describing one frame of a
/// [SyncDataServer].
///
/// #### Producer
///
/// - Records go through [SyncHandler::on_message] first, then into the
///   back buffer, and only if someone is consuming.
/// - In [SyncMode::Auto], with a remote consumer, a back buffer over
///   [SyncConfig::send_limit] blocks the producer until the next swap.
///
/// #### Send thread
///
/// ```text
///  wait swap trigger
///        |
///  lock queue -- swap -- wake producer
///        |
///  passive sockets? --yes--> activate, front buffer to the old sockets,
///        |                   state dump to the new ones, unlock
///        no
///        |
///  unlock, broadcast front buffer
///        |
///  barrier round (unless NoSyncManual)
/// ```
///
/// - In auto mode the barrier release is the swap trigger.
/// - In manual modes [SyncDataServer::swap_buffers] is the swap trigger,
///   and the barrier release (manual only) lets it return.
/// - A socket whose write fails is dropped alone.
///
/// #### Local consumer
///
/// A [LocalSyncClient] in the same process replaces the sockets and the
/// barrier with a [Rendezvous] pair: the consumer says it is ready, the
/// send thread swaps and says the frame is ready.
#[cfg(doc)]
pub mod frame_cycle {}

mod queued_data;
pub use queued_data::*;

mod signal;
pub use signal::*;

mod rendezvous;
pub use rendezvous::*;

mod config;
pub use config::*;

mod socket;
pub use socket::*;

mod data_server;
pub use data_server::*;

mod barrier;
pub use barrier::*;

mod sync_server;
pub use sync_server::*;

#[cfg(test)]
mod mem_socket;
