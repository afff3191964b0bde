//! Protocol engine for the self-configuring distribution tree: parent
//! selection, child admission, data forwarding, and block-cache/NACK
//! recovery, composed behind a single synchronous [`peer::Peer`].
//!
//! Every module here is transport-free: it consumes decoded [`codec::Frame`]
//! values and [`std::time::Instant`] timestamps and returns the frames that
//! should be sent where, leaving all socket I/O to the caller.

pub mod cache;
pub mod children;
pub mod parent;
pub mod peer;
pub mod ping;

pub use cache::{BlockCache, CacheError, NackOutcome};
pub use children::{Admission, Child, ChildTable, MAX_FANOUT};
pub use parent::{Action as ParentAction, ParentSelector, Phase as ParentPhase, MAX_STRETCH};
pub use peer::{Outbound, Peer};
pub use ping::{PingTable, Resolved, MAX_PINGS};
