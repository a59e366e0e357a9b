#![deny(missing_docs)]
//! Syzygy API contains the types shared between the phleet connection
//! broker and the synchronized data distribution layer.
//!
//! Neither side depends on the other. A sync data server only needs
//! something that can hand it brokered ports (see [ServiceRegistrar]),
//! and the broker does not care who is asking.

pub mod config;

mod error;
pub use error::*;

pub mod id;
pub use id::{ComponentId, MatchTag, Port};

mod registrar;
pub use registrar::*;
