//! # ember-network
//!
//! P2P networking layer for the Ember node.
//!
//! This crate provides:
//! - The top-level P2P server lifecycle (`start`/`stop`/`ban`/`info`)
//! - A UDP node-discovery table with bootstrap, ban and refresh
//! - A TCP session multiplexer with a framed hello exchange
//! - The live peer registry and server event stream
//! - Transport-error classification (ignored vs surfaced)

mod codec;
mod discovery;
mod error;
mod message;
mod registry;
mod server;
mod session;

pub use codec::{magic_for_network, FrameCodec, MAX_FRAME_SIZE};
pub use discovery::{DiscoveryTable, Endpoint};
pub use error::{is_ignored_error, NetworkError, NetworkResult, IGNORED_ERRORS};
pub use message::{Capability, DisconnectReason, Hello, Message, MessageType};
pub use registry::{PeerRecord, PeerRegistry};
pub use server::{
    ListeningInfo, P2PServer, ServerConfig, ServerEvent, ServerInfo, ServerPorts,
    DEFAULT_BAN_MAX_AGE,
};
pub use session::{SessionConfig, SessionEvent, SessionHandle, SessionMultiplexer};
