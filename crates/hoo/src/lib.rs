//! # HOO
//!
//! Session-oriented TCP server with a user port and an admin port.
//!
//! Each port is served by its own [`NetworkEngine`]: a background loop that
//! accepts peers, reads their framed envelopes and queues them in order.
//! A dispatch loop per port drains that queue into the matching session
//! manager, and hands application payloads to a [`MessageHandler`].
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use hoo::prelude::*;
//!
//! # async fn start() -> Result<(), HooError> {
//! setup_logging("info")?;
//!
//! let server = HooServer::builder(MemoryAccountRepository::new())
//!     .user_address("0.0.0.0", 9000)
//!     .admin_address("127.0.0.1", 9001)
//!     .admin_credentials("root", "secret")
//!     .build()
//!     .await?;
//! server.run().await;
//! # Ok(())
//! # }
//! ```

mod config;
mod error;
mod handler;
pub mod logging;
mod server;

pub use config::{ServerConfig, AUTO_ADDRESS};
pub use error::HooError;
pub use handler::{MessageHandler, NullHandler};
pub use logging::{setup_logging, setup_logging_with_format};
pub use server::{HooServer, HooServerBuilder};

pub use hoo_net as net;
pub use hoo_protocol as protocol;
pub use hoo_session as session;

pub use hoo_net::NetworkEngine;

/// Everything needed to build a server and write a handler.
pub mod prelude {
    pub use crate::{
        setup_logging, HooError, HooServer, HooServerBuilder, MessageHandler, NullHandler,
        ServerConfig,
    };
    pub use hoo_net::{EngineConfig, NetworkEngine};
    pub use hoo_protocol::{
        Codec, JsonCodec, MaintenanceKind, Message, MessageKind, SessionId, UserNotice,
    };
    pub use hoo_session::{
        AccountRepository, AdminSessionManager, ConnectAnswer, DisconnectReason, LoginAnswer,
        MemoryAccountRepository, SessionConfig, SessionError, UserAccount, UserSessionManager,
    };
}
