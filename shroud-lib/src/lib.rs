use std::io;

use thiserror::Error;

pub mod app;
pub mod config;

mod common;
mod proxy;
mod session;

pub use app::{
    logging::setup_logging,
    registry::{DialerFactory, FactoryContext},
};
pub use common::pool::{BufferPool, PooledBuf};
pub use config::def::LogLevel;
pub use proxy::{
    AnyDialer, AnyPacketConn, AnyStream, Dialer, PacketConn, ProxyStream,
    direct::{DirectDialer, DirectPacketConn},
    doh::{DohDialer, DohExchanger, DohPacketConn, HttpsExchanger},
    http_obfs::{HttpObfsDialer, HttpObfsStream},
};
pub use session::Network;

#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error("invalid config: {0}")]
    InvalidConfig(String),
    #[error("invalid url: {0}")]
    InvalidUrl(#[from] url::ParseError),
    #[error("operation not supported")]
    NotSupported,
    #[error("could not create request: {0}")]
    InvalidRequest(String),
    #[error("wrong response from doh server: {0}")]
    Protocol(String),
    #[error("could not read message from response: {0}")]
    Resource(String),
    #[error("connection closed")]
    Closed,
}

pub type Result<T> = std::result::Result<T, Error>;

impl From<Error> for io::Error {
    fn from(e: Error) -> Self {
        match e {
            Error::Io(e) => e,
            Error::NotSupported => {
                io::Error::new(io::ErrorKind::Unsupported, Error::NotSupported)
            }
            Error::Closed => {
                io::Error::new(io::ErrorKind::NotConnected, Error::Closed)
            }
            other => io::Error::other(other),
        }
    }
}
