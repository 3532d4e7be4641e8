use std::{fmt::Display, future::Future, io, net::SocketAddr};

use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::{TcpListener, TcpStream},
};

/// Source of new client connections for the relay.
///
/// Dropping the listener closes it.
pub trait Listener: Send + 'static {
    type Stream: AsyncRead + AsyncWrite + Send + 'static;
    type Addr: Display + Send;

    fn accept(&mut self) -> impl Future<Output = io::Result<(Self::Stream, Self::Addr)>> + Send;
}

impl Listener for TcpListener {
    type Stream = TcpStream;
    type Addr = SocketAddr;

    fn accept(&mut self) -> impl Future<Output = io::Result<(TcpStream, SocketAddr)>> + Send {
        TcpListener::accept(self)
    }
}
