//! The *HubSocket* channel (§4.1): a TCP stream owned by rank 0, carrying framed messages with
//! an optional trailing payload to and from the hub process.

use std::io;
use std::net::TcpStream;

use tracing::warn;

use crate::error::Result;
use crate::id::Id;
use crate::message::wire::{read_frame, write_frame};
use crate::message::{Body, Message};

/// Rank 0's connection to the hub. Every other rank reaches the hub only by forwarding through
/// rank 0 (`forwardToMaster`, §4.1) -- this type is never constructed on other ranks.
pub struct HubLink {
    stream: TcpStream,
}

impl HubLink {
    pub fn connect(addr: impl std::net::ToSocketAddrs) -> io::Result<Self> {
        let stream = TcpStream::connect(addr)?;
        stream.set_nodelay(true)?;
        Ok(HubLink { stream })
    }

    pub fn from_stream(stream: TcpStream) -> Self {
        HubLink { stream }
    }

    pub fn send(&mut self, msg: &Message, payload: Option<&[u8]>) -> Result<()> {
        write_frame(&mut self.stream, msg, payload)
    }

    /// Reads the next frame. A broken hub socket is not this function's concern to interpret --
    /// callers use [`HubLink::recv_or_shutdown`] when they need the §4.1 "treat as shutdown
    /// request" behavior.
    pub fn recv(&mut self) -> Result<(Message, Option<Vec<u8>>)> {
        read_frame(&mut self.stream)
    }

    /// Reads the next frame, substituting a synthetic `QUIT` broadcast if the socket has gone
    /// away (§4.1 "A broken hub socket on rank 0 is treated as a shutdown request").
    pub fn recv_or_shutdown(&mut self) -> Message {
        match self.recv() {
            Ok((msg, _payload)) => msg,
            Err(err) => {
                warn!(error = %err, "hub socket broken, synthesizing QUIT");
                Message::new(Id::MASTER_HUB, 0, Id::BROADCAST, -1, Body::Quit)
            }
        }
    }
}
