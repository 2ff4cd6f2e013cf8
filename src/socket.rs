//! # Summary
//!
//! This module abstracts over external connections to players and peer servers.
//!
//! Uses `tokio-util`'s `LinesCodec` over the two owned halves of a TCP stream,
//! so each side of a connection reads and writes one record per line. The
//! halves are typed by the record they carry: `Rx<R>` parses with `FromStr`
//! and `Tx<T>` renders with `Display`.

use std::fmt::Display;
use std::marker::PhantomData;
use std::str::FromStr;

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio_util::codec::{FramedRead, FramedWrite, LinesCodec};

use crate::error::{Error, Parse};

/// Longest accepted record, in bytes.
const MAX_LINE: usize = 16 * 1024;

pub struct Rx<R> {
    inner: FramedRead<OwnedReadHalf, LinesCodec>,
    _marker: PhantomData<fn() -> R>,
}

pub struct Tx<T> {
    inner: FramedWrite<OwnedWriteHalf, LinesCodec>,
    _marker: PhantomData<fn(T)>,
}

pub fn split<T, R>(stream: TcpStream) -> (Rx<R>, Tx<T>)
where T: Display,
      R: FromStr<Err = Parse>,
{
    let (rx, tx) = stream.into_split();
    let rx = FramedRead::new(rx, LinesCodec::new_with_max_length(MAX_LINE));
    let tx = FramedWrite::new(tx, LinesCodec::new_with_max_length(MAX_LINE));
    (
        Rx { inner: rx, _marker: PhantomData },
        Tx { inner: tx, _marker: PhantomData },
    )
}

impl<R: FromStr<Err = Parse>> Rx<R> {
    /// Reads the next record.
    ///
    /// Returns `None` once the remote end closes the stream. A line that does
    /// not parse yields `Error::Parse`; the stream stays usable afterwards.
    pub async fn recv(&mut self) -> Option<Result<R, Error>> {
        match self.inner.next().await? {
        | Ok(line) => Some(line.parse::<R>().map_err(Error::from)),
        | Err(error) => Some(Err(Error::from(error))),
        }
    }
}

impl<T: Display> Tx<T> {
    /// Writes one record and flushes it.
    pub async fn send(&mut self, message: &T) -> Result<(), Error> {
        self.inner.send(message.to_string()).await?;
        Ok(())
    }
}
