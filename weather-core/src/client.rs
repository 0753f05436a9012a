use tokio::{
    io::BufReader,
    net::{
        TcpStream, ToSocketAddrs,
        tcp::{OwnedReadHalf, OwnedWriteHalf},
    },
};

use crate::{
    error::WireError,
    model::{Location, WeatherData},
    wire,
};

/// Minimal client for the distribution protocol: send a location, read readings.
#[derive(Debug)]
pub struct WeatherClient {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl WeatherClient {
    pub async fn connect(addr: impl ToSocketAddrs) -> Result<Self, WireError> {
        let stream = TcpStream::connect(addr).await?;
        let (read_half, writer) = stream.into_split();

        Ok(Self {
            reader: BufReader::new(read_half),
            writer,
        })
    }

    pub async fn send_location(&mut self, location: &Location) -> Result<(), WireError> {
        wire::write_frame(&mut self.writer, location).await
    }

    /// Next reading pushed by the server, or `None` once it has closed the connection.
    pub async fn next_report(&mut self) -> Result<Option<WeatherData>, WireError> {
        match wire::read_frame(&mut self.reader).await {
            Err(e) if e.is_disconnect() => Ok(None),
            other => other,
        }
    }
}
