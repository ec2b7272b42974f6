use crate::modbus::{self, ModbusTCPCodec, Operation, Request, Response};
use crate::registers::RegisterKind;
use crate::transport::{Transport, TransportError};
use futures::{SinkExt, StreamExt as _};
use tokio::net::TcpStream;
use tokio_util::codec::Framed;
use tracing::{debug, info, trace, warn};

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("lookup of `{1}` failed")]
    LookupHost(#[source] std::io::Error, String),
    #[error("could not connect to `{1}` over TCP")]
    Connect(#[source] std::io::Error, String),
    #[error("could not read data from the stream")]
    Receive(#[source] std::io::Error),
    #[error("could not send out the request")]
    Send(#[source] std::io::Error),
    #[error("the connection was closed by the device")]
    Closed,
    #[error("input registers cannot be written")]
    NotWritable,
}

#[derive(clap::Parser, Clone, Debug)]
#[group(id = "connection::Args")]
pub struct Args {
    /// Connect to the heat pump over Modbus TCP (e.g. `192.168.1.50:502`).
    #[arg(long)]
    tcp: String,

    /// The modbus device ID.
    #[arg(long, short = 'i', default_value = "1")]
    device_id: u8,

    /// If the modbus response isn't received in this amount of time, consider the request failed.
    #[arg(long, default_value = "3s")]
    read_timeout: humantime::Duration,

    /// The amount of additional time to wait after receiving a server busy exception.
    ///
    /// When busy, modbus devices and gateways can respond with an exception code 6. Give the
    /// device this amount of time to finish its current work before retrying.
    #[arg(long, default_value = "250ms")]
    server_busy_retry_delay: humantime::Duration,

    /// Report the device as busy after this many consecutive server busy exceptions.
    #[arg(long, default_value = "3")]
    server_busy_retries: usize,
}

type TcpIo = Framed<TcpStream, ModbusTCPCodec>;

/// Modbus TCP access to the heat pump, one request at a time.
///
/// The connection is established lazily and dropped on any I/O failure or timeout; the next
/// request then reconnects.
pub struct ModbusTcp {
    args: Args,
    io: Option<TcpIo>,
    next_transaction_id: u16,
}

impl ModbusTcp {
    pub fn new(args: Args) -> Self {
        Self { args, io: None, next_transaction_id: 0 }
    }

    async fn connect(&self) -> Result<TcpIo, Error> {
        let address = &self.args.tcp;
        info!(message = "connecting...", address);
        let addresses = tokio::net::lookup_host(address)
            .await
            .map_err(|e| Error::LookupHost(e, address.to_string()))?
            .collect::<Vec<_>>();
        debug!(message = "resolved", ?addresses);
        let socket = TcpStream::connect(&*addresses)
            .await
            .map_err(|e| Error::Connect(e, address.to_string()))?;
        let nodelay_result = socket.set_nodelay(true);
        trace!(message = "setting nodelay", is_error = ?nodelay_result.err());
        info!(message = "connected");
        Ok(Framed::new(socket, ModbusTCPCodec {}))
    }

    async fn exchange(io: &mut TcpIo, request: &Request) -> Result<Response, Error> {
        io.send(request).await.map_err(Error::Send)?;
        loop {
            match io.next().await {
                None => return Err(Error::Closed),
                Some(Err(e)) => return Err(Error::Receive(e)),
                Some(Ok(response)) if response.transaction_id == request.transaction_id => {
                    return Ok(response);
                }
                Some(Ok(response)) => {
                    debug!(
                        message = "a response we were not expecting",
                        transaction = response.transaction_id
                    );
                }
            }
        }
    }

    /// Send out the operation, retrying `Server Busy` exceptions a few times.
    pub async fn send(&mut self, operation: Operation) -> Result<Response, TransportError> {
        let mut busy_retries = self.args.server_busy_retries;
        loop {
            let mut io = match self.io.take() {
                Some(io) => io,
                None => self.connect().await.map_err(TransportError::io)?,
            };
            let transaction_id = self.next_transaction_id;
            self.next_transaction_id = transaction_id.wrapping_add(1);
            let request = Request { device_id: self.args.device_id, transaction_id, operation };
            let result =
                tokio::time::timeout(*self.args.read_timeout, Self::exchange(&mut io, &request))
                    .await;
            let response = match result {
                Err(_) => {
                    warn!(message = "request timed out, will reconnect", transaction_id);
                    return Err(TransportError::Timeout);
                }
                Ok(Err(e)) => {
                    warn!(
                        message = "request failed, will reconnect",
                        error = (&e as &dyn std::error::Error)
                    );
                    return Err(TransportError::io(e));
                }
                Ok(Ok(response)) => response,
            };
            self.io = Some(io);
            match response.exception_code() {
                None => return Ok(response),
                Some(modbus::EXCEPTION_SERVER_BUSY) => {
                    let Some(remaining) = busy_retries.checked_sub(1) else {
                        return Err(TransportError::Busy);
                    };
                    busy_retries = remaining;
                    debug!(message = "server busy, retrying", ?operation);
                    tokio::time::sleep(*self.args.server_busy_retry_delay).await;
                }
                Some(modbus::EXCEPTION_ILLEGAL_DATA_ADDRESS | modbus::EXCEPTION_ILLEGAL_DATA_VALUE) => {
                    return Err(TransportError::IllegalAddress);
                }
                Some(code) => return Err(TransportError::Exception(code)),
            }
        }
    }
}

impl Transport for ModbusTcp {
    async fn read(
        &mut self,
        kind: RegisterKind,
        start: u16,
        count: u16,
    ) -> Result<Vec<u16>, TransportError> {
        let operation = match kind {
            RegisterKind::Input => Operation::ReadInputs { address: start, count },
            RegisterKind::Holding => Operation::ReadHoldings { address: start, count },
            RegisterKind::Coil => Operation::ReadCoils { address: start, count },
        };
        let response = self.send(operation).await?;
        Ok(response.kind.into_words(count))
    }

    async fn write(
        &mut self,
        kind: RegisterKind,
        address: u16,
        value: u16,
    ) -> Result<(), TransportError> {
        let operation = match kind {
            RegisterKind::Holding => Operation::WriteHolding { address, value },
            RegisterKind::Coil => Operation::WriteCoil { address, value: value != 0 },
            RegisterKind::Input => return Err(TransportError::io(Error::NotWritable)),
        };
        self.send(operation).await?;
        Ok(())
    }
}
