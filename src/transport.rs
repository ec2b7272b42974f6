use crate::registers::RegisterKind;

#[derive(thiserror::Error, Debug)]
pub enum TransportError {
    #[error("the device is busy")]
    Busy,
    #[error("the device has no such register address")]
    IllegalAddress,
    #[error("the device did not respond in time")]
    Timeout,
    #[error("the device responded with modbus exception code {0}")]
    Exception(u8),
    #[error("could not communicate with the device")]
    Io(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl TransportError {
    pub fn io(error: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Io(Box::new(error))
    }

    /// Transient failures leave the last known values in place, they may well succeed next time.
    ///
    /// Permanent failures mean the addresses are not served by the device at all.
    pub fn is_transient(&self) -> bool {
        !matches!(self, TransportError::IllegalAddress)
    }
}

/// Register access to a heat pump.
///
/// Calls are strictly sequential: the caller owns the transport mutably for the duration of a
/// request.
#[allow(async_fn_in_trait)]
pub trait Transport {
    /// Read `count` consecutive registers of the specified kind starting at `start`.
    ///
    /// Coils are returned one per word, as either 0 or 1. A device may return fewer words than
    /// requested.
    async fn read(
        &mut self,
        kind: RegisterKind,
        start: u16,
        count: u16,
    ) -> Result<Vec<u16>, TransportError>;

    /// Write a single register. For coils any non-zero `value` turns the coil on.
    async fn write(
        &mut self,
        kind: RegisterKind,
        address: u16,
        value: u16,
    ) -> Result<(), TransportError>;
}
