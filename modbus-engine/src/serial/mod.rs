pub(crate) mod frame;

#[cfg(feature = "serial")]
pub(crate) mod client;

#[cfg(feature = "serial")]
pub use tokio_serial::{DataBits, FlowControl, Parity, StopBits};

/// Serial port settings
#[cfg(feature = "serial")]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct SerialSettings {
    /// Baud rate of the port
    pub baud_rate: u32,
    /// Number of data bits
    pub data_bits: DataBits,
    /// Types of flow control
    pub flow_control: FlowControl,
    /// Number of stop bits
    pub stop_bits: StopBits,
    /// Parity setting
    pub parity: Parity,
}

#[cfg(feature = "serial")]
impl Default for SerialSettings {
    fn default() -> Self {
        Self {
            baud_rate: 9600,
            data_bits: DataBits::Eight,
            flow_control: FlowControl::None,
            stop_bits: StopBits::One,
            parity: Parity::None,
        }
    }
}

#[cfg(feature = "serial")]
pub(crate) fn open(
    path: &str,
    settings: SerialSettings,
) -> tokio_serial::Result<tokio_serial::SerialStream> {
    use tokio_serial::SerialPortBuilderExt;

    tokio_serial::new(path, settings.baud_rate)
        .data_bits(settings.data_bits)
        .flow_control(settings.flow_control)
        .stop_bits(settings.stop_bits)
        .parity(settings.parity)
        .open_native_async()
}
