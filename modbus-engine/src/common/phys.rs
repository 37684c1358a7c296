use std::fmt::Write;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::time::Instant;

use crate::decode::PhysDecodeLevel;

/// The byte stream a session runs over
pub(crate) struct PhysLayer {
    transport: Transport,
    /// only serial lines need a quiet period between frames
    silence: Option<LineSilence>,
}

#[cfg(test)]
pub(crate) trait MockIo: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send {}

#[cfg(test)]
impl<T> MockIo for T where T: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send {}

enum Transport {
    Tcp(tokio::net::TcpStream),
    #[cfg(feature = "serial")]
    Serial(tokio_serial::SerialStream),
    #[cfg(test)]
    Mock(Box<dyn MockIo>),
}

impl std::fmt::Debug for PhysLayer {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match &self.transport {
            Transport::Tcp(_) => f.write_str("Tcp"),
            #[cfg(feature = "serial")]
            Transport::Serial(_) => f.write_str("Serial"),
            #[cfg(test)]
            Transport::Mock(_) => f.write_str("Mock"),
        }
    }
}

/// RTU frames are delimited by 3.5 character times of silence on the line
///
/// Characters are 11 bits. Above 19200 baud the gap is fixed at 1.75 ms.
#[cfg_attr(not(any(feature = "serial", test)), allow(dead_code))]
pub(crate) fn frame_gap(baud_rate: u32) -> Duration {
    const BITS_PER_CHAR: u64 = 11;
    const FIXED_ABOVE_BAUD: u32 = 19_200;
    const FIXED_GAP: Duration = Duration::from_micros(1750);

    if baud_rate == 0 || baud_rate > FIXED_ABOVE_BAUD {
        return FIXED_GAP;
    }

    let char_time = Duration::from_secs(BITS_PER_CHAR) / baud_rate;
    char_time * 7 / 2
}

/// Remembers when the line was last busy
struct LineSilence {
    gap: Duration,
    last_activity: Option<Instant>,
}

impl LineSilence {
    #[cfg_attr(not(any(feature = "serial", test)), allow(dead_code))]
    fn new(gap: Duration) -> Self {
        Self {
            gap,
            last_activity: None,
        }
    }

    async fn wait(&self) {
        if let Some(last) = self.last_activity {
            tokio::time::sleep_until(last + self.gap).await;
        }
    }

    fn touch(&mut self) {
        self.last_activity = Some(Instant::now());
    }
}

impl PhysLayer {
    pub(crate) fn new_tcp(socket: tokio::net::TcpStream) -> Self {
        Self {
            transport: Transport::Tcp(socket),
            silence: None,
        }
    }

    #[cfg(feature = "serial")]
    pub(crate) fn new_serial(stream: tokio_serial::SerialStream, baud_rate: u32) -> Self {
        Self {
            transport: Transport::Serial(stream),
            silence: Some(LineSilence::new(frame_gap(baud_rate))),
        }
    }

    #[cfg(test)]
    pub(crate) fn new_mock<T: MockIo + 'static>(mock: T) -> Self {
        Self {
            transport: Transport::Mock(Box::new(mock)),
            silence: None,
        }
    }

    #[cfg(test)]
    pub(crate) fn new_paced_mock<T: MockIo + 'static>(mock: T, gap: Duration) -> Self {
        Self {
            transport: Transport::Mock(Box::new(mock)),
            silence: Some(LineSilence::new(gap)),
        }
    }

    pub(crate) async fn read(
        &mut self,
        buffer: &mut [u8],
        decode_level: PhysDecodeLevel,
    ) -> Result<usize, std::io::Error> {
        let length = match &mut self.transport {
            Transport::Tcp(x) => x.read(buffer).await?,
            #[cfg(feature = "serial")]
            Transport::Serial(x) => x.read(buffer).await?,
            #[cfg(test)]
            Transport::Mock(x) => x.read(buffer).await?,
        };

        if length > 0 {
            if let Some(silence) = &mut self.silence {
                silence.touch();
            }
        }

        if decode_level.enabled() {
            if let Some(x) = buffer.get(0..length) {
                tracing::info!("PHYS RX - {}", PhysDisplay::new(decode_level, x))
            }
        }

        Ok(length)
    }

    /// Write the whole frame, first waiting out the inter-frame gap on serial lines
    pub(crate) async fn write(
        &mut self,
        data: &[u8],
        decode_level: PhysDecodeLevel,
    ) -> Result<(), std::io::Error> {
        if let Some(silence) = &self.silence {
            silence.wait().await;
        }

        if decode_level.enabled() {
            tracing::info!("PHYS TX - {}", PhysDisplay::new(decode_level, data));
        }

        match &mut self.transport {
            Transport::Tcp(x) => x.write_all(data).await?,
            #[cfg(feature = "serial")]
            Transport::Serial(x) => x.write_all(data).await?,
            #[cfg(test)]
            Transport::Mock(x) => x.write_all(data).await?,
        }

        if let Some(silence) = &mut self.silence {
            silence.touch();
        }

        Ok(())
    }
}

pub(crate) struct PhysDisplay<'a> {
    level: PhysDecodeLevel,
    data: &'a [u8],
}

impl<'a> PhysDisplay<'a> {
    pub(crate) fn new(level: PhysDecodeLevel, data: &'a [u8]) -> Self {
        PhysDisplay { level, data }
    }
}

impl std::fmt::Display for PhysDisplay<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{} bytes", self.data.len())?;
        if self.level.data_enabled() {
            format_bytes(f, self.data)?;
        }
        Ok(())
    }
}

const BYTES_PER_DECODE_LINE: usize = 18;

/// Hex dump, one line per 18 bytes
pub(crate) fn format_bytes(f: &mut std::fmt::Formatter, bytes: &[u8]) -> std::fmt::Result {
    for line in bytes.chunks(BYTES_PER_DECODE_LINE) {
        f.write_char('\n')?;
        for (i, byte) in line.iter().enumerate() {
            if i > 0 {
                f.write_char(' ')?;
            }
            write!(f, "{byte:02X}")?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use tokio_test::io::Builder;

    use super::*;

    #[test]
    fn gap_is_three_and_a_half_characters_at_low_baud() {
        // 11 bits at 9600 baud is 1145833 ns per character
        assert_eq!(frame_gap(9600), Duration::from_nanos(4_010_415));
        assert_eq!(frame_gap(19_200), Duration::from_nanos(2_005_206));
    }

    #[test]
    fn gap_is_fixed_at_high_baud() {
        assert_eq!(frame_gap(38_400), Duration::from_micros(1750));
        assert_eq!(frame_gap(115_200), Duration::from_micros(1750));
        assert_eq!(frame_gap(0), Duration::from_micros(1750));
    }

    #[tokio::test(start_paused = true)]
    async fn paced_writes_leave_a_gap_after_the_last_byte() {
        let gap = Duration::from_millis(4);
        let mock = Builder::new()
            .write(&[0x01, 0x03])
            .read(&[0x01, 0x83, 0x02])
            .write(&[0x01, 0x04])
            .build();
        let mut phys = PhysLayer::new_paced_mock(mock, gap);

        let start = Instant::now();
        phys.write(&[0x01, 0x03], PhysDecodeLevel::Nothing).await.unwrap();
        assert_eq!(start.elapsed(), Duration::ZERO);

        tokio::time::advance(Duration::from_millis(10)).await;
        let mut buffer = [0; 8];
        assert_eq!(phys.read(&mut buffer, PhysDecodeLevel::Nothing).await.unwrap(), 3);

        let received = Instant::now();
        phys.write(&[0x01, 0x04], PhysDecodeLevel::Nothing).await.unwrap();
        assert!(received.elapsed() >= gap);
    }

    #[tokio::test(start_paused = true)]
    async fn tcp_style_writes_are_not_paced() {
        let mock = Builder::new().write(&[0x00]).write(&[0x01]).build();
        let mut phys = PhysLayer::new_mock(mock);

        let start = Instant::now();
        phys.write(&[0x00], PhysDecodeLevel::Nothing).await.unwrap();
        phys.write(&[0x01], PhysDecodeLevel::Nothing).await.unwrap();
        assert_eq!(start.elapsed(), Duration::ZERO);
    }
}
