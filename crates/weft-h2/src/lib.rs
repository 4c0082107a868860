//! HTTP/2 frame codec, client edition.
//!
//! Frame header layout, typed per-frame flags, and the payloads a client
//! cares about: SETTINGS pairs it must apply, GOAWAY frames it must
//! record, and the WINDOW_UPDATE / RST_STREAM payloads it emits.
//!
//! HTTP/2 <https://httpwg.org/specs/rfc9113.html>

use std::fmt;

use enum_repr::EnumRepr;
pub use enumflags2::{bitflags, BitFlags};
pub use nom;

use nom::{
    number::streaming::{be_u16, be_u24, be_u32, be_u8},
    sequence::tuple,
    IResult,
};

/// Sent by h2 clients after negotiating over ALPN, before any frame.
pub const PREFACE: &[u8] = b"PRI * HTTP/2.0\r\n\r\nSM\r\n\r\n";

/// The ALPN protocol identifier for HTTP/2 over TLS.
pub const ALPN_H2: &[u8] = b"h2";

/// Size of the fixed frame header, cf. RFC 9113 section 4.1.
pub const FRAME_HEADER_LEN: usize = 9;

/// Default SETTINGS_MAX_FRAME_SIZE (2^14 octets).
pub const DEFAULT_MAX_FRAME_SIZE: u32 = 1 << 14;

/// Default SETTINGS_INITIAL_WINDOW_SIZE (2^16 - 1 octets).
pub const DEFAULT_INITIAL_WINDOW_SIZE: u32 = (1 << 16) - 1;

/// Initial HPACK dynamic table size, cf. RFC 7541 section 6.5.2.
pub const INITIAL_HEADER_TABLE_SIZE: usize = 4096;

/// See https://httpwg.org/specs/rfc9113.html#FrameTypes
#[EnumRepr(type = "u8")]
#[derive(Debug, Clone, Copy)]
pub enum RawFrameType {
    Data = 0x00,
    Headers = 0x01,
    Priority = 0x02,
    RstStream = 0x03,
    Settings = 0x04,
    PushPromise = 0x05,
    Ping = 0x06,
    GoAway = 0x07,
    WindowUpdate = 0x08,
    Continuation = 0x09,
}

/// Typed flags for the frame types that have them
#[derive(Debug, Clone, Copy)]
pub enum FrameType {
    Data(BitFlags<DataFlags>),
    Headers(BitFlags<HeadersFlags>),
    Priority,
    RstStream,
    Settings(BitFlags<SettingsFlags>),
    PushPromise,
    Ping(BitFlags<PingFlags>),
    GoAway,
    WindowUpdate,
    Continuation(BitFlags<ContinuationFlags>),
    Unknown(EncodedFrameType),
}

/// See https://httpwg.org/specs/rfc9113.html#DATA
#[bitflags]
#[repr(u8)]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum DataFlags {
    Padded = 0x08,
    EndStream = 0x01,
}

/// See https://httpwg.org/specs/rfc9113.html#HEADERS
#[bitflags]
#[repr(u8)]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum HeadersFlags {
    Priority = 0x20,
    Padded = 0x08,
    EndHeaders = 0x04,
    EndStream = 0x01,
}

/// See https://httpwg.org/specs/rfc9113.html#SETTINGS
#[bitflags]
#[repr(u8)]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SettingsFlags {
    Ack = 0x01,
}

/// See https://httpwg.org/specs/rfc9113.html#PING
#[bitflags]
#[repr(u8)]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PingFlags {
    Ack = 0x01,
}

/// See https://httpwg.org/specs/rfc9113.html#CONTINUATION
#[bitflags]
#[repr(u8)]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ContinuationFlags {
    EndHeaders = 0x04,
}

/// A frame type and flag byte as they appear on the wire.
#[derive(Debug, Clone, Copy)]
pub struct EncodedFrameType {
    pub ty: u8,
    pub flags: u8,
}

impl EncodedFrameType {
    fn parse(i: &[u8]) -> IResult<&[u8], Self> {
        let (i, (ty, flags)) = tuple((be_u8, be_u8))(i)?;
        Ok((i, Self { ty, flags }))
    }
}

impl From<(RawFrameType, u8)> for EncodedFrameType {
    fn from((ty, flags): (RawFrameType, u8)) -> Self {
        Self {
            ty: ty.repr(),
            flags,
        }
    }
}

impl FrameType {
    fn encode(self) -> EncodedFrameType {
        match self {
            FrameType::Data(f) => (RawFrameType::Data, f.bits()).into(),
            FrameType::Headers(f) => (RawFrameType::Headers, f.bits()).into(),
            FrameType::Priority => (RawFrameType::Priority, 0).into(),
            FrameType::RstStream => (RawFrameType::RstStream, 0).into(),
            FrameType::Settings(f) => (RawFrameType::Settings, f.bits()).into(),
            FrameType::PushPromise => (RawFrameType::PushPromise, 0).into(),
            FrameType::Ping(f) => (RawFrameType::Ping, f.bits()).into(),
            FrameType::GoAway => (RawFrameType::GoAway, 0).into(),
            FrameType::WindowUpdate => (RawFrameType::WindowUpdate, 0).into(),
            FrameType::Continuation(f) => (RawFrameType::Continuation, f.bits()).into(),
            FrameType::Unknown(ft) => ft,
        }
    }

    fn decode(ft: EncodedFrameType) -> Self {
        match RawFrameType::from_repr(ft.ty) {
            Some(ty) => match ty {
                RawFrameType::Data => {
                    FrameType::Data(BitFlags::<DataFlags>::from_bits_truncate(ft.flags))
                }
                RawFrameType::Headers => {
                    FrameType::Headers(BitFlags::<HeadersFlags>::from_bits_truncate(ft.flags))
                }
                RawFrameType::Priority => FrameType::Priority,
                RawFrameType::RstStream => FrameType::RstStream,
                RawFrameType::Settings => {
                    FrameType::Settings(BitFlags::<SettingsFlags>::from_bits_truncate(ft.flags))
                }
                RawFrameType::PushPromise => FrameType::PushPromise,
                RawFrameType::Ping => {
                    FrameType::Ping(BitFlags::<PingFlags>::from_bits_truncate(ft.flags))
                }
                RawFrameType::GoAway => FrameType::GoAway,
                RawFrameType::WindowUpdate => FrameType::WindowUpdate,
                RawFrameType::Continuation => FrameType::Continuation(
                    BitFlags::<ContinuationFlags>::from_bits_truncate(ft.flags),
                ),
            },
            None => FrameType::Unknown(ft),
        }
    }
}

/// A 31-bit stream identifier.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StreamId(pub u32);

impl StreamId {
    /// Stream ID used for connection control frames
    pub const CONNECTION: Self = Self(0);

    /// Largest stream id a client may allocate (2^31 - 1)
    pub const MAX: Self = Self((1 << 31) - 1);

    /// Server-initiated streams have even IDs
    pub fn is_server_initiated(&self) -> bool {
        self.0 % 2 == 0
    }
}

impl fmt::Debug for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.0, f)
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// See https://httpwg.org/specs/rfc9113.html#FrameHeader
#[derive(Clone, Copy)]
pub struct Frame {
    pub frame_type: FrameType,
    pub reserved: u8,
    pub stream_id: StreamId,
    pub len: u32,
}

impl Frame {
    /// Create a new frame with the given type and stream ID.
    pub fn new(frame_type: FrameType, stream_id: StreamId) -> Self {
        Self {
            frame_type,
            reserved: 0,
            stream_id,
            len: 0,
        }
    }

    /// Set the frame's payload length.
    pub fn with_len(mut self, len: u32) -> Self {
        self.len = len;
        self
    }

    /// Parse a frame header from the given bytes
    pub fn parse(i: &[u8]) -> IResult<&[u8], Self> {
        let (i, (len, frame_type, (reserved, stream_id))) = tuple((
            be_u24,
            EncodedFrameType::parse,
            parse_reserved_and_stream_id,
        ))(i)?;

        let frame = Frame {
            frame_type: FrameType::decode(frame_type),
            reserved,
            stream_id,
            len,
        };
        Ok((i, frame))
    }

    /// Serialize the 9-byte frame header. The payload follows separately.
    pub fn write_into(self, mut w: impl std::io::Write) -> std::io::Result<()> {
        use byteorder::{BigEndian, WriteBytesExt};
        w.write_u24::<BigEndian>(self.len as _)?;
        let ft = self.frame_type.encode();
        w.write_u8(ft.ty)?;
        w.write_u8(ft.flags)?;
        w.write_u32::<BigEndian>(self.stream_id.0)?;
        Ok(())
    }

    /// True if this frame's type carries END_STREAM and the flag is set.
    pub fn is_end_stream(&self) -> bool {
        match self.frame_type {
            FrameType::Data(f) => f.contains(DataFlags::EndStream),
            FrameType::Headers(f) => f.contains(HeadersFlags::EndStream),
            _ => false,
        }
    }

    /// `Some(true)` / `Some(false)` for frames that carry END_HEADERS,
    /// `None` for everything else.
    pub fn headers_ended(&self) -> Option<bool> {
        match self.frame_type {
            FrameType::Headers(f) => Some(f.contains(HeadersFlags::EndHeaders)),
            FrameType::Continuation(f) => Some(f.contains(ContinuationFlags::EndHeaders)),
            _ => None,
        }
    }

    /// True if the payload starts with a Pad Length octet.
    pub fn is_padded(&self) -> bool {
        match self.frame_type {
            FrameType::Data(f) => f.contains(DataFlags::Padded),
            FrameType::Headers(f) => f.contains(HeadersFlags::Padded),
            _ => false,
        }
    }

    /// True for HEADERS frames carrying the 5-octet priority field.
    pub fn has_priority(&self) -> bool {
        match self.frame_type {
            FrameType::Headers(f) => f.contains(HeadersFlags::Priority),
            _ => false,
        }
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.stream_id.0 == 0 {
            write!(f, "Conn:")?;
        } else {
            write!(f, "#{}:", self.stream_id.0)?;
        }

        let name = match &self.frame_type {
            FrameType::Data(_) => "Data",
            FrameType::Headers(_) => "Headers",
            FrameType::Priority => "Priority",
            FrameType::RstStream => "RstStream",
            FrameType::Settings(_) => "Settings",
            FrameType::PushPromise => "PushPromise",
            FrameType::Ping(_) => "Ping",
            FrameType::GoAway => "GoAway",
            FrameType::WindowUpdate => "WindowUpdate",
            FrameType::Continuation(_) => "Continuation",
            FrameType::Unknown(EncodedFrameType { ty, flags }) => {
                return write!(f, "UnknownFrame({:#x}, {:#x})", ty, flags)
            }
        };
        write!(f, "{name}(len={}", self.len)?;

        struct DisplayDebug<'a, D: fmt::Display>(&'a D);
        impl<D: fmt::Display> fmt::Debug for DisplayDebug<'_, D> {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                fmt::Display::fmt(self.0, f)
            }
        }

        match &self.frame_type {
            FrameType::Data(flags) if !flags.is_empty() => {
                write!(f, ", flags={:?}", DisplayDebug(flags))?
            }
            FrameType::Headers(flags) if !flags.is_empty() => {
                write!(f, ", flags={:?}", DisplayDebug(flags))?
            }
            FrameType::Settings(flags) if !flags.is_empty() => {
                write!(f, ", flags={:?}", DisplayDebug(flags))?
            }
            FrameType::Ping(flags) if !flags.is_empty() => {
                write!(f, ", flags={:?}", DisplayDebug(flags))?
            }
            FrameType::Continuation(flags) if !flags.is_empty() => {
                write!(f, ", flags={:?}", DisplayDebug(flags))?
            }
            _ => {}
        }
        write!(f, ")")
    }
}

/// See https://httpwg.org/specs/rfc9113.html#FrameHeader - the first bit
/// is reserved, and the rest is a 31-bit stream id
fn parse_reserved_and_u31(i: &[u8]) -> IResult<&[u8], (u8, u32)> {
    fn reserved(i: (&[u8], usize)) -> IResult<(&[u8], usize), u8> {
        nom::bits::streaming::take(1_usize)(i)
    }

    fn stream_id(i: (&[u8], usize)) -> IResult<(&[u8], usize), u32> {
        nom::bits::streaming::take(31_usize)(i)
    }

    nom::bits::bits(tuple((reserved, stream_id)))(i)
}

fn parse_reserved_and_stream_id(i: &[u8]) -> IResult<&[u8], (u8, StreamId)> {
    parse_reserved_and_u31(i).map(|(i, (reserved, sid))| (i, (reserved, StreamId(sid))))
}

/// cf. https://httpwg.org/specs/rfc9113.html#ErrorCodes
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct ErrorCode(pub u32);

impl fmt::Debug for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match KnownErrorCode::from_repr(self.0) {
            Some(e) => fmt::Debug::fmt(&e, f),
            None => write!(f, "ErrorCode({:#04x})", self.0),
        }
    }
}

impl From<KnownErrorCode> for ErrorCode {
    fn from(e: KnownErrorCode) -> Self {
        Self(e as u32)
    }
}

/// cf. https://httpwg.org/specs/rfc9113.html#ErrorCodes
#[EnumRepr(type = "u32")]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KnownErrorCode {
    /// Graceful shutdown or "no error at all"
    NoError = 0x00,
    /// Unspecific protocol violation
    ProtocolError = 0x01,
    /// Unexpected internal error
    InternalError = 0x02,
    /// Flow-control protocol violated
    FlowControlError = 0x03,
    /// SETTINGS not acknowledged in time
    SettingsTimeout = 0x04,
    /// Frame received on a half-closed stream
    StreamClosed = 0x05,
    /// Frame with an invalid size
    FrameSizeError = 0x06,
    /// Stream refused before any processing
    RefusedStream = 0x07,
    /// Stream no longer needed
    Cancel = 0x08,
    /// Field section compression context broken
    CompressionError = 0x09,
    /// CONNECT tunnel was reset or abnormally closed
    ConnectError = 0x0a,
    /// Peer is generating excessive load
    EnhanceYourCalm = 0x0b,
    /// Transport security below minimum requirements
    InadequateSecurity = 0x0c,
    /// Peer requires HTTP/1.1
    Http1_1Required = 0x0d,
}

/// cf. https://httpwg.org/specs/rfc9113.html#SettingValues
#[EnumRepr(type = "u16")]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Setting {
    HeaderTableSize = 0x01,
    EnablePush = 0x02,
    MaxConcurrentStreams = 0x03,
    InitialWindowSize = 0x04,
    MaxFrameSize = 0x05,
    MaxHeaderListSize = 0x06,
}

#[derive(Debug, thiserror::Error, Clone, Copy, PartialEq, Eq)]
pub enum SettingsError {
    #[error("SETTINGS payload length {0} is not a multiple of 6")]
    InvalidLength(usize),
}

/// Walk the id/value pairs of a SETTINGS frame payload. Unknown
/// identifiers are handed to the callback as-is; ignoring them is the
/// receiver's call (RFC 9113 section 6.5.2).
pub fn settings_pairs(
    payload: &[u8],
    mut f: impl FnMut(u16, u32),
) -> Result<(), SettingsError> {
    if payload.len() % 6 != 0 {
        return Err(SettingsError::InvalidLength(payload.len()));
    }
    let mut i = payload;
    while !i.is_empty() {
        // infallible: length checked above
        let (rest, (id, value)) =
            tuple((be_u16::<&[u8], nom::error::Error<&[u8]>>, be_u32))(i)
                .map_err(|_| SettingsError::InvalidLength(payload.len()))?;
        tracing::trace!(%id, %value, "setting pair");
        f(id, value);
        i = rest;
    }
    Ok(())
}

/// A borrowed list of settings to serialize into a SETTINGS payload.
/// An empty list writes an empty payload.
pub struct SettingPairs<'a>(pub &'a [(Setting, u32)]);

impl SettingPairs<'_> {
    pub fn write_into(self, mut w: impl std::io::Write) -> std::io::Result<()> {
        use byteorder::{BigEndian, WriteBytesExt};
        for (id, value) in self.0 {
            w.write_u16::<BigEndian>(id.repr())?;
            w.write_u32::<BigEndian>(*value)?;
        }
        Ok(())
    }
}

/// cf. https://httpwg.org/specs/rfc9113.html#GOAWAY
#[derive(Debug, Clone)]
pub struct GoAway {
    pub last_stream_id: StreamId,
    pub error_code: ErrorCode,
    pub debug_data: Vec<u8>,
}

impl GoAway {
    pub fn parse(i: &[u8]) -> IResult<&[u8], Self> {
        let (i, ((_, last_stream_id), error_code)) =
            tuple((parse_reserved_and_stream_id, be_u32))(i)?;
        Ok((
            &[][..],
            Self {
                last_stream_id,
                error_code: ErrorCode(error_code),
                debug_data: i.to_vec(),
            },
        ))
    }

    pub fn write_into(&self, mut w: impl std::io::Write) -> std::io::Result<()> {
        use byteorder::{BigEndian, WriteBytesExt};
        w.write_u32::<BigEndian>(self.last_stream_id.0)?;
        w.write_u32::<BigEndian>(self.error_code.0)?;
        w.write_all(&self.debug_data)?;
        Ok(())
    }
}

/// cf. https://httpwg.org/specs/rfc9113.html#WINDOW_UPDATE
#[derive(Debug, Clone, Copy)]
pub struct WindowUpdate {
    pub reserved: u8,
    pub increment: u32,
}

impl WindowUpdate {
    pub fn parse(i: &[u8]) -> IResult<&[u8], Self> {
        let (i, (reserved, increment)) = parse_reserved_and_u31(i)?;
        Ok((
            i,
            Self {
                reserved,
                increment,
            },
        ))
    }

    pub fn write_into(&self, mut w: impl std::io::Write) -> std::io::Result<()> {
        use byteorder::{BigEndian, WriteBytesExt};
        w.write_u32::<BigEndian>(self.increment & 0x7fff_ffff)?;
        Ok(())
    }
}

/// cf. https://httpwg.org/specs/rfc9113.html#RST_STREAM
#[derive(Debug, Clone, Copy)]
pub struct RstStream {
    pub error_code: ErrorCode,
}

impl RstStream {
    pub fn parse(i: &[u8]) -> IResult<&[u8], Self> {
        let (i, error_code) = be_u32(i)?;
        Ok((
            i,
            Self {
                error_code: ErrorCode(error_code),
            },
        ))
    }

    pub fn write_into(&self, mut w: impl std::io::Write) -> std::io::Result<()> {
        use byteorder::{BigEndian, WriteBytesExt};
        w.write_u32::<BigEndian>(self.error_code.0)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(frame: Frame) -> Frame {
        let mut buf = Vec::new();
        frame.write_into(&mut buf).unwrap();
        assert_eq!(buf.len(), FRAME_HEADER_LEN);
        let (rest, parsed) = Frame::parse(&buf).unwrap();
        assert!(rest.is_empty());
        parsed
    }

    #[test]
    fn frame_header_roundtrip() {
        let frame = Frame::new(
            FrameType::Headers(HeadersFlags::EndHeaders | HeadersFlags::EndStream),
            StreamId(1),
        )
        .with_len(1234);
        let parsed = roundtrip(frame);
        assert_eq!(parsed.stream_id, StreamId(1));
        assert_eq!(parsed.len, 1234);
        assert!(parsed.is_end_stream());
        assert_eq!(parsed.headers_ended(), Some(true));
        assert!(!parsed.is_padded());
    }

    #[test]
    fn data_frame_flags() {
        let frame = Frame::new(FrameType::Data(DataFlags::EndStream.into()), StreamId(3));
        let parsed = roundtrip(frame);
        assert!(parsed.is_end_stream());
        assert_eq!(parsed.headers_ended(), None);

        let frame = Frame::new(FrameType::Data(BitFlags::default()), StreamId(3));
        assert!(!roundtrip(frame).is_end_stream());
    }

    #[test]
    fn unknown_frame_type_survives() {
        let frame = Frame::new(
            FrameType::Unknown(EncodedFrameType { ty: 0xf7, flags: 0x42 }),
            StreamId::CONNECTION,
        );
        let parsed = roundtrip(frame);
        match parsed.frame_type {
            FrameType::Unknown(e) => {
                assert_eq!(e.ty, 0xf7);
                assert_eq!(e.flags, 0x42);
            }
            other => panic!("expected Unknown, got {other:?}"),
        }
    }

    #[test]
    fn incomplete_header_is_incomplete() {
        let frame = Frame::new(FrameType::Ping(BitFlags::default()), StreamId::CONNECTION);
        let mut buf = Vec::new();
        frame.write_into(&mut buf).unwrap();
        assert!(Frame::parse(&buf[..5]).unwrap_err().is_incomplete());
    }

    #[test]
    fn stream_id_parity() {
        assert!(StreamId::CONNECTION.is_server_initiated());
        assert!(StreamId(2).is_server_initiated());
        assert!(!StreamId(1).is_server_initiated());
        assert_eq!(StreamId::MAX.0, (1 << 31) - 1);
    }

    #[test]
    fn settings_pairs_skip_unknown() {
        let mut payload = Vec::new();
        SettingPairs(&[(Setting::MaxFrameSize, 32768), (Setting::MaxConcurrentStreams, 50)])
            .write_into(&mut payload)
            .unwrap();
        // splice in an unknown identifier
        payload.extend_from_slice(&[0xab, 0xcd, 0, 0, 0, 7]);

        let mut seen = Vec::new();
        settings_pairs(&payload, |id, value| seen.push((id, value))).unwrap();
        assert_eq!(
            seen,
            vec![
                (Setting::MaxFrameSize.repr(), 32768),
                (Setting::MaxConcurrentStreams.repr(), 50),
                (0xabcd, 7),
            ]
        );
        assert_eq!(Setting::from_repr(0xabcd), None);
    }

    #[test]
    fn settings_length_must_be_multiple_of_six() {
        assert_eq!(
            settings_pairs(&[0; 5], |_, _| {}),
            Err(SettingsError::InvalidLength(5))
        );
    }

    #[test]
    fn empty_settings_payload() {
        let mut payload = Vec::new();
        SettingPairs(&[]).write_into(&mut payload).unwrap();
        assert!(payload.is_empty());
        settings_pairs(&payload, |_, _| panic!("no pairs expected")).unwrap();
    }

    #[test]
    fn goaway_roundtrip() {
        let ga = GoAway {
            last_stream_id: StreamId(5),
            error_code: KnownErrorCode::NoError.into(),
            debug_data: b"bye".to_vec(),
        };
        let mut buf = Vec::new();
        ga.write_into(&mut buf).unwrap();
        let (_, parsed) = GoAway::parse(&buf).unwrap();
        assert_eq!(parsed.last_stream_id, StreamId(5));
        assert_eq!(parsed.error_code, KnownErrorCode::NoError.into());
        assert_eq!(parsed.debug_data, b"bye");
    }

    #[test]
    fn window_update_wire_format() {
        let wu = WindowUpdate {
            reserved: 0,
            increment: 1 << 30,
        };
        let mut buf = Vec::new();
        wu.write_into(&mut buf).unwrap();
        assert_eq!(buf, [0x40, 0x00, 0x00, 0x00]);
        let (_, parsed) = WindowUpdate::parse(&buf).unwrap();
        assert_eq!(parsed.increment, 1 << 30);
    }

    #[test]
    fn rst_stream_roundtrip() {
        let rst = RstStream {
            error_code: KnownErrorCode::StreamClosed.into(),
        };
        let mut buf = Vec::new();
        rst.write_into(&mut buf).unwrap();
        let (_, parsed) = RstStream::parse(&buf).unwrap();
        assert_eq!(parsed.error_code, ErrorCode(0x05));
    }
}
