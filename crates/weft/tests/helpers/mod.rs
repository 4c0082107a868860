//! A scripted HTTP/2 server peer driven over an in-memory duplex.
//!
//! Reads whatever the client transport emits with the `weft-h2` codec
//! and answers with hand-built frames, keeping its own HPACK state so
//! multi-response scripts stay coherent.

pub mod tracing_common;

use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};

use weft_h2::{
    ContinuationFlags, DataFlags, Frame, FrameType, GoAway, HeadersFlags, KnownErrorCode,
    RstStream, Setting, SettingPairs, SettingsFlags, StreamId, BitFlags, FRAME_HEADER_LEN,
    PREFACE,
};

/// One fully received header block: the frames that carried it and the
/// decoded field list.
pub struct HeaderBlock {
    pub frames: Vec<Frame>,
    pub stream_id: u32,
    pub end_stream: bool,
    pub fields: Vec<(Vec<u8>, Vec<u8>)>,
}

impl HeaderBlock {
    pub fn field(&self, name: &[u8]) -> Option<&[u8]> {
        self.fields
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_slice())
    }
}

pub struct TestPeer {
    io: DuplexStream,
    enc: loona_hpack::Encoder<'static>,
    dec: loona_hpack::Decoder<'static>,
}

impl TestPeer {
    pub fn new(io: DuplexStream) -> Self {
        Self {
            io,
            enc: loona_hpack::Encoder::new(),
            dec: loona_hpack::Decoder::new(),
        }
    }

    /// Drive the server side of the opening handshake: check the
    /// preface, the client's empty SETTINGS and its 2^30 window update,
    /// advertise `settings`, and collect the SETTINGS ack.
    pub async fn accept_handshake(&mut self, settings: &[(Setting, u32)]) {
        let mut preface = [0u8; PREFACE.len()];
        self.io.read_exact(&mut preface).await.unwrap();
        assert_eq!(&preface, PREFACE, "client must lead with the preface");

        let (frame, payload) = self.read_frame().await;
        match frame.frame_type {
            FrameType::Settings(flags) => assert!(!flags.contains(SettingsFlags::Ack)),
            other => panic!("expected client SETTINGS, got {other:?}"),
        }
        assert!(payload.is_empty(), "this client advertises no settings");

        let (frame, payload) = self.read_frame().await;
        assert!(matches!(frame.frame_type, FrameType::WindowUpdate));
        assert_eq!(frame.stream_id, StreamId::CONNECTION);
        let (_, wu) = weft_h2::WindowUpdate::parse(&payload).unwrap();
        assert_eq!(wu.increment, 1 << 30);

        let mut pairs = Vec::new();
        SettingPairs(settings).write_into(&mut pairs).unwrap();
        self.write_frame(
            Frame::new(FrameType::Settings(BitFlags::default()), StreamId::CONNECTION),
            &pairs,
        )
        .await;

        let (frame, _) = self.read_frame().await;
        match frame.frame_type {
            FrameType::Settings(flags) => assert!(flags.contains(SettingsFlags::Ack)),
            other => panic!("expected SETTINGS ack, got {other:?}"),
        }
    }

    pub async fn read_frame(&mut self) -> (Frame, Vec<u8>) {
        let mut head = [0u8; FRAME_HEADER_LEN];
        self.io.read_exact(&mut head).await.unwrap();
        let (_, frame) = Frame::parse(&head).unwrap();
        let mut payload = vec![0u8; frame.len as usize];
        self.io.read_exact(&mut payload).await.unwrap();
        (frame, payload)
    }

    /// Read a HEADERS frame and any CONTINUATIONs through END_HEADERS,
    /// decoding the whole block.
    pub async fn read_header_block(&mut self) -> HeaderBlock {
        let (first, mut block) = self.read_frame().await;
        let FrameType::Headers(flags) = first.frame_type else {
            panic!("expected HEADERS, got {:?}", first.frame_type);
        };
        let stream_id = first.stream_id.0;
        let end_stream = flags.contains(HeadersFlags::EndStream);
        let mut frames = vec![first];

        let mut ended = flags.contains(HeadersFlags::EndHeaders);
        while !ended {
            let (frame, payload) = self.read_frame().await;
            let FrameType::Continuation(flags) = frame.frame_type else {
                panic!("expected CONTINUATION, got {:?}", frame.frame_type);
            };
            assert_eq!(frame.stream_id.0, stream_id);
            ended = flags.contains(ContinuationFlags::EndHeaders);
            block.extend_from_slice(&payload);
            frames.push(frame);
        }

        let fields = self.dec.decode(&block).unwrap();
        HeaderBlock {
            frames,
            stream_id,
            end_stream,
            fields,
        }
    }

    /// Read DATA frames until END_STREAM, returning the payload sizes
    /// and the reassembled body.
    pub async fn read_body(&mut self) -> (Vec<usize>, Vec<u8>) {
        let mut sizes = Vec::new();
        let mut body = Vec::new();
        loop {
            let (frame, payload) = self.read_frame().await;
            let FrameType::Data(flags) = frame.frame_type else {
                panic!("expected DATA, got {:?}", frame.frame_type);
            };
            sizes.push(payload.len());
            body.extend_from_slice(&payload);
            if flags.contains(DataFlags::EndStream) {
                return (sizes, body);
            }
        }
    }

    pub async fn write_frame(&mut self, frame: Frame, payload: &[u8]) {
        let frame = frame.with_len(payload.len() as u32);
        let mut buf = Vec::with_capacity(FRAME_HEADER_LEN + payload.len());
        frame.write_into(&mut buf).unwrap();
        buf.extend_from_slice(payload);
        self.io.write_all(&buf).await.unwrap();
    }

    /// A complete response header block in a single HEADERS frame.
    pub async fn respond(
        &mut self,
        stream_id: u32,
        fields: &[(&[u8], &[u8])],
        end_stream: bool,
    ) {
        let block = self.enc.encode(fields.iter().copied());
        let mut flags = BitFlags::from(HeadersFlags::EndHeaders);
        if end_stream {
            flags |= HeadersFlags::EndStream;
        }
        self.write_frame(
            Frame::new(FrameType::Headers(flags), StreamId(stream_id)),
            &block,
        )
        .await;
    }

    /// The same block split into HEADERS + one CONTINUATION.
    pub async fn respond_fragmented(
        &mut self,
        stream_id: u32,
        fields: &[(&[u8], &[u8])],
        end_stream: bool,
    ) {
        let block = self.enc.encode(fields.iter().copied());
        let split = block.len() / 2;
        let mut flags = BitFlags::<HeadersFlags>::default();
        if end_stream {
            flags |= HeadersFlags::EndStream;
        }
        self.write_frame(
            Frame::new(FrameType::Headers(flags), StreamId(stream_id)),
            &block[..split],
        )
        .await;
        self.write_frame(
            Frame::new(
                FrameType::Continuation(ContinuationFlags::EndHeaders.into()),
                StreamId(stream_id),
            ),
            &block[split..],
        )
        .await;
    }

    /// HEADERS deliberately left open (no END_HEADERS) so a test can
    /// follow up with a contiguity violation.
    pub async fn begin_headers(&mut self, stream_id: u32, fields: &[(&[u8], &[u8])]) {
        let block = self.enc.encode(fields.iter().copied());
        self.write_frame(
            Frame::new(FrameType::Headers(BitFlags::default()), StreamId(stream_id)),
            &block,
        )
        .await;
    }

    pub async fn write_data(&mut self, stream_id: u32, end_stream: bool, payload: &[u8]) {
        let mut flags = BitFlags::<DataFlags>::default();
        if end_stream {
            flags |= DataFlags::EndStream;
        }
        self.write_frame(Frame::new(FrameType::Data(flags), StreamId(stream_id)), payload)
            .await;
    }

    pub async fn write_goaway(&mut self, last_stream_id: u32, code: KnownErrorCode) {
        let goaway = GoAway {
            last_stream_id: StreamId(last_stream_id),
            error_code: code.into(),
            debug_data: Vec::new(),
        };
        let mut payload = Vec::new();
        goaway.write_into(&mut payload).unwrap();
        self.write_frame(
            Frame::new(FrameType::GoAway, StreamId::CONNECTION),
            &payload,
        )
        .await;
    }

    /// Expect an RST_STREAM and return its error code.
    pub async fn expect_rst_stream(&mut self, stream_id: u32) -> weft_h2::ErrorCode {
        let (frame, payload) = self.read_frame().await;
        assert!(matches!(frame.frame_type, FrameType::RstStream));
        assert_eq!(frame.stream_id.0, stream_id);
        let (_, rst) = RstStream::parse(&payload).unwrap();
        rst.error_code
    }
}
