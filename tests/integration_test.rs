//! Integration tests for the full communication flow.

use std::sync::Arc;
use std::time::Duration;
use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt};
use tokio::sync::mpsc;

use spectro_link::bluetooth::Session;
use spectro_link::config::Config;
use spectro_link::events::{EventKind, EventProcessor, SessionEvent};
use spectro_link::protocol::{
    Checksum, Crc8Maxim, DecodedResponse, DeviceCommand, FrameCodec, FrameRejection,
};
use spectro_link::session::SessionOptions;
use spectro_link::state::{LinkState, LinkStatus};

async fn next_outcome(rx: &mut mpsc::Receiver<SessionEvent>) -> SessionEvent {
    loop {
        let event = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("timed out waiting for event")
            .expect("event channel closed");
        if !matches!(event.kind, EventKind::CommandSent { .. }) {
            return event;
        }
    }
}

#[test]
fn test_rejection_reasons() {
    let codec = FrameCodec::default();
    let frame = codec
        .encode(DeviceCommand::ReadFirmwareRevision, false, &[])
        .unwrap();

    let mut bad_start = frame.bytes().to_vec();
    bad_start[0] = b'[';
    assert!(matches!(
        codec.validate(&bad_start, 0x0D),
        Err(FrameRejection::BadDelimiters { .. })
    ));

    let mut bad_end = frame.bytes().to_vec();
    *bad_end.last_mut().unwrap() = b']';
    assert!(matches!(
        codec.validate(&bad_end, 0x0D),
        Err(FrameRejection::BadDelimiters { .. })
    ));

    assert_eq!(
        codec.validate(frame.bytes(), DeviceCommand::ReadFpgaRevision.code()),
        Err(FrameRejection::CommandMismatch {
            expected: 0x10,
            actual: 0x0D
        })
    );

    assert_eq!(
        codec.validate(&frame.bytes()[..5], 0x0D),
        Err(FrameRejection::TooShort { len: 5 })
    );
}

#[test]
fn test_custom_checksum_on_the_wire() {
    let sum = |bytes: &[u8]| bytes.iter().fold(0u8, |acc, b| acc.wrapping_add(*b));
    let codec = FrameCodec::new(Arc::new(sum));

    let frame = codec
        .encode(DeviceCommand::LaserOn, true, &[0x01])
        .unwrap();
    assert_eq!(frame.bytes(), &[0x3C, 0x00, 0x02, 0xB4, 0x01, 0xB7, 0x3E]);
}

#[tokio::test]
async fn test_firmware_query_over_transport() {
    let (event_tx, mut event_rx) = mpsc::channel(32);
    let (client, mut device) = duplex(512);
    let options = SessionOptions {
        response_timeout: None,
        ..SessionOptions::default()
    };
    let mut session = Session::new(options, event_tx);
    session.attach("Wasatch-D70B", client).await;

    let state = LinkState::new();
    let mut processor = EventProcessor::new(state.clone(), Vec::new());

    let connected = next_outcome(&mut event_rx).await;
    processor.process_event(&connected).unwrap();
    assert_eq!(state.get_status(), LinkStatus::Idle);

    session
        .send_command(DeviceCommand::ReadFirmwareRevision, false, &[])
        .await
        .unwrap();

    let mut request = [0u8; 6];
    device.read_exact(&mut request).await.unwrap();
    assert_eq!(
        request,
        [0x3C, 0x00, 0x01, 0x0D, Crc8Maxim.digest(&[0x00, 0x01, 0x0D]), 0x3E]
    );

    device
        .write_all(&[0x3C, 0x00, 0x06, 0x0D, 0x00, 2, 10, 0, 7, 0x00, 0x3E])
        .await
        .unwrap();

    let completed = next_outcome(&mut event_rx).await;
    assert_eq!(
        completed.kind,
        EventKind::CommandCompleted {
            command: DeviceCommand::ReadFirmwareRevision,
            response: DecodedResponse::FirmwareRevision("2.10.0.7".into()),
        }
    );
    processor.process_event(&completed).unwrap();
    assert_eq!(state.get_firmware_revision(), Some("2.10.0.7".to_string()));

    let printed = String::from_utf8(processor.sink().clone()).unwrap();
    assert!(printed.contains("firmware revision 2.10.0.7"));

    session.disconnect().await;
}

#[tokio::test]
async fn test_spectrum_split_across_reads() {
    let (event_tx, mut event_rx) = mpsc::channel(32);
    let (client, mut device) = duplex(512);

    let mut config = Config::default();
    config.session.response_timeout_ms = 0;
    config.spectral.pixel_count = 4;
    let mut session = Session::new(config.session_options(), event_tx);
    session.attach("Wasatch-D70B", client).await;
    next_outcome(&mut event_rx).await;

    session
        .send_command(DeviceCommand::AcquireImage, false, &[])
        .await
        .unwrap();
    let mut request = [0u8; 6];
    device.read_exact(&mut request).await.unwrap();

    // Odd split: the fourth byte lands in the second read
    device.write_all(&[0x10, 0x00, 0x20]).await.unwrap();
    assert_eq!(
        next_outcome(&mut event_rx).await.kind,
        EventKind::SpectralChunk(vec![16])
    );

    device
        .write_all(&[0x00, 0x30, 0x00, 0xD0, 0xFF])
        .await
        .unwrap();
    assert_eq!(
        next_outcome(&mut event_rx).await.kind,
        EventKind::SpectralChunk(vec![32, 48, -48])
    );
    assert_eq!(
        next_outcome(&mut event_rx).await.kind,
        EventKind::CommandCompleted {
            command: DeviceCommand::AcquireImage,
            response: DecodedResponse::Spectrum(vec![16, 32, 48, -48]),
        }
    );
    assert_eq!(session.pending(), None);
}
