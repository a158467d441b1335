// This is free and unencumbered software released into the public domain.

use asimov_timelapse_module::shared::{
    Camera, CaptureSession, Delivery, PixelFormat, Resolution, UploadClient, UploadConfig,
    UploadError, UploadState,
    session::DeliveryOutcome,
    upload::{BOUNDARY, CONNECTION_ERROR},
};
use std::{
    io::{Read, Write},
    net::{TcpListener, TcpStream},
    thread,
    time::Duration,
};

const RESPONSE: &[u8] = b"HTTP/1.0 200 OK\r\nContent-Type: text/xml\r\n\r\n\
<?xml version=\"1.0\" encoding=\"UTF-8\"?><response><result>saved</result></response>";

/// Reads one complete request, as announced by its `Content-length`.
fn read_request(stream: &mut TcpStream) -> Vec<u8> {
    stream.set_read_timeout(Some(Duration::from_secs(5))).unwrap();

    let mut request = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        let n = stream.read(&mut chunk).unwrap();
        assert!(n > 0, "client closed before sending the whole request");
        request.extend_from_slice(&chunk[..n]);
        if let Some(expected) = expected_len(&request) {
            if request.len() >= expected {
                return request;
            }
        }
    }
}

/// Accepts one request, checks it is complete, and answers with `RESPONSE`.
fn serve_once(listener: TcpListener) -> thread::JoinHandle<Vec<u8>> {
    thread::spawn(move || {
        let (mut stream, _) = listener.accept().unwrap();
        let request = read_request(&mut stream);
        stream.write_all(RESPONSE).unwrap();
        request
    })
}

/// Accepts one request, keeps the connection open for `hold`, then closes it
/// without answering.
fn serve_silently(listener: TcpListener, hold: Duration) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        let (mut stream, _) = listener.accept().unwrap();
        read_request(&mut stream);
        thread::sleep(hold);
    })
}

fn expected_len(request: &[u8]) -> Option<usize> {
    let header_end = request.windows(4).position(|w| w == b"\r\n\r\n")? + 4;
    let header = std::str::from_utf8(&request[..header_end]).ok()?;
    let length = header
        .lines()
        .find_map(|line| line.strip_prefix("Content-length: "))?
        .trim()
        .parse::<usize>()
        .ok()?;
    Some(header_end + length)
}

fn local_config(listener: &TcpListener) -> UploadConfig {
    let port = listener.local_addr().unwrap().port();
    UploadConfig::new("127.0.0.1")
        .with_port(port)
        .with_timeout(Duration::from_secs(3))
}

#[test]
fn refused_connection_reports_connection_error() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let config = local_config(&listener);
    drop(listener);

    let mut client = UploadClient::new(config);
    let err = client.try_upload("image_001.jpg", &[0xFF, 0xD8, 0xFF, 0xD9]).unwrap_err();
    assert!(matches!(err, UploadError::Connection { .. }));
    assert_eq!(client.state(), UploadState::Failed);

    let outcome = client.upload("image_001.jpg", &[0xFF, 0xD8, 0xFF, 0xD9]);
    assert_eq!(outcome.result, CONNECTION_ERROR);
    assert!(!outcome.is_ok());
}

#[test]
fn closed_connection_reports_an_empty_response() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let config = local_config(&listener);
    let server = serve_silently(listener, Duration::ZERO);

    let mut client = UploadClient::new(config);
    let outcome = client.upload("image_001.jpg", &[0xFF, 0xD8, 0xFF, 0xD9]);
    assert!(matches!(outcome.error, Some(UploadError::EmptyResponse)));
    assert_eq!(outcome.result, CONNECTION_ERROR);
    assert_eq!(client.state(), UploadState::Failed);
    server.join().unwrap();
}

#[test]
fn silent_server_reports_a_receive_error() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let config = local_config(&listener).with_timeout(Duration::from_millis(200));
    let server = serve_silently(listener, Duration::from_secs(1));

    let mut client = UploadClient::new(config);
    let outcome = client.upload("image_001.jpg", &[0xFF, 0xD8, 0xFF, 0xD9]);
    assert!(matches!(outcome.error, Some(UploadError::Receive(_))));
    assert_eq!(outcome.result, CONNECTION_ERROR);
    assert_eq!(client.state(), UploadState::Failed);
    server.join().unwrap();
}

#[test]
fn unknown_host_reports_a_resolution_error() {
    let config = UploadConfig::new("nonexistent.invalid").with_timeout(Duration::from_secs(1));

    let mut client = UploadClient::new(config);
    let outcome = client.upload("image_001.jpg", &[0xFF, 0xD8, 0xFF, 0xD9]);
    assert!(matches!(outcome.error, Some(UploadError::HostResolution { .. })));
    assert_eq!(outcome.result, CONNECTION_ERROR);
    assert!(!outcome.is_ok());
    assert_eq!(client.state(), UploadState::Failed);
}

#[test]
fn upload_posts_the_image_and_reads_the_result() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let config = local_config(&listener).with_path("/cam/upload.php");
    let server = serve_once(listener);

    let payload: Vec<u8> = (0..20_000u32).map(|i| (i % 251) as u8).collect();
    let mut client = UploadClient::new(config);
    let outcome = client.try_upload("image_007.jpg", &payload).unwrap();
    assert_eq!(outcome.result, "saved");
    assert_eq!(client.state(), UploadState::Done);
    assert!(client.message_capacity() >= payload.len() + 1024);

    let request = server.join().unwrap();
    assert!(request.starts_with(b"POST /cam/upload.php HTTP/1.0\r\n"));
    assert!(request.windows(payload.len()).any(|w| w == &payload[..]));
    assert!(request.ends_with(format!("--{BOUNDARY}--").as_bytes()));
}

#[test]
fn session_uploads_each_frame() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let client = UploadClient::new(local_config(&listener));
    let server = serve_once(listener);

    let mut camera = Camera::open("memory:yuyv").unwrap();
    camera.start(Resolution::new(64, 48), None).unwrap();
    let mut session = CaptureSession::new(camera, Delivery::Upload(client)).unwrap();

    let report = session.run_once().unwrap();
    assert_eq!(report.pixel_format, PixelFormat::Yuyv);
    match &report.delivery {
        DeliveryOutcome::Uploaded(outcome) => assert_eq!(outcome.result, "saved"),
        other => panic!("unexpected delivery: {other:?}"),
    }
    assert!(report.to_string().starts_with("image_001.jpg "));

    let request = server.join().unwrap();
    let needle = b"filename=\"image_001.jpg\"";
    assert!(request.windows(needle.len()).any(|w| w == needle));
}
