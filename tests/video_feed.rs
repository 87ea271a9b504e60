use std::io::{Read, Write};
use std::net::TcpStream;
use std::sync::Arc;
use std::time::Duration;

use camwatch::pipeline::PipelineStats;
use camwatch::{ApiConfig, ApiServer, Frame, FrameBroadcaster, LatestFrameSlot, RunFlag};

fn frame(sequence: u64) -> Frame {
    Frame::from_rgb(vec![(sequence * 20) as u8; 32 * 24 * 3], 32, 24, sequence).unwrap()
}

fn count(haystack: &[u8], needle: &[u8]) -> usize {
    haystack
        .windows(needle.len())
        .filter(|window| *window == needle)
        .count()
}

#[test]
fn video_feed_streams_new_frames_until_stopped() {
    let slot = Arc::new(LatestFrameSlot::new());
    let running = RunFlag::new();
    let broadcaster = FrameBroadcaster::new(slot.clone(), running.clone())
        .with_poll_interval(Duration::from_millis(20));
    let api = ApiServer::new(
        ApiConfig {
            addr: "127.0.0.1:0".to_string(),
        },
        broadcaster,
        Arc::new(PipelineStats::default()),
    )
    .spawn()
    .unwrap();

    let mut client = TcpStream::connect(api.addr).unwrap();
    client
        .set_read_timeout(Some(Duration::from_secs(5)))
        .unwrap();
    client
        .write_all(b"GET /video_feed HTTP/1.1\r\nHost: localhost\r\n\r\n")
        .unwrap();

    // The client connected before anything was published: it idles, then
    // receives each new frame once.
    std::thread::sleep(Duration::from_millis(100));
    slot.publish(frame(1));
    std::thread::sleep(Duration::from_millis(100));
    slot.publish(frame(2));
    std::thread::sleep(Duration::from_millis(100));
    running.stop();

    let mut body = Vec::new();
    client.read_to_end(&mut body).unwrap();

    let text = String::from_utf8_lossy(&body);
    assert!(text.starts_with("HTTP/1.1 200 OK"));
    assert!(text.contains("Content-Type: multipart/x-mixed-replace; boundary=frame"));
    assert!(text.contains("Access-Control-Allow-Origin: *"));
    assert_eq!(count(&body, b"--frame\r\nContent-Type: image/jpeg\r\n\r\n"), 2);
    assert_eq!(count(&body, &[0xFF, 0xD8, 0xFF]), 2);

    api.stop().unwrap();
}

#[test]
fn two_clients_each_get_the_latest_frame() {
    let slot = Arc::new(LatestFrameSlot::new());
    slot.publish(frame(9));
    let running = RunFlag::new();
    let broadcaster = FrameBroadcaster::new(slot, running.clone())
        .with_poll_interval(Duration::from_millis(20));
    let api = ApiServer::new(
        ApiConfig {
            addr: "127.0.0.1:0".to_string(),
        },
        broadcaster,
        Arc::new(PipelineStats::default()),
    )
    .spawn()
    .unwrap();

    let mut clients: Vec<TcpStream> = (0..2)
        .map(|_| {
            let mut client = TcpStream::connect(api.addr).unwrap();
            client
                .set_read_timeout(Some(Duration::from_secs(5)))
                .unwrap();
            client.write_all(b"GET /video_feed HTTP/1.1\r\n\r\n").unwrap();
            client
        })
        .collect();

    std::thread::sleep(Duration::from_millis(200));
    running.stop();

    for client in clients.iter_mut() {
        let mut body = Vec::new();
        client.read_to_end(&mut body).unwrap();
        assert_eq!(count(&body, b"--frame\r\n"), 1);
    }

    api.stop().unwrap();
}
