use super::*;

use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::sync::mpsc;

fn timing_request(seq_byte: u8, originate: u64) -> [u8; 32] {
    let mut req = [0u8; 32];
    req[0] = 0x80;
    req[1] = 0xd2;
    req[2] = seq_byte;
    req[24..32].copy_from_slice(&originate.to_be_bytes());
    req
}

// ----------------------------------------------------- pure reply math

#[test]
fn timing_reply_layout() {
    let req = timing_request(0x07, 0x1122_3344_5566_7788);
    let recv = NtpTime(0xAAAA_BBBB_CCCC_DDDD);
    let xmit = NtpTime(0xEEEE_FFFF_0000_1111);

    let reply = timing_reply(&req, recv, Some(xmit));
    assert_eq!(reply[0], 0x80);
    assert_eq!(reply[1], 0xd3);
    assert_eq!(reply[2], 0x07);
    assert_eq!(&reply[8..16], &0x1122_3344_5566_7788u64.to_be_bytes());
    assert_eq!(&reply[16..24], &recv.to_be_bytes());
    assert_eq!(&reply[24..32], &xmit.to_be_bytes());
}

#[test]
fn timing_reply_is_deterministic() {
    let req = timing_request(3, 42);
    let recv = NtpTime(1 << 32);
    assert_eq!(
        timing_reply(&req, recv, Some(NtpTime(2 << 32))),
        timing_reply(&req, recv, Some(NtpTime(2 << 32)))
    );
}

#[test]
fn timing_reply_falls_back_to_receive_time() {
    let req = timing_request(0, 9);
    let recv = NtpTime(0x0102_0304_0506_0708);
    let reply = timing_reply(&req, recv, None);
    assert_eq!(&reply[16..24], &recv.to_be_bytes());
    assert_eq!(&reply[24..32], &recv.to_be_bytes());
}

#[test]
fn ntp_time_epoch_offset() {
    let t = NtpTime::from_unix(Duration::new(0, 0));
    assert_eq!(t.seconds(), 2_208_988_800);
    assert_eq!(t.fraction(), 0);

    let half = NtpTime::from_unix(Duration::new(1, 500_000_000));
    assert_eq!(half.seconds(), 2_208_988_801);
    // Half a second in binary fraction.
    assert_eq!(half.fraction(), 0x8000_0000);
}

// -------------------------------------------------- services over UDP

async fn client_for(port: u16) -> (UdpSocket, std::net::SocketAddr) {
    // The services bind dual-stack when they can; talk to them on the
    // matching loopback.
    match UdpSocket::bind("[::1]:0").await {
        Ok(sock) => {
            let target = format!("[::1]:{port}").parse().unwrap();
            (sock, target)
        }
        Err(_) => {
            let sock = UdpSocket::bind("127.0.0.1:0").await.unwrap();
            let target = format!("127.0.0.1:{port}").parse().unwrap();
            (sock, target)
        }
    }
}

#[tokio::test]
async fn timing_service_answers_queries() {
    let service = TimingService::start().await.unwrap();
    let (client, target) = client_for(service.port()).await;

    let req = timing_request(0x42, 0xDEAD_BEEF_CAFE_F00D);
    client.send_to(&req, target).await.unwrap();

    let mut buf = [0u8; 64];
    let (len, _) = tokio::time::timeout(Duration::from_secs(2), client.recv_from(&mut buf))
        .await
        .expect("timing reply in time")
        .unwrap();

    assert_eq!(len, 32);
    assert_eq!(&buf[..2], &[0x80, 0xd3]);
    assert_eq!(buf[2], 0x42);
    assert_eq!(&buf[8..16], &0xDEAD_BEEF_CAFE_F00Du64.to_be_bytes());

    // Receive timestamp must be a plausible current NTP time.
    let recv_secs = u32::from_be_bytes(buf[16..20].try_into().unwrap());
    assert!(u64::from(recv_secs) > 2_208_988_800 + 55 * 365 * 86400);
}

#[tokio::test]
async fn timing_service_drops_malformed_requests() {
    let service = TimingService::start().await.unwrap();
    let (client, target) = client_for(service.port()).await;

    // Wrong size.
    client.send_to(&[0x80, 0xd2, 0, 0], target).await.unwrap();
    // Wrong header.
    let mut bad = timing_request(0, 0);
    bad[1] = 0x55;
    client.send_to(&bad, target).await.unwrap();

    // Then a valid one; the service must still be alive and answer it.
    client.send_to(&timing_request(9, 1), target).await.unwrap();
    let mut buf = [0u8; 64];
    let (len, _) = tokio::time::timeout(Duration::from_secs(2), client.recv_from(&mut buf))
        .await
        .expect("reply after malformed traffic")
        .unwrap();
    assert_eq!(len, 32);
    assert_eq!(buf[2], 9);
}

#[tokio::test]
async fn control_service_forwards_retransmit_requests() {
    let (tx, mut rx) = mpsc::channel(8);
    let service = ControlService::start(tx).await.unwrap();
    let (client, target) = client_for(service.port()).await;

    let mut req = [0u8; 8];
    req[0] = 0x80;
    req[1] = 0xd5;
    req[4..6].copy_from_slice(&1050u16.to_be_bytes());
    req[6..8].copy_from_slice(&3u16.to_be_bytes());
    client.send_to(&req, target).await.unwrap();

    let request = tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("forwarded request")
        .unwrap();
    assert_eq!(request.seq_start, 1050);
    assert_eq!(request.seq_len, 3);
    assert_eq!(request.peer.port(), client.local_addr().unwrap().port());
}

#[tokio::test]
async fn control_service_ignores_junk() {
    let (tx, mut rx) = mpsc::channel(8);
    let service = ControlService::start(tx).await.unwrap();
    let (client, target) = client_for(service.port()).await;

    // Wrong header, wrong size.
    client.send_to(&[0u8; 8], target).await.unwrap();
    client.send_to(&[0x80, 0xd5, 0], target).await.unwrap();

    // Valid request still gets through afterwards.
    let mut req = [0u8; 8];
    req[0] = 0x80;
    req[1] = 0xd5;
    req[4..6].copy_from_slice(&7u16.to_be_bytes());
    req[6..8].copy_from_slice(&1u16.to_be_bytes());
    client.send_to(&req, target).await.unwrap();

    let request = tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("valid request after junk")
        .unwrap();
    assert_eq!(request.seq_start, 7);
}
