use super::*;
use std::net::{Ipv4Addr, Ipv6Addr};

#[test]
fn quality_default_is_cd_stereo() {
    let q = AudioQuality::default();
    assert_eq!(q.sample_rate, 44100);
    assert_eq!(q.bits_per_sample, 16);
    assert_eq!(q.channels, 2);
    assert_eq!(q.bytes_per_frame(), 4);
}

#[test]
fn metadata_mask_wants() {
    let mask = MetadataMask(MetadataMask::TEXT.0 | MetadataMask::PROGRESS.0);
    assert!(mask.wants(MetadataMask::TEXT));
    assert!(mask.wants(MetadataMask::PROGRESS));
    assert!(!mask.wants(MetadataMask::ARTWORK));
    assert!(MetadataMask::all().wants(MetadataMask::ARTWORK));
}

#[test]
fn endpoint_honors_v6_disabled() {
    let device = Device {
        v4: Some((Ipv4Addr::new(10, 0, 0, 2), 7000)),
        v6: Some((Ipv6Addr::LOCALHOST, 7000)),
        v6_disabled: true,
        ..Device::default()
    };

    assert!(device.endpoint(true).is_none());
    let v4 = device.endpoint(false).unwrap();
    assert!(v4.is_ipv4());
    assert_eq!(v4.port(), 7000);
}

#[test]
fn artwork_format_detection() {
    assert_eq!(
        ArtworkFormat::detect(&[0xFF, 0xD8, 0xFF, 0xE0]),
        Some(ArtworkFormat::Jpeg)
    );
    assert_eq!(
        ArtworkFormat::detect(&[0x89, b'P', b'N', b'G', 0x0D]),
        Some(ArtworkFormat::Png)
    );
    assert_eq!(ArtworkFormat::detect(b"not an image"), None);

    // Unknown data defaults to JPEG so we always have a content type.
    assert_eq!(Artwork::new(b"xx".to_vec()).format, ArtworkFormat::Jpeg);
}

#[test]
fn progress_body_format() {
    let p = Progress {
        start: 0,
        current: 44100,
        end: 88200,
    };
    assert_eq!(p.to_body(), "progress: 0/44100/88200\r\n");
}
