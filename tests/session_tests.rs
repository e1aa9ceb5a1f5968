mod common;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha20Rng;

use volary::session::{Section, SessionError, SessionParser};
use volary::wire::{frame_section, FrameHeader, HEADER_LEN, MAGIC_BYTES};

use common::temp_dir;

fn section_bodies(sections: &[Section]) -> Vec<Vec<u8>> {
    sections
        .iter()
        .map(|s| std::fs::read(&s.body_path).unwrap())
        .collect()
}

#[test]
fn single_frame_delivered_byte_by_byte() {
    let dir = temp_dir("session");
    let mut parser = SessionParser::new(&dir);

    let head = br#"{"method":"publish_post","tsx_id":1,"params":{}}"#.to_vec();
    let body: Vec<u8> = (0..4096u32).map(|i| (i % 251) as u8).collect();
    let framed = frame_section(&head, &body);

    let mut sections = Vec::new();
    for byte in &framed {
        sections.extend(parser.feed(std::slice::from_ref(byte)).unwrap());
    }

    assert_eq!(sections.len(), 1);
    assert_eq!(sections[0].head, head);
    assert_eq!(sections[0].body_size, body.len() as u64);
    assert_eq!(std::fs::read(&sections[0].body_path).unwrap(), body);
}

#[test]
fn any_chunking_of_concatenated_sections_reassembles_them_in_order() {
    let dir = temp_dir("session");
    let mut rng = ChaCha20Rng::seed_from_u64(0x5eed);

    let originals: Vec<(Vec<u8>, Vec<u8>)> = (0..4)
        .map(|i| {
            let head = format!("head-{i}").into_bytes();
            let len = rng.gen_range(0..2000);
            let body: Vec<u8> = (0..len).map(|_| rng.gen()).collect();
            (head, body)
        })
        .collect();
    let stream: Vec<u8> = originals
        .iter()
        .flat_map(|(head, body)| frame_section(head, body))
        .collect();

    for _ in 0..25 {
        let mut parser = SessionParser::new(&dir);
        let mut sections = Vec::new();
        let mut pos = 0;
        while pos < stream.len() {
            let take = rng.gen_range(1..=stream.len() - pos);
            sections.extend(parser.feed(&stream[pos..pos + take]).unwrap());
            pos += take;
        }

        assert_eq!(sections.len(), originals.len());
        let bodies = section_bodies(&sections);
        for (section, (head, body)) in sections.iter().zip(&originals) {
            assert_eq!(&section.head, head);
            assert_eq!(section.body_size, body.len() as u64);
        }
        for (read, (_, body)) in bodies.iter().zip(&originals) {
            assert_eq!(read, body);
        }
    }
}

#[test]
fn garbage_before_magic_is_discarded() {
    let dir = temp_dir("session");
    let mut parser = SessionParser::new(&dir);

    // garbage free of the magic sentinel, including a partial-magic tail
    let mut stream = vec![0x11u8; 300];
    stream.extend_from_slice(&MAGIC_BYTES[..2]);
    stream.extend_from_slice(&frame_section(b"envelope", b"payload"));
    stream.extend_from_slice(&frame_section(b"second", b""));

    let sections = parser.feed(&stream).unwrap();
    assert_eq!(sections.len(), 2);
    assert_eq!(sections[0].head, b"envelope");
    assert_eq!(std::fs::read(&sections[0].body_path).unwrap(), b"payload");
    assert_eq!(sections[1].head, b"second");
    assert_eq!(sections[1].body_size, 0);
}

#[test]
fn magic_split_across_chunks_still_matches() {
    let dir = temp_dir("session");
    let mut parser = SessionParser::new(&dir);

    let framed = frame_section(b"h", b"b");
    let garbage = [0x22u8; 64];

    assert!(parser.feed(&garbage).unwrap().is_empty());
    // first two magic bytes at the end of one chunk, rest in the next
    assert!(parser.feed(&framed[..2]).unwrap().is_empty());
    let sections = parser.feed(&framed[2..]).unwrap();
    assert_eq!(sections.len(), 1);
    assert_eq!(sections[0].head, b"h");
}

#[test]
fn unsupported_version_fails_then_resyncs() {
    let dir = temp_dir("session");
    let mut parser = SessionParser::new(&dir);

    let mut bad = frame_section(b"head", b"body");
    bad[7] = 0x99;
    let err = parser.feed(&bad).unwrap_err();
    assert!(matches!(err, SessionError::UnsupportedVersion(_)));

    // stream recovers on the next well-formed section
    let sections = parser.feed(&frame_section(b"ok", b"fine")).unwrap();
    assert_eq!(sections.len(), 1);
    assert_eq!(sections[0].head, b"ok");
}

#[test]
fn zero_length_body_completes_immediately() {
    let dir = temp_dir("session");
    let mut parser = SessionParser::new(&dir);

    let framed = frame_section(b"meta-only", b"");
    assert_eq!(framed.len(), HEADER_LEN + 9);
    let sections = parser.feed(&framed).unwrap();
    assert_eq!(sections.len(), 1);
    assert_eq!(sections[0].body_size, 0);
    assert_eq!(std::fs::read(&sections[0].body_path).unwrap(), b"");
}

#[test]
fn short_header_is_retained_not_an_error() {
    let dir = temp_dir("session");
    let mut parser = SessionParser::new(&dir);

    let header = FrameHeader::new(4, 0).encode();
    assert!(parser.feed(&header[..10]).unwrap().is_empty());
    assert!(parser.feed(&header[10..]).unwrap().is_empty());
    let sections = parser.feed(b"head").unwrap();
    assert_eq!(sections.len(), 1);
    assert_eq!(sections[0].head, b"head");
}
