use std::time::{Duration, Instant};

use anyhow::Result;
use num_bigint::BigInt;

use sour_pickle::{decode, decode_with, DecodeOptions, Key, ParseError, Pickle, Value};

fn root(bytes: &[u8]) -> Result<Value> {
    Ok(decode(bytes)?.root().clone())
}

#[test]
fn protocol2_scalars() -> Result<()> {
    assert_eq!(root(b"\x80\x02K\x00.")?, Value::Int(0));
    assert_eq!(root(b"\x80\x02K\x07.")?, Value::Int(7));
    assert_eq!(root(b"\x80\x02M\xe8\x03.")?, Value::Int(1000));
    assert_eq!(root(b"\x80\x02J\xfb\xff\xff\xff.")?, Value::Int(-5));
    assert_eq!(root(b"\x80\x02\x8a\x01\xff.")?, Value::Int(-1));
    assert_eq!(root(b"\x80\x02\x8a\x00.")?, Value::Int(0));
    assert_eq!(
        root(b"\x80\x02\x8a\x09\x00\x00\x00\x00\x00\x00\x00\x00\x40.")?,
        Value::BigInt(BigInt::from(1u128 << 70))
    );
    assert_eq!(
        root(b"\x80\x02\x8b\x09\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x80.")?,
        Value::BigInt(-BigInt::from(1u128 << 71))
    );
    assert_eq!(root(b"\x80\x02G?\xf8\x00\x00\x00\x00\x00\x00.")?, Value::Float(1.5));
    assert_eq!(root(b"\x80\x02\x88.")?, Value::Bool(true));
    assert_eq!(root(b"\x80\x02\x89.")?, Value::Bool(false));
    assert_eq!(root(b"\x80\x02N.")?, Value::None);
    Ok(())
}

#[test]
fn protocol2_strings() -> Result<()> {
    assert_eq!(root(b"\x80\x02X\x00\x00\x00\x00.")?, Value::String(String::new()));
    assert_eq!(
        root(b"\x80\x02X\x05\x00\x00\x00caf\xc3\xa9.")?,
        Value::String("café".into())
    );
    assert_eq!(root(b"\x80\x02U\x03abc.")?, Value::Bytes(b"abc".to_vec()));

    let long = "x".repeat(300);
    let mut bytes = b"\x80\x02T".to_vec();
    bytes.extend_from_slice(&300u32.to_le_bytes());
    bytes.extend_from_slice(long.as_bytes());
    bytes.push(b'.');
    assert_eq!(root(&bytes)?, Value::Bytes(long.into_bytes()));
    Ok(())
}

#[test]
fn protocol0_scalars() -> Result<()> {
    assert_eq!(root(b"I42\n.")?, Value::Int(42));
    assert_eq!(root(b"I-7\n.")?, Value::Int(-7));
    assert_eq!(root(b"I01\n.")?, Value::Bool(true));
    assert_eq!(root(b"I00\n.")?, Value::Bool(false));
    assert_eq!(root(b"L1L\n.")?, Value::Int(1));
    assert_eq!(
        root(b"L123456789012345678901234567890L\n.")?,
        Value::BigInt("123456789012345678901234567890".parse()?)
    );
    assert_eq!(root(b"F1.25\n.")?, Value::Float(1.25));
    assert_eq!(root(b"S'it\\'s'\n.")?, Value::Bytes(b"it's".to_vec()));
    assert_eq!(root(b"S\"tab\\there\"\n.")?, Value::Bytes(b"tab\there".to_vec()));
    assert_eq!(root(b"Vcaf\xe9 \\u20ac\n.")?, Value::String("café €".into()));
    Ok(())
}

#[test]
fn unquoted_string_is_malformed() {
    assert!(matches!(
        decode(&b"Sabc\n."[..]),
        Err(ParseError::MalformedStream { offset: 0, .. })
    ));
}

#[test]
fn dicts_keep_first_position_and_last_value() -> Result<()> {
    let p = decode(&b"}(U\x01aK\x01U\x01bK\x02U\x01aK\x03u."[..])?;
    let dict = p.entries(p.root()).expect("dict");
    let entries: Vec<_> = dict.iter().collect();
    assert_eq!(
        entries,
        vec![
            (&Key::Bytes(b"a".to_vec()), &Value::Int(3)),
            (&Key::Bytes(b"b".to_vec()), &Value::Int(2)),
        ]
    );
    Ok(())
}

#[test]
fn container_keys_are_rejected() {
    assert!(matches!(
        decode(&b"}]K\x01s."[..]),
        Err(ParseError::MalformedStream { offset: 3, .. })
    ));
}

#[test]
fn memo_shares_containers() -> Result<()> {
    // l = [1]; (l, l)
    let p = decode(&b"\x80\x02]q\x00K\x01ah\x00\x86q\x01."[..])?;
    let items = p.items(p.root()).expect("tuple");
    assert_eq!(items[0], items[1]);
    assert_eq!(p.seq_count(), 2);
    assert_eq!(p.items(&items[1]), Some(&[Value::Int(1)][..]));
    Ok(())
}

#[test]
fn memo_slots_can_be_overwritten() -> Result<()> {
    let p = decode(&b"K\x01q\x000K\x02q\x000h\x00."[..])?;
    assert_eq!(p.root(), &Value::Int(2));
    Ok(())
}

#[test]
fn unknown_memo_references() {
    match decode(&b"\x80\x02h\x05."[..]) {
        Err(ParseError::UnknownMemoReference { offset, id }) => assert_eq!((offset, id), (2, 5)),
        other => panic!("unexpected {other:?}"),
    }
    assert!(matches!(
        decode(&b"g3\n."[..]),
        Err(ParseError::UnknownMemoReference { offset: 0, id: 3 })
    ));
}

#[test]
fn cyclic_lists_decode() -> Result<()> {
    // l = []; l.append(l)
    let p = decode(&b"\x80\x02]q\x00h\x00a."[..])?;
    let items = p.items(p.root()).expect("list");
    assert_eq!(items, &[p.root().clone()]);
    Ok(())
}

#[test]
fn protocol0_nested_containers() -> Result<()> {
    // [{'a': 1L, 'c': 3, 'b': 2}, {'a': 1L, 'c': 3, 'b': 4}]
    let p = decode(&b"(lp0\n(dp1\nS'a'\np2\nL1L\nsS'c'\np3\nI3\nsS'b'\np4\nI2\nsa(dp5\ng2\nL1L\nsg3\nI3\nsg4\nI4\nsa."[..])?;
    let items = p.items(p.root()).expect("list");
    assert_eq!(items.len(), 2);
    let second = p.entries(&items[1]).expect("dict");
    assert_eq!(second.get(&Key::Bytes(b"b".to_vec())), Some(&Value::Int(4)));
    assert_eq!(p.dict_count(), 2);
    Ok(())
}

#[test]
fn object_opcodes_are_rejected() {
    let cases: &[(&[u8], u64, u8)] = &[
        (b"\x80\x02cos\nsystem\n.", 2, b'c'),
        (b")R.", 1, b'R'),
        (b"}b.", 1, b'b'),
        (b"\x80\x02\x81.", 2, 0x81),
        (b"(i__main__\nX\n.", 1, b'i'),
        (b"K\x01Q.", 2, b'Q'),
        (b"\x80\x02C\x01a.", 2, b'C'),
        (b"\x80\x02\x95\x00\x00\x00\x00\x00\x00\x00\x00.", 2, 0x95),
        (b"\xff", 0, 0xff),
    ];
    for (bytes, want_offset, want_opcode) in cases {
        match decode(*bytes) {
            Err(ParseError::UnsupportedOpcode { offset, opcode }) => {
                assert_eq!((offset, opcode), (*want_offset, *want_opcode), "{bytes:?}");
            }
            other => panic!("{bytes:?}: unexpected {other:?}"),
        }
    }
}

#[test]
fn unsupported_opcode_message_names_it() {
    let err = decode(&b")R."[..]).unwrap_err();
    assert_eq!(err.to_string(), "unsupported opcode REDUCE (0x52) at byte 1");
    assert_eq!(err.offset(), 1);
}

#[test]
fn newer_protocols_are_rejected() {
    assert!(matches!(
        decode(&b"\x80\x03K\x01."[..]),
        Err(ParseError::UnsupportedProtocol { offset: 0, version: 3 })
    ));
    assert!(decode(&b"\x80\x01K\x01."[..]).is_ok());
}

#[test]
fn missing_stop() {
    assert!(matches!(
        decode(&b"\x80\x02K\x01"[..]),
        Err(ParseError::IncompleteStream { offset: 4 })
    ));
    assert!(matches!(
        decode(&b""[..]),
        Err(ParseError::IncompleteStream { offset: 0 })
    ));
}

#[test]
fn truncated_operands() {
    assert!(matches!(
        decode(&b"\x80\x02X\x05\x00\x00\x00ab"[..]),
        Err(ParseError::TruncatedOperand { offset: 2, opcode: b'X' })
    ));
    assert!(matches!(
        decode(&b"\x80\x02J\x01\x00"[..]),
        Err(ParseError::TruncatedOperand { offset: 2, opcode: b'J' })
    ));
}

#[test]
fn stack_underflow_reports_the_opcode() {
    assert!(matches!(
        decode(&b"K\x01s."[..]),
        Err(ParseError::StackUnderflow { offset: 2, opcode: b's' })
    ));
    assert!(matches!(
        decode(&b"\x85."[..]),
        Err(ParseError::StackUnderflow { offset: 0, opcode: 0x85 })
    ));
}

#[test]
fn appends_need_a_list() {
    assert!(matches!(
        decode(&b"}(K\x01e."[..]),
        Err(ParseError::MalformedStream { offset: 4, .. })
    ));
}

#[test]
fn stops_reading_at_stop() -> Result<()> {
    let mut src: &[u8] = b"K\x01.K\x02.";
    let first: Pickle = decode(&mut src)?;
    assert_eq!(first.root(), &Value::Int(1));
    assert_eq!(src, b"K\x02.");
    let second = decode(&mut src)?;
    assert_eq!(second.root(), &Value::Int(2));
    Ok(())
}

#[test]
fn operand_limit() {
    let opts = DecodeOptions::default().with_max_operand_len(4);
    // The length prefix counts toward the limit.
    assert!(decode_with(&b"U\x03abc."[..], &opts).is_ok());
    assert!(matches!(
        decode_with(&b"U\x04abcd."[..], &opts),
        Err(ParseError::MalformedStream { offset: 0, .. })
    ));
    assert!(matches!(
        decode_with(&b"I123456\n."[..], &opts),
        Err(ParseError::MalformedStream { offset: 0, .. })
    ));
}

#[test]
fn long_text_lines_decode_in_one_pass() -> Result<()> {
    let n = 1 << 20;
    let mut bytes = b"S'".to_vec();
    bytes.resize(bytes.len() + n, b'x');
    bytes.extend_from_slice(b"'\n.");
    let started = Instant::now();
    let value = root(&bytes)?;
    assert!(started.elapsed() < Duration::from_secs(10));
    assert!(matches!(value, Value::Bytes(b) if b.len() == n));
    Ok(())
}
