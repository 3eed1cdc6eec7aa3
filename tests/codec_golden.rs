//! Golden outputs for the directory block header and message codecs
//!
//! These pin the exact text, JSON and byte layouts other nodes depend on.

use fedchain::crypto::KeyPair;
use fedchain::directory_block::header::HEADER_LENGTH;
use fedchain::directory_block::{DBlockHeader, DirectoryBlock};
use fedchain::messages::{EndOfMinute, Heartbeat, Message, MessageType, Msg};
use fedchain::primitives::{Hash, Timestamp};

const ZEROS: &str = "0000000000000000000000000000000000000000000000000000000000000000";

#[test]
fn test_default_header_string() {
    let header = DBlockHeader::new();
    let epoch = Timestamp::default().local_string();
    let expected = format!(
        "  Version:         0\n  NetworkID:       0\n  BodyMR:          {z}\n  PrevKeyMR:       {z}\n  PrevFullHash:    {z}\n  Timestamp:       0\n  Timestamp Str:   {epoch}\n  DBHeight:        0\n  BlockCount:      0\n",
        z = ZEROS,
        epoch = epoch
    );
    assert_eq!(header.to_string(), expected);
}

#[test]
fn test_default_header_json() {
    let header = DBlockHeader::new();
    let expected = format!(
        r#"{{"Version":0,"NetworkID":0,"BodyMR":"{z}","PrevKeyMR":"{z}","PrevFullHash":"{z}","Timestamp":0,"DBHeight":0,"BlockCount":0,"ChainID":"000000000000000000000000000000000000000000000000000000000000000d"}}"#,
        z = ZEROS
    );
    assert_eq!(header.json_string().unwrap(), expected);
    assert_eq!(String::from_utf8(header.json_byte().unwrap()).unwrap(), expected);
}

#[test]
fn test_genesis_timestamp_minutes() {
    let mut header = DBlockHeader::new();
    header.set_timestamp(Timestamp::from_minutes(24018960));
    assert_eq!(header.get_timestamp().seconds(), 1441137600);

    let bytes = header.marshal_binary().unwrap();
    assert_eq!(bytes.len(), HEADER_LENGTH);
    let (decoded, rest) = DBlockHeader::unmarshal_binary_data(&bytes).unwrap();
    assert!(rest.is_empty());
    assert_eq!(decoded.get_timestamp().minutes(), 24018960);
}

#[test]
fn test_empty_block_is_header_only() {
    let block = DirectoryBlock::new(DBlockHeader::new(), vec![]).unwrap();
    let bytes = block.marshal_binary().unwrap();
    assert_eq!(bytes.len(), HEADER_LENGTH);
    assert!(block.header.get_body_mr().is_zero());
}

#[test]
fn test_message_frame_layout() {
    let key = KeyPair::generate().unwrap();
    let server = Hash::sha256(&key.public_key_bytes());
    let ts = Timestamp::from_millis(0x0102_0304_0506);
    let mut eom = EndOfMinute::new(ts, 4, 7, 2, server);

    let unsigned = eom.marshal_binary().unwrap();
    assert_eq!(unsigned[0], MessageType::EndOfMinute.tag());
    assert_eq!(&unsigned[1..7], &[1, 2, 3, 4, 5, 6]);

    eom.sign(&key).unwrap();
    let signed = eom.marshal_binary().unwrap();
    // public key and compact signature follow the signed fields
    assert_eq!(signed.len(), unsigned.len() + 33 + 64);
    assert_eq!(&signed[..unsigned.len()], unsigned.as_slice());
    assert_eq!(eom.get_hash().unwrap(), Hash::sha256(&unsigned));
    assert_eq!(eom.get_msg_hash().unwrap(), Hash::sha256(&signed));

    let decoded = Message::unmarshal_binary(&signed).unwrap();
    assert!(decoded.verify_signature().unwrap());
    assert_eq!(decoded.get_msg_hash().unwrap(), eom.get_msg_hash().unwrap());
}

#[test]
fn test_message_json_names() {
    let hb = Heartbeat::new(Timestamp::from_millis(60_000), 12, Hash::ZERO);
    let json: serde_json::Value = serde_json::from_str(&hb.json_string().unwrap()).unwrap();
    assert_eq!(json["DBHeight"], 12);
    assert_eq!(json["ServerID"], ZEROS);
}
