use std::collections::HashMap;

use super::{Codec, JsonCodec};
use crate::model::VehiclePing;
use crate::utils::error::CodecError;

#[test]
fn test_json_round_trip_preserves_the_value() {
    let codec = JsonCodec;
    let ping = VehiclePing { id: 42, ts: 100 };

    let bytes = codec.encode(&ping).unwrap();
    assert_eq!(bytes, br#"{"id":42,"ts":100}"#);

    let decoded: VehiclePing = codec.decode(&bytes).unwrap();
    assert_eq!(decoded, ping);
}

#[test]
fn test_decoding_garbage_is_a_decode_error() {
    let err = JsonCodec.decode::<VehiclePing>(b"not json").unwrap_err();
    assert!(matches!(err, CodecError::Decode(_)));
}

#[test]
fn test_unrepresentable_values_fail_to_encode() {
    // JSON object keys must be strings
    let mut map = HashMap::new();
    map.insert((1u8, 2u8), "pair");

    let err = JsonCodec.encode(&map).unwrap_err();
    assert!(matches!(err, CodecError::Encode(_)));
}
