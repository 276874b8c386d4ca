/// Take the payload of one `serde_cbor_2::Value` variant, or fail with
/// `COSEKeyInvalidCBORValue`. Integers are copied out, other payloads are borrowed.
macro_rules! cbor_try {
    ($v:expr, Integer) => {
        match $v {
            serde_cbor_2::Value::Integer(i) => Ok(*i),
            _ => Err(FidoError::COSEKeyInvalidCBORValue),
        }
    };
    ($v:expr, $variant:ident) => {
        match $v {
            serde_cbor_2::Value::$variant(inner) => Ok(inner),
            _ => Err(FidoError::COSEKeyInvalidCBORValue),
        }
    };
}
