use anyhow::bail;
use bytes::{Buf, BufMut, BytesMut};
use bytes_varint::{VarIntSupport, VarIntSupportMut};


//TODO convenience for serializing / deserializing collections

pub fn put_bytes(buf: &mut BytesMut, bytes: &[u8]) {
    buf.put_usize_varint(bytes.len());
    buf.put_slice(bytes);
}

pub fn try_get_bytes(buf: &mut impl Buf) -> anyhow::Result<Vec<u8>> {
    let len = buf.try_get_usize_varint()?;
    if buf.remaining() < len {
        bail!("buffer underflow: expected {} bytes, {} remaining", len, buf.remaining());
    }

    let mut result = vec![0u8; len];
    buf.copy_to_slice(&mut result);
    Ok(result)
}

pub fn put_string(buf: &mut BytesMut, s: &str) {
    put_bytes(buf, s.as_bytes());
}

pub fn try_get_string(buf: &mut impl Buf) -> anyhow::Result<String> {
    let s = String::from_utf8(try_get_bytes(buf)?)?;
    Ok(s)
}
