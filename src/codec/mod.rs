use crate::protocol::{now_unix_ms, Envelope, MAX_FRAME_SIZE};
use serde::Serialize;
use std::io;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Encodes an envelope to its MessagePack wire form (map with named fields).
pub fn encode<T: Serialize>(envelope: &Envelope<T>) -> io::Result<Vec<u8>> {
    let payload = rmp_serde::to_vec_named(envelope).map_err(|err| {
        io::Error::new(io::ErrorKind::InvalidData, format!("encode failed: {err}"))
    })?;
    if payload.len() > MAX_FRAME_SIZE {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("encoded frame too large: {}", payload.len()),
        ));
    }
    Ok(payload)
}

fn check_frame_len(len: usize) -> io::Result<()> {
    if len == 0 || len > MAX_FRAME_SIZE {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("invalid frame length: {len}"),
        ));
    }
    Ok(())
}

/// Reads one length-prefixed frame body. The 4-byte big-endian prefix must
/// satisfy 0 < len <= MAX_FRAME_SIZE; violations are session-fatal.
pub async fn read_frame<R>(reader: &mut R) -> io::Result<Vec<u8>>
where
    R: AsyncRead + Unpin,
{
    let len = reader.read_u32().await? as usize;
    check_frame_len(len)?;
    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf).await?;
    Ok(buf)
}

/// Bounded readiness probe followed by an untimed exact-read: waits up to
/// `poll` for the first prefix byte, then reads the rest of the frame until
/// it completes or the channel disconnects. `Ok(None)` means no frame began
/// within the window; no bytes were consumed.
pub async fn read_frame_poll<R>(reader: &mut R, poll: Duration) -> io::Result<Option<Vec<u8>>>
where
    R: AsyncRead + Unpin,
{
    let mut prefix = [0u8; 4];
    // A one-byte read_exact either completes or consumes nothing, so the
    // timeout cannot cancel a partially-read prefix.
    match tokio::time::timeout(poll, reader.read_exact(&mut prefix[..1])).await {
        Err(_) => return Ok(None),
        Ok(read) => {
            read?;
        }
    }
    reader.read_exact(&mut prefix[1..]).await?;
    let len = u32::from_be_bytes(prefix) as usize;
    check_frame_len(len)?;
    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf).await?;
    Ok(Some(buf))
}

/// Writes one frame (big-endian length, then body) and flushes.
pub async fn write_frame<W>(writer: &mut W, payload: &[u8]) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    if payload.is_empty() || payload.len() > MAX_FRAME_SIZE {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("invalid outbound frame length: {}", payload.len()),
        ));
    }
    writer.write_u32(payload.len() as u32).await?;
    writer.write_all(payload).await?;
    writer.flush().await
}

pub async fn write_envelope<W, T>(writer: &mut W, envelope: &Envelope<T>) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let payload = encode(envelope)?;
    write_frame(writer, &payload).await
}

fn decode_error(msg: impl Into<String>) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg.into())
}

/// Parses one MessagePack value off the front of the frame, rejecting
/// anything outside the protocol subset (nil, bool, unsigned int, str,
/// array, map). Returns the number of unconsumed trailing bytes.
fn read_validated(bytes: &[u8]) -> io::Result<(rmpv::Value, usize)> {
    let mut rd = bytes;
    let value = rmpv::decode::read_value(&mut rd)
        .map_err(|err| decode_error(format!("decode failed: {err}")))?;
    ensure_supported(&value)?;
    Ok((value, rd.len()))
}

/// Reads a frame body into a dynamic MessagePack value. The value must span
/// the whole frame.
pub fn decode_value(bytes: &[u8]) -> io::Result<rmpv::Value> {
    let (value, trailing) = read_validated(bytes)?;
    if trailing != 0 {
        return Err(decode_error(format!(
            "decode failed: {trailing} trailing bytes"
        )));
    }
    Ok(value)
}

fn ensure_supported(value: &rmpv::Value) -> io::Result<()> {
    use rmpv::Value;
    match value {
        Value::Nil | Value::Boolean(_) => Ok(()),
        Value::Integer(n) => {
            if n.as_u64().is_some() {
                Ok(())
            } else {
                Err(decode_error("signed integer outside protocol subset"))
            }
        }
        Value::String(s) => {
            if s.as_str().is_some() {
                Ok(())
            } else {
                Err(decode_error("non-utf8 string outside protocol subset"))
            }
        }
        Value::Array(items) => {
            for item in items {
                ensure_supported(item)?;
            }
            Ok(())
        }
        Value::Map(pairs) => {
            for (key, val) in pairs {
                match key {
                    Value::String(s) if s.as_str().is_some() => {}
                    _ => return Err(decode_error("non-string map key outside protocol subset")),
                }
                ensure_supported(val)?;
            }
            Ok(())
        }
        Value::F32(_) | Value::F64(_) => Err(decode_error("float outside protocol subset")),
        Value::Binary(_) => Err(decode_error("bin outside protocol subset")),
        Value::Ext(..) => Err(decode_error("ext outside protocol subset")),
    }
}

/// Projects a subset-validated MessagePack value into JSON: nil -> null,
/// bool -> bool, uint -> number, str -> string, array -> array, map -> object.
fn value_to_json(value: &rmpv::Value) -> io::Result<serde_json::Value> {
    use rmpv::Value;
    match value {
        Value::Nil => Ok(serde_json::Value::Null),
        Value::Boolean(b) => Ok(serde_json::Value::Bool(*b)),
        Value::Integer(n) => n
            .as_u64()
            .map(|u| serde_json::Value::Number(u.into()))
            .ok_or_else(|| decode_error("signed integer outside protocol subset")),
        Value::String(s) => s
            .as_str()
            .map(|s| serde_json::Value::String(s.to_string()))
            .ok_or_else(|| decode_error("non-utf8 string outside protocol subset")),
        Value::Array(items) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                out.push(value_to_json(item)?);
            }
            Ok(serde_json::Value::Array(out))
        }
        Value::Map(pairs) => {
            let mut out = serde_json::Map::with_capacity(pairs.len());
            for (key, val) in pairs {
                let key = key
                    .as_str()
                    .ok_or_else(|| decode_error("non-string map key outside protocol subset"))?;
                out.insert(key.to_string(), value_to_json(val)?);
            }
            Ok(serde_json::Value::Object(out))
        }
        _ => Err(decode_error("value outside protocol subset")),
    }
}

/// Decodes a frame body into a dynamically-typed envelope.
pub fn decode(bytes: &[u8]) -> io::Result<Envelope<serde_json::Value>> {
    let json = value_to_json(&decode_value(bytes)?)?;
    serde_json::from_value(json)
        .map_err(|err| decode_error(format!("envelope decode failed: {err}")))
}

/// Decodes a frame body and re-emits it as a minimized JSON document.
pub fn decode_to_json(bytes: &[u8]) -> io::Result<String> {
    let json = value_to_json(&decode_value(bytes)?)?;
    serde_json::to_string(&json)
        .map_err(|err| decode_error(format!("json render failed: {err}")))
}

/// Top-level fields the dispatcher needs before committing to a full decode.
#[derive(Debug, Clone, Default)]
pub struct EnvelopeMeta {
    pub message_type: String,
    pub request_id: String,
    pub scene_name: String,
    pub reason: String,
}

/// Walks only the envelope keys of interest: `type` always, plus the
/// `switch_scene` payload's `request_id`/`scene_name`/`reason`. Values the
/// shim does not consume are stepped over without subset validation, so a
/// newer peer may carry fields (even floats or ext values) the full decode
/// would reject. Trailing bytes after the envelope map are tolerated too.
pub fn extract_envelope_meta(bytes: &[u8]) -> io::Result<EnvelopeMeta> {
    let mut rd = bytes;
    let value = rmpv::decode::read_value(&mut rd)
        .map_err(|err| decode_error(format!("decode failed: {err}")))?;
    let pairs = match &value {
        rmpv::Value::Map(pairs) => pairs,
        _ => return Err(decode_error("envelope is not a map")),
    };

    let mut meta = EnvelopeMeta::default();
    let mut payload: Option<&rmpv::Value> = None;
    for (key, val) in pairs {
        match key.as_str() {
            Some("type") => {
                meta.message_type = val
                    .as_str()
                    .ok_or_else(|| decode_error("envelope type is not a string"))?
                    .to_string();
            }
            Some("payload") => payload = Some(val),
            _ => {}
        }
    }
    if meta.message_type.is_empty() {
        return Err(decode_error("envelope type missing"));
    }

    if meta.message_type == "switch_scene" {
        if let Some(rmpv::Value::Map(payload_pairs)) = payload {
            for (key, val) in payload_pairs {
                let Some(text) = val.as_str() else { continue };
                match key.as_str() {
                    Some("request_id") => meta.request_id = text.to_string(),
                    Some("scene_name") => meta.scene_name = text.to_string(),
                    Some("reason") => meta.reason = text.to_string(),
                    _ => {}
                }
            }
        }
    }
    Ok(meta)
}

/// Minimal envelope JSON synthesized from the meta walk, used when the full
/// JSON projection of an inbound frame fails but dispatch already happened.
pub fn meta_fallback_envelope_json(meta: &EnvelopeMeta) -> String {
    fn nullable(s: &str) -> serde_json::Value {
        if s.is_empty() {
            serde_json::Value::Null
        } else {
            serde_json::Value::String(s.to_string())
        }
    }

    let payload = if meta.message_type == "switch_scene" {
        serde_json::json!({
            "request_id": nullable(&meta.request_id),
            "scene_name": nullable(&meta.scene_name),
            "reason": nullable(&meta.reason),
        })
    } else {
        serde_json::json!({})
    };
    serde_json::json!({
        "v": 1,
        "id": "incoming-meta",
        "ts_unix_ms": now_unix_ms(),
        "type": meta.message_type,
        "payload": payload,
    })
    .to_string()
}
