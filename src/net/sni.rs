//! TLS ClientHello inspection.
//!
//! Only the first record is read. The bytes are kept so the connection can be
//! replayed to the backend untouched; the handshake itself is never terminated.

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};

/// Largest TLS plaintext record.
pub const MAX_RECORD_LEN: usize = 16 * 1024;

const RECORD_HEADER_LEN: usize = 5;
const CONTENT_TYPE_HANDSHAKE: u8 = 0x16;
const HANDSHAKE_CLIENT_HELLO: u8 = 0x01;
const EXTENSION_SERVER_NAME: u16 = 0x0000;
const NAME_TYPE_HOST_NAME: u8 = 0x00;

#[derive(Debug, Error)]
pub enum SniError {
    #[error("not a TLS handshake record (content type {0:#04x})")]
    NotHandshake(u8),

    #[error("handshake message is not a ClientHello (type {0:#04x})")]
    NotClientHello(u8),

    #[error("record length {0} exceeds {max}", max = MAX_RECORD_LEN)]
    RecordTooLarge(usize),

    #[error("truncated ClientHello")]
    Truncated,

    #[error("ClientHello carries no server name")]
    NoServerName,

    #[error("server name is not valid ASCII")]
    InvalidName,

    #[error("read failed: {0}")]
    Io(#[from] std::io::Error),
}

/// The first TLS record of a connection and the server name it asks for.
#[derive(Debug, Clone)]
pub struct ClientHello {
    pub server_name: String,
    /// Raw bytes read from the client, header included.
    pub bytes: Vec<u8>,
}

/// Read one TLS record from `stream` and extract its server name.
pub async fn read_client_hello<S>(stream: &mut S) -> Result<ClientHello, SniError>
where
    S: AsyncRead + Unpin,
{
    let mut header = [0u8; RECORD_HEADER_LEN];
    stream.read_exact(&mut header).await.map_err(eof_as_truncated)?;
    if header[0] != CONTENT_TYPE_HANDSHAKE {
        return Err(SniError::NotHandshake(header[0]));
    }
    let len = u16::from_be_bytes([header[3], header[4]]) as usize;
    if len > MAX_RECORD_LEN {
        return Err(SniError::RecordTooLarge(len));
    }

    let mut bytes = Vec::with_capacity(RECORD_HEADER_LEN + len);
    bytes.extend_from_slice(&header);
    bytes.resize(RECORD_HEADER_LEN + len, 0);
    stream
        .read_exact(&mut bytes[RECORD_HEADER_LEN..])
        .await
        .map_err(eof_as_truncated)?;

    let server_name = parse_server_name(&bytes)?;
    Ok(ClientHello { server_name, bytes })
}

fn eof_as_truncated(e: std::io::Error) -> SniError {
    if e.kind() == std::io::ErrorKind::UnexpectedEof {
        SniError::Truncated
    } else {
        SniError::Io(e)
    }
}

/// Extract the `host_name` entry of the server_name extension from a
/// complete TLS record.
pub fn parse_server_name(record: &[u8]) -> Result<String, SniError> {
    let mut r = Reader::new(record);
    let content_type = r.u8()?;
    if content_type != CONTENT_TYPE_HANDSHAKE {
        return Err(SniError::NotHandshake(content_type));
    }
    r.skip(2)?; // legacy record version
    let record_len = r.u16()? as usize;
    let mut r = Reader::new(r.take(record_len)?);

    let msg_type = r.u8()?;
    if msg_type != HANDSHAKE_CLIENT_HELLO {
        return Err(SniError::NotClientHello(msg_type));
    }
    let body_len = r.u24()?;
    let mut hello = Reader::new(r.take(body_len)?);

    hello.skip(2 + 32)?; // client version, random
    let session_id = hello.u8()? as usize;
    hello.skip(session_id)?;
    let cipher_suites = hello.u16()? as usize;
    hello.skip(cipher_suites)?;
    let compression = hello.u8()? as usize;
    hello.skip(compression)?;

    if hello.is_empty() {
        return Err(SniError::NoServerName);
    }
    let extensions_len = hello.u16()? as usize;
    let mut extensions = Reader::new(hello.take(extensions_len)?);

    while !extensions.is_empty() {
        let ext_type = extensions.u16()?;
        let ext_len = extensions.u16()? as usize;
        let data = extensions.take(ext_len)?;
        if ext_type != EXTENSION_SERVER_NAME {
            continue;
        }

        let mut ext = Reader::new(data);
        let list_len = ext.u16()? as usize;
        let mut list = Reader::new(ext.take(list_len)?);
        while !list.is_empty() {
            let name_type = list.u8()?;
            let name_len = list.u16()? as usize;
            let name = list.take(name_len)?;
            if name_type == NAME_TYPE_HOST_NAME {
                if name.is_empty() || !name.is_ascii() {
                    return Err(SniError::InvalidName);
                }
                let name = std::str::from_utf8(name).map_err(|_| SniError::InvalidName)?;
                return Ok(name.to_ascii_lowercase());
            }
        }
    }
    Err(SniError::NoServerName)
}

/// Bounds-checked big-endian cursor.
struct Reader<'a> {
    buf: &'a [u8],
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], SniError> {
        if self.buf.len() < n {
            return Err(SniError::Truncated);
        }
        let (head, rest) = self.buf.split_at(n);
        self.buf = rest;
        Ok(head)
    }

    fn skip(&mut self, n: usize) -> Result<(), SniError> {
        self.take(n).map(|_| ())
    }

    fn u8(&mut self) -> Result<u8, SniError> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16, SniError> {
        let b = self.take(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    fn u24(&mut self) -> Result<usize, SniError> {
        let b = self.take(3)?;
        Ok(((b[0] as usize) << 16) | ((b[1] as usize) << 8) | b[2] as usize)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Minimal TLS 1.2 ClientHello, optionally with a server_name extension.
    pub(crate) fn client_hello(server_name: Option<&str>) -> Vec<u8> {
        let mut extensions = Vec::new();
        // An unrelated extension first: supported_groups with x25519.
        extensions.extend_from_slice(&[0x00, 0x0a, 0x00, 0x04, 0x00, 0x02, 0x00, 0x1d]);
        if let Some(name) = server_name {
            let name = name.as_bytes();
            let entry_len = 1 + 2 + name.len();
            extensions.extend_from_slice(&EXTENSION_SERVER_NAME.to_be_bytes());
            extensions.extend_from_slice(&((2 + entry_len) as u16).to_be_bytes());
            extensions.extend_from_slice(&(entry_len as u16).to_be_bytes());
            extensions.push(NAME_TYPE_HOST_NAME);
            extensions.extend_from_slice(&(name.len() as u16).to_be_bytes());
            extensions.extend_from_slice(name);
        }

        let mut body = vec![0x03, 0x03];
        body.extend_from_slice(&[0x42; 32]);
        body.push(0); // session id
        body.extend_from_slice(&[0x00, 0x02, 0x13, 0x01]);
        body.extend_from_slice(&[0x01, 0x00]);
        body.extend_from_slice(&(extensions.len() as u16).to_be_bytes());
        body.extend_from_slice(&extensions);

        let mut handshake = vec![HANDSHAKE_CLIENT_HELLO];
        handshake.extend_from_slice(&(body.len() as u32).to_be_bytes()[1..]);
        handshake.extend_from_slice(&body);

        let mut record = vec![CONTENT_TYPE_HANDSHAKE, 0x03, 0x01];
        record.extend_from_slice(&(handshake.len() as u16).to_be_bytes());
        record.extend_from_slice(&handshake);
        record
    }

    #[test]
    fn extracts_server_name() {
        let record = client_hello(Some("Example.COM"));
        assert_eq!(parse_server_name(&record).unwrap(), "example.com");
    }

    #[test]
    fn missing_extension_is_reported() {
        let record = client_hello(None);
        assert!(matches!(parse_server_name(&record), Err(SniError::NoServerName)));
    }

    #[test]
    fn rejects_non_handshake_and_truncated_records() {
        assert!(matches!(
            parse_server_name(b"GET / HTTP/1.1\r\n"),
            Err(SniError::NotHandshake(b'G'))
        ));
        let record = client_hello(Some("example.com"));
        assert!(matches!(
            parse_server_name(&record[..record.len() - 4]),
            Err(SniError::Truncated)
        ));
    }

    #[tokio::test]
    async fn read_keeps_the_raw_bytes() {
        let record = client_hello(Some("api.example.com"));
        let mut input = record.clone();
        input.extend_from_slice(b"trailing application data");

        let mut reader = &input[..];
        let hello = read_client_hello(&mut reader).await.unwrap();
        assert_eq!(hello.server_name, "api.example.com");
        assert_eq!(hello.bytes, record);
        assert_eq!(reader, b"trailing application data");
    }

    #[tokio::test]
    async fn read_rejects_oversized_records() {
        let mut reader: &[u8] = &[CONTENT_TYPE_HANDSHAKE, 0x03, 0x01, 0x40, 0x01];
        assert!(matches!(
            read_client_hello(&mut reader).await,
            Err(SniError::RecordTooLarge(0x4001))
        ));
    }

    #[tokio::test]
    async fn read_reports_early_eof_as_truncated() {
        let mut reader: &[u8] = &[CONTENT_TYPE_HANDSHAKE, 0x03];
        assert!(matches!(read_client_hello(&mut reader).await, Err(SniError::Truncated)));
    }
}
