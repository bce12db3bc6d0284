use model::records::doc::StoredDocument;
use std::io;
use tokio::io::{AsyncRead, AsyncReadExt};

/// Segment document blobs are a flat run of length-prefixed bincode records,
/// one per document slot (deleted slots included, so in-segment position is
/// the record index). The prefix is a little-endian u32.
pub fn encode_segment(docs: &[StoredDocument]) -> Result<Vec<u8>, bincode::Error> {
    let mut out = Vec::new();
    for doc in docs {
        let bytes = bincode::serialize(doc)?;
        out.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
        out.extend_from_slice(&bytes);
    }
    Ok(out)
}

/// Reads the raw bytes of the next record. `Ok(None)` only on clean EOF at a
/// record boundary; a partial record is an error.
pub async fn read_record_bytes<R>(reader: &mut R) -> io::Result<Option<Vec<u8>>>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e),
    }
    let len = u32::from_le_bytes(len_buf) as usize;
    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf).await?;
    Ok(Some(buf))
}
