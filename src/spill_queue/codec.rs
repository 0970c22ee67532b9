//! On-disk record/batch framing for `SpillQueue` shards (spec.md §6):
//! `[u32 length][u32 checksum][records…]`, each record
//! `[u16 url_len][url bytes][f32 priority][u16 depth][u16 ref_domain_len][ref_domain]`.

use std::time::SystemTime;

use crate::model::UrlRecord;

pub fn encode_record(record: &UrlRecord, out: &mut Vec<u8>) {
    let url_bytes = record.url.as_bytes();
    let domain_bytes = record.referring_domain.as_bytes();
    out.extend_from_slice(&(url_bytes.len() as u16).to_le_bytes());
    out.extend_from_slice(url_bytes);
    out.extend_from_slice(&record.priority.to_le_bytes());
    out.extend_from_slice(&record.depth.to_le_bytes());
    out.extend_from_slice(&(domain_bytes.len() as u16).to_le_bytes());
    out.extend_from_slice(domain_bytes);
}

/// Decodes records sequentially out of `buf`. A truncated trailing record is
/// silently dropped rather than treated as an error — batches are only ever
/// produced whole by `encode_batch`, so this only triggers on corruption.
pub fn decode_records(mut buf: &[u8]) -> Vec<UrlRecord> {
    let mut records = Vec::new();
    loop {
        match decode_one(buf) {
            Some((record, rest)) => {
                records.push(record);
                buf = rest;
            }
            None => break,
        }
    }
    records
}

fn decode_one(buf: &[u8]) -> Option<(UrlRecord, &[u8])> {
    if buf.len() < 2 {
        return None;
    }
    let url_len = u16::from_le_bytes([buf[0], buf[1]]) as usize;
    let mut pos = 2;
    if buf.len() < pos + url_len {
        return None;
    }
    let url = std::str::from_utf8(&buf[pos..pos + url_len]).ok()?.to_string();
    pos += url_len;

    if buf.len() < pos + 4 {
        return None;
    }
    let priority = f32::from_le_bytes([buf[pos], buf[pos + 1], buf[pos + 2], buf[pos + 3]]);
    pos += 4;

    if buf.len() < pos + 2 {
        return None;
    }
    let depth = u16::from_le_bytes([buf[pos], buf[pos + 1]]);
    pos += 2;

    if buf.len() < pos + 2 {
        return None;
    }
    let domain_len = u16::from_le_bytes([buf[pos], buf[pos + 1]]) as usize;
    pos += 2;

    if buf.len() < pos + domain_len {
        return None;
    }
    let referring_domain = std::str::from_utf8(&buf[pos..pos + domain_len]).ok()?.to_string();
    pos += domain_len;

    let record = UrlRecord {
        url,
        priority,
        depth,
        referring_domain,
        discovered_at: SystemTime::now(),
    };
    Some((record, &buf[pos..]))
}

/// Frames a batch of records as `[u32 length][u32 checksum][records…]`.
/// `length` covers the record bytes only, not the 8-byte header.
pub fn encode_batch(records: &[UrlRecord]) -> Vec<u8> {
    let mut body = Vec::new();
    for record in records {
        encode_record(record, &mut body);
    }
    let checksum = xxhash_rust::xxh3::xxh3_64(&body) as u32;
    let mut framed = Vec::with_capacity(body.len() + 8);
    framed.extend_from_slice(&(body.len() as u32).to_le_bytes());
    framed.extend_from_slice(&checksum.to_le_bytes());
    framed.extend_from_slice(&body);
    framed
}

/// Result of validating one framed batch read from a shard file.
pub enum BatchRead {
    /// A complete, checksum-valid batch plus the number of bytes it occupied
    /// on disk (header + body).
    Ok(Vec<UrlRecord>, u64),
    /// A complete batch whose checksum didn't match; skipped, not retried.
    Corrupt(u64),
    /// Fewer than a full header+body remain; nothing to read yet.
    Incomplete,
}

pub fn read_batch(buf: &[u8]) -> BatchRead {
    if buf.len() < 8 {
        return BatchRead::Incomplete;
    }
    let length = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
    let checksum = u32::from_le_bytes([buf[4], buf[5], buf[6], buf[7]]);
    if buf.len() < 8 + length {
        return BatchRead::Incomplete;
    }
    let body = &buf[8..8 + length];
    let consumed = (8 + length) as u64;
    if xxhash_rust::xxh3::xxh3_64(body) as u32 != checksum {
        return BatchRead::Corrupt(consumed);
    }
    BatchRead::Ok(decode_records(body), consumed)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Vec<UrlRecord> {
        vec![
            UrlRecord::new("https://a.test/".into(), 0.5, 0, "a.test".into()),
            UrlRecord::new("https://b.test/x?y=1".into(), 0.9, 2, "b.test".into()),
        ]
    }

    #[test]
    fn round_trips_a_batch() {
        let records = sample();
        let framed = encode_batch(&records);
        match read_batch(&framed) {
            BatchRead::Ok(decoded, consumed) => {
                assert_eq!(consumed as usize, framed.len());
                assert_eq!(decoded.len(), records.len());
                assert_eq!(decoded[0].url, records[0].url);
                assert_eq!(decoded[1].priority, records[1].priority);
            }
            _ => panic!("expected Ok"),
        }
    }

    #[test]
    fn detects_checksum_corruption() {
        let records = sample();
        let mut framed = encode_batch(&records);
        let last = framed.len() - 1;
        framed[last] ^= 0xFF;
        match read_batch(&framed) {
            BatchRead::Corrupt(_) => {}
            _ => panic!("expected Corrupt"),
        }
    }

    #[test]
    fn incomplete_on_truncated_buffer() {
        let records = sample();
        let framed = encode_batch(&records);
        let truncated = &framed[..framed.len() - 1];
        assert!(matches!(read_batch(truncated), BatchRead::Incomplete));
    }
}
