use bytes::Bytes;

/// Computes the exclusive upper bound of a prefix range.
///
/// Increments the last byte that is not `0xff` and truncates after it. A prefix
/// made only of `0xff` bytes (or an empty prefix) has no upper bound; etcd
/// expresses "to the end of the keyspace" as `[0x00]`.
pub fn prefix_range_end(prefix: &[u8]) -> Bytes {
    let mut end = prefix.to_vec();
    while let Some(last) = end.pop() {
        if last < 0xff {
            end.push(last + 1);
            return Bytes::from(end);
        }
    }
    Bytes::from_static(&[0])
}

/// accept ip either like 127.0.0.1:2379 or docker host name: etcd-0:2379
pub(crate) fn address_str(addr: &str) -> String {
    if addr.starts_with("https://") {
        return addr.to_string();
    }
    let normalized = addr.trim_start_matches("http://");
    format!("http://{normalized}")
}
