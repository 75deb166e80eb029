//! Query string forwarding.
//!
//! The query is forwarded byte-for-byte. The only permitted change is the
//! configured marker, and never on presigned URLs: their signature covers the
//! canonical query, so any extra parameter invalidates it.

/// True if the query carries a presigned-URL signature (SigV4 or SigV2).
pub fn is_presigned(query: Option<&str>) -> bool {
    query
        .into_iter()
        .flat_map(|q| q.split('&'))
        .map(|pair| pair.split_once('=').map_or(pair, |(key, _)| key))
        .any(|key| key.eq_ignore_ascii_case("X-Amz-Signature") || key == "Signature")
}

/// The query string to send upstream.
pub fn outbound_query(query: Option<&str>, marker: Option<&str>) -> Option<String> {
    match marker {
        Some(marker) if !is_presigned(query) => match query {
            Some(q) if !q.is_empty() => Some(format!("{q}&{marker}")),
            _ => Some(marker.to_string()),
        },
        _ => query.map(str::to_string),
    }
}
