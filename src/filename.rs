/// Replace every character outside `[A-Za-z0-9_-]` with `_`.
///
/// Runs of replaced characters are not collapsed, so `"a!!b"` becomes `"a__b"`.
pub fn sanitize_site_name(site_name: &str) -> String {
    site_name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Deterministic photo filename:
/// `{site}_{date}_{seq:03}_{lat:.6}_{lng:.6}.jpg`
///
/// Sequence numbers past 999 render at their natural width.
pub fn photo_filename(site_name: &str, date: &str, seq: u32, lat: f64, lng: f64) -> String {
    format!(
        "{}_{}_{:03}_{:.6}_{:.6}.jpg",
        sanitize_site_name(site_name),
        date,
        seq,
        lat,
        lng
    )
}
