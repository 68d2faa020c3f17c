/// Returns the index of the first occurrence of `needle` in `haystack`.
pub fn find_subsequence(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() {
        return Some(0);
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}

/// Splits `haystack` on every occurrence of `needle`, returning the pieces
/// between occurrences (excluding the needle itself).
pub fn split_on<'a>(haystack: &'a [u8], needle: &[u8]) -> Vec<&'a [u8]> {
    let mut result = Vec::new();
    let mut start = 0;
    while start <= haystack.len() {
        if let Some(pos) = find_subsequence(&haystack[start..], needle) {
            result.push(&haystack[start..start + pos]);
            start += pos + needle.len();
        } else {
            result.push(&haystack[start..]);
            break;
        }
    }
    result
}

/// Extracts the boundary token from a Content-Type header value like
/// `multipart/form-data; boundary=----WebKitFormBoundaryXXX`.
pub fn extract_boundary(content_type: &str) -> Option<String> {
    let mut params = content_type.split(';').map(|s| s.trim());
    let mime = params.next()?;
    if !mime.eq_ignore_ascii_case("multipart/form-data") {
        return None;
    }
    params
        .find_map(|s| {
            let (key, value) = s.split_once('=')?;
            key.trim().eq_ignore_ascii_case("boundary").then_some(value)
        })
        .map(|s| s.trim().trim_matches('"').to_owned())
        .filter(|s| !s.is_empty())
}

/// `name` and `filename` parameters of a part's Content-Disposition header.
#[derive(Debug, Default, PartialEq)]
pub struct Disposition {
    pub name: Option<String>,
    pub filename: Option<String>,
}

/// Parses the Content-Disposition line out of a part's header block.
///
/// Parameters are split on `;` and matched by exact key, so `filename="x"`
/// is never mistaken for `name="x"`.
pub fn parse_disposition(headers: &str) -> Disposition {
    let mut disposition = Disposition::default();
    let line = headers.lines().find_map(|line| {
        let (key, value) = line.split_once(':')?;
        key.trim().eq_ignore_ascii_case("content-disposition").then_some(value)
    });
    let Some(line) = line else {
        return disposition;
    };

    for param in line.split(';').skip(1) {
        let Some((key, value)) = param.split_once('=') else {
            continue;
        };
        let value = value.trim().trim_matches('"').to_owned();
        match key.trim().to_ascii_lowercase().as_str() {
            "name" => disposition.name = Some(value),
            "filename" => disposition.filename = Some(value),
            _ => {}
        }
    }
    disposition
}

/// Extracts the raw bytes of the file part submitted under `field_name`.
///
/// A part only counts as a file when its disposition carries a `filename`
/// parameter; a plain text field with the same name is ignored.
pub fn extract_file_field(body: &[u8], boundary: &str, field_name: &str) -> Option<Vec<u8>> {
    let delimiter = format!("--{}", boundary);
    let parts = split_on(body, delimiter.as_bytes());

    for part in parts {
        let sep = b"\r\n\r\n";
        if let Some(sep_pos) = find_subsequence(part, sep) {
            let headers = String::from_utf8_lossy(&part[..sep_pos]);
            let disposition = parse_disposition(&headers);
            if disposition.name.as_deref() == Some(field_name) && disposition.filename.is_some() {
                let raw = &part[sep_pos + sep.len()..];
                let trimmed = raw.strip_suffix(b"\r\n").unwrap_or(raw);
                return Some(trimmed.to_vec());
            }
        }
    }
    None
}

/// Builds a single-part multipart body for tests.
#[cfg(test)]
pub fn build_body(boundary: &str, field: &str, filename: Option<&str>, data: &[u8]) -> Vec<u8> {
    let disposition = match filename {
        Some(f) => format!("form-data; name=\"{}\"; filename=\"{}\"", field, f),
        None => format!("form-data; name=\"{}\"", field),
    };
    let mut body = format!(
        "--{}\r\nContent-Disposition: {}\r\nContent-Type: application/octet-stream\r\n\r\n",
        boundary, disposition
    )
    .into_bytes();
    body.extend_from_slice(data);
    body.extend_from_slice(format!("\r\n--{}--\r\n", boundary).as_bytes());
    body
}
