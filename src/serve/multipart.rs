//! Just enough multipart/form-data parsing to pull an uploaded image out of
//! a request body.

const CRLF: &[u8] = b"\r\n";

/// One body part: its disposition and type headers plus the raw payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Part<'a> {
    pub name: Option<String>,
    pub filename: Option<String>,
    pub content_type: Option<String>,
    pub data: &'a [u8],
}

impl Part<'_> {
    /// A file upload, or a part explicitly typed as an image.
    pub fn is_image_upload(&self) -> bool {
        self.filename.is_some()
            || self
                .content_type
                .as_deref()
                .is_some_and(|t| t.to_ascii_lowercase().starts_with("image/"))
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

/// Boundary token of a `multipart/form-data; boundary=...` content type.
/// `None` for any other content type.
pub fn extract_boundary(content_type: &str) -> Option<String> {
    let mut params = content_type.split(';').map(str::trim);
    if !params.next()?.eq_ignore_ascii_case("multipart/form-data") {
        return None;
    }
    params
        .find_map(|p| p.strip_prefix("boundary="))
        .map(|b| b.trim_matches('"').to_owned())
        .filter(|b| !b.is_empty())
}

/// Value of `key="..."` (or unquoted `key=...`) in a header's parameters.
fn header_param(value: &str, key: &str) -> Option<String> {
    value.split(';').skip(1).find_map(|p| {
        let (k, v) = p.trim().split_once('=')?;
        k.trim().eq_ignore_ascii_case(key).then(|| v.trim().trim_matches('"').to_owned())
    })
}

fn parse_headers<'a>(raw: &[u8], data: &'a [u8]) -> Part<'a> {
    let mut part = Part { name: None, filename: None, content_type: None, data };
    for line in String::from_utf8_lossy(raw).split("\r\n") {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim();
        if key.trim().eq_ignore_ascii_case("content-disposition") {
            part.name = header_param(value, "name");
            part.filename = header_param(value, "filename");
        } else if key.trim().eq_ignore_ascii_case("content-type") {
            part.content_type = Some(value.to_owned());
        }
    }
    part
}

/// Splits `body` into its parts in a single pass. Parsing stops at the
/// closing delimiter, or at the first part that is cut short.
pub fn parts<'a>(body: &'a [u8], boundary: &str) -> Vec<Part<'a>> {
    let opening = format!("--{}", boundary);
    // Every delimiter after the first is preceded by the CRLF ending the
    // previous part's payload.
    let delimiter = format!("\r\n--{}", boundary);

    let mut parsed = Vec::new();
    let Some(start) = find(body, opening.as_bytes()) else {
        return parsed;
    };
    let mut rest = &body[start + opening.len()..];

    loop {
        if rest.starts_with(b"--") {
            break;
        }
        let Some(after_crlf) = rest.strip_prefix(CRLF) else {
            break;
        };
        let Some(header_end) = find(after_crlf, b"\r\n\r\n") else {
            break;
        };
        let payload = &after_crlf[header_end + 4..];
        let Some(data_end) = find(payload, delimiter.as_bytes()) else {
            break;
        };
        parsed.push(parse_headers(&after_crlf[..header_end], &payload[..data_end]));
        rest = &payload[data_end + delimiter.len()..];
    }
    parsed
}

/// Bytes of the first part that is an image upload.
pub fn extract_file(body: &[u8], boundary: &str) -> Option<Vec<u8>> {
    parts(body, boundary)
        .into_iter()
        .find(|p| p.is_image_upload())
        .map(|p| p.data.to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn body(boundary: &str, payload: &[u8]) -> Vec<u8> {
        let mut b = Vec::new();
        b.extend_from_slice(format!("--{boundary}\r\nContent-Disposition: form-data; name=\"note\"\r\n\r\nhello\r\n").as_bytes());
        b.extend_from_slice(format!("--{boundary}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"x.png\"\r\nContent-Type: image/png\r\n\r\n").as_bytes());
        b.extend_from_slice(payload);
        b.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());
        b
    }

    #[test]
    fn finds_the_file_part() {
        let payload = b"\x89PNG\r\n\x1a\nrest";
        let got = extract_file(&body("XyZ", payload), "XyZ").unwrap();
        assert_eq!(got, payload);
    }

    #[test]
    fn headers_are_parsed_per_part() {
        let b = body("XyZ", b"img");
        let parsed = parts(&b, "XyZ");
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[0].name.as_deref(), Some("note"));
        assert_eq!(parsed[0].data, b"hello");
        assert!(!parsed[0].is_image_upload());
        assert_eq!(parsed[1].filename.as_deref(), Some("x.png"));
        assert_eq!(parsed[1].content_type.as_deref(), Some("image/png"));
    }

    #[test]
    fn boundary_text_inside_a_payload_is_kept() {
        let payload = b"a--XyZ b\r\n-XyZ";
        assert_eq!(extract_file(&body("XyZ", payload), "XyZ").unwrap(), payload);
    }

    #[test]
    fn image_typed_part_without_filename_counts() {
        let b = b"--b\r\ncontent-disposition: form-data; name=\"img\"\r\ncontent-type: IMAGE/jpeg\r\n\r\nJPG\r\n--b--\r\n";
        assert_eq!(extract_file(b, "b"), Some(b"JPG".to_vec()));
    }

    #[test]
    fn boundary_only_for_multipart() {
        assert_eq!(
            extract_boundary("multipart/form-data; boundary=\"abc\""),
            Some("abc".to_string())
        );
        assert_eq!(extract_boundary("image/png"), None);
        assert_eq!(extract_boundary("multipart/form-data"), None);
    }

    #[test]
    fn no_file_part_is_none() {
        let b = b"--b\r\nContent-Disposition: form-data; name=\"x\"\r\n\r\n1\r\n--b--\r\n";
        assert_eq!(extract_file(b, "b"), None);
    }

    #[test]
    fn truncated_body_yields_complete_parts_only() {
        let b = body("XyZ", b"img");
        let cut = &b[..b.len() - 12];
        let parsed = parts(cut, "XyZ");
        assert_eq!(parsed.len(), 1);
        assert_eq!(extract_file(cut, "XyZ"), None);
    }
}
