//! Media type detection for attachments

const OCTET_STREAM: &str = "application/octet-stream";

/// Leading-byte signatures; `None` bytes match anything
const SIGNATURES: &[(&[Option<u8>], &str)] = &[
	(&[Some(0x89), Some(b'P'), Some(b'N'), Some(b'G'), Some(b'\r'), Some(b'\n'), Some(0x1a), Some(b'\n')], "image/png"),
	(&[Some(0xff), Some(0xd8), Some(0xff)], "image/jpeg"),
	(&[Some(b'G'), Some(b'I'), Some(b'F'), Some(b'8')], "image/gif"),
	(
		&[
			Some(b'R'), Some(b'I'), Some(b'F'), Some(b'F'), None, None, None, None,
			Some(b'W'), Some(b'E'), Some(b'B'), Some(b'P'),
		],
		"image/webp",
	),
	(
		&[
			Some(b'R'), Some(b'I'), Some(b'F'), Some(b'F'), None, None, None, None,
			Some(b'W'), Some(b'A'), Some(b'V'), Some(b'E'),
		],
		"audio/wav",
	),
	(&[Some(b'B'), Some(b'M')], "image/bmp"),
	(&[Some(b'%'), Some(b'P'), Some(b'D'), Some(b'F'), Some(b'-')], "application/pdf"),
	(&[Some(b'P'), Some(b'K'), Some(0x03), Some(0x04)], "application/zip"),
	(&[Some(0x1f), Some(0x8b), Some(0x08)], "application/x-gzip"),
	(&[Some(b'I'), Some(b'D'), Some(b'3')], "audio/mpeg"),
	(&[Some(b'O'), Some(b'g'), Some(b'g'), Some(b'S')], "application/ogg"),
	(&[Some(b'f'), Some(b'L'), Some(b'a'), Some(b'C')], "audio/flac"),
	(&[Some(0x1a), Some(0x45), Some(0xdf), Some(0xa3)], "video/webm"),
	(&[None, None, None, None, Some(b'f'), Some(b't'), Some(b'y'), Some(b'p')], "video/mp4"),
];

/// Extension fallbacks for formats without a reliable signature
const EXTENSIONS: &[(&str, &str)] = &[
	(".svg", "image/svg+xml"),
	(".canvas", "application/json"),
	(".json", "application/json"),
	(".csv", "text/csv; charset=utf-8"),
	(".txt", "text/plain; charset=utf-8"),
	(".html", "text/html; charset=utf-8"),
	(".css", "text/css; charset=utf-8"),
	(".js", "text/javascript; charset=utf-8"),
	(".m4a", "audio/mp4"),
	(".mov", "video/quicktime"),
	(".avif", "image/avif"),
	(".heic", "image/heic"),
	(".epub", "application/epub+zip"),
	(".docx", "application/vnd.openxmlformats-officedocument.wordprocessingml.document"),
	(".xlsx", "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet"),
	(".pptx", "application/vnd.openxmlformats-officedocument.presentationml.presentation"),
];

/// Sniff the media type from content, then extension (`.ext`, lowercase)
///
/// Undetectable binary content is `application/octet-stream`; undetectable
/// valid UTF-8 is `text/plain`.
pub fn detect_media_type(data: &[u8], extension: Option<&str>) -> String {
	// Container formats sniff as zip; a known extension is more precise
	let by_extension = extension.and_then(|ext| {
		EXTENSIONS.iter().find(|(e, _)| e.eq_ignore_ascii_case(ext)).map(|(_, m)| *m)
	});

	if let Some(sniffed) = sniff(data) {
		if sniffed == "application/zip" {
			if let Some(m) = by_extension {
				return m.to_string();
			}
		}
		return sniffed.to_string();
	}

	if let Some(m) = by_extension {
		return m.to_string();
	}

	if !data.is_empty() && looks_like_text(data) {
		return "text/plain; charset=utf-8".to_string();
	}

	OCTET_STREAM.to_string()
}

fn sniff(data: &[u8]) -> Option<&'static str> {
	SIGNATURES.iter().find(|(sig, _)| matches_signature(data, sig)).map(|(_, media)| *media)
}

fn matches_signature(data: &[u8], signature: &[Option<u8>]) -> bool {
	data.len() >= signature.len()
		&& signature.iter().zip(data).all(|(expected, actual)| expected.map_or(true, |b| b == *actual))
}

fn looks_like_text(data: &[u8]) -> bool {
	let head = &data[..data.len().min(512)];
	let valid = match std::str::from_utf8(head) {
		Ok(_) => true,
		// Cut mid-character at the sniff boundary
		Err(e) => e.error_len().is_none() && data.len() > head.len(),
	};
	valid && !head.iter().any(|b| matches!(*b, 0x00..=0x08 | 0x0e..=0x1a | 0x1c..=0x1f))
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_magic_bytes_win_over_extension() {
		let png = b"\x89PNG\r\n\x1a\n\0\0\0\rIHDR";
		assert_eq!(detect_media_type(png, Some(".jpg")), "image/png");
		assert_eq!(detect_media_type(b"%PDF-1.7\n", None), "application/pdf");
		assert_eq!(detect_media_type(b"\xff\xd8\xff\xe0\0\x10JFIF", Some(".bin")), "image/jpeg");
		assert_eq!(detect_media_type(b"RIFF\0\0\0\0WEBPVP8 ", None), "image/webp");
		assert_eq!(detect_media_type(b"\0\0\0\x18ftypmp42", None), "video/mp4");
	}

	#[test]
	fn test_zip_containers_use_extension() {
		let zip = b"PK\x03\x04\x14\0\0\0";
		assert_eq!(detect_media_type(zip, Some(".epub")), "application/epub+zip");
		assert_eq!(detect_media_type(zip, None), "application/zip");
	}

	#[test]
	fn test_extension_fallback() {
		assert_eq!(detect_media_type(b"<svg xmlns=\"\"/>", Some(".svg")), "image/svg+xml");
		assert_eq!(detect_media_type(b"{\"nodes\":[]}", Some(".canvas")), "application/json");
	}

	#[test]
	fn test_text_and_binary_defaults() {
		assert_eq!(detect_media_type(b"hello world", Some(".xyz")), "text/plain; charset=utf-8");
		assert_eq!(detect_media_type(b"\x00\x01\x02\x03", None), OCTET_STREAM);
		assert_eq!(detect_media_type(b"", None), OCTET_STREAM);
	}
}

// vim: ts=4
