//! Input validation for uploads and client records.
//!
//! Every check records its reasons in a [`ValidationErrors`] map so callers
//! can report all problems with a request at once.

use crate::models::document::DocumentType;
use serde::Serialize;
use std::collections::BTreeMap;

pub const DEFAULT_MAX_UPLOAD_SIZE: u64 = 52_428_800;
pub const DEFAULT_ALLOWED_EXTENSIONS: [&str; 6] = ["pdf", "jpg", "jpeg", "png", "doc", "docx"];
pub const MAX_TITLE_LEN: usize = 255;
pub const MAX_PHONE_LEN: usize = 20;

const DOCX_MIME: &str = "application/vnd.openxmlformats-officedocument.wordprocessingml.document";

/// Content types accepted for upload, with the extensions each may carry.
const ALLOWED_CONTENT: [(&str, &[&str]); 5] = [
    ("application/pdf", &["pdf"]),
    ("image/jpeg", &["jpg", "jpeg"]),
    ("image/png", &["png"]),
    ("application/msword", &["doc"]),
    (DOCX_MIME, &["docx"]),
];

/// How far into a ZIP container to look for a Word part.
const DOCX_SNIFF_WINDOW: usize = 64 * 1024;

/// Field name to list of reasons.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ValidationErrors(BTreeMap<String, Vec<String>>);

impl ValidationErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn single(field: &str, reason: impl Into<String>) -> Self {
        let mut errors = Self::new();
        errors.add(field, reason);
        errors
    }

    pub fn add(&mut self, field: &str, reason: impl Into<String>) {
        self.0.entry(field.to_string()).or_default().push(reason.into());
    }

    pub fn merge(&mut self, other: ValidationErrors) {
        for (field, reasons) in other.0 {
            self.0.entry(field).or_default().extend(reasons);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn field(&self, field: &str) -> Option<&[String]> {
        self.0.get(field).map(Vec::as_slice)
    }

    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    /// `Ok(value)` when nothing was recorded.
    pub fn finish<T>(self, value: T) -> Result<T, ValidationErrors> {
        if self.is_empty() { Ok(value) } else { Err(self) }
    }
}

impl std::fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut first = true;
        for (field, reasons) in &self.0 {
            if !first {
                f.write_str("; ")?;
            }
            first = false;
            write!(f, "{}: {}", field, reasons.join(", "))?;
        }
        Ok(())
    }
}

impl std::error::Error for ValidationErrors {}

#[derive(Debug, Clone)]
pub struct UploadPolicy {
    pub max_upload_size: u64,
    pub allowed_extensions: Vec<String>,
}

impl Default for UploadPolicy {
    fn default() -> Self {
        Self {
            max_upload_size: DEFAULT_MAX_UPLOAD_SIZE,
            allowed_extensions: DEFAULT_ALLOWED_EXTENSIONS
                .iter()
                .map(|ext| ext.to_string())
                .collect(),
        }
    }
}

/// A file as received from a multipart body.
#[derive(Debug, Clone, Copy)]
pub struct UploadCandidate<'a> {
    pub filename: &'a str,
    pub declared_content_type: Option<&'a str>,
    pub bytes: &'a [u8],
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedUpload {
    /// Sanitized name, safe to embed in an object key.
    pub filename: String,
    /// Content type detected from the payload.
    pub content_type: &'static str,
    pub size: i64,
}

/// Checks a file's size, extension and content under `policy`.
pub fn validate_upload(
    candidate: UploadCandidate<'_>,
    policy: &UploadPolicy,
) -> Result<ValidatedUpload, ValidationErrors> {
    let mut errors = ValidationErrors::new();
    let size = candidate.bytes.len() as u64;

    if size == 0 {
        errors.add("file", "the submitted file is empty");
    } else if size > policy.max_upload_size {
        errors.add(
            "file",
            format!(
                "file size exceeds maximum allowed size of {}MB",
                policy.max_upload_size / (1024 * 1024)
            ),
        );
    }

    let filename = sanitize_filename(candidate.filename);
    if filename.is_empty() {
        errors.add("filename", "filename is empty after sanitizing");
    }

    let extension = extension_of(&filename);
    let extension_allowed = extension.as_deref().is_some_and(|ext| {
        policy
            .allowed_extensions
            .iter()
            .any(|allowed| allowed.eq_ignore_ascii_case(ext))
    });
    if !extension_allowed {
        errors.add(
            "file",
            format!(
                "file extension is not allowed; allowed extensions: {}",
                policy.allowed_extensions.join(", ")
            ),
        );
    }

    let mut content_type = "application/octet-stream";
    if size > 0 {
        match sniff_mime(candidate.bytes) {
            Some(sniffed) => {
                content_type = sniffed;
                let allowed_exts = ALLOWED_CONTENT
                    .iter()
                    .find(|(mime, _)| *mime == sniffed)
                    .map(|(_, exts)| *exts);
                match allowed_exts {
                    None => errors.add("file", format!("file type \"{sniffed}\" is not allowed")),
                    Some(exts) => {
                        if let Some(ext) = extension.as_deref()
                            && extension_allowed
                            && !exts.contains(&ext)
                        {
                            errors.add(
                                "file",
                                format!("file content ({sniffed}) does not match extension .{ext}"),
                            );
                        }
                    }
                }
                if let Some(declared) = candidate.declared_content_type
                    && !declared_agrees(declared, sniffed, extension.as_deref())
                {
                    errors.add(
                        "file",
                        format!("declared content type {declared} does not match file content"),
                    );
                }
            }
            None => errors.add("file", "file content is not a recognised document type"),
        }
    }

    errors.finish(ValidatedUpload {
        filename,
        content_type,
        size: size as i64,
    })
}

/// Detects the content type from magic bytes.
pub fn sniff_mime(bytes: &[u8]) -> Option<&'static str> {
    const PNG: &[u8] = &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];
    const OLE2: &[u8] = &[0xD0, 0xCF, 0x11, 0xE0, 0xA1, 0xB1, 0x1A, 0xE1];
    const ZIP: &[u8] = b"PK\x03\x04";

    if bytes.starts_with(b"%PDF-") {
        Some("application/pdf")
    } else if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
        Some("image/jpeg")
    } else if bytes.starts_with(PNG) {
        Some("image/png")
    } else if bytes.starts_with(OLE2) {
        Some("application/msword")
    } else if bytes.starts_with(ZIP) {
        let window = &bytes[..bytes.len().min(DOCX_SNIFF_WINDOW)];
        if window.windows(5).any(|w| w == b"word/") {
            Some(DOCX_MIME)
        } else {
            Some("application/zip")
        }
    } else {
        None
    }
}

fn declared_agrees(declared: &str, sniffed: &str, extension: Option<&str>) -> bool {
    let declared = declared
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    if declared.is_empty() || declared == "application/octet-stream" || declared == sniffed {
        return true;
    }
    let family = |mime: &str| mime.split('/').next().unwrap_or_default().to_string();
    if family(&declared) == "image" && family(sniffed) == "image" {
        return true;
    }
    // Browsers send whatever the OS maps the extension to.
    extension.is_some_and(|ext| {
        mime_guess::from_ext(ext)
            .iter()
            .any(|guess| guess.essence_str() == declared && guess.essence_str() == sniffed)
    })
}

fn extension_of(filename: &str) -> Option<String> {
    let (stem, ext) = filename.rsplit_once('.')?;
    if stem.is_empty() || ext.is_empty() {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

/// Strips path components, turns spaces into `_`, keeps only
/// `[A-Za-z0-9_.-]`, collapses runs of dots and prefixes a leading dot with
/// `file`. The result is always usable inside an object key.
pub fn sanitize_filename(filename: &str) -> String {
    let base = filename
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default();
    let mut cleaned = String::with_capacity(base.len());
    for c in base.chars() {
        let c = if c == ' ' { '_' } else { c };
        if !(c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.')) {
            continue;
        }
        if c == '.' && cleaned.ends_with('.') {
            continue;
        }
        cleaned.push(c);
    }
    if cleaned.starts_with('.') {
        cleaned.insert_str(0, "file");
    }
    cleaned
}

pub fn validate_title(title: &str, errors: &mut ValidationErrors) {
    if title.trim().is_empty() {
        errors.add("title", "this field may not be blank");
    } else if title.chars().count() > MAX_TITLE_LEN {
        errors.add(
            "title",
            format!("ensure this field has no more than {MAX_TITLE_LEN} characters"),
        );
    }
}

pub fn parse_document_type(raw: Option<&str>, errors: &mut ValidationErrors) -> Option<DocumentType> {
    match raw.map(str::trim) {
        None | Some("") => {
            errors.add("document_type", "this field is required");
            None
        }
        Some(value) => match value.parse::<DocumentType>() {
            Ok(document_type) => Some(document_type),
            Err(_) => {
                errors.add("document_type", format!("\"{value}\" is not a valid choice"));
                None
            }
        },
    }
}

pub fn validate_name(field: &str, value: &str, errors: &mut ValidationErrors) {
    if value.trim().is_empty() {
        errors.add(field, "this field may not be blank");
    } else if value.chars().count() > 100 {
        errors.add(field, "ensure this field has no more than 100 characters");
    }
}

/// Loose shape check: one `@`, a non-empty local part and a dotted domain.
pub fn validate_email(value: &str, errors: &mut ValidationErrors) {
    let plausible = value.split_once('@').is_some_and(|(local, domain)| {
        !local.is_empty()
            && !domain.contains('@')
            && domain.contains('.')
            && !domain.starts_with('.')
            && !domain.ends_with('.')
            && !value.contains(char::is_whitespace)
    });
    if !plausible {
        errors.add("email", "enter a valid email address");
    }
}

pub fn validate_phone(value: &str, errors: &mut ValidationErrors) {
    if value.trim().is_empty() {
        errors.add("phone", "this field may not be blank");
    } else if value.chars().count() > MAX_PHONE_LEN {
        errors.add(
            "phone",
            format!("ensure this field has no more than {MAX_PHONE_LEN} characters"),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pdf() -> Vec<u8> {
        b"%PDF-1.4\n1 0 obj (Hello) endobj\n%%EOF".to_vec()
    }

    fn candidate<'a>(filename: &'a str, bytes: &'a [u8]) -> UploadCandidate<'a> {
        UploadCandidate {
            filename,
            declared_content_type: None,
            bytes,
        }
    }

    #[test]
    fn accepts_a_pdf() {
        let bytes = pdf();
        let upload = validate_upload(candidate("My Passport.pdf", &bytes), &UploadPolicy::default())
            .unwrap();
        assert_eq!(upload.filename, "My_Passport.pdf");
        assert_eq!(upload.content_type, "application/pdf");
        assert_eq!(upload.size, bytes.len() as i64);
    }

    #[test]
    fn rejects_oversized_files() {
        let bytes = pdf();
        let policy = UploadPolicy {
            max_upload_size: 8,
            ..UploadPolicy::default()
        };
        let errors = validate_upload(candidate("a.pdf", &bytes), &policy).unwrap_err();
        assert!(errors.field("file").unwrap()[0].contains("maximum allowed size"));
    }

    #[test]
    fn rejects_disallowed_extension_and_content() {
        let errors = validate_upload(
            candidate("payload.exe", b"MZ\x90\x00binary"),
            &UploadPolicy::default(),
        )
        .unwrap_err();
        let reasons = errors.field("file").unwrap();
        assert_eq!(reasons.len(), 2);
    }

    #[test]
    fn content_must_match_extension() {
        let bytes = pdf();
        let errors =
            validate_upload(candidate("photo.png", &bytes), &UploadPolicy::default()).unwrap_err();
        assert!(errors.field("file").unwrap()[0].contains("does not match extension"));
    }

    #[test]
    fn declared_type_must_agree_with_content() {
        let bytes = pdf();
        let upload = UploadCandidate {
            filename: "a.pdf",
            declared_content_type: Some("image/png"),
            bytes: &bytes,
        };
        assert!(validate_upload(upload, &UploadPolicy::default()).is_err());

        let upload = UploadCandidate {
            declared_content_type: Some("application/pdf; charset=binary"),
            ..upload
        };
        assert!(validate_upload(upload, &UploadPolicy::default()).is_ok());
    }

    #[test]
    fn empty_files_are_rejected() {
        let errors =
            validate_upload(candidate("a.pdf", b""), &UploadPolicy::default()).unwrap_err();
        assert_eq!(errors.field("file").unwrap(), ["the submitted file is empty"]);
    }

    #[test]
    fn sniffs_office_formats() {
        let mut docx = b"PK\x03\x04".to_vec();
        docx.extend_from_slice(b"....[Content_Types].xml....word/document.xml");
        assert_eq!(sniff_mime(&docx), Some(DOCX_MIME));
        assert_eq!(sniff_mime(b"PK\x03\x04plain zip"), Some("application/zip"));
        assert_eq!(
            sniff_mime(&[0xD0, 0xCF, 0x11, 0xE0, 0xA1, 0xB1, 0x1A, 0xE1, 0]),
            Some("application/msword")
        );
        assert_eq!(sniff_mime(&[0xFF, 0xD8, 0xFF, 0xE0]), Some("image/jpeg"));
        assert_eq!(sniff_mime(b"plain text"), None);
    }

    #[test]
    fn sanitizes_filenames() {
        assert_eq!(sanitize_filename("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_filename("C:\\docs\\bank statement.pdf"), "bank_statement.pdf");
        assert_eq!(sanitize_filename(".hidden.pdf"), "file.hidden.pdf");
        assert_eq!(sanitize_filename("résumé<1>.pdf"), "rsum1.pdf");
        assert_eq!(sanitize_filename("???"), "");
        assert_eq!(sanitize_filename("scan..final.pdf"), "scan.final.pdf");
        assert_eq!(sanitize_filename("a.<>.pdf"), "a.pdf");
        assert_eq!(sanitize_filename(".."), "file.");
    }

    #[test]
    fn sanitized_names_are_valid_key_segments() {
        use crate::services::storage::ensure_key_safe;
        for name in ["scan..final.pdf", "...pdf", "a . . b.pdf", "x/../..pdf"] {
            let cleaned = sanitize_filename(name);
            assert!(ensure_key_safe(&format!("documents/{cleaned}")).is_ok(), "{name} -> {cleaned}");
        }
    }

    #[test]
    fn collects_field_errors() {
        let mut errors = ValidationErrors::new();
        validate_title("", &mut errors);
        parse_document_type(Some("tarot_card"), &mut errors);
        validate_email("not-an-email", &mut errors);
        validate_phone("+61 400 000 000 000 000 000", &mut errors);
        let fields: Vec<&str> = errors.fields().collect();
        assert_eq!(fields, ["document_type", "email", "phone", "title"]);
        assert_eq!(
            serde_json::to_value(&errors).unwrap()["title"][0],
            "this field may not be blank"
        );
    }
}
