//! Uploaded client documents and their processing state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, types::Json};
use uuid::Uuid;

use crate::services::storage::ObjectLocation;

text_enum! {
    /// Business classification of an uploaded file.
    pub enum DocumentType {
        Passport => "passport",
        Photo => "photo",
        BirthCertificate => "birth_certificate",
        MarriageCertificate => "marriage_certificate",
        BankStatement => "bank_statement",
        TaxReturn => "tax_return",
        FinancialProof => "financial_proof",
        Degree => "degree",
        Transcript => "transcript",
        EnglishTest => "english_test",
        EmploymentLetter => "employment_letter",
        Payslip => "payslip",
        Resume => "resume",
        ReferenceLetter => "reference_letter",
        ApplicationForm => "application_form",
        VisaApplication => "visa_application",
        PoliceClearance => "police_clearance",
        Medical => "medical",
        Other => "other",
    }
}

impl DocumentType {
    /// Extraction category used by the processing pipeline.
    pub fn category(&self) -> &'static str {
        match self {
            Self::Passport | Self::Photo | Self::BirthCertificate => "identity",
            Self::BankStatement | Self::TaxReturn | Self::FinancialProof => "financial",
            Self::Degree | Self::Transcript | Self::EnglishTest => "educational",
            Self::EmploymentLetter | Self::Payslip | Self::Resume => "employment",
            _ => "generic",
        }
    }
}

text_enum! {
    /// Processing status. Legal moves live in `services::lifecycle`.
    pub enum DocumentStatus {
        Uploaded => "uploaded",
        Processing => "processing",
        Processed => "processed",
        Verified => "verified",
        Rejected => "rejected",
        /// Processing retries were exhausted; a human may reprocess.
        Failed => "failed",
    }
}

/// Storage class recorded for a document's backing object.
pub const STORAGE_CLASS_STANDARD: &str = "STANDARD";

/// A document row. `object_key` never changes once written.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct Document {
    pub id: Uuid,
    pub client_id: Uuid,
    pub document_type: DocumentType,
    pub title: String,
    pub description: Option<String>,

    /// Size in bytes.
    pub file_size: i64,
    /// MIME type detected at upload.
    pub file_type: String,
    pub original_filename: String,

    pub bucket: String,
    pub object_key: String,
    /// Provider region name, e.g. `ap-southeast-2`.
    pub region: String,
    pub storage_class: String,
    pub etag: Option<String>,

    pub status: DocumentStatus,
    pub extracted_data: Option<Json<serde_json::Value>>,
    pub ocr_text: Option<String>,
    pub processing_error: Option<String>,

    pub verified_by: Option<Uuid>,
    pub verified_at: Option<DateTime<Utc>>,
    pub verification_notes: Option<String>,

    pub uploaded_by: Option<Uuid>,
    pub uploaded_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
    pub archived_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,

    /// Bumped on every write; status updates are conditional on it.
    pub version: i64,
}

impl Document {
    pub fn location(&self) -> ObjectLocation {
        ObjectLocation {
            bucket: self.bucket.clone(),
            key: self.object_key.clone(),
            region: self.region.clone(),
        }
    }

    pub fn file_size_mb(&self) -> f64 {
        (self.file_size as f64 / (1024.0 * 1024.0) * 100.0).round() / 100.0
    }
}

/// Lightweight projection used by document listings.
#[derive(Serialize, Clone, FromRow, Debug)]
pub struct DocumentListItem {
    pub id: Uuid,
    pub client_id: Uuid,
    pub client_name: String,
    pub document_type: DocumentType,
    pub title: String,
    pub status: DocumentStatus,
    pub file_size: i64,
    pub uploaded_at: DateTime<Utc>,
    pub uploaded_by_name: String,
}
