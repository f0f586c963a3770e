//! Contract document analysis: OCR-backed text extraction, PII masking,
//! and a multi-stage model pipeline producing classified, reviewed and
//! summarized contract reports.
//!
//! The typical flow is [`driver::DocumentProcessor::process`]: pick an
//! extraction path by file kind, optionally mask personal data, run the
//! analysis stage graph, restore masked data into the outputs, and either
//! keep the result in clear text or encrypt it at rest depending on the
//! caller's retention decision. Each layer is also usable on its own:
//! [`extract`] for file-to-text, [`ocr`] for the provider chain with
//! quality-based fallback, [`analysis`] for the stage pipeline over
//! already-extracted text.

pub mod analysis;
pub mod config;
pub mod crypto;
pub mod driver;
pub mod extract;
pub mod ocr;
pub mod pii;
pub mod pool;
