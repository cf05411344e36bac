//! Turn photographed receipts into structured line items.
//!
//! The pipeline runs strictly forward:
//!
//! 1. [`quality`] rejects images unlikely to OCR well.
//! 2. [`preprocess`] applies a deliberately small set of image operations.
//! 3. [`ocr`] wraps an external OCR engine and normalises its output into
//!    [`ocr::OcrLine`]s.
//! 4. [`parser`] classifies lines and assembles a [`parser::ParsedReceipt`].
//! 5. [`confidence`] grades the result and produces recommendations.
//!
//! [`pipeline::ReceiptPipeline`] strings these together. Everything except
//! the OCR adapter is stateless and safe to call concurrently.

pub mod async_utils;
pub mod cmd;
pub mod config;
pub mod confidence;
pub mod cpu_limit;
pub mod data_url;
pub mod error;
pub mod intake;
pub mod ocr;
pub mod parser;
pub mod pipeline;
pub mod prelude;
pub mod preprocess;
pub mod quality;
pub mod ui;
pub mod work;

#[cfg(test)]
pub(crate) mod test_support;
