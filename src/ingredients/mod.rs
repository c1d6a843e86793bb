//! Photo-to-list flow: an extraction service reads ingredient names off an
//! image, the user picks which ones to keep, and the picks are inserted in
//! one batch.

mod client;
mod selection;

use thiserror::Error;

pub use client::IngredientClient;
pub use selection::IngredientSelection;

#[derive(Error, Debug)]
pub enum IngredientError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Server error: {status} - {message}")]
    Server { status: u16, message: String },
    #[error("Unexpected response: {0}")]
    Decode(String),
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
    #[error("Please select at least one ingredient")]
    EmptySelection,
}
