use axum::body::Bytes;
use axum::extract::Multipart;
use garde::Validate;

use crate::error::{AppError, AppResult};
use crate::models::record::Location;

/// A file part of a multipart upload.
#[derive(Debug)]
pub struct UploadedFile {
    pub filename: String,
    pub content_type: Option<String>,
    pub bytes: Bytes,
}

/// Fields shared by the classification uploads.
#[derive(Debug, Default)]
pub struct Upload {
    pub file: Option<UploadedFile>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub include_frames: bool,
}

impl Upload {
    pub async fn read(mut multipart: Multipart) -> AppResult<Self> {
        let mut upload = Upload::default();

        while let Some(field) = multipart.next_field().await? {
            let name = field.name().unwrap_or_default().to_string();
            match name.as_str() {
                "file" => {
                    let filename = field.file_name().unwrap_or("upload").to_string();
                    let content_type = field.content_type().map(str::to_string);
                    let bytes = field.bytes().await?;
                    upload.file = Some(UploadedFile {
                        filename,
                        content_type,
                        bytes,
                    });
                }
                "latitude" => upload.latitude = parse_coordinate(&name, &field.text().await?)?,
                "longitude" => upload.longitude = parse_coordinate(&name, &field.text().await?)?,
                "include_frames" => upload.include_frames = parse_flag(&field.text().await?),
                other => tracing::debug!(field = other, "Ignoring unknown upload field"),
            }
        }

        Ok(upload)
    }

    pub fn take_file(&mut self) -> AppResult<UploadedFile> {
        self.file
            .take()
            .ok_or_else(|| AppError::Validation("No file uploaded".into()))
    }

    /// Client-supplied location, range checked.
    pub fn location(&self) -> AppResult<Location> {
        let location = Location::new(self.latitude, self.longitude);
        location
            .validate()
            .map_err(|e| AppError::Validation(format!("Invalid location: {e}")))?;
        Ok(location)
    }
}

fn parse_coordinate(name: &str, value: &str) -> AppResult<Option<f64>> {
    let value = value.trim();
    if value.is_empty() {
        return Ok(None);
    }
    value
        .parse::<f64>()
        .map(Some)
        .map_err(|_| AppError::Validation(format!("{name} must be a number, got {value:?}")))
}

fn parse_flag(value: &str) -> bool {
    matches!(value.trim().to_ascii_lowercase().as_str(), "true" | "1" | "yes" | "on")
}
